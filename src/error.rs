//! Error types for the sync layer.

use std::collections::BTreeMap;
use std::fmt;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Normalized failure categories for every backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    /// Transport failed; no response was received.
    Network,
    /// 401.
    Unauthorized,
    /// 404.
    NotFound,
    /// 4xx carrying field errors.
    Validation,
    /// 5xx.
    ServerError,
    Unknown,
}

impl ApiErrorKind {
    /// Classify an HTTP status. `has_fields` is whether the error body
    /// carried per-field validation messages.
    pub fn from_status(status: u16, has_fields: bool) -> Self {
        match status {
            401 => Self::Unauthorized,
            404 => Self::NotFound,
            400 | 422 => Self::Validation,
            400..=499 if has_fields => Self::Validation,
            500..=599 => Self::ServerError,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::ServerError => "server_error",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// A backend failure as seen by every caller of the gateway.
///
/// `Clone` because a single coalesced failure is handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
    /// Per-field messages, only populated for `Validation`.
    pub fields: BTreeMap<String, String>,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Network, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Unknown, message)
    }

    pub fn with_fields(mut self, fields: BTreeMap<String, String>) -> Self {
        self.fields = fields;
        self
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind == ApiErrorKind::Unauthorized
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ApiErrorKind::NotFound
    }
}

/// Raw transport failures. Never leaves the gateway; converted to
/// `ApiErrorKind::Network`.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Transport failure: {0}")]
    Other(String),
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        ApiError::network(err.to_string())
    }
}

/// Persisted device storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error for key {key}: {reason}")]
    Serialization { key: String, reason: String },
}

/// Errors surfaced by profile updates.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileError {
    #[error("Profile save failed: {0}")]
    Api(#[from] ApiError),

    #[error("No signed-in identity")]
    NoIdentity,

    #[error("Profile has not been loaded")]
    NotLoaded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(ApiErrorKind::from_status(401, false), ApiErrorKind::Unauthorized);
        assert_eq!(ApiErrorKind::from_status(404, false), ApiErrorKind::NotFound);
        assert_eq!(ApiErrorKind::from_status(422, false), ApiErrorKind::Validation);
        assert_eq!(ApiErrorKind::from_status(409, true), ApiErrorKind::Validation);
        assert_eq!(ApiErrorKind::from_status(409, false), ApiErrorKind::Unknown);
        assert_eq!(ApiErrorKind::from_status(503, false), ApiErrorKind::ServerError);
        assert_eq!(ApiErrorKind::from_status(302, false), ApiErrorKind::Unknown);
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = ApiError::new(ApiErrorKind::ServerError, "upstream down");
        assert_eq!(err.to_string(), "server_error: upstream down");
    }
}
