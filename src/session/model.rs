//! Credential, identity, and session state.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Bearer token plus expiry. The token never appears in `Debug` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "CredentialRecord", into = "CredentialRecord")]
pub struct Credential {
    pub token: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            expires_at,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn same_token(&self, other: &Credential) -> bool {
        self.token.expose_secret() == other.token.expose_secret()
    }
}

/// Wire and storage shape of a credential.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialRecord {
    token: String,
    expires_at: DateTime<Utc>,
}

impl From<CredentialRecord> for Credential {
    fn from(record: CredentialRecord) -> Self {
        Self::new(record.token, record.expires_at)
    }
}

impl From<Credential> for CredentialRecord {
    fn from(credential: Credential) -> Self {
        Self {
            token: credential.token.expose_secret().to_string(),
            expires_at: credential.expires_at,
        }
    }
}

/// The user record returned by credential validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub phone_verified: bool,
}

/// Result of completing a magic-link sign-in.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "AuthGrantRecord")]
pub struct AuthGrant {
    pub credential: Credential,
    pub user: Identity,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthGrantRecord {
    token: String,
    expires_at: DateTime<Utc>,
    user: Identity,
}

impl From<AuthGrantRecord> for AuthGrant {
    fn from(record: AuthGrantRecord) -> Self {
        Self {
            credential: Credential::new(record.token, record.expires_at),
            user: record.user,
        }
    }
}

/// Authentication state.
///
/// `Unknown → Authenticating → {Authenticated, Anonymous}`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Unknown,
    Authenticating,
    Authenticated(Identity),
    Anonymous,
}

impl SessionState {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Authenticated(identity) => write!(f, "authenticated({})", identity.id),
            Self::Anonymous => write!(f, "anonymous"),
        }
    }
}
