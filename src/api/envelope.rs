//! Response envelope decoding.
//!
//! Success: `{ "data": ..., "message"?: ..., "pagination"?: ... }`.
//! Failure: `{ "error": { "message": ..., "fields"?: { name: message } } }`.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::transport::HttpResponse;
use crate::error::{ApiError, ApiErrorKind};

/// Paging metadata attached to list responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub has_more: bool,
}

/// A decoded success envelope. This is what the cache stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

impl Payload {
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            data,
            message: None,
            pagination: None,
        }
    }

    /// Deserialize `data` into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| ApiError::unknown(format!("Unexpected response shape: {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    fields: BTreeMap<String, String>,
}

/// Turn a raw response into a payload or a typed error.
pub(crate) fn decode_response(response: &HttpResponse) -> Result<Payload, ApiError> {
    if response.is_success() {
        if response.body.trim().is_empty() {
            return Ok(Payload::new(serde_json::Value::Null));
        }
        return serde_json::from_str::<Payload>(&response.body).map_err(|e| {
            ApiError::unknown(format!("Malformed success envelope: {e}"))
        });
    }

    let (message, fields) = match serde_json::from_str::<ErrorEnvelope>(&response.body) {
        Ok(envelope) => (envelope.error.message, envelope.error.fields),
        Err(_) => (fallback_message(response.status), BTreeMap::new()),
    };

    let kind = ApiErrorKind::from_status(response.status, !fields.is_empty());
    let err = ApiError::new(kind, message);
    if kind == ApiErrorKind::Validation {
        Err(err.with_fields(fields))
    } else {
        Err(err)
    }
}

fn fallback_message(status: u16) -> String {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}"))
}
