//! Clone/push wire types.
//!
//! Bodies are JSON with camelCase keys; `files` maps a table file name
//! (`users.json`) to the raw document text.

use crate::error::TdbError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Table file name → raw document text.
pub type TableFiles = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneRequest {
    pub username: String,
    pub password: String,
    pub database: String,
    pub owner_username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloneResponse {
    pub success: bool,
    #[serde(default)]
    pub files: TableFiles,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub username: String,
    pub password: String,
    pub database: String,
    #[serde(default)]
    pub commit_message: String,
    pub owner_username: String,
    #[serde(default)]
    pub files: TableFiles,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub success: bool,
    pub commit_id: String,
}

/// Failure body for any endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
}

impl From<&TdbError> for ErrorBody {
    fn from(err: &TdbError) -> Self {
        Self {
            success: false,
            error: err.to_string(),
        }
    }
}

pub const STATUS_OK: u16 = 200;

/// HTTP status for a failed request.
pub fn status_code(err: &TdbError) -> u16 {
    match err {
        TdbError::Unauthorized(_) => 401,
        TdbError::PermissionDenied(_) => 403,
        TdbError::NotFound { .. } | TdbError::DatabaseNotFound(_) => 404,
        TdbError::AlreadyExists { .. } | TdbError::DuplicateKey { .. } => 409,
        TdbError::InvalidQuery { .. }
        | TdbError::UnknownColumn { .. }
        | TdbError::NoDatabaseSelected
        | TdbError::Corrupt { .. }
        | TdbError::Serialization(_) => 400,
        TdbError::Io { .. } => 500,
    }
}

/// Rebuild an error from a failed response's status and body.
pub fn error_for_status(status: u16, body: &str) -> TdbError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.to_string());
    match status {
        401 => TdbError::Unauthorized(message),
        403 => TdbError::PermissionDenied(message),
        404 => TdbError::not_found("remote resource", message),
        409 => TdbError::already_exists("remote resource", message),
        400 => TdbError::invalid_query(message),
        _ => TdbError::from(std::io::Error::other(format!(
            "sync request failed with status {}: {}",
            status, message
        ))),
    }
}
