use serde::{Deserialize, Serialize};

use crate::error::RealtimeLinkError;

/// Error body attached to a rejected acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: String,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<ErrorDetail> for RealtimeLinkError {
    fn from(detail: ErrorDetail) -> Self {
        RealtimeLinkError::ServerError {
            code: detail.code,
            message: detail.message,
        }
    }
}
