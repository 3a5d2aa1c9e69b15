use serde::{Deserialize, Serialize};

use crate::error::{BookingError, ErrorCode};

/// Uniform result envelope handed to the request layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip)]
    status: u16,
}

impl BookingResponse {
    pub fn ok<T: Serialize>(message: impl Into<String>, data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                success: true,
                message: message.into(),
                code: None,
                data: Some(value),
                status: 200,
            },
            Err(err) => Self {
                success: false,
                message: format!("response encoding failed: {}", err),
                code: Some(ErrorCode::Internal.as_str().to_string()),
                data: None,
                status: 500,
            },
        }
    }

    pub fn failure(err: &BookingError) -> Self {
        Self {
            success: false,
            message: err.message().to_string(),
            code: Some(err.code().as_str().to_string()),
            data: None,
            status: err.status_code(),
        }
    }

    /// Wrap a workflow result; `message` is used on success only.
    pub fn from_result<T: Serialize>(
        result: Result<T, BookingError>,
        message: impl Into<String>,
    ) -> Self {
        match result {
            Ok(data) => Self::ok(message, &data),
            Err(err) => Self::failure(&err),
        }
    }

    pub fn status_code(&self) -> u16 {
        self.status
    }
}
