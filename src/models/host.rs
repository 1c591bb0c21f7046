// Errors as they cross the host boundary: a stable code plus a message

use crate::models::pose::PoseError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "INIT_ERROR")]
    InitError,
    #[serde(rename = "NOT_INITIALIZED")]
    NotInitialized,
    #[serde(rename = "PROCESS_ERROR")]
    ProcessError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InitError => "INIT_ERROR",
            ErrorCode::NotInitialized => "NOT_INITIALIZED",
            ErrorCode::ProcessError => "PROCESS_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct HostError {
    pub code: ErrorCode,
    pub message: String,
}

impl HostError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Error raised by `initialize`
    pub fn init(err: PoseError) -> Self {
        match err {
            PoseError::NotInitialized => Self::not_initialized(),
            other => Self::new(
                ErrorCode::InitError,
                format!("Failed to initialize pose landmarker: {}", other),
            ),
        }
    }

    /// Error raised by `process_video`
    pub fn process(err: PoseError) -> Self {
        match err {
            PoseError::NotInitialized => Self::not_initialized(),
            other => Self::new(
                ErrorCode::ProcessError,
                format!("Failed to process video: {}", other),
            ),
        }
    }

    pub fn not_initialized() -> Self {
        Self::new(ErrorCode::NotInitialized, "Pose landmarker not initialized")
    }
}
