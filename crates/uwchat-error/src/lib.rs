use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

#[cfg(feature = "axum")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};

/// Unified error type for the chat service.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum ChatError {
    // === Request errors ===
    #[error("invalid request: {message}")]
    Validation { message: String },

    #[error("human verification failed: {message}")]
    Verification { message: String },

    #[error("daily request quota of {limit} exceeded")]
    QuotaExceeded { limit: u32 },

    // === External service errors ===
    #[error("embedding service error ({provider})")]
    EmbeddingService { provider: String, message: String },

    #[error("completion service error ({provider})")]
    LlmService { provider: String, message: String },

    #[error("vector store error: {operation} failed")]
    VectorStore { operation: String, message: String },

    #[error("counter store error: {operation} failed")]
    CounterStore { operation: String, message: String },

    #[error("network error: {operation}")]
    Network { operation: String, message: String },

    #[error("timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    // === System errors ===
    #[error("configuration error: {key} - {reason}")]
    Configuration { key: String, reason: String },

    #[error("serialization error: {format}")]
    Serialization { format: String, message: String },

    #[error("internal error: {message}")]
    Internal {
        message: String,
        details: Option<String>,
    },
}

/// Error severity, used to pick the log level at the orchestration layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Low,      // expected request-level errors
    Medium,   // degraded external dependency, chat still answers
    High,     // affects the core feature
    Critical, // misconfiguration, needs operator attention
}

impl ChatError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ChatError::Validation { .. }
            | ChatError::Verification { .. }
            | ChatError::QuotaExceeded { .. } => ErrorSeverity::Low,
            ChatError::EmbeddingService { .. }
            | ChatError::LlmService { .. }
            | ChatError::CounterStore { .. }
            | ChatError::Network { .. }
            | ChatError::Timeout { .. } => ErrorSeverity::Medium,
            ChatError::VectorStore { .. } | ChatError::Serialization { .. } => ErrorSeverity::High,
            ChatError::Configuration { .. } | ChatError::Internal { .. } => ErrorSeverity::Critical,
        }
    }

    /// Log with a level matching the severity.
    pub fn log(&self, component: &str) {
        match self.severity() {
            ErrorSeverity::Low | ErrorSeverity::Medium => {
                warn!(component, error = %self, "request degraded");
            }
            ErrorSeverity::High | ErrorSeverity::Critical => {
                error!(component, error = %self, severity = ?self.severity(), "request failed");
            }
        }
    }

    pub fn to_http_status(&self) -> u16 {
        match self {
            ChatError::Validation { .. } => 400,
            ChatError::Verification { .. } => 400,
            ChatError::QuotaExceeded { .. } => 429,
            ChatError::Timeout { .. } => 408,
            _ => 500,
        }
    }

    /// User-facing message; never leaks provider payloads.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Validation { .. } => {
                "The request was malformed, please check it and retry".to_string()
            }
            ChatError::Verification { .. } => {
                "Human verification failed, please retry the challenge".to_string()
            }
            ChatError::QuotaExceeded { .. } => {
                "Daily request limit reached, please try again tomorrow".to_string()
            }
            ChatError::Timeout { .. } => "The request timed out, please retry".to_string(),
            _ => "An internal error occurred while processing your request".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

// === Conversions ===

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Serialization {
            format: "json".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChatError::Timeout {
                operation: "http_request".to_string(),
                timeout_ms: 30000,
            }
        } else if err.is_connect() {
            ChatError::Network {
                operation: "connect".to_string(),
                message: err.to_string(),
            }
        } else {
            ChatError::Network {
                operation: "http_request".to_string(),
                message: err.to_string(),
            }
        }
    }
}

impl From<redis::RedisError> for ChatError {
    fn from(err: redis::RedisError) -> Self {
        ChatError::CounterStore {
            operation: "redis_command".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<qdrant_client::QdrantError> for ChatError {
    fn from(err: qdrant_client::QdrantError) -> Self {
        ChatError::VectorStore {
            operation: "qdrant_client".to_string(),
            message: err.to_string(),
        }
    }
}

// Axum integration
#[cfg(feature = "axum")]
impl IntoResponse for ChatError {
    fn into_response(self) -> axum::response::Response {
        let status_code = match self {
            ChatError::Validation { .. } | ChatError::Verification { .. } => {
                StatusCode::BAD_REQUEST
            }
            ChatError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ChatError::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "message": self.user_message()
        });

        (status_code, Json(body)).into_response()
    }
}
