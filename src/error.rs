//! Error types for the bridge.
//!
//! This module defines error codes, the error-shaped payload delivered
//! through callbacks, and the main error type raised by public operations.

use crate::lifecycle::LifecycleState;
use serde::{Deserialize, Serialize};

/// Error codes for categorizing failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// A name, namespace, argument count or script exceeded its bound
    ValidationError,
    /// Operation not legal in the current lifecycle state
    InvalidState,
    /// The engine rejected or threw while evaluating a script
    EngineEvaluationError,
    /// A pending call reached its deadline
    Timeout,
    /// A call was registered under a key that is still pending
    Conflict,
    /// A result could not be interpreted as an envelope
    MalformedResult,
    /// A result arrived for a key with no pending call
    UnsolicitedResult,
    /// The pending call was dropped by disposal
    Abandoned,
    /// Serialization/deserialization error
    SerializationError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::ValidationError => write!(f, "VALIDATION_ERROR"),
            ErrorCode::InvalidState => write!(f, "INVALID_STATE"),
            ErrorCode::EngineEvaluationError => write!(f, "ENGINE_EVALUATION_ERROR"),
            ErrorCode::Timeout => write!(f, "TIMEOUT"),
            ErrorCode::Conflict => write!(f, "CONFLICT"),
            ErrorCode::MalformedResult => write!(f, "MALFORMED_RESULT"),
            ErrorCode::UnsolicitedResult => write!(f, "UNSOLICITED_RESULT"),
            ErrorCode::Abandoned => write!(f, "ABANDONED"),
            ErrorCode::SerializationError => write!(f, "SERIALIZATION_ERROR"),
        }
    }
}

/// Failure delivered to a callback in place of a script result.
///
/// Serializes as an envelope so callers parse success and failure the
/// same way: `{"success":false,"error":"...","code":"TIMEOUT"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFailure {
    /// Always false
    pub success: bool,
    /// Human-readable message
    pub error: String,
    /// Error code
    pub code: ErrorCode,
}

impl CallFailure {
    /// Create a new failure
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
            code,
        }
    }

    /// The engine failed to evaluate the script for `key`
    pub fn evaluation(key: &str, cause: &EngineError) -> Self {
        Self::new(
            ErrorCode::EngineEvaluationError,
            format!("Error executing script for '{}': {}", key, cause),
        )
    }

    /// The call for `key` exceeded its deadline
    pub fn timeout(key: &str, timeout_ms: u64) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!("Call '{}' exceeded {}ms deadline", key, timeout_ms),
        )
    }

    /// Render as the result string handed to callbacks
    pub fn to_result_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"success":false,"error":"{}","code":"{}"}}"#,
                self.code, self.code
            )
        })
    }
}

impl std::fmt::Display for CallFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.error)
    }
}

impl std::error::Error for CallFailure {}

/// Error reported by a script engine host
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct EngineError {
    /// Message from the host
    pub message: String,
}

impl EngineError {
    /// Create a new engine error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Main error type for bridge operations
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// A bound was exceeded or input was empty
    #[error("Validation error on {field}: {reason}")]
    Validation {
        /// Offending field
        field: String,
        /// Why it was rejected
        reason: String,
    },

    /// Operation not legal in the current lifecycle state
    #[error("Invalid state for {operation}: bridge is {state}")]
    InvalidState {
        /// Attempted operation
        operation: String,
        /// State at the time of the attempt
        state: LifecycleState,
    },

    /// A call is already pending under this key
    #[error("Call '{key}' is already pending")]
    Conflict {
        /// Conflicting key
        key: String,
    },

    /// Engine host error
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Result string is not a valid envelope
    #[error("Malformed result: {0}")]
    MalformedResult(String),

    /// The pending call was dropped without a result
    #[error("Call '{key}' was abandoned before a result arrived")]
    Abandoned {
        /// Abandoned key
        key: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BridgeError {
    /// Create a validation error
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        BridgeError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(operation: impl Into<String>, state: LifecycleState) -> Self {
        BridgeError::InvalidState {
            operation: operation.into(),
            state,
        }
    }

    /// Error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            BridgeError::Validation { .. } | BridgeError::Config(_) => ErrorCode::ValidationError,
            BridgeError::InvalidState { .. } => ErrorCode::InvalidState,
            BridgeError::Conflict { .. } => ErrorCode::Conflict,
            BridgeError::Engine(_) => ErrorCode::EngineEvaluationError,
            BridgeError::MalformedResult(_) => ErrorCode::MalformedResult,
            BridgeError::Abandoned { .. } => ErrorCode::Abandoned,
            BridgeError::Serialization(_) => ErrorCode::SerializationError,
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Serialization(e.to_string())
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::Timeout.to_string(), "TIMEOUT");
        assert_eq!(
            ErrorCode::EngineEvaluationError.to_string(),
            "ENGINE_EVALUATION_ERROR"
        );
    }

    #[test]
    fn test_call_failure_is_envelope_shaped() {
        let failure = CallFailure::timeout("wallet.balance", 500);
        let raw = failure.to_result_string();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();

        assert_eq!(value["success"], false);
        assert_eq!(value["code"], "TIMEOUT");
        assert!(value["error"].as_str().unwrap().contains("500ms"));
    }

    #[test]
    fn test_evaluation_failure_names_key() {
        let failure = CallFailure::evaluation("sign", &EngineError::new("engine destroyed"));
        assert_eq!(failure.code, ErrorCode::EngineEvaluationError);
        assert!(failure.error.contains("'sign'"));
        assert!(failure.error.contains("engine destroyed"));
    }

    #[test]
    fn test_invalid_state_carries_operation() {
        let err = BridgeError::invalid_state("call_function", LifecycleState::Disposed);
        assert_eq!(err.code(), ErrorCode::InvalidState);
        let message = err.to_string();
        assert!(message.contains("call_function"));
        assert!(message.contains("disposed"));
    }

    #[test]
    fn test_bridge_error_conversion() {
        let err = BridgeError::from(EngineError::new("boom"));
        assert_eq!(err.code(), ErrorCode::EngineEvaluationError);
        assert!(err.to_string().contains("boom"));
    }
}
