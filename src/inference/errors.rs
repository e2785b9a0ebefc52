//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Every variant is
//! fatal to the request in flight; nothing here is retried. Structured logging
//! is the caller's responsibility — these types carry the context needed to
//! build meaningful log entries.

use thiserror::Error;

/// Errors that can occur while formatting, sending or decoding a generate request.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// Missing host/model, or an unreadable config file.
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    /// TCP/HTTP connection to the generation service failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The service did not answer within the configured request timeout.
    #[error("request timeout after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// The response body failed while it was being read.
    #[error("stream error: {reason}")]
    StreamError { reason: String },

    /// Non-2xx HTTP response from the service.
    #[error("error from Ollama (HTTP {status}): {message}")]
    ServiceError { status: u16, message: String },

    /// A streamed line that is not JSON or has no `done` discriminator.
    #[error("error parsing line from Ollama streaming response: {line} ({reason})")]
    MalformedStreamLine { line: String, reason: String },

    /// The body ended before a `done: true` chunk arrived.
    #[error("no final response from Ollama")]
    MissingFinalChunk,

    /// Prompt format mode that the formatter does not know.
    #[error("unsupported format: '{format}'")]
    UnsupportedFormat { format: String },

    /// Message role the selected prompt format cannot place.
    #[error("unsupported message type: {role}")]
    UnsupportedMessageType { role: String },
}

impl InferenceError {
    /// Whether this error came from the transport rather than the service or the payload.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            InferenceError::ConnectionFailed { .. }
                | InferenceError::Timeout { .. }
                | InferenceError::StreamError { .. }
        )
    }

    /// HTTP status of a `ServiceError`.
    pub fn status(&self) -> Option<u16> {
        match self {
            InferenceError::ServiceError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_transport() {
        assert!(InferenceError::ConnectionFailed {
            endpoint: "http://localhost:11434".into(),
            reason: "refused".into(),
        }
        .is_transport());
        assert!(InferenceError::Timeout { duration_secs: 5 }.is_transport());
        assert!(InferenceError::StreamError {
            reason: "reset".into()
        }
        .is_transport());
        assert!(!InferenceError::MissingFinalChunk.is_transport());
        assert!(!InferenceError::ServiceError {
            status: 500,
            message: "boom".into()
        }
        .is_transport());
    }

    #[test]
    fn test_status_only_for_service_errors() {
        let err = InferenceError::ServiceError {
            status: 404,
            message: "model 'nope' not found".into(),
        };
        assert_eq!(err.status(), Some(404));
        assert_eq!(InferenceError::MissingFinalChunk.status(), None);
    }

    #[test]
    fn test_malformed_line_message_names_the_line() {
        let err = InferenceError::MalformedStreamLine {
            line: "{not json".into(),
            reason: "EOF while parsing".into(),
        };
        assert!(err.to_string().contains("{not json"));
    }
}
