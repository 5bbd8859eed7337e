//! Error types shared across crates.

use thiserror::Error;

/// A message handler or application callback failed while processing one
/// delivered message.
///
/// The failure is confined to that message: the read loop that delivered it
/// logs the error and moves on to the next frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Handler error: {0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl From<String> for HandlerError {
    fn from(reason: String) -> Self {
        Self(reason)
    }
}

impl From<&str> for HandlerError {
    fn from(reason: &str) -> Self {
        Self(reason.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self(format!("payload does not match the expected shape: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = HandlerError::from("missing joint1_angle");
        assert_eq!(err.to_string(), "Handler error: missing joint1_angle");
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        let err = HandlerError::from(json_err);
        assert!(err.0.contains("expected shape"));
    }
}
