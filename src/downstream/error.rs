//! Downstream invocation errors.

use std::time::Duration;

use thiserror::Error;

/// Ways a calculator invocation can fail.
#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("failed to start calculator: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("calculator did not finish within {0:?}")]
    Timeout(Duration),

    #[error("calculator exited with {code}: {stderr}")]
    NonZeroExit { code: String, stderr: String },

    #[error("calculator returned unparsable output {output:?}")]
    UnparsableOutput { output: String },
}

impl DownstreamError {
    /// Coarse tag used as the `error_type` metric label.
    pub fn error_type(&self) -> &'static str {
        match self {
            DownstreamError::Spawn(_) => "spawn",
            DownstreamError::Timeout(_) => "timeout",
            DownstreamError::NonZeroExit { .. } => "exit_status",
            DownstreamError::UnparsableOutput { .. } => "parse",
        }
    }

    /// A timeout may succeed on a later attempt; the rest will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DownstreamError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_tags() {
        let spawn = DownstreamError::Spawn(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert_eq!(spawn.error_type(), "spawn");
        assert_eq!(DownstreamError::Timeout(Duration::from_secs(1)).error_type(), "timeout");
        assert_eq!(
            DownstreamError::NonZeroExit {
                code: "1".into(),
                stderr: "division by zero".into()
            }
            .error_type(),
            "exit_status"
        );
        assert_eq!(
            DownstreamError::UnparsableOutput { output: "abc".into() }.error_type(),
            "parse"
        );
    }

    #[test]
    fn test_only_timeout_is_retryable() {
        assert!(DownstreamError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!DownstreamError::UnparsableOutput { output: String::new() }.is_retryable());
    }

    #[test]
    fn test_exit_message_carries_stderr() {
        let err = DownstreamError::NonZeroExit {
            code: "exit status: 1".into(),
            stderr: "division by zero".into(),
        };
        assert_eq!(err.to_string(), "calculator exited with exit status: 1: division by zero");
    }
}
