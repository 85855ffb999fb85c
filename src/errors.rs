//! Typed error hierarchy for the documentation engine.
//!
//! Two top-level enums cover the two failure domains:
//! - `LlmError` — gateway and backend failures, including the exhausted
//!   cascade with its ordered per-backend error list
//! - `EngineError` — configuration, per-module, filesystem, and
//!   cancellation failures surfaced by the scheduler and engine

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the LLM gateway and its backends.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Backend not configured: {0}")]
    Misconfiguration(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Agent command exited with code {exit_code}")]
    CmdNonZeroExit { exit_code: i32 },

    #[error("Agent command produced no output")]
    CmdEmptyOutput,

    #[error("Failed to spawn agent command: {0}")]
    CmdSpawnFailed(#[source] std::io::Error),

    #[error("Response missing choices[0].message.content")]
    MalformedResponse,

    #[error("All {} backends failed", .errors.len())]
    Exhausted { errors: Vec<String> },

    #[error("Request cancelled")]
    Cancelled,
}

impl LlmError {
    /// Whether a retry of the same backend can possibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::ServerError(_) | Self::Transport(_) | Self::Timeout { .. }
        )
    }

    /// Whether this error is a cancellation and must stop the cascade.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Errors from the engine, scheduler, and orchestrator.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Module '{module}' failed: {reason}")]
    ModuleFailed { module: String, reason: String },

    #[error("Filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Wrap an LLM failure as a per-module failure that the scheduler
    /// records without aborting sibling branches.
    pub fn module_failed(module: &str, err: impl std::fmt::Display) -> Self {
        Self::ModuleFailed {
            module: module.to_string(),
            reason: err.to_string(),
        }
    }

    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_carries_ordered_backend_errors() {
        let err = LlmError::Exhausted {
            errors: vec![
                "cmd: exit code 1".to_string(),
                "http(main): 500".to_string(),
                "http(fallback): 500".to_string(),
            ],
        };
        match &err {
            LlmError::Exhausted { errors } => {
                assert_eq!(errors.len(), 3);
                assert!(errors[0].starts_with("cmd"));
            }
            _ => panic!("Expected Exhausted variant"),
        }
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn retryable_classification() {
        assert!(LlmError::RateLimited("429".into()).is_retryable());
        assert!(LlmError::ServerError("500".into()).is_retryable());
        assert!(LlmError::Transport("reset".into()).is_retryable());
        assert!(LlmError::Timeout { seconds: 300 }.is_retryable());
        assert!(!LlmError::Auth("401".into()).is_retryable());
        assert!(!LlmError::MalformedResponse.is_retryable());
        assert!(!LlmError::Cancelled.is_retryable());
    }

    #[test]
    fn module_failed_wraps_llm_exhaustion() {
        let inner = LlmError::Exhausted { errors: vec![] };
        let err = EngineError::module_failed("parser", &inner);
        match &err {
            EngineError::ModuleFailed { module, reason } => {
                assert_eq!(module, "parser");
                assert!(reason.contains("backends failed"));
            }
            _ => panic!("Expected ModuleFailed"),
        }
    }

    #[test]
    fn filesystem_error_carries_path() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = EngineError::filesystem("/docs/module_tree.json", io);
        match &err {
            EngineError::Filesystem { path, source } => {
                assert_eq!(path, &PathBuf::from("/docs/module_tree.json"));
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
            }
            _ => panic!("Expected Filesystem"),
        }
    }

    #[test]
    fn all_error_types_implement_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&LlmError::Cancelled);
        assert_std_error(&EngineError::Cancelled);
    }
}
