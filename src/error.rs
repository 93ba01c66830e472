//! Error handling for framehook
//!
//! This module defines the crate-level error type and a Result alias.
//! Layer-specific errors (frame spec validation, pipeline, sinks, hooks)
//! live next to their modules and convert into [`FrameHookError`].

use crate::codec::FrameSpecError;
use crate::hooks::HookError;
use crate::pipeline::PipelineError;
use crate::sink::SinkError;
use thiserror::Error;

/// Main error type for framehook operations
#[derive(Error, Debug)]
pub enum FrameHookError {
    /// The frame description is illegal
    #[error("Frame spec error: {0}")]
    FrameSpec(#[from] FrameSpecError),

    /// Errors raised by the connection runtime
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// A synchronous sink call failed
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// A user hook failed
    #[error("Hook error: {0}")]
    Hook(#[from] HookError),

    /// Errors related to Rhai script compilation or execution
    #[error("Script error: {0}")]
    Script(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<FrameHookError>,
    },
}

impl FrameHookError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        FrameHookError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for framehook operations
pub type Result<T> = std::result::Result<T, FrameHookError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FrameHookError::Config("missing frame section".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing frame section");
    }

    #[test]
    fn test_error_with_context() {
        let err = FrameHookError::Script("test".to_string());
        let with_ctx = err.with_context("Failed to load hooks");
        assert!(with_ctx.to_string().contains("Failed to load hooks"));

        let result: Result<()> = Err(FrameHookError::Config("bad".into()));
        let wrapped = result.with_context(|| format!("opening {}", "tcp:a")).unwrap_err();
        assert_eq!(wrapped.to_string(), "opening tcp:a: Configuration error: bad");
    }

    #[test]
    fn test_frame_spec_error_converts() {
        let err: FrameHookError = FrameSpecError::EmptyChecksumScope.into();
        assert!(err.to_string().starts_with("Frame spec error"));
    }
}
