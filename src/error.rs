use alloc::sync::Arc;
use std::io;

use thiserror::Error;

/// Errors raised while rendering or streaming a tree.
///
/// The type is cheap to clone so the same failure can be reported to the
/// error callback, the lifecycle callbacks and the destination.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    /// A component or a deferred value failed.
    #[error("{0:#}")]
    Component(Arc<anyhow::Error>),
    /// The render was aborted before this part completed.
    #[error("{0}")]
    Aborted(String),
    /// A tag name that cannot be written safely.
    #[error("invalid tag: {0}")]
    InvalidTag(String),
    /// An attribute name that cannot be written safely.
    #[error("invalid attribute name: {0}")]
    InvalidAttribute(String),
    /// An element whose content cannot be expressed in markup.
    #[error("invalid element content: {0}")]
    InvalidContent(String),
    /// The destination reported a failure.
    #[error("destination failed: {0}")]
    Destination(String),
    /// The stream ended before producing what was asked for.
    #[error("render closed: {0}")]
    Closed(String),
    /// Internal bookkeeping went wrong. This is a bug in cascade.
    #[error("internal invariant violated: {0}")]
    Invariant(&'static str),
    /// Options could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RenderError {
    /// Whether this error came from an abort rather than a failure.
    #[must_use]
    pub const fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}

impl From<anyhow::Error> for RenderError {
    fn from(error: anyhow::Error) -> Self {
        Self::Component(Arc::new(error))
    }
}

impl From<io::Error> for RenderError {
    fn from(error: io::Error) -> Self {
        Self::Destination(error.to_string())
    }
}

impl From<serde_json::Error> for RenderError {
    fn from(error: serde_json::Error) -> Self {
        Self::Config(error.to_string())
    }
}
