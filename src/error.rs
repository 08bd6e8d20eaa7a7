//! Error types for trellis.
//!
//! Per-buffer flow conditions live in [`crate::flow`]; this module holds the
//! construction-time and control-plane errors.

use std::fmt;

use thiserror::Error;

use crate::registry::PluginError;

/// Result type alias using trellis's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for trellis operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Pads could not be linked.
    #[error("link failed: {0}")]
    Link(#[from] LinkError),

    /// A state transition failed.
    #[error(transparent)]
    StateChange(#[from] StateChangeError),

    /// A plugin could not be loaded or did not provide the factory.
    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// Property access failed.
    #[error("property error: {0}")]
    Property(#[from] PropertyError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The persisted registry index is unreadable.
    #[error("registry index error: {0}")]
    Index(String),

    /// No element, pad or factory with that name.
    #[error("not found: {0}")]
    NotFound(String),

    /// Element or bin bookkeeping failure.
    #[error("element error: {0}")]
    Element(#[from] ElementError),

    /// Invalid parent/child operation (duplicate name, already parented).
    #[error("hierarchy error: {0}")]
    Hierarchy(String),
}

/// Reasons a pad link is refused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// Both pads are sources or both are sinks.
    #[error("pads have the same direction")]
    IncompatibleDirection,

    /// One of the pads already has a peer.
    #[error("pad is already linked")]
    AlreadyLinked,

    /// The pads' caps do not intersect.
    #[error("pads have no common format")]
    NoCommonFormat,

    /// The pads belong to the same element.
    #[error("pads belong to the same element")]
    WrongHierarchy,

    /// A pad is not attached to any element.
    #[error("pad has no parent element")]
    NoParent,
}

/// A state transition returned FAILURE.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("state change failed")]
pub struct StateChangeError;

/// Property lookup or assignment failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PropertyError {
    /// The element has no property with that name.
    #[error("unknown property '{0}'")]
    Unknown(String),

    /// The value has the wrong type.
    #[error("property '{name}' expects a value of type {expected}")]
    WrongType {
        /// Property name.
        name: String,
        /// Expected value type.
        expected: &'static str,
    },

    /// The value is outside the allowed range.
    #[error("value out of range for property '{0}'")]
    OutOfRange(String),

    /// The property cannot be written.
    #[error("property '{0}' is read-only")]
    ReadOnly(String),
}

/// Broad category of a fatal element error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorDomain {
    /// Core framework misuse (not negotiated, wrong state).
    Core,
    /// A backing library failed.
    Library,
    /// A resource (file, device, network) failed.
    Resource,
    /// The data stream is broken.
    Stream,
}

impl fmt::Display for ErrorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorDomain::Core => "core",
            ErrorDomain::Library => "library",
            ErrorDomain::Resource => "resource",
            ErrorDomain::Stream => "stream",
        };
        f.write_str(s)
    }
}

/// A fatal element error, posted on the bus rather than thrown.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{domain} error: {message}")]
pub struct ElementError {
    /// Error category.
    pub domain: ErrorDomain,
    /// Human-readable message.
    pub message: String,
    /// Extra details for developers.
    pub debug: Option<String>,
}

impl ElementError {
    /// Create an error without debug details.
    pub fn new(domain: ErrorDomain, message: impl Into<String>) -> Self {
        Self {
            domain,
            message: message.into(),
            debug: None,
        }
    }

    /// Attach debug details.
    pub fn with_debug(mut self, debug: impl Into<String>) -> Self {
        self.debug = Some(debug.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err: Error = LinkError::NoCommonFormat.into();
        assert_eq!(err.to_string(), "link failed: pads have no common format");

        let err: Error = StateChangeError.into();
        assert_eq!(err.to_string(), "state change failed");

        let err = ElementError::new(ErrorDomain::Resource, "device busy").with_debug("EBUSY");
        assert_eq!(err.to_string(), "resource error: device busy");
        assert_eq!(err.debug.as_deref(), Some("EBUSY"));
    }
}
