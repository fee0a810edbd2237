//! # Core Error Kinds
//!
//! The worker and performance engine report status through a small closed
//! set of machine-readable kinds. Application-level plumbing
//! (CLI, demo binary, rendezvous transport) keeps using `anyhow::Result`
//! the way the rest of this codebase does; `CoreError` is reserved for the
//! handful of call sites that need to distinguish, say, `Unsupported` from
//! `InvalidParam` programmatically rather than just print a message.

use thiserror::Error;

/// Closed set of status kinds produced by the worker/perf core.
///
/// `Ok` is deliberately absent: successful operations return `Ok(T)` from
/// a `Result<T, CoreError>`, they don't carry a variant of this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("invalid parameter")]
    InvalidParam,
    #[error("unsupported")]
    Unsupported,
    #[error("no memory")]
    NoMemory,
    #[error("no device")]
    NoDevice,
    #[error("io error")]
    IoError,
    #[error("operation in progress")]
    InProgress,
    #[error("busy")]
    Busy,
    #[error("no resource")]
    NoResource,
    #[error("fatal")]
    Fatal,
}

/// An error carrying one of the closed [`ErrorKind`]s plus a human-readable
/// diagnostic. The diagnostic is always populated; whether it's surfaced to
/// a human is gated by the caller's VERBOSE flag, not by this type.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_param(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParam, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, message)
    }

    pub fn no_resource(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoResource, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display_is_stable() {
        assert_eq!(ErrorKind::InvalidParam.to_string(), "invalid parameter");
        assert_eq!(ErrorKind::Unsupported.to_string(), "unsupported");
    }

    #[test]
    fn core_error_carries_kind_and_message() {
        let err = CoreError::invalid_param("message size 0 is below min 1");
        assert_eq!(err.kind, ErrorKind::InvalidParam);
        assert!(err.message.contains("message size"));
    }
}
