//! Error types for every pipeline stage.
//!
//! Per-subtree failures ([`ClientBundleError`]) are recovered into warnings;
//! everything else aborts the single request it belongs to.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::paginate::PaginationState;

/// Configuration or manifest could not be loaded.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A stylesheet reference could not be turned into CSS. Document-fatal.
#[derive(Error, Debug)]
pub enum StyleResolutionError {
    #[error("stylesheet not found: {path}")]
    MissingStylesheet {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stylesheet is empty: {origin}")]
    EmptyStylesheet { origin: String },
}

/// One client component could not be bundled. Degrades that subtree only.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientBundleError {
    #[error("client component {id}: cannot resolve module {specifier:?}: {reason}")]
    Unresolved {
        id: String,
        specifier: String,
        reason: String,
    },

    #[error("client component {id}: props cannot be serialised: {reason}")]
    Props { id: String, reason: String },
}

impl ClientBundleError {
    /// Id of the placeholder left empty by this failure.
    pub fn id(&self) -> &str {
        match self {
            ClientBundleError::Unresolved { id, .. } | ClientBundleError::Props { id, .. } => id,
        }
    }
}

/// Failure reported by a rendering engine round trip.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// A script threw or the page reported a script error.
    #[error("script error: {0}")]
    Script(String),

    /// The engine could not be reached or answered nonsense.
    #[error("engine error: {0}")]
    Protocol(String),

    #[error("no engine instance available: {0}")]
    Unavailable(String),
}

/// Document-level pagination failure. The engine is always released first.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PaginationError {
    #[error("pagination timed out in state {state:?} after {after:?}")]
    Timeout {
        state: PaginationState,
        after: Duration,
    },

    #[error("script error in state {state:?}: {message}")]
    Script {
        state: PaginationState,
        message: String,
    },

    #[error("rendering engine failed in state {state:?}: {message}")]
    Engine {
        state: PaginationState,
        message: String,
    },

    #[error("pagination cancelled in state {state:?}")]
    Cancelled { state: PaginationState },
}

impl PaginationError {
    pub(crate) fn from_engine(state: PaginationState, err: EngineError) -> Self {
        match err {
            EngineError::Script(message) => PaginationError::Script { state, message },
            other => PaginationError::Engine {
                state,
                message: other.to_string(),
            },
        }
    }

    /// Timeouts may be retried by the caller; nothing else should be.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PaginationError::Timeout { .. })
    }
}

/// Why a single backend attempt failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendFailure {
    /// Transport-level failure; worth another attempt.
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// The backend refused the document.
    #[error("backend rejected the document (status {status:?}): {diagnostic}")]
    Rejected {
        status: Option<u16>,
        diagnostic: String,
    },
}

/// Conversion to PDF failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    #[error("conversion backend unavailable after {attempts} attempt(s): {reason}")]
    Unavailable { attempts: u32, reason: String },

    #[error("conversion rejected (status {status:?}): {diagnostic}")]
    Rejected {
        status: Option<u16>,
        diagnostic: String,
    },

    #[error("conversion cancelled")]
    Cancelled,
}

impl ConversionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConversionError::Unavailable { .. })
    }
}

/// Everything that can abort a single render request.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Style(#[from] StyleResolutionError),

    #[error(transparent)]
    Pagination(#[from] PaginationError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("render cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_script_errors_map_to_script_variant() {
        let err = PaginationError::from_engine(
            PaginationState::ScriptsAttached,
            EngineError::Script("boom".into()),
        );
        assert_eq!(
            err,
            PaginationError::Script {
                state: PaginationState::ScriptsAttached,
                message: "boom".into()
            }
        );
        let err = PaginationError::from_engine(
            PaginationState::Loaded,
            EngineError::Protocol("socket closed".into()),
        );
        assert!(matches!(err, PaginationError::Engine { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = ConversionError::Unavailable {
            attempts: 4,
            reason: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "conversion backend unavailable after 4 attempt(s): connection refused"
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn stage_errors_fold_into_render_error() {
        let err: RenderError = ConversionError::Cancelled.into();
        assert!(matches!(err, RenderError::Conversion(ConversionError::Cancelled)));
    }
}
