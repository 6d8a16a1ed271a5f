// src/error.rs
//
// Error taxonomy for the front-end bridge.
//
// Nothing here is fatal to the page. Errors are returned from the core and
// logged where the UI or a timer callback enters the crate.

use thiserror::Error;

/// Errors that can occur while loading, wiring or driving a device.
#[derive(Debug, Error)]
pub enum DeckError {
    /// Network/HTTP failure or a malformed graph description
    #[error("failed to fetch graph description from '{url}': {reason}")]
    Fetch { url: String, reason: String },

    /// The versioned runtime library could not be retrieved
    #[error("failed to load runtime {version} from '{url}': {reason}")]
    RuntimeLoad {
        version: String,
        url: String,
        reason: String,
    },

    /// The device was referenced before the session became active
    #[error("device is not available yet")]
    DeviceUnavailable,

    /// The device exposes no parameter with this name
    #[error("parameter '{0}' not found")]
    ParameterNotFound(String),

    #[error("step {index} out of range for sequence '{sequence}' of length {length}")]
    IndexOutOfRange {
        sequence: String,
        index: usize,
        length: usize,
    },

    #[error("sequence '{name}' has length {length}, accepted lengths are {accepted:?}")]
    InvalidSequenceLength {
        name: String,
        length: usize,
        accepted: Vec<usize>,
    },

    #[error("unknown sequence '{0}'")]
    UnknownSequence(String),

    /// An expected page element is missing
    #[error("element '{0}' not found")]
    ElementNotFound(String),

    #[error("invalid number input '{0}'")]
    InvalidNumber(String),

    /// `begin` was called before resource loading finished
    #[error("session is not ready for a user gesture yet")]
    SessionNotReady,

    /// A deferred operation was dropped after its retry budget ran out
    #[error("gave up on '{operation}' after {attempts} attempts")]
    RetriesExhausted { operation: String, attempts: u32 },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A browser API call threw or returned something unexpected
    #[error("{operation} failed: {reason}")]
    Browser { operation: String, reason: String },
}

pub type DeckResult<T> = Result<T, DeckError>;

/// Log an error at the point it is caught and carry on without the value.
pub trait LogFailure<T> {
    fn log_failure(self, context: &str) -> Option<T>;

    /// As `log_failure`, building the context only when there is an error.
    fn log_failure_with(self, context: impl FnOnce() -> String) -> Option<T>;
}

impl<T> LogFailure<T> for DeckResult<T> {
    fn log_failure(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e @ DeckError::ElementNotFound(_)) => {
                log::debug!("{context}: {e}");
                None
            }
            Err(e) => {
                log::warn!("{context}: {e}");
                None
            }
        }
    }

    fn log_failure_with(self, context: impl FnOnce() -> String) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => Err::<T, _>(e).log_failure(&context()),
        }
    }
}
