//! Error types.

use std::fmt;

/// Errors reported by collector and mutator operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GcError {
    /// Scratch space for a collection pass could not be allocated.
    ///
    /// The heap is left exactly as it was before the pass started.
    OutOfMemory,
    /// A collection is already running; nested requests are rejected.
    CollectionInProgress,
    /// The collector runs in serial mode and already has an attached mutator.
    SerialModeThreadLimit,
    /// The mutator is registered with a different collector.
    ThreadNotAttached,
    /// The reference does not name a live object.
    InvalidReference,
}

impl fmt::Display for GcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "gc: out of memory for collector scratch space"),
            Self::CollectionInProgress => write!(f, "gc: collection already in progress"),
            Self::SerialModeThreadLimit => {
                write!(f, "gc: serial mode supports a single attached mutator")
            }
            Self::ThreadNotAttached => write!(f, "gc: mutator belongs to another collector"),
            Self::InvalidReference => write!(f, "gc: reference to a dead object"),
        }
    }
}

impl std::error::Error for GcError {}

/// An error raised by user code running inside a finalizer or callback.
///
/// These never abort a collection; they are reported as unraisable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackError {
    message: String,
}

impl CallbackError {
    /// Create an error carrying `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The message passed at construction.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CallbackError {}

/// Abort on heap corruption.
///
/// Double frees, negative reference counts and broken tracking invariants
/// mean the heap can no longer be trusted, so there is nothing to unwind to.
#[cold]
#[track_caller]
pub(crate) fn fatal_error(what: &str) -> ! {
    panic!("rcgc fatal error: {what}");
}
