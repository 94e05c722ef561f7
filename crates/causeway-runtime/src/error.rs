//! Bridge failure taxonomy
//!
//! Every failure a boundary call can surface, other than the declared
//! domain errors a call site decodes with its own type (see
//! [`NativeCallError`]). All variants abort the in-progress call; the
//! embedding application decides whether to retry, log, or propagate.

use thiserror::Error;

/// Message used when the native side panicked but could not serialize
/// its own panic message.
pub const GENERIC_PANIC_MESSAGE: &str = "native component panicked (no message available)";

/// Failures raised by the bridge runtime itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The native allocator returned a null backing pointer.
    #[error("native allocator returned null for a {requested}-byte buffer")]
    AllocationFailed { requested: i32 },

    /// The native side reported an error at a call site with no declared
    /// error type. The message is the string-decoded error buffer.
    #[error("native call failed with undeclared error: {message}")]
    UndeclaredError { message: String },

    /// The native side panicked. The message is decoded from the error
    /// buffer when possible, [`GENERIC_PANIC_MESSAGE`] otherwise.
    #[error("native component panicked: {message}")]
    NativePanic { message: String },

    /// The boundary contract was violated: unrecognized status code,
    /// leftover bytes after a decode, a zero handle, use after release,
    /// a handle-map miss, or an encode that outgrew its buffer. Never
    /// expected in correct operation.
    #[error("ffi protocol violation: {message}")]
    Protocol { message: String },

    /// A streaming read ran past the bytes available in the buffer.
    #[error("buffer underflow: read of {requested} bytes with {remaining} remaining")]
    StreamUnderflow { requested: usize, remaining: usize },
}

impl BridgeError {
    /// Shorthand for a [`BridgeError::Protocol`] with a formatted message.
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        BridgeError::Protocol {
            message: message.into(),
        }
    }
}

/// Result of a boundary call with a declared error type `E`.
///
/// `Declared` carries the typed domain error the native side reported and
/// the call site expects; `Bridge` carries everything else (panics,
/// protocol violations, allocation failures).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NativeCallError<E> {
    #[error(transparent)]
    Declared(E),
    #[error(transparent)]
    Bridge(BridgeError),
}

impl<E> From<BridgeError> for NativeCallError<E> {
    fn from(e: BridgeError) -> Self {
        NativeCallError::Bridge(e)
    }
}
