//! Call dispatch and error propagation
//!
//! The single choke point through which every native entry-point
//! invocation passes. Callers never inspect a [`CallStatus`] directly:
//! they hand this module a closure that performs the raw invocation, and
//! get back either the native result or one of the typed failures from
//! [`crate::error`].
//!
//! A status is stack-local per call and no shared state is touched here,
//! so concurrent calls on different threads are independently safe. Calls
//! are synchronous: the invoking thread blocks until the native entry
//! point returns.

use crate::abi::{CallStatus, CALL_ERROR, CALL_OK, CALL_PANIC};
use crate::buffer::{BufferAllocator, BufferGuard};
use crate::codec::{lift_from_buffer, WireCodec};
use crate::error::{BridgeError, NativeCallError, GENERIC_PANIC_MESSAGE};

/// Invoke a native entry point with no declared error type.
///
/// `f` receives the fresh status record and must pass it to the entry
/// point as the trailing argument. An `Error` status at such a call site
/// is by definition undeclared: the error buffer is decoded as a string
/// and surfaced as [`BridgeError::UndeclaredError`].
pub fn call<T>(
    allocator: &BufferAllocator,
    f: impl FnOnce(&mut CallStatus) -> T,
) -> Result<T, BridgeError> {
    let mut status = CallStatus::new();
    let result = f(&mut status);
    match status.code {
        CALL_OK => Ok(result),
        CALL_ERROR => Err(BridgeError::UndeclaredError {
            message: lift_status_message(allocator, &mut status)?,
        }),
        CALL_PANIC => Err(lift_panic(allocator, &mut status)),
        code => Err(unrecognized_code(allocator, &mut status, code)),
    }
}

/// Invoke a native entry point whose declared error type is `E`.
///
/// Identical to [`call`] except that an `Error` status decodes the error
/// buffer with `E`'s codec and surfaces it as
/// [`NativeCallError::Declared`]. The decoder is chosen statically by the
/// call site; there is no runtime registry to miss.
pub fn call_with_error<T, E: WireCodec>(
    allocator: &BufferAllocator,
    f: impl FnOnce(&mut CallStatus) -> T,
) -> Result<T, NativeCallError<E>> {
    let mut status = CallStatus::new();
    let result = f(&mut status);
    match status.code {
        CALL_OK => Ok(result),
        CALL_ERROR => {
            let declared = lift_from_buffer::<E>(status.take_error_buf(), allocator)?;
            Err(NativeCallError::Declared(declared))
        }
        CALL_PANIC => Err(lift_panic(allocator, &mut status).into()),
        code => Err(unrecognized_code(allocator, &mut status, code).into()),
    }
}

/// Decode an error buffer as raw UTF-8. Unlike the streamed string form
/// there is no length prefix: the buffer's own length delimits the
/// message. The native side is required to write valid UTF-8 here;
/// anything else is a protocol violation, not a silently garbled message.
fn lift_status_message(
    allocator: &BufferAllocator,
    status: &mut CallStatus,
) -> Result<String, BridgeError> {
    let guard = BufferGuard::new(status.take_error_buf(), allocator);
    let message = std::str::from_utf8(guard.as_slice())
        .map(str::to_owned)
        .map_err(|e| BridgeError::protocol(format!("undeclared error buffer is not valid UTF-8: {e}")))?;
    guard.free()?;
    Ok(message)
}

fn lift_panic(allocator: &BufferAllocator, status: &mut CallStatus) -> BridgeError {
    let guard = BufferGuard::new(status.take_error_buf(), allocator);
    let message = if guard.as_slice().is_empty() {
        // The native side failed to even serialize its own panic message.
        GENERIC_PANIC_MESSAGE.to_string()
    } else {
        match std::str::from_utf8(guard.as_slice()) {
            Ok(text) => text.to_owned(),
            Err(_) => GENERIC_PANIC_MESSAGE.to_string(),
        }
    };
    BridgeError::NativePanic { message }
}

fn unrecognized_code(
    allocator: &BufferAllocator,
    status: &mut CallStatus,
    code: i32,
) -> BridgeError {
    // Whatever the native side left behind still has to be returned to
    // its allocator.
    drop(BufferGuard::new(status.take_error_buf(), allocator));
    BridgeError::protocol(format!("unrecognized call status code {code}"))
}
