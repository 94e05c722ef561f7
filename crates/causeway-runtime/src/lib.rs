//! Causeway Runtime - host-side FFI bridge
//!
//! This library provides the managed half of a cross-language foreign
//! function boundary:
//! - Buffer protocol and streaming wire codec
//! - Opaque-handle object lifetime model
//! - Call dispatch with uniform status checking and error propagation
//! - Callback-interface dispatch tables for native→managed calls
//! - Native component loading and entry-point resolution
//!
//! A binding generator layers typed wrappers over this crate; the native
//! component itself is an external collaborator reached through the ABI
//! declared in [`abi`].
//!
//! # Safety
//!
//! FFI operations involve `unsafe` code and careful memory management.
//! All unsafe code is isolated behind safe wrappers whose contracts are
//! documented where the escape hatches are.

/// Causeway runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Public API modules
pub mod abi;
pub mod buffer;
pub mod call;
pub mod callback;
pub mod codec;
pub mod error;
pub mod handle;
pub mod handle_map;
pub mod library;

// Re-export commonly used types
pub use abi::{CallStatus, NativeBuffer, CALL_ERROR, CALL_OK, CALL_PANIC};
pub use buffer::{BufferAllocator, BufferGuard};
pub use call::{call, call_with_error};
pub use callback::{
    CallbackDispatch, CallbackError, CallbackInterface, CallbackReply, InterfaceDescriptor,
    MethodDescriptor, CALLBACK_RETIRED, CALLBACK_SUCCESS, CALLBACK_UNEXPECTED_ERROR,
    METHOD_RETIRE,
};
pub use codec::{
    encode_to_vec, lift_from_buffer, lower_into_buffer, BufferReader, BufferWriter, WireCodec,
};
pub use error::{BridgeError, NativeCallError, GENERIC_PANIC_MESSAGE};
pub use handle::{ObjectHandle, RawHandle};
pub use handle_map::HandleMap;
pub use library::{ComponentError, ComponentLoader, NativeComponent};
