//! Callback-interface dispatch
//!
//! Lets the native side invoke managed implementations of a declared
//! interface, keyed by integer handle, without ever holding a managed
//! memory reference. Per interface there is one [`CallbackInterface`]
//! (handle map + one-time registration state) and one `extern "C"`
//! trampoline, registered with the native side at process start, whose
//! body is [`CallbackInterface::handle_raw_call`].
//!
//! Trampoline status protocol:
//! - method index [`METHOD_RETIRE`] retires the handle: no output,
//!   returns [`CALLBACK_RETIRED`]
//! - success: result encoded into a fresh native buffer in `*out`,
//!   returns [`CALLBACK_SUCCESS`]
//! - any managed-side failure, caught panics included: best-effort
//!   message in `*out`, returns [`CALLBACK_UNEXPECTED_ERROR`]
//!
//! No exception ever propagates across the native call boundary.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Once, OnceLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::abi::{CallbackRegisterFn, CallbackTrampoline, NativeBuffer};
use crate::buffer::{BufferAllocator, BufferGuard};
use crate::codec::{encode_to_vec, BufferReader, BufferWriter, WireCodec};
use crate::error::BridgeError;
use crate::handle::RawHandle;
use crate::handle_map::HandleMap;

/// Method index 0 is reserved: the native side is finished with the
/// handle and it must be retired.
pub const METHOD_RETIRE: i32 = 0;

/// Trampoline return: handle retired, no output produced.
pub const CALLBACK_RETIRED: i32 = 0;
/// Trampoline return: success, result encoded in the output buffer.
pub const CALLBACK_SUCCESS: i32 = 1;
/// Trampoline return: unexpected managed-side failure; the output buffer
/// holds a best-effort description, or nothing if even that failed.
pub const CALLBACK_UNEXPECTED_ERROR: i32 = -1;

/// One declared method of a callback interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    /// Dispatch index; 1-based, 0 being reserved for retirement.
    pub index: i32,
    pub name: String,
}

/// The declared dispatch surface of one callback interface.
///
/// Drives out-of-range validation in the trampoline and names methods in
/// diagnostics, so an interface's switch never sees an index it did not
/// declare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDescriptor {
    pub name: String,
    pub methods: Vec<MethodDescriptor>,
}

impl InterfaceDescriptor {
    /// Declare an interface; methods are indexed 1..=N in order.
    pub fn new(name: impl Into<String>, methods: &[&str]) -> Self {
        Self {
            name: name.into(),
            methods: methods
                .iter()
                .enumerate()
                .map(|(i, m)| MethodDescriptor {
                    index: i as i32 + 1,
                    name: (*m).to_string(),
                })
                .collect(),
        }
    }

    /// Whether `index` names a declared method.
    pub fn contains(&self, index: i32) -> bool {
        index >= 1 && index <= self.methods.len() as i32
    }

    pub fn method_name(&self, index: i32) -> Option<&str> {
        self.methods
            .iter()
            .find(|m| m.index == index)
            .map(|m| m.name.as_str())
    }
}

/// Failures inside a callback dispatch. All of them stay on this side of
/// the boundary: the trampoline downgrades them to the `-1` status.
#[derive(Debug, Error)]
pub enum CallbackError {
    /// Argument decode or result encode failed.
    #[error(transparent)]
    Codec(#[from] BridgeError),
    /// The managed implementation reported a failure.
    #[error("callback implementation failed: {message}")]
    Implementation { message: String },
}

/// The staged, already-encoded result of a callback method.
pub struct CallbackReply {
    bytes: Vec<u8>,
}

impl CallbackReply {
    /// Encode a return value in its streamed form.
    pub fn encode<T: WireCodec>(value: &T) -> Result<Self, BridgeError> {
        Ok(Self {
            bytes: encode_to_vec(value)?,
        })
    }

    /// A reply carrying no payload (void methods).
    pub fn empty() -> Self {
        Self { bytes: Vec::new() }
    }
}

/// Per-interface dispatch: decode the argument stream, invoke the
/// corresponding method on `self`, encode the result.
///
/// Implementations hold a flat switch over the interface's declared
/// method indexes; the runtime guarantees `method` is within the
/// declared range before this is called, and that the argument stream is
/// fully consumed afterwards.
pub trait CallbackDispatch: Send + Sync {
    fn invoke_method(
        &self,
        method: i32,
        args: &mut BufferReader<'_>,
    ) -> Result<CallbackReply, CallbackError>;
}

/// The managed-side state for one callback interface: its declared
/// surface, its handle map, and its one-time native registration.
pub struct CallbackInterface<T: CallbackDispatch + ?Sized> {
    descriptor: InterfaceDescriptor,
    map: HandleMap<T>,
    allocator: OnceLock<BufferAllocator>,
    registration: Once,
}

impl<T: CallbackDispatch + ?Sized> CallbackInterface<T> {
    pub fn new(descriptor: InterfaceDescriptor) -> Self {
        Self {
            descriptor,
            map: HandleMap::new(),
            allocator: OnceLock::new(),
            registration: Once::new(),
        }
    }

    pub fn descriptor(&self) -> &InterfaceDescriptor {
        &self.descriptor
    }

    /// Whether the one-time native registration has completed.
    pub fn is_registered(&self) -> bool {
        self.registration.is_completed()
    }

    /// Hand the native side this interface's trampoline. One-time and
    /// idempotent; must run before any value of this interface crosses
    /// the boundary in either direction. Concurrent callers block until
    /// the first registration completes.
    ///
    /// # Safety
    ///
    /// `register_fn` must be this interface's registration entry point
    /// exported by the native component, and `trampoline` must be the
    /// `extern "C"` function whose body forwards to this instance's
    /// [`CallbackInterface::handle_raw_call`].
    pub unsafe fn register(
        &self,
        allocator: BufferAllocator,
        register_fn: CallbackRegisterFn,
        trampoline: CallbackTrampoline,
    ) {
        self.registration.call_once(|| {
            let _ = self.allocator.set(allocator);
            register_fn(trampoline);
        });
    }

    /// Mint (or re-find) the handle for a managed implementation, for
    /// passing it to the native side.
    ///
    /// Fails if the interface was never registered: the native side
    /// would have no trampoline to call the handle back through.
    pub fn lower(&self, obj: &Arc<T>) -> Result<RawHandle, BridgeError> {
        if !self.is_registered() {
            return Err(BridgeError::protocol(format!(
                "callback interface {} used before registration",
                self.descriptor.name
            )));
        }
        Ok(RawHandle::from_raw(self.map.insert(obj)))
    }

    /// Number of live callback handles.
    pub fn live_handles(&self) -> usize {
        self.map.len()
    }

    /// The trampoline body. The per-interface `extern "C"` trampoline
    /// forwards here verbatim.
    ///
    /// Every exit path frees the native-owned argument buffer exactly
    /// once, and no panic escapes: anything the dispatch raises is
    /// downgraded to [`CALLBACK_UNEXPECTED_ERROR`] with a best-effort
    /// description in the output buffer.
    pub fn handle_raw_call(
        &self,
        handle: u64,
        method: i32,
        args: NativeBuffer,
        out: *mut NativeBuffer,
    ) -> i32 {
        match catch_unwind(AssertUnwindSafe(|| self.dispatch(handle, method, args, out))) {
            Ok(status) => status,
            Err(payload) => {
                if let Some(allocator) = self.allocator.get() {
                    write_message_best_effort(allocator, out, panic_message(payload.as_ref()));
                }
                CALLBACK_UNEXPECTED_ERROR
            }
        }
    }

    fn dispatch(&self, handle: u64, method: i32, args: NativeBuffer, out: *mut NativeBuffer) -> i32 {
        let Some(allocator) = self.allocator.get() else {
            // Never registered, so there is no allocator to free the
            // argument buffer with; nothing more can be done safely.
            return CALLBACK_UNEXPECTED_ERROR;
        };
        let args_guard = BufferGuard::new(args, allocator);

        if method == METHOD_RETIRE {
            self.map.remove(handle);
            return CALLBACK_RETIRED;
        }

        let Some(obj) = self.map.get(handle) else {
            return fail(
                allocator,
                out,
                &format!(
                    "no live handle {handle} for callback interface {}",
                    self.descriptor.name
                ),
            );
        };

        if !self.descriptor.contains(method) {
            return fail(
                allocator,
                out,
                &format!(
                    "method index {method} out of range for callback interface {}",
                    self.descriptor.name
                ),
            );
        }

        let mut reader = BufferReader::new(args_guard.as_slice());
        match obj.invoke_method(method, &mut reader) {
            Ok(reply) => {
                if reader.remaining() != 0 {
                    return fail(
                        allocator,
                        out,
                        &format!(
                            "{} leftover argument bytes after {}.{}",
                            reader.remaining(),
                            self.descriptor.name,
                            self.descriptor.method_name(method).unwrap_or("?"),
                        ),
                    );
                }
                match write_output(allocator, out, &reply.bytes) {
                    Ok(()) => CALLBACK_SUCCESS,
                    Err(e) => fail(allocator, out, &e.to_string()),
                }
            }
            Err(fault) => fail(allocator, out, &fault.to_string()),
        }
    }
}

/// Encode `bytes` into a fresh native buffer at `*out`.
fn write_output(
    allocator: &BufferAllocator,
    out: *mut NativeBuffer,
    bytes: &[u8],
) -> Result<(), BridgeError> {
    if out.is_null() {
        return Err(BridgeError::protocol("null output buffer slot"));
    }
    let size = i32::try_from(bytes.len())
        .map_err(|_| BridgeError::protocol(format!("output of {} bytes exceeds i32", bytes.len())))?;
    let mut buf = allocator.alloc(size)?;
    let mut writer = BufferWriter::new(&mut buf);
    if let Err(e) = writer.write_bytes(bytes) {
        let _ = allocator.free(buf);
        return Err(e);
    }
    unsafe { *out = buf };
    Ok(())
}

/// The `-1` path: best-effort description in the output buffer. Failing
/// to serialize the description is tolerated: it degrades to an empty
/// output rather than crashing the native caller.
fn fail(allocator: &BufferAllocator, out: *mut NativeBuffer, message: &str) -> i32 {
    write_message_best_effort(allocator, out, message);
    CALLBACK_UNEXPECTED_ERROR
}

fn write_message_best_effort(allocator: &BufferAllocator, out: *mut NativeBuffer, message: &str) {
    let _ = write_output(allocator, out, message.as_bytes());
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "callback implementation panicked"
    }
}
