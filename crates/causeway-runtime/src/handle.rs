//! Opaque handles and native object lifetime
//!
//! The managed side never dereferences native memory: a native-owned
//! object is reached only through an opaque 64-bit handle, wrapped in
//! [`ObjectHandle`] which guarantees the paired native free entry point
//! runs exactly once, whichever of explicit disposal or drop fires first.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::abi::ObjectFreeFn;
use crate::buffer::BufferAllocator;
use crate::call;
use crate::codec::{BufferReader, BufferWriter, WireCodec};
use crate::error::BridgeError;

/// An opaque 64-bit handle value.
///
/// Object handles are minted natively; callback handles are minted by
/// [`crate::handle_map::HandleMap`]. Beyond storage and equality the
/// integer carries no meaning on this side of the boundary. Zero is never
/// a valid live handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(u64);

impl RawHandle {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The validity predicate: a zero handle is never a live object.
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

// Object-identity types bypass the length-prefixed buffer path: a raw
// 64-bit value occupying 8 bytes.
impl WireCodec for RawHandle {
    fn allocation_size(&self) -> usize {
        8
    }

    fn write(&self, writer: &mut BufferWriter<'_>) -> Result<(), BridgeError> {
        self.0.write(writer)
    }

    fn read(reader: &mut BufferReader<'_>) -> Result<Self, BridgeError> {
        Ok(Self(u64::read(reader)?))
    }
}

/// Owning guard for a native-owned object.
///
/// Holding an `ObjectHandle` is the only way to use a native object from
/// this side. Shared references allow concurrent boundary calls through
/// [`ObjectHandle::with_raw`]; release requires exclusive access
/// ([`ObjectHandle::dispose`] or drop), so a call in flight can never
/// observe a freed handle.
pub struct ObjectHandle {
    /// Zero once released.
    raw: AtomicU64,
    free_fn: ObjectFreeFn,
    allocator: BufferAllocator,
}

impl ObjectHandle {
    /// Adopt a handle minted by the native side.
    ///
    /// A zero handle is rejected as a protocol violation.
    ///
    /// # Safety
    ///
    /// The caller must ensure `raw` identifies a live native object this
    /// guard now exclusively owns, and that `free_fn` is that object
    /// type's paired free entry point. Adopting the same handle into two
    /// guards leads to a double free.
    pub unsafe fn from_parts(
        raw: RawHandle,
        free_fn: ObjectFreeFn,
        allocator: BufferAllocator,
    ) -> Result<Self, BridgeError> {
        if !raw.is_valid() {
            return Err(BridgeError::protocol("native side returned a zero object handle"));
        }
        Ok(Self {
            raw: AtomicU64::new(raw.as_u64()),
            free_fn,
            allocator,
        })
    }

    /// Whether the underlying object is still live.
    pub fn is_valid(&self) -> bool {
        self.raw.load(Ordering::Acquire) != 0
    }

    /// Run a boundary call with the raw handle value.
    ///
    /// Fails with a protocol violation if the object was already
    /// released: a released handle must never silently reach the native
    /// side. The shared borrow keeps release from running while `f` is in
    /// flight.
    pub fn with_raw<R>(&self, f: impl FnOnce(u64) -> R) -> Result<R, BridgeError> {
        match self.raw.load(Ordering::Acquire) {
            0 => Err(BridgeError::protocol("object handle used after release")),
            raw => Ok(f(raw)),
        }
    }

    /// Escape the guard and expose the bare handle value.
    ///
    /// # Safety
    ///
    /// The safety guarantee is void once the raw value is extracted: the
    /// caller must guarantee this guard outlives every use of the
    /// returned value and is not disposed while the value is in use.
    pub unsafe fn dangerous_raw(&self) -> u64 {
        self.raw.load(Ordering::Acquire)
    }

    /// Release the native object now instead of at drop.
    ///
    /// Idempotent: a second call (or the later drop) finds the handle
    /// already cleared and does nothing.
    pub fn dispose(&mut self) -> Result<(), BridgeError> {
        match std::mem::replace(self.raw.get_mut(), 0) {
            0 => Ok(()),
            raw => self.release(raw),
        }
    }

    fn release(&self, raw: u64) -> Result<(), BridgeError> {
        call::call(&self.allocator, |status| unsafe {
            (self.free_fn)(raw, status)
        })
    }
}

impl Drop for ObjectHandle {
    fn drop(&mut self) {
        let raw = std::mem::replace(self.raw.get_mut(), 0);
        if raw != 0 {
            // Drop-path release; a failure here has nowhere to go.
            let _ = self.release(raw);
        }
    }
}

impl std::fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("raw", &self.raw.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
