//! Buffer allocation discipline
//!
//! All buffer memory crossing the boundary is owned by the native
//! allocator. [`BufferAllocator`] wraps the component's alloc/free/reserve
//! entry points, routing each through the status-check choke point;
//! [`BufferGuard`] guarantees the exactly-once free on every exit path,
//! including unwinding ones.

use crate::abi::{BufferAllocFn, BufferFreeFn, BufferReserveFn, NativeBuffer};
use crate::call;
use crate::error::BridgeError;

/// The native component's buffer allocator.
///
/// Copyable: three fn pointers and no state. Every buffer it hands out
/// must come back through [`BufferAllocator::free`] exactly once.
#[derive(Clone, Copy)]
pub struct BufferAllocator {
    alloc_fn: BufferAllocFn,
    free_fn: BufferFreeFn,
    reserve_fn: BufferReserveFn,
}

impl BufferAllocator {
    /// Build an allocator from the component's exported entry points.
    ///
    /// # Safety
    ///
    /// The caller must ensure the three pointers are the collaborator's
    /// buffer alloc/free/reserve exports, with exactly the declared
    /// signatures, and that they remain callable for the life of this
    /// allocator (libloading keeps the library mapped; statically linked
    /// components satisfy this trivially).
    pub unsafe fn from_entry_points(
        alloc_fn: BufferAllocFn,
        free_fn: BufferFreeFn,
        reserve_fn: BufferReserveFn,
    ) -> Self {
        Self {
            alloc_fn,
            free_fn,
            reserve_fn,
        }
    }

    /// Request a buffer of at least `size` bytes from the native
    /// allocator.
    ///
    /// Fails with [`BridgeError::AllocationFailed`] if the native side
    /// reports a null backing pointer.
    pub fn alloc(&self, size: i32) -> Result<NativeBuffer, BridgeError> {
        if size < 0 {
            return Err(BridgeError::protocol(format!(
                "negative allocation request: {size}"
            )));
        }
        let buf = call::call(self, |status| unsafe { (self.alloc_fn)(size, status) })?;
        if buf.data.is_null() && size > 0 {
            return Err(BridgeError::AllocationFailed { requested: size });
        }
        Ok(buf)
    }

    /// Release a buffer back to the native allocator.
    ///
    /// Not idempotent: exactly once per buffer. Prefer [`BufferGuard`]
    /// over calling this directly.
    pub fn free(&self, buf: NativeBuffer) -> Result<(), BridgeError> {
        call::call(self, |status| unsafe { (self.free_fn)(buf, status) })
    }

    /// Grow a buffer by at least `additional` bytes, consuming it and
    /// returning the (possibly moved) replacement.
    pub fn reserve(
        &self,
        buf: NativeBuffer,
        additional: i32,
    ) -> Result<NativeBuffer, BridgeError> {
        if additional < 0 {
            return Err(BridgeError::protocol(format!(
                "negative reserve request: {additional}"
            )));
        }
        call::call(self, |status| unsafe {
            (self.reserve_fn)(buf, additional, status)
        })
    }
}

impl std::fmt::Debug for BufferAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferAllocator").finish_non_exhaustive()
    }
}

/// Scoped ownership of a native-allocated buffer.
///
/// Frees the buffer on drop unless ownership is escaped with
/// [`BufferGuard::into_inner`]. A drop-path free failure cannot be
/// propagated and is ignored; use [`BufferGuard::free`] where the result
/// matters.
pub struct BufferGuard<'a> {
    buf: Option<NativeBuffer>,
    allocator: &'a BufferAllocator,
}

impl<'a> BufferGuard<'a> {
    /// Take ownership of `buf`; it will be freed when the guard goes out
    /// of scope.
    pub fn new(buf: NativeBuffer, allocator: &'a BufferAllocator) -> Self {
        Self {
            buf: Some(buf),
            allocator,
        }
    }

    /// View the guarded buffer's valid bytes.
    pub fn as_slice(&self) -> &[u8] {
        match &self.buf {
            Some(buf) => buf.as_slice(),
            None => &[],
        }
    }

    /// Mutable access to the guarded buffer, for the encode path.
    pub fn buffer_mut(&mut self) -> &mut NativeBuffer {
        self.buf.as_mut().expect("buffer already escaped")
    }

    /// Free the buffer now, surfacing any failure the native free
    /// reports.
    pub fn free(mut self) -> Result<(), BridgeError> {
        match self.buf.take() {
            // A null backing pointer means nothing was ever allocated.
            Some(buf) if !buf.data.is_null() => self.allocator.free(buf),
            _ => Ok(()),
        }
    }

    /// Escape the guard, transferring ownership of the buffer (for
    /// handing it to the native side). The guard will not free it.
    pub fn into_inner(mut self) -> NativeBuffer {
        self.buf.take().expect("buffer already escaped")
    }
}

impl Drop for BufferGuard<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            if !buf.data.is_null() {
                // Exit-path free; a failure here has nowhere to go.
                let _ = self.allocator.free(buf);
            }
        }
    }
}
