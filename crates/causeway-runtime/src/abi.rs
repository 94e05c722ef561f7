//! C ABI boundary layout
//!
//! The fixed records and entry-point signatures shared with the native
//! component. All structures use `#[repr(C)]`; the layout is part of the
//! collaborator contract and is asserted at test time.
//!
//! Layout summary (64-bit platforms):
//! - `NativeBuffer`: `{capacity: i32, len: i32, data: *mut u8}`: 16 bytes
//! - `CallStatus`: `{code: i32, error_buf: NativeBuffer}`: 24 bytes

use std::slice;

/// Call completed normally; the return value is valid.
pub const CALL_OK: i32 = 0;
/// The native side reported a declared or undeclared error; the status
/// error buffer holds its encoded form.
pub const CALL_ERROR: i32 = 1;
/// The native side panicked; the error buffer holds a best-effort
/// serialized message, possibly empty.
pub const CALL_PANIC: i32 = 2;

/// A native-allocated byte region crossing the boundary.
///
/// Exclusively owned by the side that allocated it until transferred or
/// freed. Every buffer obtained from the native side must be returned to
/// the native allocator exactly once: freeing it through the Rust
/// allocator is undefined behavior. [`crate::buffer::BufferGuard`]
/// enforces the exactly-once discipline on every exit path.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NativeBuffer {
    /// Total allocated bytes behind `data`.
    pub capacity: i32,
    /// Valid data bytes (`len <= capacity`).
    pub len: i32,
    /// Backing pointer; null only for the empty buffer.
    pub data: *mut u8,
}

impl NativeBuffer {
    /// The empty buffer: null pointer, zero length and capacity.
    ///
    /// The only buffer value that may carry a null `data` pointer; the
    /// native allocator never returns null on success.
    pub const fn empty() -> Self {
        Self {
            capacity: 0,
            len: 0,
            data: std::ptr::null_mut(),
        }
    }

    /// Whether this is the empty buffer.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// View the valid bytes.
    ///
    /// Trusts the collaborator contract: `data` points to at least `len`
    /// readable bytes, or is null with `len == 0`.
    pub fn as_slice(&self) -> &[u8] {
        if self.data.is_null() {
            &[]
        } else {
            unsafe { slice::from_raw_parts(self.data, self.len as usize) }
        }
    }

    /// View the full capacity mutably, for the encode path.
    ///
    /// Trusts the collaborator contract: `data` points to at least
    /// `capacity` writable bytes, or is null with `capacity == 0`.
    pub fn as_capacity_slice_mut(&mut self) -> &mut [u8] {
        if self.data.is_null() {
            &mut []
        } else {
            unsafe { slice::from_raw_parts_mut(self.data, self.capacity as usize) }
        }
    }
}

// Manual PartialEq because the raw pointer blocks a semantic derive:
// two buffers are the same buffer only if they share a backing pointer.
impl PartialEq for NativeBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data && self.len == other.len && self.capacity == other.capacity
    }
}

/// Out-parameter appended to every native entry point.
///
/// Stack-local per call, consumed immediately after the call returns. A
/// non-empty `error_buf` is owned by the caller and must be freed or
/// decoded-and-freed.
#[repr(C)]
#[derive(Debug)]
pub struct CallStatus {
    /// One of [`CALL_OK`], [`CALL_ERROR`], [`CALL_PANIC`].
    pub code: i32,
    /// Encoded error payload when `code != CALL_OK`.
    pub error_buf: NativeBuffer,
}

impl CallStatus {
    /// A fresh status: code Ok, empty error buffer.
    pub const fn new() -> Self {
        Self {
            code: CALL_OK,
            error_buf: NativeBuffer::empty(),
        }
    }

    /// Take ownership of the error buffer, leaving the empty buffer
    /// behind so it cannot be freed twice through this status.
    pub fn take_error_buf(&mut self) -> NativeBuffer {
        std::mem::replace(&mut self.error_buf, NativeBuffer::empty())
    }
}

impl Default for CallStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// `{prefix}_buffer_alloc`: request at least `size` bytes from the native
/// allocator. Null backing pointer on the returned buffer means the
/// allocation failed.
pub type BufferAllocFn = unsafe extern "C" fn(size: i32, status: *mut CallStatus) -> NativeBuffer;

/// `{prefix}_buffer_free`: release a buffer back to the native allocator.
/// Exactly once per buffer; calling twice is a caller bug.
pub type BufferFreeFn = unsafe extern "C" fn(buf: NativeBuffer, status: *mut CallStatus);

/// `{prefix}_buffer_reserve`: grow a buffer by at least `additional`
/// bytes, returning the (possibly moved) buffer.
pub type BufferReserveFn =
    unsafe extern "C" fn(buf: NativeBuffer, additional: i32, status: *mut CallStatus) -> NativeBuffer;

/// `{prefix}_{object}_free`: release the native-owned object behind a
/// handle. Paired with exactly one mint of that handle.
pub type ObjectFreeFn = unsafe extern "C" fn(handle: u64, status: *mut CallStatus);

/// The managed-side trampoline the native component calls back into:
/// `(handle, method index, argument buffer, output-buffer slot) -> status`.
///
/// Status protocol: `0` means the handle was retired (method index 0,
/// no output); a positive value signals success with the result encoded
/// in `*out`; `-1` signals an unexpected managed-side failure with a
/// best-effort message in `*out`.
pub type CallbackTrampoline =
    unsafe extern "C" fn(handle: u64, method: i32, args: NativeBuffer, out: *mut NativeBuffer) -> i32;

/// `{prefix}_{interface}_init_callback`: hand the native side the
/// trampoline for one callback interface. One-time, at process start.
pub type CallbackRegisterFn = unsafe extern "C" fn(trampoline: CallbackTrampoline);

// Compile-time assertions for ABI stability
#[cfg(test)]
mod abi_layout_checks {
    use super::*;
    use std::mem;

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn native_buffer_size_and_align() {
        assert_eq!(
            mem::size_of::<NativeBuffer>(),
            16,
            "NativeBuffer must be exactly 16 bytes"
        );
        assert_eq!(
            mem::align_of::<NativeBuffer>(),
            8,
            "NativeBuffer must be 8-byte aligned"
        );
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn call_status_size() {
        assert_eq!(
            mem::size_of::<CallStatus>(),
            24,
            "CallStatus must be exactly 24 bytes"
        );
    }

    #[test]
    fn empty_buffer_is_empty() {
        let buf = NativeBuffer::empty();
        assert!(buf.is_empty());
        assert!(buf.data.is_null());
        assert_eq!(buf.as_slice(), &[] as &[u8]);
    }

    #[test]
    fn take_error_buf_leaves_empty() {
        let mut status = CallStatus::new();
        status.error_buf = NativeBuffer {
            capacity: 4,
            len: 4,
            data: 0x1000 as *mut u8,
        };
        let taken = status.take_error_buf();
        assert_eq!(taken.len, 4);
        assert!(status.error_buf.is_empty());
        assert!(status.error_buf.data.is_null());
    }
}
