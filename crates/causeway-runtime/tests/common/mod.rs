//! Shared test doubles for the native side of the boundary
//!
//! The real native component is an external collaborator, so the
//! integration suites stand one up in-process: a ledger-backed tracking
//! allocator (leak and double-free detection), an object store with
//! per-handle free counts, and a callback-registration sink that records
//! the trampoline the way a real component would.

// Not every suite exercises every helper.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use causeway_runtime::abi::{CallStatus, CallbackTrampoline, NativeBuffer};
use causeway_runtime::BufferAllocator;

// Re-export testing utilities
#[allow(unused_imports)]
pub use pretty_assertions::{assert_eq, assert_ne};

static ALLOC_COUNT: AtomicUsize = AtomicUsize::new(0);
static FREE_COUNT: AtomicUsize = AtomicUsize::new(0);
static DOUBLE_FREES: AtomicUsize = AtomicUsize::new(0);

fn ledger() -> &'static Mutex<HashMap<usize, i32>> {
    static LEDGER: OnceLock<Mutex<HashMap<usize, i32>>> = OnceLock::new();
    LEDGER.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Allocation entry point double: hands out heap buffers and records
/// each backing pointer in the ledger.
pub unsafe extern "C" fn tracked_alloc(size: i32, _status: *mut CallStatus) -> NativeBuffer {
    ALLOC_COUNT.fetch_add(1, Ordering::SeqCst);
    let mut bytes = vec![0u8; size as usize].into_boxed_slice();
    let data = bytes.as_mut_ptr();
    std::mem::forget(bytes);
    ledger().lock().unwrap().insert(data as usize, size);
    NativeBuffer {
        capacity: size,
        len: 0,
        data,
    }
}

/// Free entry point double: a pointer missing from the ledger is a
/// double free (or a buffer this allocator never produced) and is
/// counted instead of crashing the test process.
pub unsafe extern "C" fn tracked_free(buf: NativeBuffer, _status: *mut CallStatus) {
    FREE_COUNT.fetch_add(1, Ordering::SeqCst);
    if buf.data.is_null() {
        return;
    }
    match ledger().lock().unwrap().remove(&(buf.data as usize)) {
        Some(capacity) => {
            drop(Box::from_raw(std::slice::from_raw_parts_mut(
                buf.data,
                capacity as usize,
            )));
        }
        None => {
            DOUBLE_FREES.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Reserve entry point double: allocate bigger, copy, free the original.
pub unsafe extern "C" fn tracked_reserve(
    buf: NativeBuffer,
    additional: i32,
    status: *mut CallStatus,
) -> NativeBuffer {
    let grown = tracked_alloc(buf.capacity + additional, status);
    std::slice::from_raw_parts_mut(grown.data, grown.capacity as usize)[..buf.len as usize]
        .copy_from_slice(buf.as_slice());
    let len = buf.len;
    tracked_free(buf, status);
    NativeBuffer { len, ..grown }
}

pub fn tracked_allocator() -> BufferAllocator {
    unsafe { BufferAllocator::from_entry_points(tracked_alloc, tracked_free, tracked_reserve) }
}

/// Buffers handed out and not yet returned.
pub fn live_allocations() -> usize {
    ledger().lock().unwrap().len()
}

pub fn double_free_count() -> usize {
    DOUBLE_FREES.load(Ordering::SeqCst)
}

pub fn alloc_count() -> usize {
    ALLOC_COUNT.load(Ordering::SeqCst)
}

pub fn free_count() -> usize {
    FREE_COUNT.load(Ordering::SeqCst)
}

// Object store double: per-handle release counts, so a test can assert a
// native object was freed exactly once.

fn object_frees() -> &'static Mutex<HashMap<u64, usize>> {
    static FREES: OnceLock<Mutex<HashMap<u64, usize>>> = OnceLock::new();
    FREES.get_or_init(|| Mutex::new(HashMap::new()))
}

pub unsafe extern "C" fn object_free(handle: u64, _status: *mut CallStatus) {
    *object_frees().lock().unwrap().entry(handle).or_insert(0) += 1;
}

pub fn object_free_count(handle: u64) -> usize {
    object_frees().lock().unwrap().get(&handle).copied().unwrap_or(0)
}

// Callback-registration double: records the trampoline the native side
// would keep for native→managed dispatch.

fn registered_trampoline() -> &'static Mutex<Option<CallbackTrampoline>> {
    static TRAMPOLINE: OnceLock<Mutex<Option<CallbackTrampoline>>> = OnceLock::new();
    TRAMPOLINE.get_or_init(|| Mutex::new(None))
}

pub unsafe extern "C" fn record_trampoline(trampoline: CallbackTrampoline) {
    *registered_trampoline().lock().unwrap() = Some(trampoline);
}

/// The trampoline the fake native side would dispatch through.
pub fn native_side_trampoline() -> CallbackTrampoline {
    registered_trampoline()
        .lock()
        .unwrap()
        .expect("no trampoline registered with the fake native side")
}

/// Encode a message into a fresh tracked buffer the way the native side
/// stages callback arguments: the value's streamed form.
pub fn stage_argument_buffer(allocator: &BufferAllocator, bytes: &[u8]) -> NativeBuffer {
    let mut buf = allocator.alloc(bytes.len() as i32).unwrap();
    let mut writer = causeway_runtime::BufferWriter::new(&mut buf);
    writer.write_bytes(bytes).unwrap();
    buf
}
