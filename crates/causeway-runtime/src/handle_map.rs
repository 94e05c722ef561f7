//! Callback handle map
//!
//! The one piece of explicit shared mutable state in the bridge: a
//! bidirectional association between integer handles and the managed
//! objects implementing a callback interface. Handles are minted here
//! (monotonically, starting at 1 so zero is never live) and are never
//! reused after removal within a process run. All operations serialize
//! through one mutex: lookups included, so writers can never race a
//! reader.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Bidirectional handle ↔ object map for one callback interface.
///
/// Insertion is idempotent per object identity: the same `Arc` inserted
/// twice yields the same handle. Identity is the `Arc`'s data pointer,
/// which is stable for as long as the map holds the entry.
pub struct HandleMap<T: ?Sized> {
    inner: Mutex<MapInner<T>>,
}

struct MapInner<T: ?Sized> {
    /// Next handle to mint; only ever increments.
    next: u64,
    by_handle: HashMap<u64, Arc<T>>,
    by_object: HashMap<usize, u64>,
}

impl<T: ?Sized> HandleMap<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MapInner {
                next: 1,
                by_handle: HashMap::new(),
                by_object: HashMap::new(),
            }),
        }
    }

    fn object_key(obj: &Arc<T>) -> usize {
        Arc::as_ptr(obj) as *const u8 as usize
    }

    /// Mint a handle for `obj`, or return the handle it already has.
    pub fn insert(&self, obj: &Arc<T>) -> u64 {
        let mut inner = self.inner.lock().expect("handle map poisoned");
        let key = Self::object_key(obj);
        if let Some(&existing) = inner.by_object.get(&key) {
            return existing;
        }
        let handle = inner.next;
        inner.next += 1;
        inner.by_handle.insert(handle, Arc::clone(obj));
        inner.by_object.insert(key, handle);
        handle
    }

    /// Resolve a handle to its object, if still live.
    pub fn get(&self, handle: u64) -> Option<Arc<T>> {
        let inner = self.inner.lock().expect("handle map poisoned");
        inner.by_handle.get(&handle).map(Arc::clone)
    }

    /// Retire a handle permanently. Returns the object it mapped to, or
    /// `None` if the handle was never live or already retired.
    pub fn remove(&self, handle: u64) -> Option<Arc<T>> {
        let mut inner = self.inner.lock().expect("handle map poisoned");
        let obj = inner.by_handle.remove(&handle)?;
        let key = Self::object_key(&obj);
        inner.by_object.remove(&key);
        Some(obj)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("handle map poisoned").by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized> Default for HandleMap<T> {
    fn default() -> Self {
        Self::new()
    }
}
