//! Bounded mapping between NFS file handles and tree paths.
//!
//! NFS clients address files by opaque numeric handles and expect them to
//! stay valid across requests. Handles are allocated on first sight of a
//! path and dropped least-recently-used once the table is full. A handle
//! pinned by an in-flight request is never dropped, and the root handle is
//! permanent.

use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Handle of the archive root.
pub const ROOT_HANDLE: u64 = 1;

/// Default number of handles kept besides the root.
pub const DEFAULT_HANDLE_CACHE_SIZE: usize = 100_000;

/// Smallest capacity accepted. Paging a directory needs both the directory
/// and the last returned entry to outlive a reply.
pub const MIN_HANDLE_CACHE_SIZE: usize = 2;

const ROOT_PATH: &str = "/";

struct Inner {
    /// Most recently used first. Unbounded; capacity is enforced by
    /// `evict` so pinned handles can be skipped.
    paths: LruCache<u64, String>,
    handles: HashMap<String, u64>,
    pins: HashMap<u64, usize>,
    next: u64,
    capacity: usize,
}

impl Inner {
    fn allocate(&mut self, path: &str) -> u64 {
        if let Some(&handle) = self.handles.get(path) {
            self.paths.promote(&handle);
            return handle;
        }
        let handle = self.next;
        self.next += 1;
        self.paths.put(handle, path.to_string());
        self.handles.insert(path.to_string(), handle);
        self.evict(Some(handle));
        handle
    }

    /// Drop least recently used handles down to capacity, skipping pinned
    /// ones and `keep`.
    fn evict(&mut self, keep: Option<u64>) {
        while self.paths.len() > self.capacity {
            let victim = self
                .paths
                .iter()
                .rev()
                .map(|(handle, _)| *handle)
                .find(|handle| Some(*handle) != keep && !self.pins.contains_key(handle));
            let Some(victim) = victim else {
                // Everything left is pinned; shrink again on unpin.
                return;
            };
            if let Some(path) = self.paths.pop(&victim) {
                self.handles.remove(&path);
            }
        }
    }
}

/// Handle table for one NFS export.
pub struct HandleCache {
    inner: Mutex<Inner>,
}

impl HandleCache {
    /// A table holding up to `capacity` handles, raised to
    /// [`MIN_HANDLE_CACHE_SIZE`] if smaller.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                paths: LruCache::unbounded(),
                handles: HashMap::new(),
                pins: HashMap::new(),
                next: ROOT_HANDLE + 1,
                capacity: capacity.max(MIN_HANDLE_CACHE_SIZE),
            }),
        }
    }

    /// The handle for a normalized tree path, allocating one if needed.
    pub fn handle_for(&self, path: &str) -> u64 {
        if path == ROOT_PATH {
            return ROOT_HANDLE;
        }
        self.inner.lock().allocate(path)
    }

    /// Like [`handle_for`](Self::handle_for), but the handle stays pinned
    /// until the returned guard drops.
    pub fn pinned_handle_for(&self, path: &str) -> HandlePin<'_> {
        if path == ROOT_PATH {
            return HandlePin {
                cache: self,
                handle: ROOT_HANDLE,
            };
        }
        let mut inner = self.inner.lock();
        let handle = inner.allocate(path);
        *inner.pins.entry(handle).or_insert(0) += 1;
        HandlePin {
            cache: self,
            handle,
        }
    }

    /// Mark a handle as most recently used.
    pub fn touch(&self, handle: u64) {
        if handle != ROOT_HANDLE {
            self.inner.lock().paths.promote(&handle);
        }
    }

    /// The path behind a handle, or `None` if it is unknown or was evicted.
    pub fn path_of(&self, handle: u64) -> Option<String> {
        if handle == ROOT_HANDLE {
            return Some(ROOT_PATH.to_string());
        }
        self.inner.lock().paths.get(&handle).cloned()
    }

    /// Resolve a handle and keep it alive until the returned pin drops.
    pub fn pin(&self, handle: u64) -> Option<(HandlePin<'_>, String)> {
        if handle == ROOT_HANDLE {
            return Some((HandlePin { cache: self, handle }, ROOT_PATH.to_string()));
        }
        let mut inner = self.inner.lock();
        let path = inner.paths.get(&handle)?.clone();
        *inner.pins.entry(handle).or_insert(0) += 1;
        Some((HandlePin { cache: self, handle }, path))
    }

    /// Number of handles held, not counting the root.
    pub fn len(&self) -> usize {
        self.inner.lock().paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn unpin(&self, handle: u64) {
        let mut inner = self.inner.lock();
        let released = match inner.pins.get_mut(&handle) {
            Some(count) => {
                *count -= 1;
                *count == 0
            }
            None => false,
        };
        if released {
            inner.pins.remove(&handle);
            inner.evict(None);
        }
    }
}

/// Keeps a handle from being evicted while a request uses it.
pub struct HandlePin<'a> {
    cache: &'a HandleCache,
    handle: u64,
}

impl HandlePin<'_> {
    pub fn handle(&self) -> u64 {
        self.handle
    }
}

impl Drop for HandlePin<'_> {
    fn drop(&mut self) {
        if self.handle != ROOT_HANDLE {
            self.cache.unpin(self.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_fixed() {
        let cache = HandleCache::new(4);
        assert_eq!(cache.handle_for("/"), ROOT_HANDLE);
        assert_eq!(cache.path_of(ROOT_HANDLE).as_deref(), Some("/"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_handles_are_stable() {
        let cache = HandleCache::new(4);
        let a = cache.handle_for("/a");
        let b = cache.handle_for("/b");
        assert_eq!(a, 2);
        assert_ne!(a, b);
        assert_eq!(cache.handle_for("/a"), a);
        assert_eq!(cache.path_of(b).as_deref(), Some("/b"));
        assert_eq!(cache.path_of(999), None);
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let cache = HandleCache::new(2);
        let a = cache.handle_for("/a");
        let b = cache.handle_for("/b");
        // Touch /a so /b becomes the eviction candidate.
        cache.path_of(a);
        let c = cache.handle_for("/c");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.path_of(b), None);
        assert_eq!(cache.path_of(a).as_deref(), Some("/a"));
        assert_eq!(cache.path_of(c).as_deref(), Some("/c"));
        // An evicted path gets a fresh handle.
        assert_ne!(cache.handle_for("/b"), b);
    }

    #[test]
    fn test_pinned_handle_survives_eviction() {
        let cache = HandleCache::new(2);
        let a = cache.handle_for("/a");
        let (pin_a, path) = cache.pin(a).unwrap();
        assert_eq!(path, "/a");
        assert_eq!(pin_a.handle(), a);
        let b = cache.handle_for("/b");
        let (pin_b, _) = cache.pin(b).unwrap();

        // Over capacity while /a and /b are pinned and /c is brand new.
        let c = cache.handle_for("/c");
        assert_eq!(cache.len(), 3);
        let d = cache.handle_for("/d");
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.path_of(c), None);

        drop(pin_a);
        // Unpinning shrinks the table back to capacity.
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.path_of(a), None);
        assert_eq!(cache.path_of(b).as_deref(), Some("/b"));
        assert_eq!(cache.path_of(d).as_deref(), Some("/d"));
        drop(pin_b);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_capacity_has_a_floor() {
        let cache = HandleCache::new(0);
        let a = cache.handle_for("/a");
        let b = cache.handle_for("/b");
        assert_eq!(cache.len(), MIN_HANDLE_CACHE_SIZE);
        assert_eq!(cache.path_of(a).as_deref(), Some("/a"));
        assert_eq!(cache.path_of(b).as_deref(), Some("/b"));
    }

    #[test]
    fn test_pinned_allocations_outlive_capacity() {
        let cache = HandleCache::new(2);
        let pins: Vec<_> = ["/a", "/b", "/c", "/d"]
            .iter()
            .map(|path| cache.pinned_handle_for(path))
            .collect();
        let handles: Vec<u64> = pins.iter().map(|pin| pin.handle()).collect();
        assert_eq!(cache.len(), 4);
        for handle in &handles {
            assert!(cache.path_of(*handle).is_some());
        }
        assert_eq!(cache.pinned_handle_for("/").handle(), ROOT_HANDLE);

        drop(pins);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.path_of(handles[0]), None);
        assert_eq!(cache.path_of(handles[1]), None);
        assert_eq!(cache.path_of(handles[2]).as_deref(), Some("/c"));
        assert_eq!(cache.path_of(handles[3]).as_deref(), Some("/d"));
    }

    #[test]
    fn test_touch_protects_from_eviction() {
        let cache = HandleCache::new(2);
        let a = cache.handle_for("/a");
        let b = cache.handle_for("/b");
        cache.touch(a);
        cache.handle_for("/c");
        assert_eq!(cache.path_of(b), None);
        assert_eq!(cache.path_of(a).as_deref(), Some("/a"));
    }

    #[test]
    fn test_pin_unknown_handle() {
        let cache = HandleCache::new(2);
        assert!(cache.pin(42).is_none());
        assert!(cache.pin(ROOT_HANDLE).is_some());
    }
}
