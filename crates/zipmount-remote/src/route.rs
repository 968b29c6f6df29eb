//! Per-container route cache.
//!
//! A route (for S3, a region-pinned client) is resolved at most once per
//! container for the lifetime of the cache. The map lock is held only long
//! enough to find or insert the container's cell; the resolution itself runs
//! outside it, so resolving one container never blocks requests for another.

use crate::error::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Lazily populated container → route mapping with no eviction.
pub struct RouteCache<R> {
    routes: Mutex<HashMap<String, Arc<OnceCell<R>>>>,
}

impl<R: Clone> RouteCache<R> {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached route for `container`, resolving it with `resolve`
    /// if this is the first request. Concurrent first requests for the same
    /// container share one resolution. A failed resolution is not cached.
    pub async fn get_or_resolve<F, Fut>(&self, container: &str, resolve: F) -> Result<R>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let cell = {
            let mut routes = self.routes.lock();
            routes
                .entry(container.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        let route = cell.get_or_try_init(resolve).await?;
        Ok(route.clone())
    }

    /// The route for `container` if it has already been resolved.
    pub fn get(&self, container: &str) -> Option<R> {
        let routes = self.routes.lock();
        routes.get(container).and_then(|cell| cell.get().cloned())
    }

    /// Number of containers with a resolved route.
    pub fn len(&self) -> usize {
        let routes = self.routes.lock();
        routes.values().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R: Clone> Default for RouteCache<R> {
    fn default() -> Self {
        Self::new()
    }
}
