//! # Visited Cache Module
//!
//! Duplicate suppression for the crawl: a presence-only set of canonical URL
//! strings. The in-memory implementation never evicts and never rejects an
//! add; only distributed backends can actually fail.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Error;
use crate::request::Request;

/// Records visited URLs to prevent revisits.
#[async_trait]
pub trait VisitedCache: Send + Sync {
    /// Records the request's URL.
    async fn add_request(&self, request: &Request) -> Result<(), Error>;

    /// True if the request's URL has been recorded before.
    async fn visited_url(&self, request: &Request) -> Result<bool, Error>;

    /// Forgets all recorded URLs.
    async fn clear(&self) -> Result<(), Error>;
}

/// In-memory visited cache. Reads are concurrent, writes exclusive.
///
/// Cloning is cheap and clones share the same set.
#[derive(Clone, Default)]
pub struct MemoryCache {
    visited: Arc<RwLock<HashSet<String>>>,
}

impl MemoryCache {
    pub fn new() -> MemoryCache {
        MemoryCache::default()
    }

    /// Number of recorded URLs.
    pub fn len(&self) -> usize {
        self.visited.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.visited.read().is_empty()
    }
}

#[async_trait]
impl VisitedCache for MemoryCache {
    async fn add_request(&self, request: &Request) -> Result<(), Error> {
        self.visited.write().insert(request.url().to_string());
        Ok(())
    }

    async fn visited_url(&self, request: &Request) -> Result<bool, Error> {
        Ok(self.visited.read().contains(request.url().as_str()))
    }

    async fn clear(&self) -> Result<(), Error> {
        self.visited.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &str) -> Request {
        Request::new(&format!("http://example.com/{path}"), None).unwrap()
    }

    #[tokio::test]
    async fn records_and_reports_visits() {
        let cache = MemoryCache::new();
        let req = request("a");

        assert!(!cache.visited_url(&req).await.unwrap());
        cache.add_request(&req).await.unwrap();
        assert!(cache.visited_url(&req).await.unwrap());
        assert!(!cache.visited_url(&request("b")).await.unwrap());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn repeated_adds_are_idempotent() {
        let cache = MemoryCache::new();
        let req = request("a");
        cache.add_request(&req).await.unwrap();
        cache.add_request(&req).await.unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn clear_forgets_everything() {
        let cache = MemoryCache::new();
        cache.add_request(&request("a")).await.unwrap();
        cache.add_request(&request("b")).await.unwrap();
        cache.clear().await.unwrap();
        assert!(cache.is_empty());
        assert!(!cache.visited_url(&request("a")).await.unwrap());
    }
}
