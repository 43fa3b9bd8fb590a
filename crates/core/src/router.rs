//! Identifier routing across backends
//!
//! An identifier whose first path segment names a configured alias goes to
//! that alias's remote store; everything else is a local path.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::local::LocalStore;
use crate::traits::{ObjectInfo, ObjectReader, ObjectStore};

/// `ObjectStore` that dispatches each call to the backend owning the identifier
#[derive(Clone)]
pub struct StoreRouter {
    local: Arc<dyn ObjectStore>,
    remotes: HashMap<String, Arc<dyn ObjectStore>>,
}

impl StoreRouter {
    pub fn new() -> Self {
        Self {
            local: Arc::new(LocalStore::new()),
            remotes: HashMap::new(),
        }
    }

    /// Route identifiers starting with `alias/` to `store`
    pub fn with_remote(mut self, alias: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.remotes.insert(alias.into(), store);
        self
    }

    /// True when `id` addresses a remote alias
    pub fn is_remote(&self, id: &str) -> bool {
        self.remote_for(id).is_some()
    }

    fn remote_for(&self, id: &str) -> Option<&Arc<dyn ObjectStore>> {
        let (alias, _) = id.split_once('/')?;
        self.remotes.get(alias)
    }

    fn route(&self, id: &str) -> &Arc<dyn ObjectStore> {
        self.remote_for(id).unwrap_or(&self.local)
    }
}

impl Default for StoreRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for StoreRouter {
    async fn open(&self, id: &str) -> Result<(ObjectReader, u64)> {
        self.route(id).open(id).await
    }

    async fn put(&self, id: &str, size: u64, reader: ObjectReader) -> Result<()> {
        self.route(id).put(id, size, reader).await
    }

    fn list<'a>(&'a self, id: &'a str, recursive: bool) -> BoxStream<'a, Result<ObjectInfo>> {
        self.route(id).list(id, recursive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use tokio::io::AsyncReadExt as _;

    #[tokio::test]
    async fn test_routes_by_alias_segment() {
        let remote = MemoryStore::new();
        remote.insert("minio/bkt/a", b"remote".to_vec());
        let router = StoreRouter::new().with_remote("minio", Arc::new(remote.clone()));

        assert!(router.is_remote("minio/bkt/a"));
        assert!(!router.is_remote("minio"));
        assert!(!router.is_remote("./minio/bkt/a"));
        assert!(!router.is_remote("other/bkt/a"));

        let (mut reader, size) = router.open("minio/bkt/a").await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(size, 6);
        assert_eq!(buf, b"remote");
    }

    #[tokio::test]
    async fn test_unknown_prefix_goes_local() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, b"local").unwrap();

        let router = StoreRouter::new().with_remote("minio", Arc::new(MemoryStore::new()));
        let (_, size) = router.open(file.to_str().unwrap()).await.unwrap();
        assert_eq!(size, 5);
    }
}
