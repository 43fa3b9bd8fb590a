//! In-memory object store
//!
//! Keeps objects in a sorted map. Reads of selected identifiers can be made
//! to fail, which is useful for exercising partial-failure paths.

use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt as _;
use futures::stream::{self, BoxStream};
use tokio::io::AsyncReadExt as _;

use crate::error::{Error, Result};
use crate::path::join;
use crate::traits::{ObjectInfo, ObjectReader, ObjectStore};

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, Vec<u8>>,
    failing: HashSet<String>,
    puts: u64,
}

/// Thread-safe in-memory backend; clones share the same objects
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.lock().objects.insert(id.into(), data.into());
    }

    pub fn get(&self, id: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(id).cloned()
    }

    /// Make every `open` of `id` fail with a network error
    pub fn fail_reads_of(&self, id: impl Into<String>) {
        self.lock().failing.insert(id.into());
    }

    /// Number of completed `put` calls
    pub fn put_count(&self) -> u64 {
        self.lock().puts
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn entries(&self, id: &str, recursive: bool) -> Vec<Result<ObjectInfo>> {
        let state = self.lock();
        if let Some(data) = state.objects.get(id) {
            return vec![Ok(ObjectInfo::file(id, data.len() as u64))];
        }

        let prefix = format!("{}/", id.trim_end_matches('/'));
        let mut entries = Vec::new();
        let mut seen_dirs = HashSet::new();
        for (name, data) in state.objects.range(prefix.clone()..) {
            let Some(rest) = name.strip_prefix(&prefix) else {
                break;
            };
            match rest.split_once('/') {
                Some((dir, _)) if !recursive => {
                    if seen_dirs.insert(dir.to_string()) {
                        entries.push(Ok(ObjectInfo::dir(join(id, dir))));
                    }
                }
                _ => entries.push(Ok(ObjectInfo::file(name, data.len() as u64))),
            }
        }

        if entries.is_empty() {
            entries.push(Err(Error::NotFound(id.to_string())));
        }
        entries
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn open(&self, id: &str) -> Result<(ObjectReader, u64)> {
        let state = self.lock();
        if state.failing.contains(id) {
            return Err(Error::Network(format!("connection reset reading {id}")));
        }
        let data = state
            .objects
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let size = data.len() as u64;
        Ok((Box::pin(Cursor::new(data)), size))
    }

    async fn put(&self, id: &str, _size: u64, mut reader: ObjectReader) -> Result<()> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        let mut state = self.lock();
        state.objects.insert(id.to_string(), data);
        state.puts += 1;
        Ok(())
    }

    fn list<'a>(&'a self, id: &'a str, recursive: bool) -> BoxStream<'a, Result<ObjectInfo>> {
        stream::iter(self.entries(id, recursive)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt as _;

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert("src/a", vec![0u8; 100]);
        store.insert("src/d/b", vec![0u8; 200]);
        store.insert("src2/c", vec![0u8; 1]);
        store
    }

    #[tokio::test]
    async fn test_list_recursive_stays_under_prefix() {
        let entries: Vec<ObjectInfo> = store().list("src", true).try_collect().await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["src/a", "src/d/b"]);
    }

    #[tokio::test]
    async fn test_list_non_recursive_groups_folders() {
        let entries: Vec<ObjectInfo> = store().list("src", false).try_collect().await.unwrap();
        assert_eq!(
            entries,
            vec![ObjectInfo::file("src/a", 100), ObjectInfo::dir("src/d")]
        );
    }

    #[tokio::test]
    async fn test_open_failure_injection() {
        let store = store();
        store.fail_reads_of("src/a");
        assert!(matches!(store.open("src/a").await, Err(Error::Network(_))));
        assert!(store.open("src/d/b").await.is_ok());
        assert!(matches!(store.open("missing").await, Err(Error::NotFound(_))));
    }
}
