//! Storage backend abstraction
//!
//! The copy engine needs three operations from a backend: open a readable
//! stream, put a stream, and list entries. Backends address objects by the
//! same opaque identifiers that appear in transfer units.

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::BoxStream;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::error::Result;

/// Readable byte stream handed out by `ObjectStore::open`
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// Metadata for one listed entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Full identifier of the entry
    pub name: String,

    /// Size in bytes (0 for directories)
    pub size: u64,

    /// Last modification time, when the backend reports one
    pub modified: Option<Timestamp>,

    pub is_dir: bool,
}

impl ObjectInfo {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            modified: None,
            is_dir: false,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            modified: None,
            is_dir: true,
        }
    }

    pub fn with_modified(mut self, modified: Option<Timestamp>) -> Self {
        self.modified = modified;
        self
    }
}

/// Backend capability required by the copy engine
///
/// Listing contract:
/// - non-recursive on a file yields exactly that file;
/// - non-recursive on a folder yields its direct children or folder markers,
///   never an entry that equals the identifier as a file;
/// - recursive yields every file below the identifier in a stable order,
///   or the file itself when the identifier names a file.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Open an object for reading, returning the stream and its size
    async fn open(&self, id: &str) -> Result<(ObjectReader, u64)>;

    /// Write `size` bytes read from `reader` to `id`
    async fn put(&self, id: &str, size: u64, reader: ObjectReader) -> Result<()>;

    /// List entries at or below `id`
    fn list<'a>(&'a self, id: &'a str, recursive: bool) -> BoxStream<'a, Result<ObjectInfo>>;
}
