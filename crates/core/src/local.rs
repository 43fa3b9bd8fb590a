//! Local filesystem backend
//!
//! Identifiers are plain filesystem paths. Directory listings are sorted by
//! name so that repeated preparations of an unchanged tree yield the same
//! sequence.

use std::fs::Metadata;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt as _;
use futures::stream::{self, BoxStream};
use jiff::Timestamp;
use tokio::fs;
use tokio::io::AsyncWriteExt as _;

use crate::error::{Error, Result};
use crate::traits::{ObjectInfo, ObjectReader, ObjectStore};

/// Filesystem-backed object store
#[derive(Debug, Clone, Default)]
pub struct LocalStore;

impl LocalStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn open(&self, id: &str) -> Result<(ObjectReader, u64)> {
        let meta = fs::metadata(id).await.map_err(|e| not_found_or_io(id, e))?;
        if meta.is_dir() {
            return Err(Error::IsDirectory(id.to_string()));
        }
        let file = fs::File::open(id).await?;
        Ok((Box::pin(file), meta.len()))
    }

    async fn put(&self, id: &str, size: u64, mut reader: ObjectReader) -> Result<()> {
        let path = Path::new(id);
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(path).await?;
        let written = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;

        if written != size {
            tracing::warn!(object = id, expected = size, written, "Size changed during copy");
        }
        Ok(())
    }

    fn list<'a>(&'a self, id: &'a str, recursive: bool) -> BoxStream<'a, Result<ObjectInfo>> {
        let walk = Walk {
            root: Some(PathBuf::from(id)),
            recursive,
            stack: Vec::new(),
        };
        stream::unfold(walk, next_entry).boxed()
    }
}

/// Depth-first walk state; each stack level holds the sorted remainder of a directory
struct Walk {
    root: Option<PathBuf>,
    recursive: bool,
    stack: Vec<std::vec::IntoIter<PathBuf>>,
}

async fn next_entry(mut walk: Walk) -> Option<(Result<ObjectInfo>, Walk)> {
    if let Some(root) = walk.root.take() {
        let meta = match fs::metadata(&root).await {
            Ok(meta) => meta,
            Err(e) => return Some((Err(not_found_or_io(&display(&root), e)), walk)),
        };
        if !meta.is_dir() {
            return Some((Ok(file_info(&root, &meta)), walk));
        }
        match read_sorted(&root).await {
            Ok(children) => walk.stack.push(children.into_iter()),
            Err(e) => return Some((Err(e), walk)),
        }
    }

    loop {
        let top = walk.stack.last_mut()?;
        let Some(path) = top.next() else {
            walk.stack.pop();
            continue;
        };

        let link = match fs::symlink_metadata(&path).await {
            Ok(meta) => meta,
            Err(e) => return Some((Err(e.into()), walk)),
        };
        let meta = if link.file_type().is_symlink() {
            match fs::metadata(&path).await {
                Ok(meta) if meta.is_dir() => {
                    tracing::debug!(path = %path.display(), "Not following symlinked folder");
                    continue;
                }
                Ok(meta) => meta,
                Err(e) => return Some((Err(not_found_or_io(&display(&path), e)), walk)),
            }
        } else {
            link
        };

        if !meta.is_dir() {
            return Some((Ok(file_info(&path, &meta)), walk));
        }
        if !walk.recursive {
            return Some((Ok(ObjectInfo::dir(display(&path))), walk));
        }
        match read_sorted(&path).await {
            Ok(children) => walk.stack.push(children.into_iter()),
            Err(e) => return Some((Err(e), walk)),
        }
    }
}

async fn read_sorted(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

fn file_info(path: &Path, meta: &Metadata) -> ObjectInfo {
    let modified = meta
        .modified()
        .ok()
        .and_then(|t| Timestamp::try_from(t).ok());
    ObjectInfo::file(display(path), meta.len()).with_modified(modified)
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn not_found_or_io(id: &str, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound(id.to_string())
    } else {
        Error::Io(e)
    }
}
