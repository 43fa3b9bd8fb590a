//! Durable session state
//!
//! Each session is two files in the session directory:
//! - `<id>.json`: the header (command, totals, resume watermark), rewritten
//!   atomically through a temporary file;
//! - `<id>.data`: the plan, one JSON `TransferUnit` per line, written once
//!   during preparation and only read afterwards.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader, BufWriter, Lines};

use crate::error::{Error, Result};
use crate::unit::TransferUnit;

/// Current header format version
pub const SESSION_VERSION: u32 = 1;

/// Minimum time between watermark checkpoints
pub const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(1);

const HEADER_EXT: &str = "json";
const DATA_EXT: &str = "data";

/// Lifecycle state recorded in the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// The plan is still being written
    #[default]
    Preparing,
    /// The plan is complete; only the watermark changes
    Ready,
}

/// Resume point: the last unit of the confirmed completed prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    /// 1-based position of the unit in the data log
    pub position: u64,
    /// Source identifier of that unit
    pub source: String,
}

/// Session metadata persisted in `<id>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHeader {
    pub version: u32,
    pub id: String,
    pub created: Timestamp,
    pub command_type: String,
    pub command_args: Vec<String>,
    /// Working directory the command was started from
    pub root_path: PathBuf,
    #[serde(default)]
    pub state: SessionState,
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(default)]
    pub total_objects: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_copied: Option<Watermark>,
}

/// Directory of sessions
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create a new session and write its initial header
    pub async fn create(
        &self,
        command_type: &str,
        command_args: Vec<String>,
        root_path: PathBuf,
    ) -> Result<Session> {
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            Error::Session(format!("cannot create {}: {e}", self.dir.display()))
        })?;

        let created = Timestamp::now();
        let mut seed = created.as_nanosecond() as u128 ^ ((std::process::id() as u128) << 64);
        let id = loop {
            let id = session_id(seed);
            if !fs::try_exists(self.header_path(&id)).await.unwrap_or(false) {
                break id;
            }
            seed = seed.wrapping_add(1);
        };

        let mut session = Session {
            header: SessionHeader {
                version: SESSION_VERSION,
                id: id.clone(),
                created,
                command_type: command_type.to_string(),
                command_args,
                root_path,
                state: SessionState::Preparing,
                total_bytes: 0,
                total_objects: 0,
                last_copied: None,
            },
            header_path: self.header_path(&id),
            data_path: self.data_path(&id),
            last_save: None,
        };
        session.save().await?;
        tracing::debug!(session = %id, "Created session");
        Ok(session)
    }

    /// Open an existing session by id
    pub async fn open(&self, id: &str) -> Result<Session> {
        let header_path = self.header_path(id);
        let content = match fs::read_to_string(&header_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("session '{id}'")));
            }
            Err(e) => return Err(Error::Session(format!("cannot read session '{id}': {e}"))),
        };

        let header: SessionHeader = serde_json::from_str(&content)
            .map_err(|e| Error::Session(format!("corrupt header for session '{id}': {e}")))?;
        if header.version != SESSION_VERSION {
            return Err(Error::Session(format!(
                "session '{id}' has unsupported version {}",
                header.version
            )));
        }

        Ok(Session {
            header,
            header_path,
            data_path: self.data_path(id),
            last_save: None,
        })
    }

    /// Headers of all sessions, newest first. Unreadable headers are skipped.
    pub async fn list(&self) -> Result<Vec<SessionHeader>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut headers = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(HEADER_EXT) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.open(id).await {
                Ok(session) => headers.push(session.header),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping session"),
            }
        }

        headers.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.id.cmp(&b.id)));
        Ok(headers)
    }

    /// Delete every session, returning how many were removed
    pub async fn clear_all(&self) -> Result<usize> {
        let headers = self.list().await?;
        let count = headers.len();
        for header in headers {
            self.open(&header.id).await?.delete().await?;
        }
        Ok(count)
    }

    fn header_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{HEADER_EXT}"))
    }

    fn data_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{DATA_EXT}"))
    }
}

/// Eight lowercase letters derived from `seed`
fn session_id(mut seed: u128) -> String {
    let mut id = String::with_capacity(8);
    for _ in 0..8 {
        id.push((b'a' + (seed % 26) as u8) as char);
        seed /= 26;
    }
    id
}

/// One session, owned by a single run at a time
#[derive(Debug)]
pub struct Session {
    pub header: SessionHeader,
    header_path: PathBuf,
    data_path: PathBuf,
    last_save: Option<Instant>,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.header.id
    }

    /// True once a previous run finished writing the plan
    pub async fn has_data(&self) -> bool {
        self.header.state == SessionState::Ready
            && fs::try_exists(&self.data_path).await.unwrap_or(false)
    }

    /// Start a fresh plan. Truncates any partial data log.
    pub async fn create_writer(&mut self) -> Result<SessionWriter> {
        self.header.state = SessionState::Preparing;
        self.header.last_copied = None;
        self.save().await?;

        let file = fs::File::create(&self.data_path)
            .await
            .map_err(|e| self.io_error("create data log", e))?;
        Ok(SessionWriter {
            file: BufWriter::new(file),
            total_bytes: 0,
            total_objects: 0,
        })
    }

    /// Record the finished plan's totals and move to the ready state
    pub async fn mark_ready(&mut self, totals: PlanTotals) -> Result<()> {
        self.header.total_bytes = totals.bytes;
        self.header.total_objects = totals.objects;
        self.header.state = SessionState::Ready;
        self.save().await
    }

    /// Read the plan from the beginning
    pub async fn reader(&self) -> Result<SessionReader> {
        let file = fs::File::open(&self.data_path)
            .await
            .map_err(|e| self.io_error("open data log", e))?;
        Ok(SessionReader {
            lines: BufReader::new(file).lines(),
            position: 0,
        })
    }

    pub fn watermark(&self) -> Option<&Watermark> {
        self.header.last_copied.as_ref()
    }

    pub fn set_watermark(&mut self, watermark: Watermark) {
        self.header.last_copied = Some(watermark);
    }

    /// Save the header if the last save is older than `CHECKPOINT_INTERVAL`
    pub async fn checkpoint(&mut self) -> Result<()> {
        match self.last_save {
            Some(at) if at.elapsed() < CHECKPOINT_INTERVAL => Ok(()),
            _ => self.save().await,
        }
    }

    /// Atomically rewrite the header file
    pub async fn save(&mut self) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.header)?;
        let tmp = self.header_path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .await
            .map_err(|e| self.io_error("write header", e))?;
        fs::rename(&tmp, &self.header_path)
            .await
            .map_err(|e| self.io_error("replace header", e))?;
        self.last_save = Some(Instant::now());
        Ok(())
    }

    /// Persist the header and release the session, keeping it resumable
    pub async fn close(mut self) -> Result<()> {
        self.save().await
    }

    /// Remove all state of this session
    pub async fn delete(self) -> Result<()> {
        for path in [&self.data_path, &self.header_path] {
            match fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(self.io_error("delete", e)),
            }
        }
        tracing::debug!(session = %self.header.id, "Deleted session");
        Ok(())
    }

    fn io_error(&self, action: &str, e: std::io::Error) -> Error {
        Error::Session(format!("cannot {action} for session '{}': {e}", self.header.id))
    }
}

/// Totals accumulated while writing the plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanTotals {
    pub bytes: u64,
    pub objects: u64,
}

/// Append-only sink for the plan, used during preparation only
pub struct SessionWriter {
    file: BufWriter<fs::File>,
    total_bytes: u64,
    total_objects: u64,
}

impl SessionWriter {
    /// Append one unit as a JSON line and flush it
    pub async fn append(&mut self, unit: &TransferUnit) -> Result<()> {
        let mut line = serde_json::to_vec(unit)?;
        line.push(b'\n');
        self.file.write_all(&line).await?;
        self.file.flush().await?;
        self.total_bytes += unit.size();
        self.total_objects += 1;
        Ok(())
    }

    pub fn totals(&self) -> PlanTotals {
        PlanTotals {
            bytes: self.total_bytes,
            objects: self.total_objects,
        }
    }

    /// Sync the log to disk and return the plan totals
    pub async fn finish(mut self) -> Result<PlanTotals> {
        self.file.flush().await?;
        self.file.get_ref().sync_all().await?;
        Ok(self.totals())
    }
}

/// Lazy reader over the plan in write order
pub struct SessionReader {
    lines: Lines<BufReader<fs::File>>,
    position: u64,
}

impl SessionReader {
    /// Next unit with its 1-based position, or `None` at the end of the log
    pub async fn next_unit(&mut self) -> Result<Option<(u64, TransferUnit)>> {
        while let Some(line) = self.lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            self.position += 1;
            let unit = serde_json::from_str(&line).map_err(|e| {
                Error::Session(format!("corrupt record {} in data log: {e}", self.position))
            })?;
            return Ok(Some((self.position, unit)));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ObjectInfo;
    use tempfile::TempDir;

    async fn new_session(store: &SessionStore) -> Session {
        store
            .create("cp", vec!["a".into(), "b".into(), "T".into()], PathBuf::from("/work"))
            .await
            .unwrap()
    }

    #[test]
    fn test_session_id_shape() {
        let id = session_id(123_456_789);
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_lowercase()));
        assert_ne!(session_id(1), session_id(2));
    }

    #[tokio::test]
    async fn test_write_then_read_plan() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        let mut session = new_session(&store).await;
        assert!(!session.has_data().await);

        let mut writer = session.create_writer().await.unwrap();
        writer
            .append(&TransferUnit::new(&ObjectInfo::file("a", 100), "T/a"))
            .await
            .unwrap();
        writer
            .append(&TransferUnit::new(&ObjectInfo::file("b", 200), "T/b"))
            .await
            .unwrap();
        let totals = writer.finish().await.unwrap();
        assert_eq!(totals, PlanTotals { bytes: 300, objects: 2 });
        session.mark_ready(totals).await.unwrap();
        assert!(session.has_data().await);

        // readable twice from the start
        for _ in 0..2 {
            let mut reader = session.reader().await.unwrap();
            let (pos, first) = reader.next_unit().await.unwrap().unwrap();
            assert_eq!((pos, first.target.as_str()), (1, "T/a"));
            let (pos, second) = reader.next_unit().await.unwrap().unwrap();
            assert_eq!((pos, second.target.as_str()), (2, "T/b"));
            assert!(reader.next_unit().await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_close_keeps_watermark_and_delete_removes() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        let mut session = new_session(&store).await;
        let id = session.id().to_string();
        let writer = session.create_writer().await.unwrap();
        session.mark_ready(writer.finish().await.unwrap()).await.unwrap();

        session.set_watermark(Watermark {
            position: 4,
            source: "src/4".into(),
        });
        session.close().await.unwrap();

        let reopened = store.open(&id).await.unwrap();
        assert_eq!(reopened.watermark().unwrap().position, 4);
        assert_eq!(reopened.header.command_args, vec!["a", "b", "T"]);
        assert_eq!(reopened.header.state, SessionState::Ready);

        reopened.delete().await.unwrap();
        assert!(matches!(store.open(&id).await, Err(Error::NotFound(_))));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_preparation_is_not_data() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        let mut session = new_session(&store).await;
        let mut writer = session.create_writer().await.unwrap();
        writer
            .append(&TransferUnit::new(&ObjectInfo::file("a", 1), "T/a"))
            .await
            .unwrap();
        drop(writer);

        let reopened = store.open(session.id()).await.unwrap();
        assert!(!reopened.has_data().await);
    }

    #[tokio::test]
    async fn test_list_and_clear_all() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("session"));
        assert!(store.list().await.unwrap().is_empty());

        let first = new_session(&store).await;
        let second = new_session(&store).await;
        assert_ne!(first.id(), second.id());
        std::fs::write(store.dir().join("junk.json"), "{").unwrap();

        let headers = store.list().await.unwrap();
        assert_eq!(headers.len(), 2);

        assert_eq!(store.clear_all().await.unwrap(), 2);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_session_error() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        let mut session = new_session(&store).await;
        let writer = session.create_writer().await.unwrap();
        session.mark_ready(writer.finish().await.unwrap()).await.unwrap();
        std::fs::write(dir.path().join(format!("{}.data", session.id())), "not json\n").unwrap();

        let mut reader = session.reader().await.unwrap();
        let err = reader.next_unit().await.unwrap_err();
        assert!(matches!(err, Error::Session(_)));
        assert!(err.is_fatal());
    }
}
