//! rcopy-core: Core library for the rcopy resumable copy tool
//!
//! This crate provides the copy engine, including:
//! - Configuration and storage aliases
//! - Source expansion into transfer units
//! - Durable sessions with a resume watermark
//! - A bounded transfer pool with byte accounting
//! - The `ObjectStore` trait with local and in-memory backends
//!
//! The S3 backend lives in `rcopy-s3` so this crate stays independent of any
//! specific SDK.

pub mod config;
pub mod coordinator;
pub mod display;
pub mod error;
pub mod executor;
pub mod local;
pub mod memory;
pub mod path;
pub mod prepare;
pub mod progress;
pub mod resume;
pub mod retry;
pub mod router;
pub mod session;
pub mod traits;
pub mod unit;

pub use config::{Alias, Config, ConfigManager, RetryConfig};
pub use coordinator::{Coordinator, RunOptions, RunOutcome, RunSummary};
pub use display::{DisplaySink, NullDisplay};
pub use error::{Error, Result};
pub use executor::default_concurrency;
pub use local::LocalStore;
pub use memory::MemoryStore;
pub use path::{RECURSIVE_MARKER, RemotePath, SourceSpec, validate_copy_args};
pub use progress::{AccountStat, Accounter};
pub use retry::{is_retryable_error, retry_with_backoff};
pub use router::StoreRouter;
pub use session::{SESSION_VERSION, Session, SessionHeader, SessionState, SessionStore, Watermark};
pub use traits::{ObjectInfo, ObjectReader, ObjectStore};
pub use unit::TransferUnit;
