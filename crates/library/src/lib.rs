use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use metadata::{MetadataError, TagReaders};
use parking_lot::Mutex;
use redb::{CommitError, DatabaseError, StorageError, TableError, TransactionError};
use serde::{Deserialize, Serialize};

pub mod art;
pub mod catalog;
pub mod collate;
pub mod config;
pub mod live;
pub mod planner;
pub mod walker;

pub use art::{ArtBlobs, ArtError, ArtOutcome};
pub use catalog::{Catalog, LibraryStats, TrackRecord};
pub use config::{ConfigError, LibraryConfig};
pub use planner::{
    CancelToken, RunError, RunGuard, RunMode, RunReport, RunStatus, SkipReason, SkippedFile,
};
pub use walker::{FileEntry, WalkFailure, WalkFailureKind, Walker};

pub(crate) const KEY_SEP: char = '\x1f';

/// Seconds since the epoch, injectable so tests can control addition times.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

#[derive(Clone)]
pub struct LibraryOptions {
    /// Fingerprinting threads; 1 keeps everything on the calling thread.
    pub workers: usize,
    pub thumbnail_list_px: u32,
    pub thumbnail_album_px: u32,
    pub clock: Clock,
}

impl LibraryOptions {
    pub fn thumbnail_sizes(&self) -> (u32, u32) {
        (self.thumbnail_list_px, self.thumbnail_album_px)
    }
}

impl Default for LibraryOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            thumbnail_list_px: 80,
            thumbnail_album_px: 300,
            clock: Arc::new(now_secs),
        }
    }
}

pub struct Library {
    root: PathBuf,
    catalog: Catalog,
    readers: TagReaders,
    options: LibraryOptions,
    run_lock: Mutex<Option<RunMode>>,
}

impl Library {
    pub fn open(config: &LibraryConfig, config_path: &Path) -> Result<Self, LibraryError> {
        let root = config::resolve_library_root(config_path, &config.library_root)
            .ok_or_else(|| LibraryError::Config("library_root is not set".to_string()))?;
        let index_path = config::resolve_path(config_path, &config.index_path);
        let catalog = Catalog::open(&index_path)?;
        Ok(Self::with_parts(
            root,
            catalog,
            TagReaders::standard(),
            config.options(),
        ))
    }

    pub fn with_parts(
        root: PathBuf,
        catalog: Catalog,
        readers: TagReaders,
        options: LibraryOptions,
    ) -> Self {
        Self {
            root,
            catalog,
            readers,
            options,
            run_lock: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn options(&self) -> &LibraryOptions {
        &self.options
    }

    pub(crate) fn readers(&self) -> &TagReaders {
        &self.readers
    }

    pub(crate) fn run_lock(&self) -> &Mutex<Option<RunMode>> {
        &self.run_lock
    }

    /// Mode of the run currently holding the lock, if any.
    pub fn running(&self) -> Option<RunMode> {
        *self.run_lock.lock()
    }
}

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Metadata(MetadataError),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
    KeyParse(String),
    Config(String),
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Metadata(err) => write!(f, "metadata error: {}", err),
            LibraryError::Redb(err) => write!(f, "db error: {}", err),
            LibraryError::Bincode(err) => write!(f, "bincode error: {}", err),
            LibraryError::KeyParse(value) => write!(f, "key parse error: {}", value),
            LibraryError::Config(value) => write!(f, "config error: {}", value),
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<MetadataError> for LibraryError {
    fn from(err: MetadataError) -> Self {
        LibraryError::Metadata(err)
    }
}

impl From<redb::Error> for LibraryError {
    fn from(err: redb::Error) -> Self {
        LibraryError::Redb(err)
    }
}

impl From<DatabaseError> for LibraryError {
    fn from(err: DatabaseError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TableError> for LibraryError {
    fn from(err: TableError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TransactionError> for LibraryError {
    fn from(err: TransactionError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<StorageError> for LibraryError {
    fn from(err: StorageError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<CommitError> for LibraryError {
    fn from(err: CommitError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for LibraryError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        LibraryError::Bincode(err)
    }
}

pub(crate) fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, LibraryError> {
    Ok(bincode::serialize(value)?)
}

pub(crate) fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, LibraryError> {
    Ok(bincode::deserialize(bytes)?)
}

pub(crate) fn join_key(head: &str, tail: &str) -> String {
    let mut out = String::with_capacity(head.len() + tail.len() + 1);
    out.push_str(head);
    out.push(KEY_SEP);
    out.push_str(tail);
    out
}

pub(crate) fn prefix_key(prefix: &str) -> String {
    let mut out = String::new();
    out.push_str(prefix);
    out.push(KEY_SEP);
    out
}

/// Upper bound for a `prefix_key` range scan.
pub(crate) fn prefix_end(prefix: &str) -> String {
    let mut end = prefix.to_string();
    end.push('\u{10ffff}');
    end
}

pub(crate) fn split_key_last(value: &str) -> Result<(&str, &str), LibraryError> {
    let idx = value
        .rfind(KEY_SEP)
        .ok_or_else(|| LibraryError::KeyParse(value.to_string()))?;
    let next = idx + KEY_SEP.len_utf8();
    Ok((&value[..idx], &value[next..]))
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}
