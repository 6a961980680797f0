//! Durable queue of calibration results waiting to be uploaded.
//!
//! Every queued item is a pair of files: the binary parameter file and an
//! index file of `key,value` lines describing it. An item only becomes
//! visible to readers of the queue once its index file has been renamed to
//! carry the upload extension. A crash before that rename leaves nothing the
//! queue recognizes.

use std::path::{Path, PathBuf};

mod dir_store;
mod index_file;
mod metadata;
mod share;

pub use crate::dir_store::{DirQueueStore, PAYLOAD_FILE_NAME, StagedItem, ensure_dir};
pub use crate::index_file::IndexFile;
pub use crate::metadata::{CameraFace, CameraInfo, DeviceInfo, UploadMetadata, index_keys};
pub use crate::share::{share_file_name, write_share_copy};

/// Possible errors
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error on \"{path}\": {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("\"{0}\" exists but is not a directory")]
    NotADirectory(PathBuf),
}

impl Error {
    pub(crate) fn io<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A committed item in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueEntry {
    index_path: PathBuf,
}

impl QueueEntry {
    pub fn new(index_path: PathBuf) -> Self {
        Self { index_path }
    }
    pub fn index_path(&self) -> &Path {
        &self.index_path
    }
}

/// Storage backend for pending uploads.
///
/// There is one producer (which calls [QueueStore::publish]) and one consumer
/// (the upload worker). No ordering between items is guaranteed.
pub trait QueueStore: Send + Sync {
    /// Store `payload` with its metadata and commit it to the queue.
    fn publish(&self, payload: &[u8], metadata: &UploadMetadata) -> Result<QueueEntry>;
    /// Return any one committed item, or `None` if the queue is empty.
    fn next_committed(&self) -> Result<Option<QueueEntry>>;
    /// Read the index of a committed item.
    fn load(&self, entry: &QueueEntry) -> Result<IndexFile>;
    /// Remove an item. Failures are logged, not returned.
    fn delete(&self, entry: &QueueEntry, payload_path: Option<&Path>);
}
