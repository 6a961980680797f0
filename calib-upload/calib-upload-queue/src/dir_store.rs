use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};

use crate::{Error, IndexFile, QueueEntry, QueueStore, Result, UploadMetadata, write_share_copy};

/// Suffix of the parameter file of each queued item.
pub const PAYLOAD_FILE_NAME: &str = "camera_para.dat";

const INDEX_FILE_NAME: &str = "index";

/// Create `path` as a directory if it does not already exist.
pub fn ensure_dir(path: &Path) -> Result<()> {
    match std::fs::metadata(path) {
        Ok(md) if md.is_dir() => Ok(()),
        Ok(_) => Err(Error::NotADirectory(path.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("creating directory \"{}\"", path.display());
            std::fs::create_dir_all(path).map_err(|e| Error::io(path, e))
        }
        Err(e) => Err(Error::io(path, e)),
    }
}

pub(crate) fn write_synced(path: &Path, buf: &[u8]) -> std::io::Result<()> {
    let mut fd = std::fs::File::create(path)?;
    fd.write_all(buf)?;
    fd.sync_all()
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            error!("Error removing file \"{}\": {e}", path.display());
        }
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// `true` only for `<id>-index.<ext>`. Payload files never match, whatever
/// the extension is.
fn is_committed_index(path: &Path, ext: &str) -> bool {
    let index_suffix = format!("-{INDEX_FILE_NAME}");
    has_extension(path, ext)
        && path
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|s| s.ends_with(&index_suffix))
}

/// A queue kept as files in a single directory.
///
/// Items are committed by renaming `<id>-index` to `<id>-index.<extension>`.
/// Only committed index files are ever returned by
/// [QueueStore::next_committed].
#[derive(Debug, Clone)]
pub struct DirQueueStore {
    queue_dir: PathBuf,
    extension: String,
    share_dir: Option<PathBuf>,
}

impl DirQueueStore {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(queue_dir: P, extension: S) -> Self {
        Self {
            queue_dir: queue_dir.into(),
            extension: extension.into(),
            share_dir: None,
        }
    }

    /// Also write a copy of each published parameter file into `share_dir`.
    pub fn with_share_dir<P: Into<PathBuf>>(mut self, share_dir: P) -> Self {
        self.share_dir = Some(share_dir.into());
        self
    }

    pub fn queue_dir(&self) -> &Path {
        &self.queue_dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Write both files of an item under temporary names.
    ///
    /// The item is not part of the queue until [StagedItem::commit] is
    /// called. If writing fails, any partial files are removed.
    pub fn stage(&self, payload: &[u8], metadata: &UploadMetadata) -> Result<StagedItem> {
        let id = format!(
            "{}-{}",
            metadata.timestamp.format("%Y%m%d%H%M%S"),
            uuid::Uuid::new_v4().simple()
        );
        self.stage_as(&id, payload, metadata)
    }

    fn stage_as(
        &self,
        id: &str,
        payload: &[u8],
        metadata: &UploadMetadata,
    ) -> Result<StagedItem> {
        ensure_dir(&self.queue_dir)?;

        let payload_path = self.queue_dir.join(format!("{id}-{PAYLOAD_FILE_NAME}"));
        let index_tmp = self.queue_dir.join(format!("{id}-{INDEX_FILE_NAME}"));

        if let Err(e) = write_synced(&payload_path, payload) {
            error!("Error writing \"{}\": {e}", payload_path.display());
            remove_quietly(&payload_path);
            return Err(Error::io(payload_path, e));
        }

        let index = metadata.to_index(&payload_path);
        let mut buf = Vec::new();
        let written = index
            .write_to(&mut buf)
            .and_then(|()| write_synced(&index_tmp, &buf));
        if let Err(e) = written {
            error!("Error writing upload index \"{}\": {e}", index_tmp.display());
            remove_quietly(&index_tmp);
            remove_quietly(&payload_path);
            return Err(Error::io(index_tmp, e));
        }

        let mut committed_name = index_tmp
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        committed_name.push(".");
        committed_name.push(&self.extension);
        let index_committed = index_tmp.with_file_name(committed_name);

        Ok(StagedItem {
            payload_path,
            index_tmp,
            index_committed,
        })
    }
}

/// An item whose files are written but which is not yet visible in the queue.
#[derive(Debug)]
#[must_use = "a staged item is invisible to the queue until committed"]
pub struct StagedItem {
    payload_path: PathBuf,
    index_tmp: PathBuf,
    index_committed: PathBuf,
}

impl StagedItem {
    pub fn payload_path(&self) -> &Path {
        &self.payload_path
    }

    /// Make the item visible to the queue. This rename is the commit point.
    pub fn commit(self) -> Result<QueueEntry> {
        match std::fs::rename(&self.index_tmp, &self.index_committed) {
            Ok(()) => {
                debug!("committed \"{}\"", self.index_committed.display());
                Ok(QueueEntry::new(self.index_committed))
            }
            Err(e) => {
                error!(
                    "Error renaming temporary file \"{}\": {e}",
                    self.index_tmp.display()
                );
                let path = self.index_tmp.clone();
                self.abandon();
                Err(Error::io(path, e))
            }
        }
    }

    /// Remove the temporary files.
    pub fn abandon(self) {
        remove_quietly(&self.index_tmp);
        remove_quietly(&self.payload_path);
    }
}

impl QueueStore for DirQueueStore {
    fn publish(&self, payload: &[u8], metadata: &UploadMetadata) -> Result<QueueEntry> {
        let staged = self.stage(payload, metadata)?;

        if let Some(share_dir) = &self.share_dir {
            match write_share_copy(share_dir, metadata, payload) {
                Ok(dest) => debug!("shared copy saved to \"{}\"", dest.display()),
                Err(e) => warn!("Error writing shared copy of parameter file: {e}"),
            }
        }

        staged.commit()
    }

    fn next_committed(&self) -> Result<Option<QueueEntry>> {
        let rdr = match std::fs::read_dir(&self.queue_dir) {
            Ok(rdr) => rdr,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Nothing has been queued yet.
                debug!("queue directory \"{}\" not found", self.queue_dir.display());
                return Ok(None);
            }
            Err(e) => return Err(Error::io(&self.queue_dir, e)),
        };
        for dir_entry in rdr {
            let dir_entry = dir_entry.map_err(|e| Error::io(&self.queue_dir, e))?;
            let path = dir_entry.path();
            if is_committed_index(&path, &self.extension) && path.is_file() {
                return Ok(Some(QueueEntry::new(path)));
            }
        }
        Ok(None)
    }

    fn load(&self, entry: &QueueEntry) -> Result<IndexFile> {
        IndexFile::read(entry.index_path()).map_err(|e| Error::io(entry.index_path(), e))
    }

    fn delete(&self, entry: &QueueEntry, payload_path: Option<&Path>) {
        if let Err(e) = std::fs::remove_file(entry.index_path()) {
            error!(
                "Error removing index file \"{}\" after upload: {e}",
                entry.index_path().display()
            );
        }
        if let Some(payload_path) = payload_path {
            if let Err(e) = std::fs::remove_file(payload_path) {
                error!(
                    "Error removing file \"{}\" after upload: {e}",
                    payload_path.display()
                );
            }
        }
    }
}
