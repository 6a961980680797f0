use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use calib_upload_queue::{QueueEntry, QueueStore};

use crate::{
    Connector, Notifier, StatusChannel, Transport, TransportError, UploadForm, signal::WakeSignal,
};

/// Status shown while a cycle searches the queue.
pub const LOOKING_FOR_FILES: &str = "Looking for files to upload...";

/// Why an upload cycle stopped early. The item being uploaded stays queued.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleError {
    #[error("No Internet access. Uploads postponed.")]
    NoNetwork,
    #[error("Network error while uploading. Uploads postponed.")]
    Network,
    #[error("Server error while uploading. Uploads postponed.")]
    Server(u16),
    #[error("Internal error while uploading. Uploads postponed.")]
    Internal,
}

/// The outcome of one upload cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleSummary {
    pub uploads_done: usize,
    pub error: Option<CycleError>,
}

impl CycleSummary {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    /// The final status of the cycle, or `None` if there is nothing to say.
    pub fn status_text(&self) -> Option<String> {
        match (self.uploads_done, self.error) {
            (0, None) => None,
            (0, Some(e)) => Some(e.to_string()),
            (1, _) => Some("Uploaded 1 file".to_string()),
            (n, _) => Some(format!("Uploaded {n} files")),
        }
    }
}

pub(crate) struct WorkerContext {
    pub(crate) store: Arc<dyn QueueStore>,
    pub(crate) connector: Box<dyn Connector>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) status: Arc<StatusChannel>,
    pub(crate) signal: Arc<WakeSignal>,
    pub(crate) endpoint_url: String,
    pub(crate) status_hide: Duration,
}

/// Body of the worker thread. Runs one cycle per wake-up until asked to quit.
pub(crate) fn worker_loop(ctx: WorkerContext) {
    debug!("upload worker started");
    while ctx.signal.wait_for_start() {
        let summary = drain_cycle(&ctx);
        let final_text = summary.status_text();
        ctx.signal.end_cycle_with(|| match &final_text {
            Some(text) => ctx.status.set(text.as_str(), Some(ctx.status_hide)),
            None => ctx.status.clear(),
        });
        if let Some(text) = &final_text {
            ctx.notifier.on_progress(text);
        }
        ctx.notifier.on_finished(summary.success());
    }
    debug!("upload worker stopped");
}

/// Upload committed items until the queue is empty or an error occurs.
pub(crate) fn drain_cycle(ctx: &WorkerContext) -> CycleSummary {
    ctx.status.set(LOOKING_FOR_FILES, None);
    ctx.notifier.on_status(LOOKING_FOR_FILES);

    let mut summary = CycleSummary::default();

    let mut next = match next_entry(ctx) {
        Ok(Some(entry)) => Some(entry),
        Ok(None) => {
            debug!("upload queue is empty");
            return summary;
        }
        Err(e) => {
            summary.error = Some(e);
            return summary;
        }
    };

    let mut transport = match open_transport(ctx) {
        Ok(transport) => transport,
        Err(e) => {
            summary.error = Some(e);
            return summary;
        }
    };

    let mut attempted = HashSet::new();
    while let Some(entry) = next {
        if !attempted.insert(entry.clone()) {
            // Deleting it must have failed. Retrying now would loop forever.
            warn!(
                "\"{}\" is still queued after upload, ending cycle",
                entry.index_path().display()
            );
            break;
        }

        let progress = format!("Uploading file {}", summary.uploads_done + 1);
        ctx.status.set(progress.as_str(), None);
        ctx.notifier.on_progress(&progress);

        if let Err(e) = upload_one(ctx, &mut *transport, &entry) {
            summary.error = Some(e);
            break;
        }
        summary.uploads_done += 1;

        next = match next_entry(ctx) {
            Ok(next) => next,
            Err(e) => {
                summary.error = Some(e);
                break;
            }
        };
    }

    info!(
        "upload cycle done: {} uploaded, error: {:?}",
        summary.uploads_done, summary.error
    );
    summary
}

fn next_entry(ctx: &WorkerContext) -> Result<Option<QueueEntry>, CycleError> {
    ctx.store.next_committed().map_err(|e| {
        error!("Error listing upload queue: {e}");
        CycleError::Internal
    })
}

fn open_transport(ctx: &WorkerContext) -> Result<Box<dyn Transport>, CycleError> {
    let mut transport = ctx.connector.connect().map_err(|e| {
        error!("Error setting up upload connection: {e}");
        CycleError::Internal
    })?;
    if let Err(e) = transport.check_connectivity() {
        info!("No network connectivity: {e}");
        return Err(CycleError::NoNetwork);
    }
    Ok(transport)
}

fn upload_one(
    ctx: &WorkerContext,
    transport: &mut dyn Transport,
    entry: &QueueEntry,
) -> Result<(), CycleError> {
    let index_path = entry.index_path();
    let index = ctx.store.load(entry).map_err(|e| {
        error!("Error reading upload index: {e}");
        CycleError::Internal
    })?;

    if ctx.endpoint_url.is_empty() {
        error!("No upload URL provided.");
        return Err(CycleError::Internal);
    }

    let Some(form) = UploadForm::from_index(&index) else {
        error!("Error reading form data from \"{}\"", index_path.display());
        return Err(CycleError::Internal);
    };

    match transport.post_form(&ctx.endpoint_url, &form) {
        Ok(200) => {}
        Ok(code) => {
            error!("Upload of \"{}\" failed: server returned {code}", index_path.display());
            return Err(CycleError::Server(code));
        }
        Err(e @ TransportError::LocalFile { .. }) | Err(e @ TransportError::Setup(_)) => {
            error!("Error preparing upload: {e}");
            return Err(CycleError::Internal);
        }
        Err(e) => {
            error!("Error performing upload: {e}");
            return Err(CycleError::Network);
        }
    }

    debug!("uploaded \"{}\"", index_path.display());
    ctx.store.delete(entry, form.payload_path());
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn summary_status_text() {
        let summary = |uploads_done, error| CycleSummary {
            uploads_done,
            error,
        };
        assert_eq!(summary(0, None).status_text(), None);
        assert_eq!(
            summary(1, None).status_text().as_deref(),
            Some("Uploaded 1 file")
        );
        assert_eq!(
            summary(3, Some(CycleError::Network)).status_text().as_deref(),
            Some("Uploaded 3 files")
        );
        assert_eq!(
            summary(0, Some(CycleError::NoNetwork))
                .status_text()
                .as_deref(),
            Some("No Internet access. Uploads postponed.")
        );
        assert_eq!(
            summary(0, Some(CycleError::Server(500)))
                .status_text()
                .as_deref(),
            Some("Server error while uploading. Uploads postponed.")
        );
        assert!(!summary(2, Some(CycleError::Internal)).success());
    }
}
