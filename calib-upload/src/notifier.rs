use tracing::{info, warn};

/// Receives events from the upload worker.
///
/// All methods are called on the worker thread.
pub trait Notifier: Send + Sync {
    /// A new cycle is looking for queued items.
    fn on_status(&self, text: &str);
    /// An item is being uploaded, or the cycle's final status is known.
    fn on_progress(&self, text: &str);
    /// The cycle ended. `success` is `false` if it stopped on an error.
    fn on_finished(&self, success: bool);
}

/// Writes worker events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn on_status(&self, text: &str) {
        info!("{text}");
    }

    fn on_progress(&self, text: &str) {
        info!("{text}");
    }

    fn on_finished(&self, success: bool) {
        if success {
            info!("upload cycle finished");
        } else {
            warn!("upload cycle finished with error");
        }
    }
}
