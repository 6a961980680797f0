use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct StatusInner {
    text: String,
    hide_at: Option<Instant>,
}

/// The latest human-readable status of the uploader.
///
/// Written by the worker thread, read from any thread. A status may carry a
/// deadline after which it reads as empty.
#[derive(Debug, Default)]
pub struct StatusChannel {
    inner: Mutex<StatusInner>,
}

impl StatusChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the status. If `hide_after` is given, the status is hidden
    /// once that much time has passed.
    pub fn set<S: Into<String>>(&self, text: S, hide_after: Option<Duration>) {
        let hide_at = hide_after.and_then(|d| Instant::now().checked_add(d));
        self.set_with_deadline(text, hide_at);
    }

    /// Replace the status. `None` keeps it visible until replaced.
    pub fn set_with_deadline<S: Into<String>>(&self, text: S, hide_at: Option<Instant>) {
        let mut inner = self.inner.lock();
        inner.text = text.into();
        inner.hide_at = hide_at;
    }

    pub fn clear(&self) {
        self.set_with_deadline(String::new(), None);
    }

    /// The status as of `now`. Expired text is discarded.
    pub fn get(&self, now: Instant) -> String {
        let mut inner = self.inner.lock();
        if inner.hide_at.is_some_and(|hide_at| now >= hide_at) {
            inner.text.clear();
            inner.hide_at = None;
        }
        inner.text.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_without_deadline_stays() {
        let status = StatusChannel::new();
        assert_eq!(status.get(Instant::now()), "");
        status.set("Uploading file 1", None);
        let later = Instant::now() + Duration::from_secs(3600);
        assert_eq!(status.get(later), "Uploading file 1");
    }

    #[test]
    fn status_is_hidden_at_deadline() {
        let status = StatusChannel::new();
        let t0 = Instant::now();
        let deadline = t0 + Duration::from_secs(9);
        status.set_with_deadline("Uploaded 1 file", Some(deadline));

        assert_eq!(status.get(t0), "Uploaded 1 file");
        assert_eq!(status.get(deadline - Duration::from_millis(1)), "Uploaded 1 file");
        assert_eq!(status.get(deadline), "");
        // Once hidden, the text is gone even for an earlier reader.
        assert_eq!(status.get(t0), "");

        status.set("Looking for files to upload...", None);
        assert_eq!(status.get(deadline), "Looking for files to upload...");
    }

    #[test]
    fn clear_empties_status() {
        let status = StatusChannel::new();
        status.set("Uploaded 2 files", Some(Duration::from_secs(9)));
        status.clear();
        assert_eq!(status.get(Instant::now()), "");
    }
}
