use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct SignalState {
    pending: bool,
    busy: bool,
    quit: bool,
}

/// Wakes the upload worker.
///
/// Signals coalesce: any number of calls to [WakeSignal::signal] while no
/// cycle has started yet result in one cycle. A signal arriving while a cycle
/// runs schedules exactly one follow-up cycle. A quit request wins over a
/// pending signal.
#[derive(Debug, Default)]
pub(crate) struct WakeSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl WakeSignal {
    pub(crate) fn signal(&self) {
        let mut state = self.state.lock();
        if !state.pending {
            state.pending = true;
            self.cond.notify_all();
        }
    }

    /// Block until a cycle should start. Returns `false` when asked to quit.
    pub(crate) fn wait_for_start(&self) -> bool {
        let mut state = self.state.lock();
        while !state.pending && !state.quit {
            self.cond.wait(&mut state);
        }
        if state.quit {
            return false;
        }
        state.pending = false;
        state.busy = true;
        true
    }

    /// Run `publish` and mark the cycle as ended, both under the lock, so
    /// [WakeSignal::with_busy] never sees the final status of a cycle that
    /// still reads as busy.
    pub(crate) fn end_cycle_with<F: FnOnce()>(&self, publish: F) {
        let mut state = self.state.lock();
        publish();
        state.busy = false;
        self.cond.notify_all();
    }

    /// Call `f` with the busy flag while holding the lock.
    pub(crate) fn with_busy<R, F: FnOnce(bool) -> R>(&self, f: F) -> R {
        let state = self.state.lock();
        f(state.busy)
    }

    pub(crate) fn request_quit(&self) {
        let mut state = self.state.lock();
        state.quit = true;
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::StatusChannel;
    use std::sync::{Arc, mpsc};
    use std::time::{Duration, Instant};

    #[test]
    fn signals_coalesce() {
        let signal = WakeSignal::default();
        signal.signal();
        signal.signal();
        signal.signal();

        assert!(signal.wait_for_start());
        assert!(signal.with_busy(|busy| busy));
        signal.end_cycle_with(|| {});
        assert!(!signal.with_busy(|busy| busy));

        // Nothing else is pending, so a waiter only returns on quit.
        signal.request_quit();
        assert!(!signal.wait_for_start());
    }

    #[test]
    fn signal_during_cycle_schedules_one_more() {
        let signal = WakeSignal::default();
        signal.signal();
        assert!(signal.wait_for_start());

        signal.signal();
        signal.signal();
        signal.end_cycle_with(|| {});

        assert!(signal.wait_for_start());
        signal.end_cycle_with(|| {});
        signal.request_quit();
        assert!(!signal.wait_for_start());
    }

    #[test]
    fn quit_wins_over_pending_signal() {
        let signal = WakeSignal::default();
        signal.signal();
        signal.request_quit();
        assert!(!signal.wait_for_start());
    }

    #[test]
    fn waiter_is_woken_from_another_thread() {
        let signal = Arc::new(WakeSignal::default());
        let waiter = {
            let signal = signal.clone();
            std::thread::spawn(move || {
                let mut cycles = 0;
                while signal.wait_for_start() {
                    cycles += 1;
                    signal.end_cycle_with(|| {});
                }
                cycles
            })
        };
        signal.signal();
        while signal.state.lock().pending {
            std::thread::yield_now();
        }
        signal.request_quit();
        let cycles = waiter.join().unwrap();
        assert_eq!(cycles, 1);
    }

    #[test]
    fn final_status_and_idle_flag_change_together() {
        let signal = Arc::new(WakeSignal::default());
        let status = Arc::new(StatusChannel::new());
        signal.signal();
        assert!(signal.wait_for_start());
        status.set("Uploading file 1", None);

        let (published_tx, published_rx) = mpsc::channel();
        let worker = {
            let signal = signal.clone();
            let status = status.clone();
            std::thread::spawn(move || {
                signal.end_cycle_with(|| {
                    status.set("Uploaded 1 file", None);
                    published_tx.send(()).unwrap();
                    // Give a concurrent reader time to hit the lock.
                    std::thread::sleep(Duration::from_millis(50));
                });
            })
        };

        published_rx.recv().unwrap();
        // The final text is already set, so the reader must also see idle.
        let (text, busy) = signal.with_busy(|busy| (status.get(Instant::now()), busy));
        assert_eq!(text, "Uploaded 1 file");
        assert!(!busy);
        worker.join().unwrap();
    }
}
