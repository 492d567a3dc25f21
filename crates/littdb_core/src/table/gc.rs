//! Background garbage collection thread.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// A periodic worker owned by one table.
///
/// The worker calls its task every `period` until stopped or until the task
/// returns `false`. Stopping wakes the worker immediately and joins it.
#[derive(Debug)]
pub(crate) struct GcWorker {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl GcWorker {
    pub(crate) fn spawn<F>(table: &str, period: Duration, mut task: F) -> io::Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (stop, stop_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name(format!("littdb-gc-{table}"))
            .spawn(move || loop {
                match stop_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        if !task() {
                            break;
                        }
                    }
                    // Stop requested, or the owner is gone.
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        debug!(table, ?period, "started garbage collector");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Signals the worker and waits for it to exit.
    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("garbage collector thread panicked");
            }
        }
    }
}

impl Drop for GcWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
