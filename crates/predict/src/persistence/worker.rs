//! Background snapshot thread.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::Result;
use crate::service::PredictService;

#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    /// Waits up to `timeout` (forever when None). Returns true once stopped.
    fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            match timeout {
                Some(timeout) => {
                    self.wake.wait_for(&mut stopped, timeout);
                }
                None => {
                    while !*stopped {
                        self.wake.wait(&mut stopped);
                    }
                }
            }
        }
        *stopped
    }

    fn stop(&self) {
        *self.stopped.lock() = true;
        self.wake.notify_all();
    }
}

/// Saves the service state periodically and, optionally, once more on shutdown.
///
/// Periodic saves are skipped while nothing changed since the last save.
/// Failures are logged and the worker keeps running.
#[derive(Debug)]
pub struct SnapshotWorker {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl SnapshotWorker {
    /// Starts the worker thread.
    ///
    /// `interval` of None disables periodic saves; `save_on_exit` requests a
    /// final save when the worker is shut down.
    pub fn spawn(
        service: PredictService,
        interval: Option<Duration>,
        save_on_exit: bool,
    ) -> Result<Self> {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name("predict-snapshot".to_string())
            .spawn(move || run(service, thread_signal, interval, save_on_exit))?;

        tracing::info!(
            interval_secs = interval.map(|every| every.as_secs()),
            save_on_exit,
            "Started snapshot worker"
        );
        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Stops the worker, waiting for any final save to finish.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.signal.stop();
        if handle.join().is_err() {
            tracing::warn!("Snapshot worker thread panicked");
        }
    }
}

impl Drop for SnapshotWorker {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn run(
    service: PredictService,
    signal: Arc<StopSignal>,
    interval: Option<Duration>,
    save_on_exit: bool,
) {
    loop {
        if signal.wait(interval) {
            break;
        }
        match service.save_if_dirty() {
            Ok(Some(snapshot)) => {
                tracing::debug!(generation = snapshot.generation, "Periodic snapshot saved")
            }
            Ok(None) => {}
            Err(error) => tracing::warn!(%error, "Periodic snapshot failed"),
        }
    }

    if save_on_exit {
        if let Err(error) = service.save_if_dirty() {
            tracing::warn!(%error, "Final snapshot failed");
        }
    }
    tracing::debug!("Snapshot worker stopped");
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::PredictConfig;

    fn service_in(dir: &std::path::Path) -> PredictService {
        PredictService::open(PredictConfig {
            data_dir: Some(dir.to_path_buf()),
            ..PredictConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn shutdown_performs_final_save() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(dir.path());
        service
            .attach(&["abc"], json!({"id": 1}), false)
            .unwrap();

        let worker = SnapshotWorker::spawn(service.clone(), None, true).unwrap();
        worker.shutdown();

        assert!(dir.path().join("index.bin.zst").exists());
        assert!(dir.path().join("items.bin.zst").exists());
    }

    #[test]
    fn periodic_save_runs_while_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(dir.path());
        service
            .attach(&["abc"], json!({"id": 1}), false)
            .unwrap();

        let worker =
            SnapshotWorker::spawn(service.clone(), Some(Duration::from_millis(10)), false).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !dir.path().join("index.bin.zst").exists() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        worker.shutdown();
        assert!(dir.path().join("index.bin.zst").exists());
    }

    #[test]
    fn clean_state_is_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(dir.path());
        let worker = SnapshotWorker::spawn(service, None, true).unwrap();
        worker.shutdown();
        assert!(!dir.path().join("index.bin.zst").exists());
    }
}
