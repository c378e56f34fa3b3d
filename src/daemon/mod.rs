// src/daemon/mod.rs

//! Long-running agent service
//!
//! A ticker requests a run every poll interval. Requests go through a
//! single-slot queue to one worker thread, so runs never overlap: a tick that
//! arrives while a run is already queued is dropped. Ctrl-C or SIGTERM
//! cancels the run in progress and stops the worker.

use crate::agent::Reconcile;
use crate::error::{Error, Result};
use crate::exec::CancelToken;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Handle for requesting runs from the worker
#[derive(Clone)]
pub struct RunQueue {
    tx: mpsc::Sender<()>,
}

impl RunQueue {
    /// Ask for a run; returns false if one is already waiting
    pub fn request(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                debug!("A run is already queued, dropping tick");
                false
            }
            Err(TrySendError::Closed(())) => {
                error!("Run worker has stopped");
                false
            }
        }
    }
}

/// Start the worker thread that performs queued runs
///
/// The worker exits once every [`RunQueue`] is dropped or `cancel` fires.
pub fn spawn_worker<R: Reconcile>(mut agent: R, cancel: CancelToken) -> (RunQueue, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<()>(1);
    let handle = thread::spawn(move || {
        while rx.blocking_recv().is_some() {
            if cancel.is_cancelled() {
                break;
            }
            let report = agent.reconcile(&cancel);
            notify_status(&format!(
                "last run: {}",
                if report.is_success() { "ok".to_string() } else { format!("{} errors", report.errors.len()) }
            ));
        }
        debug!("Run worker stopped");
    });
    (RunQueue { tx }, handle)
}

fn notify(states: &[sd_notify::NotifyState<'_>]) {
    // Outside systemd there is no socket and nothing to report
    let _ = sd_notify::notify(false, states);
}

fn notify_status(message: &str) {
    notify(&[sd_notify::NotifyState::Status(message)]);
}

/// Run `agent` every `poll_interval` until interrupted
pub async fn run_daemon<R: Reconcile>(agent: R, poll_interval: Duration) -> Result<()> {
    if poll_interval.is_zero() {
        return Err(Error::Config("poll_interval must be greater than zero".to_string()));
    }
    info!("Starting converge daemon version {}", env!("CARGO_PKG_VERSION"));

    let cancel = CancelToken::new();
    let (queue, worker) = spawn_worker(agent, cancel.clone());

    let mut terminate = signal(SignalKind::terminate())
        .map_err(|e| Error::InitError(format!("Failed to install SIGTERM handler: {e}")))?;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    // The first tick fires immediately, giving a run at startup
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    notify(&[sd_notify::NotifyState::Ready]);
    info!("Polling every {:?}", poll_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                queue.request();
            }
            _ = &mut shutdown => {
                info!("Received interrupt, shutting down");
                break;
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
        }
    }

    notify(&[sd_notify::NotifyState::Stopping]);
    cancel.cancel();
    drop(queue);
    tokio::task::spawn_blocking(move || worker.join())
        .await
        .map_err(|e| Error::InitError(format!("Failed to wait for worker: {e}")))?
        .map_err(|_| Error::InitError("Run worker panicked".to_string()))?;

    info!("Daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::RunReport;
    use std::sync::mpsc as std_mpsc;
    use std::sync::{Arc, Mutex};

    /// Blocks each run until the test releases it
    struct Gated {
        started: std_mpsc::Sender<()>,
        release: Arc<Mutex<std_mpsc::Receiver<()>>>,
        runs: Arc<Mutex<u32>>,
    }

    impl Reconcile for Gated {
        fn reconcile(&mut self, _cancel: &CancelToken) -> RunReport {
            *self.runs.lock().unwrap() += 1;
            self.started.send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
            RunReport::default()
        }
    }

    #[test]
    fn test_queue_holds_one_pending_run() {
        let (started_tx, started_rx) = std_mpsc::channel();
        let (release_tx, release_rx) = std_mpsc::channel();
        let runs = Arc::new(Mutex::new(0));
        let agent = Gated {
            started: started_tx,
            release: Arc::new(Mutex::new(release_rx)),
            runs: runs.clone(),
        };
        let (queue, worker) = spawn_worker(agent, CancelToken::new());

        assert!(queue.request());
        started_rx.recv().unwrap();

        // First run is in progress: one more fits, the next is dropped
        assert!(queue.request());
        assert!(!queue.request());

        release_tx.send(()).unwrap();
        started_rx.recv().unwrap();
        release_tx.send(()).unwrap();

        drop(queue);
        worker.join().unwrap();
        assert_eq!(*runs.lock().unwrap(), 2);
    }

    #[test]
    fn test_cancel_stops_worker() {
        struct Counting(Arc<Mutex<u32>>);

        impl Reconcile for Counting {
            fn reconcile(&mut self, _cancel: &CancelToken) -> RunReport {
                *self.0.lock().unwrap() += 1;
                RunReport::default()
            }
        }

        let runs = Arc::new(Mutex::new(0));
        let cancel = CancelToken::new();
        cancel.cancel();
        let (queue, worker) = spawn_worker(Counting(runs.clone()), cancel);
        queue.request();
        worker.join().unwrap();
        assert_eq!(*runs.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        struct Never;

        impl Reconcile for Never {
            fn reconcile(&mut self, _cancel: &CancelToken) -> RunReport {
                unreachable!()
            }
        }

        let err = run_daemon(Never, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
