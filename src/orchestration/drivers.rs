//! Background drivers for the command queue
//!
//! Two long-running tasks keep the queue moving without any caller
//! involvement: the retry sweep driver re-executes commands whose earlier
//! attempts failed, and the stale reclaim driver frees locks abandoned by
//! crashed workers. Both stop promptly when [`QueueDrivers::shutdown`] is
//! called.

use log::{debug, info};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::queue::{QueueInner, SweepTrigger};

/// Runs retry sweeps on a timer and on demand.
///
/// The interval fires immediately on startup, so commands left over from a
/// previous process get their first sweep without waiting a full interval.
/// Between ticks, triggers arriving on the sweep channel (manual requests,
/// backlog drains, post-reclaim sweeps) each run a sweep of their own.
pub(crate) async fn retry_sweep_driver(
    inner: Arc<QueueInner>,
    mut sweep_rx: mpsc::UnboundedReceiver<SweepTrigger>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(inner.config().retry_interval());

    loop {
        tokio::select! {
            _ = interval.tick() => {
                inner.sweep_once(SweepTrigger::Interval).await;
            }
            trigger = sweep_rx.recv() => {
                match trigger {
                    Some(trigger) => inner.sweep_once(trigger).await,
                    None => break,
                }
            }
            _ = shutdown_rx.changed() => {
                break;
            }
        }
    }

    debug!("Retry sweep driver stopped");
}

/// Periodically frees locks that have been held longer than the stale timeout.
pub(crate) async fn stale_reclaim_driver(
    inner: Arc<QueueInner>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(inner.config().reclaim_interval());

    loop {
        tokio::select! {
            _ = interval.tick() => {
                inner.reclaim_once();
            }
            _ = shutdown_rx.changed() => {
                break;
            }
        }
    }

    debug!("Stale reclaim driver stopped");
}

/// Handle to the running background drivers.
///
/// Returned by [`crate::orchestration::CommandQueue::start`]. Call
/// [`QueueDrivers::shutdown`] to stop both drivers and wait for them to
/// finish; merely dropping the handle also signals them to stop, but without
/// waiting for in-flight work.
pub struct QueueDrivers {
    shutdown_tx: watch::Sender<bool>,
    retry_handle: JoinHandle<()>,
    reclaim_handle: JoinHandle<()>,
}

impl QueueDrivers {
    pub(crate) fn new(
        shutdown_tx: watch::Sender<bool>,
        retry_handle: JoinHandle<()>,
        reclaim_handle: JoinHandle<()>,
    ) -> Self {
        Self {
            shutdown_tx,
            retry_handle,
            reclaim_handle,
        }
    }

    /// Signal both drivers to stop and wait for them to finish.
    ///
    /// An in-flight sweep completes its current batch before the driver
    /// observes the signal, so shutdown never abandons a half-executed
    /// command with its lock held.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.retry_handle.await;
        let _ = self.reclaim_handle.await;
        info!("🛑 Command queue drivers stopped");
    }
}
