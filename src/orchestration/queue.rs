//! Command queue facade
//!
//! [`CommandQueue`] ties the store, the handler registry and the configuration
//! together: it enqueues records (standalone or inside a caller transaction),
//! fires the immediate post-commit execution attempt, and runs the sweeps the
//! background drivers ask for.

use log::{debug, error, info, warn};
use serde_json::Value as JsonValue;
use sled::transaction::{ConflictableTransactionResult, TransactionalTree};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::sync::watch;

use crate::command::{CommandRecord, EnqueueToken};
use crate::config::QueueConfig;
use crate::error::{SledboxError, SledboxResult};
use crate::orchestration::drivers::{self, QueueDrivers};
use crate::registry::HandlerRegistry;
use crate::store::CommandStore;

/// Why a retry sweep is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepTrigger {
    /// The periodic retry timer fired
    Interval,
    /// The previous sweep filled its whole batch, so more work is likely waiting
    BacklogDrain,
    /// Stale locks were just reclaimed and their commands are claimable again
    StaleReclaim,
    /// [`CommandQueue::trigger_sweep`] was called
    Manual,
}

/// Reliable command queue over a sled database.
///
/// Cloning is cheap and every clone talks to the same queue. Typical lifecycle:
/// build a [`HandlerRegistry`], construct the queue, call
/// [`CommandQueue::start`] once, then enqueue from anywhere.
#[derive(Clone)]
pub struct CommandQueue {
    inner: Arc<QueueInner>,
}

pub(crate) struct QueueInner {
    store: CommandStore,
    registry: HandlerRegistry,
    config: QueueConfig,
    sweep_tx: mpsc::UnboundedSender<SweepTrigger>,
    /// Receiver side of the sweep channel, handed to the retry driver on start
    sweep_rx: Mutex<Option<mpsc::UnboundedReceiver<SweepTrigger>>>,
}

impl CommandQueue {
    /// Create a queue over the given database.
    ///
    /// The registry is fixed at construction: every handler a stored command
    /// might name must be registered before the queue starts, or those
    /// commands burn their attempts on handler-not-found failures.
    pub fn new(
        db: &sled::Db,
        config: QueueConfig,
        registry: HandlerRegistry,
    ) -> SledboxResult<Self> {
        config.validate()?;
        let store = CommandStore::new(db, config.max_attempts)?;
        let (sweep_tx, sweep_rx) = mpsc::unbounded_channel();

        Ok(Self {
            inner: Arc::new(QueueInner {
                store,
                registry,
                config,
                sweep_tx,
                sweep_rx: Mutex::new(Some(sweep_rx)),
            }),
        })
    }

    /// The underlying durable store.
    pub fn store(&self) -> &CommandStore {
        &self.inner.store
    }

    /// The configuration this queue runs with.
    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Enqueue a command outside any transaction.
    ///
    /// The record is durable when this returns. Pass the token to
    /// [`CommandQueue::submit`] to trigger an immediate execution attempt.
    pub fn enqueue(&self, command: &str, context: &JsonValue) -> SledboxResult<EnqueueToken> {
        let record = CommandRecord::new(command, context);
        self.inner.store.create(&record)?;
        info!("📥 Enqueued command {} ('{}')", record.id, record.command);
        Ok(EnqueueToken::new(record.id, record.command))
    }

    /// Enqueue a command inside a caller-owned sled transaction.
    ///
    /// Call this from within a transaction closure that also writes the
    /// caller's own trees; the command is enqueued exactly when the caller's
    /// changes commit. The transaction closure may be retried by sled, so no
    /// side effects happen here beyond the transactional insert itself. After
    /// the transaction commits, pass the returned token to
    /// [`CommandQueue::submit`].
    pub fn enqueue_in(
        &self,
        tx: &TransactionalTree,
        command: &str,
        context: &JsonValue,
    ) -> ConflictableTransactionResult<EnqueueToken, SledboxError> {
        let record = CommandRecord::new(command, context);
        self.inner.store.create_in(tx, &record)?;
        Ok(EnqueueToken::new(record.id, record.command))
    }

    /// Trigger a best-effort immediate execution attempt for an enqueued
    /// command, without waiting for the next retry sweep.
    ///
    /// Fire-and-forget: the attempt runs on a spawned task, and any failure
    /// there leaves the record for the sweep. Must be called from within a
    /// Tokio runtime.
    pub fn submit(&self, token: EnqueueToken) {
        info!(
            "📥 Command {} ('{}') submitted for immediate execution",
            token.command_id(),
            token.command()
        );
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(e) = inner.run_immediate(&token).await {
                error!(
                    "❌ Immediate execution of command {} could not run: {}",
                    token.command_id(),
                    e
                );
            }
        });
    }

    /// Ask the retry driver to run a sweep now.
    ///
    /// No-op when the drivers are not running.
    pub fn trigger_sweep(&self) {
        self.inner.request_sweep(SweepTrigger::Manual);
    }

    /// Start the background drivers: the periodic retry sweep and the stale
    /// lock reclaim. Returns the handle used to shut them down. Starting twice
    /// is an error.
    pub fn start(&self) -> SledboxResult<QueueDrivers> {
        let sweep_rx = self
            .inner
            .sweep_rx
            .lock()
            .map_err(|_| SledboxError::Internal("sweep receiver lock poisoned".to_string()))?
            .take()
            .ok_or(SledboxError::AlreadyStarted)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let retry_handle = tokio::spawn(drivers::retry_sweep_driver(
            Arc::clone(&self.inner),
            sweep_rx,
            shutdown_rx.clone(),
        ));
        let reclaim_handle = tokio::spawn(drivers::stale_reclaim_driver(
            Arc::clone(&self.inner),
            shutdown_rx,
        ));

        info!(
            "🚀 Command queue started (retry sweep every {}ms, batch {}, reclaim every {}ms, stale after {}ms, {} handler(s))",
            self.inner.config.retry_interval_ms,
            self.inner.config.batch_size,
            self.inner.config.reclaim_interval_ms,
            self.inner.config.stale_timeout_ms,
            self.inner.registry.len()
        );
        Ok(QueueDrivers::new(shutdown_tx, retry_handle, reclaim_handle))
    }
}

impl QueueInner {
    pub(crate) fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Send a sweep request to the retry driver, if it is running.
    pub(crate) fn request_sweep(&self, trigger: SweepTrigger) {
        if self.sweep_tx.send(trigger).is_err() {
            debug!("Sweep trigger {:?} dropped, drivers are not running", trigger);
        }
    }

    /// Claim and execute one batch of eligible commands.
    ///
    /// Commands run sequentially; a full batch schedules a follow-up sweep
    /// through the trigger channel so a deep backlog drains without waiting
    /// out the retry interval between batches.
    pub(crate) async fn sweep_once(&self, trigger: SweepTrigger) {
        let batch = match self.store.claim_batch(self.config.batch_size) {
            Ok(batch) => batch,
            Err(e) => {
                error!("❌ Retry sweep failed to claim commands: {}", e);
                return;
            }
        };
        if batch.is_empty() {
            debug!("Retry sweep ({:?}) found nothing to execute", trigger);
            return;
        }

        let claimed = batch.len();
        info!("🔁 Retry sweep ({:?}) claimed {} command(s)", trigger, claimed);
        for record in batch {
            self.execute_one(record).await;
        }

        if claimed == self.config.batch_size {
            self.request_sweep(SweepTrigger::BacklogDrain);
        }
    }

    /// Free locks older than the stale timeout, then sweep if anything was freed.
    pub(crate) fn reclaim_once(&self) {
        match self.store.reclaim_stale(self.config.stale_timeout()) {
            Ok(0) => {}
            Ok(n) => {
                info!("♻️ {} stale lock(s) reclaimed, scheduling retry sweep", n);
                self.request_sweep(SweepTrigger::StaleReclaim);
            }
            Err(e) => error!("❌ Stale lock reclaim failed: {}", e),
        }
    }

    /// Immediate post-enqueue attempt: claim the one record and run it.
    async fn run_immediate(&self, token: &EnqueueToken) -> SledboxResult<()> {
        match self.store.claim_one(token.command_id())? {
            Some(record) => {
                self.execute_one(record).await;
                Ok(())
            }
            None => {
                debug!(
                    "Command {} not claimable for immediate execution, leaving it to the sweep",
                    token.command_id()
                );
                Ok(())
            }
        }
    }

    /// Run one claimed command to completion of this attempt.
    ///
    /// Success deletes the record; any failure records the attempt and
    /// unlocks the record for a later sweep.
    async fn execute_one(&self, record: CommandRecord) {
        match self.try_execute(&record).await {
            Ok(()) => match self.store.delete(&record.id) {
                Ok(()) => info!(
                    "✅ Executed command {} ('{}') successfully",
                    record.id, record.command
                ),
                Err(e) => warn!(
                    "⚠️ Command {} executed but could not be deleted, it may run again: {}",
                    record.id, e
                ),
            },
            Err(e) => {
                if record.will_retry_after_failure(self.config.max_attempts) {
                    warn!(
                        "❌ Failed to execute command {} ('{}'): {}. Command will be retried.",
                        record.id, record.command, e
                    );
                } else {
                    error!(
                        "❌ Failed to execute command {} ('{}'): {}. Command will NOT be retried.",
                        record.id, record.command, e
                    );
                }
                if let Err(release_err) = self.store.release(&record.id) {
                    error!(
                        "⚠️ Failed to record failed attempt for command {}: {}",
                        record.id, release_err
                    );
                }
            }
        }
    }

    /// Decode the payload, find the handler, run it.
    async fn try_execute(&self, record: &CommandRecord) -> SledboxResult<()> {
        let context: JsonValue = serde_json::from_str(&record.context).map_err(|e| {
            SledboxError::Serialization(format!("Invalid context payload: {}", e))
        })?;
        let handler =
            self.registry
                .get(&record.command)
                .ok_or_else(|| SledboxError::HandlerNotFound {
                    command: record.command.clone(),
                })?;
        handler.execute(&record.idempotency_id, &context).await?;
        Ok(())
    }
}
