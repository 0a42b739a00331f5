//! Common test utilities and fixtures for command queue tests
//!
//! Provides the shared queue-over-temporary-database setup plus an
//! instrumented handler whose execution count and failure mode the tests can
//! inspect and flip at will.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sledbox::{
    CommandHandler, CommandQueue, HandlerError, HandlerRegistry, QueueConfig, SledboxResult,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Handler that counts its executions and fails on demand.
pub struct CountingHandler {
    name: String,
    executions: AtomicU32,
    fail: AtomicBool,
}

impl CountingHandler {
    /// A handler that succeeds on every execution.
    pub fn succeeding(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            executions: AtomicU32::new(0),
            fail: AtomicBool::new(false),
        })
    }

    /// A handler that fails on every execution until told otherwise.
    pub fn failing(name: &str) -> Arc<Self> {
        let handler = Self::succeeding(name);
        handler.set_fail(true);
        handler
    }

    /// Number of times `execute` has been called so far.
    pub fn executions(&self) -> u32 {
        self.executions.load(Ordering::SeqCst)
    }

    /// Switch the handler between failing and succeeding.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CommandHandler for CountingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _idempotency_id: &str,
        _context: &JsonValue,
    ) -> Result<(), HandlerError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            Err(HandlerError::new("simulated handler failure"))
        } else {
            Ok(())
        }
    }
}

/// Queue test fixture over a temporary sled database.
pub struct QueueTestFixture {
    pub queue: CommandQueue,
    pub db: sled::Db,
    pub _temp_dir: TempDir,
}

impl QueueTestFixture {
    /// Create a fixture with the given config and handlers already registered.
    pub fn new(config: QueueConfig, handlers: Vec<Arc<CountingHandler>>) -> SledboxResult<Self> {
        init_test_logging();
        let temp_dir = tempfile::tempdir()?;

        let db = sled::Config::new()
            .path(temp_dir.path())
            .temporary(true)
            .open()?;

        let mut registry = HandlerRegistry::new();
        for handler in handlers {
            registry.register(handler)?;
        }

        let queue = CommandQueue::new(&db, config, registry)?;
        Ok(Self {
            queue,
            db,
            _temp_dir: temp_dir,
        })
    }

    /// Fixture with default config and a single succeeding handler.
    pub fn with_succeeding_handler(name: &str) -> SledboxResult<(Self, Arc<CountingHandler>)> {
        let handler = CountingHandler::succeeding(name);
        let fixture = Self::new(QueueConfig::default(), vec![Arc::clone(&handler)])?;
        Ok((fixture, handler))
    }
}

/// Initialize env_logger once for the whole test binary.
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Poll `predicate` every 20ms until it holds or `timeout` elapses.
///
/// Returns whether the predicate held. Background driver work has no
/// completion signal the tests could await, so polling it is.
pub async fn wait_until<F>(timeout: Duration, predicate: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    predicate()
}
