//! # sledbox
//!
//! A reliable command queue over [sled], for services that must not lose
//! side effects. Work is recorded as a durable command in the same database
//! (and optionally the same transaction) as the service's own state changes,
//! then executed asynchronously with bounded retries: an immediate attempt
//! right after enqueue, periodic retry sweeps for anything that failed, and
//! reclaim of locks abandoned by crashed workers. Commands that exhaust their
//! attempt budget stay in the store for inspection.
//!
//! Execution is at-least-once, so handlers receive an `idempotency_id` and
//! are expected to de-duplicate on it.
//!
//! ```no_run
//! use async_trait::async_trait;
//! use sledbox::{CommandHandler, CommandQueue, HandlerError, HandlerRegistry, QueueConfig};
//! use std::sync::Arc;
//!
//! struct SendEmail;
//!
//! #[async_trait]
//! impl CommandHandler for SendEmail {
//!     fn name(&self) -> &str {
//!         "sendEmail"
//!     }
//!
//!     async fn execute(
//!         &self,
//!         _idempotency_id: &str,
//!         _context: &serde_json::Value,
//!     ) -> Result<(), HandlerError> {
//!         // deliver the email, de-duplicating on the idempotency id
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = sled::open("service_db")?;
//!
//!     let mut registry = HandlerRegistry::new();
//!     registry.register(Arc::new(SendEmail))?;
//!
//!     let queue = CommandQueue::new(&db, QueueConfig::default(), registry)?;
//!     let drivers = queue.start()?;
//!
//!     let token = queue.enqueue("sendEmail", &serde_json::json!({"to": "a@example.com"}))?;
//!     queue.submit(token);
//!
//!     drivers.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! To enqueue atomically with your own writes, run a multi-tree sled
//! transaction over your tree and [`CommandStore::tree`], call
//! [`CommandQueue::enqueue_in`] inside the closure, and
//! [`CommandQueue::submit`] the token once the transaction has committed.
//!
//! [sled]: https://docs.rs/sled

pub mod command;
pub mod config;
pub mod error;
pub mod orchestration;
pub mod registry;
pub mod store;

pub use command::{CommandRecord, EnqueueToken};
pub use config::{load_config, QueueConfig, CONFIG_ENV_VAR};
pub use error::{HandlerError, SledboxError, SledboxResult};
pub use orchestration::{CommandQueue, QueueDrivers, SweepTrigger};
pub use registry::{CommandHandler, HandlerRegistry};
pub use store::{CommandStore, COMMANDS_TREE};
