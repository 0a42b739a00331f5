//! Handler registry
//!
//! Maps logical command names to the [`CommandHandler`] implementations that
//! execute them. The registry is assembled once at startup and then shared
//! read-only by the queue, so lookups take no lock.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{HandlerError, SledboxError, SledboxResult};

/// Business logic invoked for a persisted command.
///
/// The queue guarantees at-least-once execution: a handler can be invoked
/// again for a command it already processed, for example after a crash between
/// execution and record deletion. Implementations must therefore be
/// idempotent, keyed on `idempotency_id`, which stays constant across every
/// attempt for the same command.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Logical command name this handler serves, matched against
    /// [`crate::command::CommandRecord::command`]
    fn name(&self) -> &str;

    /// Run one execution attempt.
    ///
    /// Returning `Ok(())` deletes the command; any error leaves it queued for
    /// retry until its attempt budget runs out.
    async fn execute(&self, idempotency_id: &str, context: &JsonValue) -> Result<(), HandlerError>;
}

/// Registry of command handlers, keyed by command name.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own [`CommandHandler::name`].
    ///
    /// Registering two handlers for the same command name is rejected, since
    /// dispatch would otherwise silently depend on registration order.
    pub fn register(&mut self, handler: Arc<dyn CommandHandler>) -> SledboxResult<()> {
        let name = handler.name().to_string();
        if self.handlers.contains_key(&name) {
            return Err(SledboxError::DuplicateHandler { command: name });
        }
        log::info!("📝 Registered handler for command '{}'", name);
        self.handlers.insert(name, handler);
        Ok(())
    }

    /// Look up the handler for a command name.
    pub fn get(&self, command: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(command).cloned()
    }

    /// Names of all registered commands, unordered.
    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.keys().map(|name| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handler_names())
            .finish()
    }
}
