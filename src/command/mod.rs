//! Command record types and the bounded-retry policy
//!
//! A [`CommandRecord`] is the persisted unit of work: which handler to run,
//! the serialized payload to run it with, and the bookkeeping the store needs
//! to claim, retry and eventually give up on it. Records live in the store
//! only while work is pending or permanently exhausted; successful execution
//! deletes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Persisted command awaiting reliable execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandRecord {
    /// Unique record id, assigned at creation, used as the storage key
    pub id: String,
    /// Logical name of the handler that must run this command
    pub command: String,
    /// Opaque serialized JSON payload handed to the handler
    pub context: String,
    /// Token handlers use to de-duplicate repeated invocations
    pub idempotency_id: String,
    /// Count of failed execution attempts, only ever grows
    pub attempts: u32,
    /// Some(t) while a worker holds the claim taken at `t`, None when claimable
    pub locked: Option<DateTime<Utc>>,
    /// Creation timestamp
    pub created: DateTime<Utc>,
}

impl CommandRecord {
    /// Create a new unlocked, zero-attempt record for the given payload.
    pub fn new(command: impl Into<String>, context: &JsonValue) -> Self {
        Self::with_raw_context(command, context.to_string())
    }

    /// Create a record from an already-serialized payload.
    ///
    /// The payload is not validated here; a payload that fails to parse at
    /// execution time goes through the normal failure path.
    pub fn with_raw_context(command: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            command: command.into(),
            context: context.into(),
            idempotency_id: Uuid::new_v4().to_string(),
            attempts: 0,
            locked: None,
            created: Utc::now(),
        }
    }

    /// Whether this record may be claimed: unlocked and attempts below the cap.
    pub fn is_eligible(&self, max_attempts: u32) -> bool {
        self.locked.is_none() && self.attempts < max_attempts
    }

    /// Whether this record has used up its attempt budget.
    ///
    /// Exhausted records stay in the store for inspection but are never
    /// claimed again.
    pub fn is_exhausted(&self, max_attempts: u32) -> bool {
        self.attempts >= max_attempts
    }

    /// Whether this record has been claimed since before `cutoff`.
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        matches!(self.locked, Some(locked_at) if locked_at < cutoff)
    }

    /// Whether a failure recorded now would leave budget for another attempt.
    ///
    /// Drives the "will be retried" vs "will NOT be retried" log line only;
    /// claim eligibility is always decided by [`CommandRecord::is_eligible`].
    pub fn will_retry_after_failure(&self, max_attempts: u32) -> bool {
        self.attempts < max_attempts.saturating_sub(1)
    }
}

/// Proof that a command was enqueued, used to trigger its immediate execution.
///
/// Returned by the enqueue operations on [`crate::orchestration::CommandQueue`].
/// Once the enclosing transaction has committed, pass the token to
/// [`crate::orchestration::CommandQueue::submit`] to fire a best-effort
/// execution attempt without waiting for the next retry sweep. Dropping the
/// token loses nothing but latency: the sweep picks the record up regardless.
#[must_use = "submit this token after your transaction commits to trigger immediate execution"]
#[derive(Debug, Clone)]
pub struct EnqueueToken {
    command_id: String,
    command: String,
}

impl EnqueueToken {
    pub(crate) fn new(command_id: String, command: String) -> Self {
        Self {
            command_id,
            command,
        }
    }

    /// Id of the enqueued record.
    pub fn command_id(&self) -> &str {
        &self.command_id
    }

    /// Logical command name of the enqueued record.
    pub fn command(&self) -> &str {
        &self.command
    }
}
