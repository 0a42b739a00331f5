//! Persistent command store backed by sled
//!
//! All queue state lives in a single sled tree keyed by command id. Writes are
//! flushed immediately so an enqueued command survives a crash as soon as the
//! call returns. Claiming is done with compare-and-swap on the full record
//! bytes, which is what lets several workers sweep the same tree without ever
//! handing the same command to two of them.

use chrono::Utc;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree,
};

use crate::command::CommandRecord;
use crate::error::{SledboxError, SledboxResult};

/// Name of the sled tree holding command records.
pub const COMMANDS_TREE: &str = "commands";

/// Durable store of pending and exhausted command records.
#[derive(Clone)]
pub struct CommandStore {
    /// Cached tree handle, keyed by command id
    commands_tree: sled::Tree,
    /// Attempt budget used to decide claim eligibility
    max_attempts: u32,
}

impl CommandStore {
    /// Open (or create) the commands tree on the given database.
    pub fn new(db: &sled::Db, max_attempts: u32) -> SledboxResult<Self> {
        let commands_tree = db.open_tree(COMMANDS_TREE)?;
        Ok(Self {
            commands_tree,
            max_attempts,
        })
    }

    /// The underlying tree, for composing multi-tree transactions with
    /// [`CommandStore::create_in`].
    pub fn tree(&self) -> &sled::Tree {
        &self.commands_tree
    }

    /// Attempt budget this store judges eligibility against.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn encode(record: &CommandRecord) -> SledboxResult<Vec<u8>> {
        serde_json::to_vec(record)
            .map_err(|e| SledboxError::Serialization(format!("Failed to encode command: {}", e)))
    }

    fn decode(bytes: &[u8]) -> SledboxResult<CommandRecord> {
        serde_json::from_slice(bytes)
            .map_err(|e| SledboxError::Serialization(format!("Failed to decode command: {}", e)))
    }

    /// Persist a new record outside any transaction.
    pub fn create(&self, record: &CommandRecord) -> SledboxResult<()> {
        let bytes = Self::encode(record)?;
        self.commands_tree.insert(record.id.as_bytes(), bytes)?;
        self.commands_tree.flush()?;
        Ok(())
    }

    /// Persist a new record inside a caller-owned sled transaction.
    ///
    /// The record becomes visible to sweeps only when the whole transaction
    /// commits, which is what ties command enqueueing to the caller's own
    /// state changes: both land or neither does.
    pub fn create_in(
        &self,
        tx: &TransactionalTree,
        record: &CommandRecord,
    ) -> ConflictableTransactionResult<(), SledboxError> {
        let bytes = Self::encode(record).map_err(ConflictableTransactionError::Abort)?;
        tx.insert(record.id.as_bytes(), bytes)?;
        Ok(())
    }

    /// Fetch a single record by id.
    pub fn get(&self, id: &str) -> SledboxResult<Option<CommandRecord>> {
        match self.commands_tree.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All records currently in the store, pending and exhausted alike.
    pub fn all_commands(&self) -> SledboxResult<Vec<CommandRecord>> {
        let mut records = Vec::new();
        for entry in self.commands_tree.iter() {
            let (_, bytes) = entry?;
            records.push(Self::decode(&bytes)?);
        }
        Ok(records)
    }

    /// Number of records in the store.
    pub fn len(&self) -> usize {
        self.commands_tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands_tree.is_empty()
    }

    /// Claim up to `max_count` eligible records for execution.
    ///
    /// A record is eligible when it is unlocked and still has attempt budget.
    /// Each claim is a compare-and-swap against the exact bytes that were
    /// read, so two concurrent sweeps can never claim the same record: the
    /// loser of the race just skips it. Returned records carry the lock
    /// timestamp that was written.
    pub fn claim_batch(&self, max_count: usize) -> SledboxResult<Vec<CommandRecord>> {
        if max_count == 0 {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let mut claimed = Vec::new();

        for entry in self.commands_tree.iter() {
            let (key, bytes) = entry?;
            let record = match Self::decode(&bytes) {
                Ok(record) => record,
                Err(e) => {
                    log::warn!("Skipping undecodable command record during claim: {}", e);
                    continue;
                }
            };

            if !record.is_eligible(self.max_attempts) {
                continue;
            }

            let mut stamped = record;
            stamped.locked = Some(now);
            let new_bytes = Self::encode(&stamped)?;

            match self
                .commands_tree
                .compare_and_swap(&key, Some(&bytes), Some(new_bytes))?
            {
                Ok(()) => claimed.push(stamped),
                Err(_) => {
                    // Lost the race to another claimer, leave it to them
                    log::debug!("Lost claim race for command {}", stamped.id);
                }
            }

            if claimed.len() == max_count {
                break;
            }
        }

        if !claimed.is_empty() {
            self.commands_tree.flush()?;
        }
        Ok(claimed)
    }

    /// Claim one specific record by id, if it is currently eligible.
    ///
    /// Used for the immediate execution attempt right after enqueue. Returns
    /// `Ok(None)` when the record is gone, ineligible, or was modified
    /// concurrently; in all of those cases the retry sweep owns it now.
    pub fn claim_one(&self, id: &str) -> SledboxResult<Option<CommandRecord>> {
        let bytes = match self.commands_tree.get(id.as_bytes())? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let record = Self::decode(&bytes)?;
        if !record.is_eligible(self.max_attempts) {
            return Ok(None);
        }

        let mut stamped = record;
        stamped.locked = Some(Utc::now());
        let new_bytes = Self::encode(&stamped)?;

        match self
            .commands_tree
            .compare_and_swap(id.as_bytes(), Some(&bytes), Some(new_bytes))?
        {
            Ok(()) => {
                self.commands_tree.flush()?;
                Ok(Some(stamped))
            }
            Err(_) => Ok(None),
        }
    }

    /// Record a failed attempt: increment the attempt count and clear the lock.
    ///
    /// The update is applied to whatever is currently stored, retried on
    /// concurrent modification. A record that has vanished in the meantime is
    /// treated as already handled.
    pub fn release(&self, id: &str) -> SledboxResult<()> {
        loop {
            let bytes = match self.commands_tree.get(id.as_bytes())? {
                Some(bytes) => bytes,
                None => return Ok(()),
            };
            let mut record = Self::decode(&bytes)?;
            record.attempts += 1;
            record.locked = None;
            let new_bytes = Self::encode(&record)?;

            match self
                .commands_tree
                .compare_and_swap(id.as_bytes(), Some(&bytes), Some(new_bytes))?
            {
                Ok(()) => {
                    self.commands_tree.flush()?;
                    return Ok(());
                }
                Err(_) => continue,
            }
        }
    }

    /// Remove a record after successful execution.
    pub fn delete(&self, id: &str) -> SledboxResult<()> {
        self.commands_tree.remove(id.as_bytes())?;
        self.commands_tree.flush()?;
        Ok(())
    }

    /// Clear locks older than `stale_after`, making their records claimable
    /// again. Attempt counts are left untouched: an expired lock says the
    /// worker died, not that the command failed.
    ///
    /// Returns the number of records reclaimed.
    pub fn reclaim_stale(&self, stale_after: std::time::Duration) -> SledboxResult<usize> {
        let stale_after = chrono::Duration::from_std(stale_after).map_err(|e| {
            SledboxError::InvalidConfig(format!("stale timeout out of range: {}", e))
        })?;
        let cutoff = Utc::now() - stale_after;
        let mut reclaimed = 0;

        for entry in self.commands_tree.iter() {
            let (key, bytes) = entry?;
            let record = match Self::decode(&bytes) {
                Ok(record) => record,
                Err(e) => {
                    log::warn!("Skipping undecodable command record during reclaim: {}", e);
                    continue;
                }
            };

            if !record.is_stale(cutoff) {
                continue;
            }

            let mut unlocked = record;
            unlocked.locked = None;
            let new_bytes = Self::encode(&unlocked)?;

            match self
                .commands_tree
                .compare_and_swap(&key, Some(&bytes), Some(new_bytes))?
            {
                Ok(()) => {
                    log::info!(
                        "🔓 Reclaimed stale lock on command {} ('{}', {} attempts so far)",
                        unlocked.id,
                        unlocked.command,
                        unlocked.attempts
                    );
                    reclaimed += 1;
                }
                Err(_) => {
                    // Changed underneath us, its worker is evidently alive
                    log::debug!("Skipped reclaim of command {}, record changed", unlocked.id);
                }
            }
        }

        if reclaimed > 0 {
            self.commands_tree.flush()?;
        }
        Ok(reclaimed)
    }
}
