//! Joining the coordinated transaction.
//!
//! Writes to shards must happen inside the distributed transaction that
//! spans the statement. The coordinator only ever *joins* it: starting it
//! if this is the first distributed write, continuing it otherwise. Commit
//! and abort belong to the ambient transaction manager.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::FunnelError;

/// Access to the session's coordinated transaction.
pub trait TransactionContext {
    /// Start the coordinated transaction unless it is already running.
    /// Calling it more than once within a transaction has no further effect.
    fn begin_or_continue(&mut self) -> Result<(), FunnelError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    NotStarted,
    Started(u64),
}

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// In-process coordinated transaction state.
#[derive(Debug)]
pub struct CoordinatedTransaction {
    state: TransactionState,
}

impl CoordinatedTransaction {
    pub fn new() -> Self {
        Self {
            state: TransactionState::NotStarted,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_started(&self) -> bool {
        matches!(self.state, TransactionState::Started(_))
    }
}

impl Default for CoordinatedTransaction {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionContext for CoordinatedTransaction {
    fn begin_or_continue(&mut self) -> Result<(), FunnelError> {
        if let TransactionState::NotStarted = self.state {
            let id = NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed);
            log::debug!("starting coordinated transaction {id}");
            self.state = TransactionState::Started(id);
        }
        Ok(())
    }
}
