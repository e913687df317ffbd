//! Push transaction state machine
//!
//! ```text
//! Init -> MetadataSent -> ObjectsUploading -> Finalized
//!              |                 |
//!           Failed            Failed
//! ```
//!
//! `Finalized` and `Failed` are terminal. Nothing is persisted; a failed
//! transaction is abandoned and a new one starts from `Init`.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Init,
    MetadataSent,
    ObjectsUploading,
    Finalized,
    Failed,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionState::Finalized | TransactionState::Failed)
    }

    fn can_advance_to(self, next: TransactionState) -> bool {
        use TransactionState::*;
        matches!(
            (self, next),
            (Init, MetadataSent)
                | (MetadataSent, ObjectsUploading)
                | (ObjectsUploading, Finalized)
                | (Init, Failed)
                | (MetadataSent, Failed)
                | (ObjectsUploading, Failed)
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Init => "init",
            TransactionState::MetadataSent => "metadata_sent",
            TransactionState::ObjectsUploading => "objects_uploading",
            TransactionState::Finalized => "finalized",
            TransactionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid transaction transition from {from} to {to}")]
pub struct TransactionError {
    pub from: TransactionState,
    pub to: TransactionState,
}

/// State of one push
#[derive(Debug, Clone)]
pub struct Transaction {
    state: TransactionState,
    package_uid: Option<String>,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            state: TransactionState::Init,
            package_uid: None,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// UID assigned by the server once metadata is accepted
    pub fn package_uid(&self) -> Option<&str> {
        self.package_uid.as_deref()
    }

    pub fn transition(&mut self, next: TransactionState) -> Result<(), TransactionError> {
        if !self.state.can_advance_to(next) {
            return Err(TransactionError {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(from = %self.state, to = %next, "Transaction transition");
        self.state = next;
        Ok(())
    }

    /// Record the accepted metadata and its package UID
    pub fn metadata_sent(&mut self, package_uid: impl Into<String>) -> Result<(), TransactionError> {
        self.transition(TransactionState::MetadataSent)?;
        self.package_uid = Some(package_uid.into());
        Ok(())
    }

    /// Abandon the transaction. No-op once terminal.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            tracing::debug!(from = %self.state, "Transaction failed");
            self.state = TransactionState::Failed;
        }
    }
}
