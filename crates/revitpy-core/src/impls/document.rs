//! InMemoryDocument - journal に記録するだけのドキュメント（テスト・デモ用）

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::domain::TransactionId;
use crate::error::BoxError;
use crate::ports::DocumentSession;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("transaction {0} is not open")]
    NotOpen(TransactionId),

    #[error("document rejected commit of transaction {0}")]
    CommitRejected(TransactionId),
}

/// What happened to the document, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransactionEvent {
    Begin { id: TransactionId, name: String },
    Commit { id: TransactionId },
    Rollback { id: TransactionId },
}

#[derive(Default)]
struct Journal {
    events: Vec<TransactionEvent>,
    open: HashSet<TransactionId>,
}

#[derive(Default)]
pub struct InMemoryDocument {
    journal: Mutex<Journal>,
    reject_commits: bool,
}

impl InMemoryDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every commit fails; used to exercise the rollback path.
    pub fn rejecting_commits() -> Self {
        Self {
            reject_commits: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<TransactionEvent> {
        self.lock().events.clone()
    }

    pub fn open_transactions(&self) -> usize {
        self.lock().open.len()
    }

    fn lock(&self) -> MutexGuard<'_, Journal> {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self, id: TransactionId) -> Result<(), DocumentError> {
        if self.lock().open.remove(&id) {
            Ok(())
        } else {
            Err(DocumentError::NotOpen(id))
        }
    }
}

#[async_trait]
impl DocumentSession for InMemoryDocument {
    async fn begin_transaction(&self, name: &str) -> Result<TransactionId, BoxError> {
        let id = TransactionId::generate();
        let mut journal = self.lock();
        journal.open.insert(id);
        journal.events.push(TransactionEvent::Begin {
            id,
            name: name.to_owned(),
        });
        debug!(%id, name, "transaction started");
        Ok(id)
    }

    async fn commit(&self, transaction: TransactionId) -> Result<(), BoxError> {
        if self.reject_commits {
            return Err(DocumentError::CommitRejected(transaction).into());
        }
        self.close(transaction)?;
        self.lock()
            .events
            .push(TransactionEvent::Commit { id: transaction });
        Ok(())
    }

    async fn rollback(&self, transaction: TransactionId) -> Result<(), BoxError> {
        self.close(transaction)?;
        self.lock()
            .events
            .push(TransactionEvent::Rollback { id: transaction });
        Ok(())
    }
}
