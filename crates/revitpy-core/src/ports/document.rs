//! DocumentSession port - ドキュメントのトランザクション境界
//!
//! facade の `transaction()` が begin → 処理 → commit / rollback の順に呼ぶ。

use async_trait::async_trait;

use crate::domain::TransactionId;
use crate::error::BoxError;

/// Host document that groups edits into named transactions.
///
/// Implementations decide what begin/commit/rollback mean; the facade only
/// guarantees that every successful `begin_transaction` is followed by
/// exactly one `commit` or `rollback`.
#[async_trait]
pub trait DocumentSession: Send + Sync {
    async fn begin_transaction(&self, name: &str) -> Result<TransactionId, BoxError>;

    async fn commit(&self, transaction: TransactionId) -> Result<(), BoxError>;

    async fn rollback(&self, transaction: TransactionId) -> Result<(), BoxError>;
}
