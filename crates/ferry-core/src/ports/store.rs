//! OutboxStore port - outbox レコードの正本（source of truth）
//!
//! 3 つのループはこの trait だけを通じて協調する。ループ同士は直接話さない。
//!
//! # 設計原則
//! - claim は Store 側で不可分に行う（check-then-set を 2 回の呼び出しに分けない）
//! - finalize は「呼び出し元がまだ lock を保持している」ことを条件にする
//! - RDB 実装では claim を `UPDATE ... WHERE id IN (SELECT ... FOR UPDATE SKIP LOCKED)`
//!   のような単一文で表現する想定

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Finalization, MachineId, Message, OutboxRecord, RecordId, StoreError};
use crate::observability::StoreCounts;

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Writer side: insert a `pending` record.
    ///
    /// A relational implementation runs this inside the business transaction.
    async fn enqueue(&self, message: Message) -> Result<RecordId, StoreError>;

    /// Atomically lock up to `limit` eligible records for `owner` and return them.
    ///
    /// Eligible: `pending`, or `locked` with `locked_at < expired_before`.
    /// Two concurrent callers never receive the same record.
    async fn claim_batch(
        &self,
        owner: &MachineId,
        now: DateTime<Utc>,
        expired_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>, StoreError>;

    /// Move a record out of `locked`, only if `owner` still holds the lock.
    ///
    /// Returns `StoreError::LockLost` and leaves the record untouched otherwise.
    async fn finalize(
        &self,
        id: RecordId,
        owner: &MachineId,
        finalization: Finalization,
    ) -> Result<(), StoreError>;

    /// Clear every lock still held by `owner`. Returns how many were released.
    async fn release_owned(&self, owner: &MachineId) -> Result<usize, StoreError>;

    /// Reset records locked before `locked_before` to `pending`.
    async fn unlock_expired(&self, locked_before: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Delete `sent` records whose `sent_at` is before `sent_before`.
    async fn remove_sent_before(&self, sent_before: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn counts(&self) -> Result<StoreCounts, StoreError>;
}
