//! InMemoryStore - 開発・テスト用の OutboxStore
//!
//! # 実装詳細
//! - HashMap<RecordId, OutboxRecord> を 1 つの Mutex で保護
//! - claim / finalize / unlock はすべてロックを保持したまま完結する
//!   （ロックを跨いで await しない）ので、RDB の単一 UPDATE 文と同じく不可分

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    Finalization, MachineId, Message, OutboxRecord, RecordId, RecordState, StoreError,
};
use crate::observability::StoreCounts;
use crate::ports::{Clock, IdGenerator, OutboxStore, SystemClock, UlidGenerator};

pub struct InMemoryStore {
    records: Mutex<HashMap<RecordId, OutboxRecord>>,
    clock: Arc<dyn Clock>,
    id_gen: Box<dyn IdGenerator>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// `created_at` と ID の timestamp 部に `clock` を使う
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            id_gen: Box::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
        }
    }

    /// Put a record as-is (any state). Replaces a record with the same id.
    pub async fn insert(&self, record: OutboxRecord) {
        self.records.lock().await.insert(record.id, record);
    }

    pub async fn get(&self, id: RecordId) -> Option<OutboxRecord> {
        self.records.lock().await.get(&id).cloned()
    }

    /// All records, ordered by id.
    pub async fn records(&self) -> Vec<OutboxRecord> {
        let records = self.records.lock().await;
        let mut all: Vec<OutboxRecord> = records.values().cloned().collect();
        all.sort_by_key(|r| r.id);
        all
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn enqueue(&self, message: Message) -> Result<RecordId, StoreError> {
        let id = self.id_gen.generate_record_id();
        let record = OutboxRecord::new(id, message, self.clock.now());
        self.records.lock().await.insert(id, record);
        Ok(id)
    }

    async fn claim_batch(
        &self,
        owner: &MachineId,
        now: DateTime<Utc>,
        expired_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        let mut records = self.records.lock().await;

        // oldest first
        let mut eligible: Vec<RecordId> = records
            .values()
            .filter(|r| r.is_claimable(expired_before))
            .map(|r| r.id)
            .collect();
        eligible.sort_unstable();
        eligible.truncate(limit);

        let mut claimed = Vec::with_capacity(eligible.len());
        for id in eligible {
            if let Some(record) = records.get_mut(&id) {
                record.lock(owner, now);
                claimed.push(record.clone());
            }
        }
        Ok(claimed)
    }

    async fn finalize(
        &self,
        id: RecordId,
        owner: &MachineId,
        finalization: Finalization,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if !record.is_locked_by(owner) {
            return Err(StoreError::LockLost {
                id,
                owner: owner.clone(),
            });
        }
        record.finalize(finalization);
        Ok(())
    }

    async fn release_owned(&self, owner: &MachineId) -> Result<usize, StoreError> {
        let mut records = self.records.lock().await;
        let mut released = 0;
        for record in records.values_mut().filter(|r| r.is_locked_by(owner)) {
            record.unlock();
            released += 1;
        }
        Ok(released)
    }

    async fn unlock_expired(&self, locked_before: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut records = self.records.lock().await;
        let mut unlocked = 0;
        for record in records
            .values_mut()
            .filter(|r| r.is_lock_expired(locked_before))
        {
            record.unlock();
            unlocked += 1;
        }
        Ok(unlocked)
    }

    async fn remove_sent_before(&self, sent_before: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, r| !r.is_expired_sent(sent_before));
        Ok(before - records.len())
    }

    async fn counts(&self) -> Result<StoreCounts, StoreError> {
        let records = self.records.lock().await;
        let mut counts = StoreCounts::default();
        for record in records.values() {
            match record.state {
                RecordState::Pending => counts.pending += 1,
                RecordState::Locked => counts.locked += 1,
                RecordState::Sent => counts.sent += 1,
                RecordState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}
