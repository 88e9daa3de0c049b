//! RecordUnlocker - 放棄されたロックの回収
//!
//! `locked_at` が `max_lock_time` より古い `locked` レコードを pending に戻す。
//! クラッシュしたインスタンスが握ったままのレコードを救う唯一の経路。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::TimeDelta;
use tracing::{debug, info};

use crate::domain::OutboxError;
use crate::ports::{Clock, OutboxStore, SystemClock};

use super::periodic::PeriodicWork;
use super::settings::cutoff;

pub struct RecordUnlocker {
    store: Arc<dyn OutboxStore>,
    max_lock_time: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl RecordUnlocker {
    pub fn new(store: Arc<dyn OutboxStore>, max_lock_time: TimeDelta) -> Self {
        Self {
            store,
            max_lock_time,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the number of records put back to `pending`.
    pub async fn unlock_expired_messages(&self) -> Result<usize, OutboxError> {
        let locked_before = cutoff(self.clock.now(), self.max_lock_time, "lock")?;
        let unlocked = self.store.unlock_expired(locked_before).await?;
        if unlocked > 0 {
            info!(unlocked, %locked_before, "unlocked abandoned records");
        } else {
            debug!("no expired locks");
        }
        Ok(unlocked)
    }
}

#[async_trait]
impl PeriodicWork for RecordUnlocker {
    fn name(&self) -> &'static str {
        "record-unlocker"
    }

    async fn run_once(&self) -> Result<(), OutboxError> {
        self.unlock_expired_messages().await.map(|_| ())
    }
}
