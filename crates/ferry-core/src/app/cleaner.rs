//! RecordCleaner - 保持期間を過ぎた sent レコードの削除

use std::sync::Arc;

use async_trait::async_trait;
use chrono::TimeDelta;
use tracing::{debug, info};

use crate::domain::OutboxError;
use crate::ports::{Clock, OutboxStore, SystemClock};

use super::periodic::PeriodicWork;
use super::settings::cutoff;

/// Deletes `sent` records older than the retention window.
/// `pending`, `locked` and `failed` records are never touched.
pub struct RecordCleaner {
    store: Arc<dyn OutboxStore>,
    retention: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl RecordCleaner {
    pub fn new(store: Arc<dyn OutboxStore>, retention: TimeDelta) -> Self {
        Self {
            store,
            retention,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn remove_expired_messages(&self) -> Result<usize, OutboxError> {
        let sent_before = cutoff(self.clock.now(), self.retention, "retention")?;
        let removed = self.store.remove_sent_before(sent_before).await?;
        if removed > 0 {
            info!(removed, %sent_before, "removed expired records");
        } else {
            debug!("nothing to clean");
        }
        Ok(removed)
    }
}

#[async_trait]
impl PeriodicWork for RecordCleaner {
    fn name(&self) -> &'static str {
        "record-cleaner"
    }

    async fn run_once(&self) -> Result<(), OutboxError> {
        self.remove_expired_messages().await.map(|_| ())
    }
}
