//! Dispatcher - 3 つのループの所有者
//!
//! # 学習ポイント
//! - `run()` は 3 つのループを spawn して即座に戻る（非ブロッキング）
//! - 1 つの `watch::Receiver<bool>` を clone して全ループに配る
//! - どのループの失敗も他のループを止めない（エラーは channel に流すだけ）

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::info;

use crate::domain::{MachineId, OutboxError, SettingsError};
use crate::ports::{Clock, MessageBroker, OutboxStore, SystemClock};

use super::builder::DispatcherBuilder;
use super::cleaner::RecordCleaner;
use super::periodic::{PeriodicWork, run_periodic};
use super::processor::RecordProcessor;
use super::settings::DispatcherSettings;
use super::unlocker::RecordUnlocker;

pub struct Dispatcher {
    settings: DispatcherSettings,
    processor: Arc<RecordProcessor>,
    unlocker: Arc<RecordUnlocker>,
    cleaner: Arc<RecordCleaner>,
}

impl Dispatcher {
    /// Validate `settings` and wire the three workers with the system clock.
    pub fn new(
        store: Arc<dyn OutboxStore>,
        broker: Arc<dyn MessageBroker>,
        settings: DispatcherSettings,
        machine_id: MachineId,
    ) -> Result<Self, SettingsError> {
        Self::from_parts(store, broker, settings, machine_id, Arc::new(SystemClock))
    }

    pub fn builder(
        store: Arc<dyn OutboxStore>,
        broker: Arc<dyn MessageBroker>,
    ) -> DispatcherBuilder {
        DispatcherBuilder::new(store, broker)
    }

    pub(crate) fn from_parts(
        store: Arc<dyn OutboxStore>,
        broker: Arc<dyn MessageBroker>,
        settings: DispatcherSettings,
        machine_id: MachineId,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SettingsError> {
        settings.validate()?;
        if machine_id.is_empty() {
            return Err(SettingsError::EmptyMachineId);
        }

        let processor = RecordProcessor::new(
            Arc::clone(&store),
            broker,
            machine_id,
            settings.retrial_policy.clone(),
        )
        .with_lock_timeout(settings.max_lock_time_delta()?)
        .with_batch_size(settings.batch_size)
        .with_clock(Arc::clone(&clock));

        let unlocker = RecordUnlocker::new(Arc::clone(&store), settings.max_lock_time_delta()?)
            .with_clock(Arc::clone(&clock));

        let cleaner = RecordCleaner::new(store, settings.messages_retention_delta()?)
            .with_clock(clock);

        Ok(Self {
            settings,
            processor: Arc::new(processor),
            unlocker: Arc::new(unlocker),
            cleaner: Arc::new(cleaner),
        })
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    pub fn machine_id(&self) -> &MachineId {
        self.processor.machine_id()
    }

    pub fn processor(&self) -> &RecordProcessor {
        &self.processor
    }

    pub fn unlocker(&self) -> &RecordUnlocker {
        &self.unlocker
    }

    pub fn cleaner(&self) -> &RecordCleaner {
        &self.cleaner
    }

    /// Start the processor, unlocker and cleaner loops and return at once.
    ///
    /// Each loop runs its work immediately, then on its own interval.
    /// Errors go to `errors`; they never stop a loop. Sending `true` on the
    /// shutdown channel (or dropping its sender) stops all three loops after
    /// their current cycle.
    ///
    /// Must be called from within a tokio runtime.
    pub fn run(
        &self,
        errors: mpsc::UnboundedSender<OutboxError>,
        shutdown: watch::Receiver<bool>,
    ) -> DispatcherHandle {
        info!(machine_id = %self.machine_id(), "starting dispatcher");

        let loops: [(Arc<dyn PeriodicWork>, Duration); 3] = [
            (self.processor.clone(), self.settings.process_interval),
            (self.unlocker.clone(), self.settings.lock_checker_interval),
            (self.cleaner.clone(), self.settings.cleanup_worker_interval),
        ];

        let tasks = loops
            .into_iter()
            .map(|(work, period)| {
                tokio::spawn(run_periodic(work, period, errors.clone(), shutdown.clone()))
            })
            .collect();

        DispatcherHandle { tasks }
    }
}

/// Join handle for the loops started by [`Dispatcher::run`].
#[derive(Debug)]
pub struct DispatcherHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl DispatcherHandle {
    /// Wait for every loop to stop. Returns the first panic, if any,
    /// after all loops have finished.
    pub async fn join(self) -> Result<(), JoinError> {
        let mut first_err = None;
        for task in self.tasks {
            if let Err(err) = task.await {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(JoinHandle::is_finished)
    }
}
