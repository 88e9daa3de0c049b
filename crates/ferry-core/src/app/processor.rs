//! RecordProcessor - claim → send → finalize
//!
//! # フロー（1 サイクル）
//! 1. `claim_batch` で pending / lock 期限切れのレコードを不可分にロック
//! 2. レコードごとに RetryPolicy で broker に送信
//! 3. 結果に応じて Sent / Failed / Released で finalize（ロック保持が条件）
//! 4. 最後に自分がまだ握っているロックを `release_owned` で解放
//!
//! 一部のレコードが失敗してもサイクルは最後まで進み、成功分は確定したまま残る。
//! 失敗はまとめて `OutboxError::Cycle` で返す。

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::TimeDelta;
use tracing::{debug, info, warn};

use crate::domain::{Finalization, MachineId, OutboxError, OutboxRecord, RecordState};
use crate::ports::{Clock, MessageBroker, OutboxStore, SystemClock};

use super::periodic::PeriodicWork;
use super::settings::{DispatcherSettings, RetrialPolicy, cutoff};

/// Summary of one processing cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessReport {
    pub claimed: usize,
    pub sent: usize,
    pub released: usize,
    pub failed: usize,
}

pub struct RecordProcessor {
    store: Arc<dyn OutboxStore>,
    broker: Arc<dyn MessageBroker>,
    machine_id: MachineId,
    policy: RetrialPolicy,
    lock_timeout: TimeDelta,
    batch_size: usize,
    clock: Arc<dyn Clock>,
}

impl RecordProcessor {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        broker: Arc<dyn MessageBroker>,
        machine_id: MachineId,
        policy: RetrialPolicy,
    ) -> Self {
        let defaults = DispatcherSettings::default();
        Self {
            store,
            broker,
            machine_id,
            policy,
            lock_timeout: TimeDelta::from_std(defaults.max_lock_time).unwrap_or(TimeDelta::MAX),
            batch_size: defaults.batch_size,
            clock: Arc::new(SystemClock),
        }
    }

    /// Locks older than this are reclaimable by `claim_batch`.
    pub fn with_lock_timeout(mut self, lock_timeout: TimeDelta) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn machine_id(&self) -> &MachineId {
        &self.machine_id
    }

    /// One processing cycle.
    pub async fn process_records(&self) -> Result<ProcessReport, OutboxError> {
        let now = self.clock.now();
        let expired_before = cutoff(now, self.lock_timeout, "lock")?;
        let claimed = self
            .store
            .claim_batch(&self.machine_id, now, expired_before, self.batch_size)
            .await?;

        let mut report = ProcessReport {
            claimed: claimed.len(),
            ..ProcessReport::default()
        };
        let mut errors = Vec::new();

        for record in &claimed {
            let (finalization, error) = self.deliver(record).await;
            let target = finalization.target_state();

            match self
                .store
                .finalize(record.id, &self.machine_id, finalization)
                .await
            {
                Ok(()) => match target {
                    RecordState::Sent => report.sent += 1,
                    RecordState::Failed => report.failed += 1,
                    _ => report.released += 1,
                },
                Err(err) => {
                    warn!(record = %record.id, error = %err, "finalize failed");
                    errors.push(err.into());
                }
            }
            errors.extend(error);
        }

        // anything still locked by us at this point would otherwise wait for the unlocker
        match self.store.release_owned(&self.machine_id).await {
            Ok(0) => {}
            Ok(released) => {
                warn!(machine_id = %self.machine_id, released, "released leftover locks");
            }
            Err(err) => errors.push(err.into()),
        }

        if report.claimed > 0 {
            info!(
                machine_id = %self.machine_id,
                claimed = report.claimed,
                sent = report.sent,
                released = report.released,
                failed = report.failed,
                "processing cycle finished"
            );
        } else {
            debug!(machine_id = %self.machine_id, "nothing to process");
        }

        if errors.is_empty() {
            Ok(report)
        } else {
            Err(OutboxError::Cycle(errors))
        }
    }

    /// Send one claimed record and decide how it leaves the `Locked` state.
    async fn deliver(&self, record: &OutboxRecord) -> (Finalization, Option<OutboxError>) {
        if self.policy.is_exhausted(record.attempts) {
            let error = OutboxError::AttemptsExhausted {
                id: record.id,
                attempts: record.attempts,
            };
            let finalization = Finalization::Failed {
                at: self.clock.now(),
                attempts_made: 0,
                error: error.to_string(),
            };
            return (finalization, Some(error));
        }

        let calls = AtomicU32::new(0);
        let result = self
            .policy
            .send_policy_for(record.attempts)
            .execute(|| {
                calls.fetch_add(1, Ordering::Relaxed);
                self.broker.send(&record.message)
            })
            .await;

        let at = self.clock.now();
        let attempts_made = calls.load(Ordering::Relaxed);
        let attempts = record.attempts.saturating_add(attempts_made);

        let err = match result {
            Ok(()) => {
                debug!(record = %record.id, attempts, "record sent");
                return (Finalization::Sent { at, attempts_made }, None);
            }
            Err(err) => err,
        };

        let unrecoverable = err.is_unrecoverable();
        let source = err.into_inner();
        let message = source.to_string();

        if unrecoverable || self.policy.is_exhausted(attempts) {
            let finalization = Finalization::Failed {
                at,
                attempts_made,
                error: message,
            };
            let error = OutboxError::DeliveryFailed {
                id: record.id,
                attempts,
                source,
            };
            (finalization, Some(error))
        } else {
            let finalization = Finalization::Released {
                at,
                attempts_made,
                error: message,
            };
            let error = OutboxError::DeliveryDeferred {
                id: record.id,
                attempts,
                source,
            };
            (finalization, Some(error))
        }
    }
}

#[async_trait]
impl PeriodicWork for RecordProcessor {
    fn name(&self) -> &'static str {
        "record-processor"
    }

    async fn run_once(&self) -> Result<(), OutboxError> {
        self.process_records().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BrokerError, Message, RecordId, StoreError};
    use crate::impls::{InMemoryStore, RecordingBroker};
    use crate::ports::{ManualClock, SendResult};
    use crate::retry::{Classified, retryable, unrecoverable};
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    /// Replays scripted results, then succeeds.
    struct ScriptedBroker {
        script: Mutex<VecDeque<SendResult>>,
        calls: AtomicU32,
    }

    impl ScriptedBroker {
        fn new(script: impl IntoIterator<Item = SendResult>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into_iter().collect()),
                calls: AtomicU32::new(0),
            })
        }

        fn always(result: SendResult) -> Arc<Self> {
            Self::new(std::iter::repeat_n(result, 100))
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessageBroker for ScriptedBroker {
        async fn send(&self, _message: &Message) -> SendResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script.lock().await.pop_front().unwrap_or(Ok(()))
        }
    }

    fn unavailable() -> SendResult {
        Err(retryable(BrokerError::Unavailable("connection refused".into())))
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        store: Arc<InMemoryStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new(t0()));
            let store = Arc::new(InMemoryStore::with_clock(clock.clone()));
            Self { clock, store }
        }

        async fn enqueue(&self, n: usize) -> Vec<RecordId> {
            let mut ids = Vec::new();
            for i in 0..n {
                let message = Message::new("orders", i.to_string(), b"{}".to_vec());
                ids.push(self.store.enqueue(message).await.unwrap());
            }
            ids
        }

        fn processor(
            &self,
            broker: Arc<dyn MessageBroker>,
            policy: RetrialPolicy,
        ) -> RecordProcessor {
            RecordProcessor::new(self.store.clone(), broker, MachineId::from("m1"), policy)
                .with_clock(self.clock.clone())
        }
    }

    #[tokio::test]
    async fn sends_pending_records() {
        let fx = Fixture::new();
        let ids = fx.enqueue(3).await;
        let broker = Arc::new(RecordingBroker::new());
        let processor = fx.processor(broker.clone(), RetrialPolicy::default());

        let report = processor.process_records().await.unwrap();

        assert_eq!(
            report,
            ProcessReport {
                claimed: 3,
                sent: 3,
                ..ProcessReport::default()
            }
        );
        assert_eq!(broker.len().await, 3);
        for id in ids {
            let record = fx.store.get(id).await.unwrap();
            assert_eq!(record.state, RecordState::Sent);
            assert_eq!(record.sent_at, Some(t0()));
            assert_eq!(record.attempts, 1);
            assert!(record.locked_by.is_none());
        }
    }

    #[test]
    fn defaults_follow_dispatcher_settings() {
        let fx = Fixture::new();
        let processor = fx.processor(ScriptedBroker::new([]), RetrialPolicy::default());
        let defaults = DispatcherSettings::default();

        assert_eq!(processor.batch_size, defaults.batch_size);
        assert_eq!(
            processor.lock_timeout,
            defaults.max_lock_time_delta().unwrap()
        );
    }

    #[tokio::test]
    async fn lock_timeout_beyond_the_calendar_is_an_error() {
        let fx = Fixture::new();
        fx.enqueue(1).await;
        let broker = ScriptedBroker::new([]);
        let processor = fx
            .processor(broker.clone(), RetrialPolicy::default())
            .with_lock_timeout(TimeDelta::days(365 * 1_000_000));

        let err = processor.process_records().await.unwrap_err();

        assert!(matches!(
            err,
            OutboxError::CutoffOutOfRange { what: "lock", .. }
        ));
        assert_eq!(broker.calls(), 0);
        assert_eq!(fx.store.counts().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn empty_store_is_a_quiet_cycle() {
        let fx = Fixture::new();
        let broker = ScriptedBroker::new([]);
        let processor = fx.processor(broker.clone(), RetrialPolicy::default());

        let report = processor.process_records().await.unwrap();

        assert_eq!(report, ProcessReport::default());
        assert_eq!(broker.calls(), 0);
    }

    #[tokio::test]
    async fn transient_failures_recover_within_the_cycle() {
        let fx = Fixture::new();
        let ids = fx.enqueue(1).await;
        let broker = ScriptedBroker::new([unavailable(), unavailable()]);
        let processor = fx.processor(broker.clone(), RetrialPolicy::default());

        let report = processor.process_records().await.unwrap();

        assert_eq!(report.sent, 1);
        assert_eq!(broker.calls(), 3);
        let record = fx.store.get(ids[0]).await.unwrap();
        assert_eq!(record.state, RecordState::Sent);
        assert_eq!(record.attempts, 3);
    }

    #[tokio::test]
    async fn exhausted_cycle_releases_record_with_budget_left() {
        let fx = Fixture::new();
        let ids = fx.enqueue(1).await;
        let broker = ScriptedBroker::always(unavailable());
        let processor = fx.processor(broker.clone(), RetrialPolicy::default());

        let err = processor.process_records().await.unwrap_err();

        let errors = err.into_flat();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            OutboxError::DeliveryDeferred { attempts: 3, .. }
        ));
        let record = fx.store.get(ids[0]).await.unwrap();
        assert_eq!(record.state, RecordState::Pending);
        assert_eq!(record.attempts, 3);
        assert_eq!(
            record.last_error.as_deref(),
            Some("broker unavailable: connection refused")
        );
        assert!(record.locked_by.is_none());
    }

    #[tokio::test]
    async fn budget_is_enforced_across_cycles() {
        let fx = Fixture::new();
        let ids = fx.enqueue(1).await;
        let broker = ScriptedBroker::always(unavailable());
        let policy = RetrialPolicy {
            max_send_attempts: 5,
            ..RetrialPolicy::default()
        };
        let processor = fx.processor(broker.clone(), policy);

        let _ = processor.process_records().await.unwrap_err();
        assert_eq!(fx.store.get(ids[0]).await.unwrap().state, RecordState::Pending);

        let err = processor.process_records().await.unwrap_err();
        assert!(matches!(
            err.into_flat()[0],
            OutboxError::DeliveryFailed { attempts: 5, .. }
        ));
        assert_eq!(broker.calls(), 5);

        let record = fx.store.get(ids[0]).await.unwrap();
        assert_eq!(record.state, RecordState::Failed);
        assert_eq!(record.attempts, 5);

        // failed is terminal
        let report = processor.process_records().await.unwrap();
        assert_eq!(report.claimed, 0);
        assert_eq!(broker.calls(), 5);
    }

    #[tokio::test]
    async fn unrecoverable_error_fails_immediately() {
        let fx = Fixture::new();
        let ids = fx.enqueue(1).await;
        let broker = ScriptedBroker::new([Err(unrecoverable(BrokerError::Rejected(
            "schema mismatch".into(),
        )))]);
        let processor = fx.processor(broker.clone(), RetrialPolicy::default());

        let err = processor.process_records().await.unwrap_err();

        assert!(matches!(
            err.into_flat()[0],
            OutboxError::DeliveryFailed { attempts: 1, .. }
        ));
        assert_eq!(broker.calls(), 1);
        let record = fx.store.get(ids[0]).await.unwrap();
        assert_eq!(record.state, RecordState::Failed);
        assert_eq!(
            record.last_error.as_deref(),
            Some("message rejected by broker: schema mismatch")
        );
    }

    #[tokio::test]
    async fn plain_error_is_not_retried_in_cycle() {
        let fx = Fixture::new();
        let ids = fx.enqueue(1).await;
        let broker = ScriptedBroker::new([Err(Classified::plain(BrokerError::Other(
            "timeout".into(),
        )))]);
        let processor = fx.processor(broker.clone(), RetrialPolicy::default());

        let _ = processor.process_records().await.unwrap_err();

        assert_eq!(broker.calls(), 1);
        let record = fx.store.get(ids[0]).await.unwrap();
        assert_eq!(record.state, RecordState::Pending);
        assert_eq!(record.attempts, 1);
    }

    #[tokio::test]
    async fn spent_budget_fails_without_sending() {
        let fx = Fixture::new();
        let ids = fx.enqueue(1).await;
        let mut record = fx.store.get(ids[0]).await.unwrap();
        record.attempts = 10;
        fx.store.insert(record).await;
        let broker = ScriptedBroker::new([]);
        let processor = fx.processor(broker.clone(), RetrialPolicy::default());

        let err = processor.process_records().await.unwrap_err();

        assert!(matches!(
            err.into_flat()[0],
            OutboxError::AttemptsExhausted { attempts: 10, .. }
        ));
        assert_eq!(broker.calls(), 0);
        let record = fx.store.get(ids[0]).await.unwrap();
        assert_eq!(record.state, RecordState::Failed);
        assert_eq!(record.attempts, 10);
    }

    #[tokio::test]
    async fn disabled_budget_keeps_releasing() {
        let fx = Fixture::new();
        let ids = fx.enqueue(1).await;
        let mut record = fx.store.get(ids[0]).await.unwrap();
        record.attempts = 1_000;
        fx.store.insert(record).await;
        let broker = ScriptedBroker::always(unavailable());
        let policy = RetrialPolicy {
            max_send_attempts_enabled: false,
            ..RetrialPolicy::default()
        };
        let processor = fx.processor(broker.clone(), policy);

        let _ = processor.process_records().await.unwrap_err();

        let record = fx.store.get(ids[0]).await.unwrap();
        assert_eq!(record.state, RecordState::Pending);
        assert_eq!(record.attempts, 1_003);
    }

    #[tokio::test]
    async fn partial_failures_keep_successful_records() {
        let fx = Fixture::new();
        fx.enqueue(3).await;
        let broker = ScriptedBroker::new([
            Ok(()),
            Err(unrecoverable(BrokerError::Rejected("bad".into()))),
            Ok(()),
        ]);
        let processor = fx.processor(broker.clone(), RetrialPolicy::default());

        let err = processor.process_records().await.unwrap_err();

        assert_eq!(err.into_flat().len(), 1);
        let counts = fx.store.counts().await.unwrap();
        assert_eq!(counts.sent, 2);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.locked, 0);
    }

    #[tokio::test]
    async fn claims_at_most_batch_size() {
        let fx = Fixture::new();
        fx.enqueue(5).await;
        let broker = Arc::new(RecordingBroker::new());
        let processor = fx
            .processor(broker.clone(), RetrialPolicy::default())
            .with_batch_size(2);

        let report = processor.process_records().await.unwrap();

        assert_eq!(report.claimed, 2);
        assert_eq!(fx.store.counts().await.unwrap().pending, 3);
    }

    #[tokio::test]
    async fn reclaims_abandoned_locks() {
        let fx = Fixture::new();
        let ids = fx.enqueue(2).await;
        let mut stale = fx.store.get(ids[0]).await.unwrap();
        stale.lock(&MachineId::from("crashed"), t0() - TimeDelta::minutes(10));
        fx.store.insert(stale).await;
        let mut fresh = fx.store.get(ids[1]).await.unwrap();
        fresh.lock(&MachineId::from("busy"), t0() - TimeDelta::seconds(5));
        fx.store.insert(fresh).await;

        let broker = Arc::new(RecordingBroker::new());
        let processor = fx
            .processor(broker.clone(), RetrialPolicy::default())
            .with_lock_timeout(TimeDelta::minutes(1));

        let report = processor.process_records().await.unwrap();

        assert_eq!(report.sent, 1);
        assert_eq!(fx.store.get(ids[0]).await.unwrap().state, RecordState::Sent);
        assert!(
            fx.store
                .get(ids[1])
                .await
                .unwrap()
                .is_locked_by(&MachineId::from("busy"))
        );
    }

    /// Stalls long enough for another instance to take the lock over.
    struct StallingBroker {
        store: Arc<InMemoryStore>,
        clock: Arc<ManualClock>,
    }

    #[async_trait]
    impl MessageBroker for StallingBroker {
        async fn send(&self, _message: &Message) -> SendResult {
            self.clock.advance(TimeDelta::minutes(5));
            let now = self.clock.now();
            self.store
                .claim_batch(&MachineId::from("m2"), now, now - TimeDelta::minutes(1), 10)
                .await
                .map_err(|e| Classified::plain(BrokerError::Other(e.to_string())))?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn lost_lock_is_reported_and_not_overwritten() {
        let fx = Fixture::new();
        let ids = fx.enqueue(1).await;
        let broker = Arc::new(StallingBroker {
            store: fx.store.clone(),
            clock: fx.clock.clone(),
        });
        let processor = fx
            .processor(broker, RetrialPolicy::default())
            .with_lock_timeout(TimeDelta::minutes(1));

        let err = processor.process_records().await.unwrap_err();

        assert!(matches!(
            err.into_flat()[0],
            OutboxError::Store(StoreError::LockLost { .. })
        ));
        let record = fx.store.get(ids[0]).await.unwrap();
        assert!(record.is_locked_by(&MachineId::from("m2")));
        assert_eq!(record.attempts, 0);
    }
}
