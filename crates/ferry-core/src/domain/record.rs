//! Outbox record: message + delivery bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MachineId, Message, RecordId, RecordState};

/// A persisted message awaiting (or done with) delivery.
///
/// Design:
/// - The Store owns records; the core observes and mutates them only through
///   the `OutboxStore` port.
/// - Lock fields are populated iff `state == Locked`.
/// - `attempts` only grows. Unlocking never resets it, so a record that keeps
///   crashing its processor still runs out of budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: RecordId,
    pub message: Message,
    pub state: RecordState,

    pub locked_by: Option<MachineId>,
    pub locked_at: Option<DateTime<Utc>>,

    /// Number of broker invocations made so far (across all instances).
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// How a claimed record leaves the `Locked` state.
///
/// `attempts_made` is the number of broker invocations in the cycle that
/// produced this finalization; the store adds it to the record's count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalization {
    Sent {
        at: DateTime<Utc>,
        attempts_made: u32,
    },
    Failed {
        at: DateTime<Utc>,
        attempts_made: u32,
        error: String,
    },
    /// Back to `Pending`, to be retried by a later cycle.
    Released {
        at: DateTime<Utc>,
        attempts_made: u32,
        error: String,
    },
}

impl Finalization {
    /// State the record ends up in.
    pub fn target_state(&self) -> RecordState {
        match self {
            Finalization::Sent { .. } => RecordState::Sent,
            Finalization::Failed { .. } => RecordState::Failed,
            Finalization::Released { .. } => RecordState::Pending,
        }
    }
}

impl OutboxRecord {
    pub fn new(id: RecordId, message: Message, now: DateTime<Utc>) -> Self {
        Self {
            id,
            message,
            state: RecordState::Pending,
            locked_by: None,
            locked_at: None,
            attempts: 0,
            last_attempt_at: None,
            last_error: None,
            created_at: now,
            sent_at: None,
        }
    }

    /// Eligible for claiming: pending, or locked before `expired_before`
    /// (the holder is presumed dead).
    pub fn is_claimable(&self, expired_before: DateTime<Utc>) -> bool {
        match self.state {
            RecordState::Pending => true,
            RecordState::Locked => self.is_lock_expired(expired_before),
            RecordState::Sent | RecordState::Failed => false,
        }
    }

    pub fn is_lock_expired(&self, locked_before: DateTime<Utc>) -> bool {
        self.state == RecordState::Locked
            && self.locked_at.is_some_and(|locked_at| locked_at < locked_before)
    }

    pub fn is_locked_by(&self, owner: &MachineId) -> bool {
        self.state == RecordState::Locked && self.locked_by.as_ref() == Some(owner)
    }

    /// Mark as locked by `owner`.
    pub fn lock(&mut self, owner: &MachineId, now: DateTime<Utc>) {
        self.state = RecordState::Locked;
        self.locked_by = Some(owner.clone());
        self.locked_at = Some(now);
    }

    /// Back to pending with lock fields cleared. Attempts are kept.
    pub fn unlock(&mut self) {
        self.state = RecordState::Pending;
        self.clear_lock();
    }

    pub fn finalize(&mut self, finalization: Finalization) {
        match finalization {
            Finalization::Sent { at, attempts_made } => {
                self.record_attempts(attempts_made, at);
                self.state = RecordState::Sent;
                self.sent_at = Some(at);
                self.last_error = None;
            }
            Finalization::Failed {
                at,
                attempts_made,
                error,
            } => {
                self.record_attempts(attempts_made, at);
                self.state = RecordState::Failed;
                self.last_error = Some(error);
            }
            Finalization::Released {
                at,
                attempts_made,
                error,
            } => {
                self.record_attempts(attempts_made, at);
                self.state = RecordState::Pending;
                self.last_error = Some(error);
            }
        }
        self.clear_lock();
    }

    /// Sent before `sent_before` and therefore past retention.
    pub fn is_expired_sent(&self, sent_before: DateTime<Utc>) -> bool {
        self.state == RecordState::Sent && self.sent_at.is_some_and(|sent_at| sent_at < sent_before)
    }

    fn record_attempts(&mut self, attempts_made: u32, at: DateTime<Utc>) {
        if attempts_made > 0 {
            self.attempts = self.attempts.saturating_add(attempts_made);
            self.last_attempt_at = Some(at);
        }
    }

    fn clear_lock(&mut self) {
        self.locked_by = None;
        self.locked_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rstest::rstest;
    use ulid::Ulid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn record() -> OutboxRecord {
        OutboxRecord::new(
            RecordId::from_ulid(Ulid::new()),
            Message::new("orders", "k", b"{}".to_vec()),
            t0(),
        )
    }

    #[test]
    fn new_record_is_pending_without_lock() {
        let rec = record();
        assert_eq!(rec.state, RecordState::Pending);
        assert!(rec.locked_by.is_none());
        assert!(rec.locked_at.is_none());
        assert_eq!(rec.attempts, 0);
    }

    #[rstest]
    #[case::pending(RecordState::Pending, None, true)]
    #[case::fresh_lock(RecordState::Locked, Some(Duration::seconds(-10)), false)]
    #[case::stale_lock(RecordState::Locked, Some(Duration::seconds(-120)), true)]
    #[case::sent(RecordState::Sent, None, false)]
    #[case::failed(RecordState::Failed, None, false)]
    fn claim_eligibility(
        #[case] state: RecordState,
        #[case] locked_offset: Option<Duration>,
        #[case] claimable: bool,
    ) {
        let mut rec = record();
        rec.state = state;
        if let Some(offset) = locked_offset {
            rec.locked_by = Some(MachineId::from("other"));
            rec.locked_at = Some(t0() + offset);
        }

        let expired_before = t0() - Duration::seconds(60);
        assert_eq!(rec.is_claimable(expired_before), claimable);
    }

    #[test]
    fn lock_then_unlock_keeps_attempts() {
        let owner = MachineId::from("a");
        let mut rec = record();
        rec.attempts = 2;

        rec.lock(&owner, t0());
        assert!(rec.is_locked_by(&owner));
        assert!(!rec.is_locked_by(&MachineId::from("b")));

        rec.unlock();
        assert_eq!(rec.state, RecordState::Pending);
        assert!(rec.locked_by.is_none());
        assert!(rec.locked_at.is_none());
        assert_eq!(rec.attempts, 2);
    }

    #[test]
    fn finalize_sent_sets_sent_at_and_clears_lock() {
        let owner = MachineId::from("a");
        let mut rec = record();
        rec.lock(&owner, t0());

        let at = t0() + Duration::seconds(1);
        rec.finalize(Finalization::Sent {
            at,
            attempts_made: 1,
        });

        assert_eq!(rec.state, RecordState::Sent);
        assert_eq!(rec.sent_at, Some(at));
        assert_eq!(rec.attempts, 1);
        assert_eq!(rec.last_attempt_at, Some(at));
        assert!(rec.locked_by.is_none());
        assert!(rec.locked_at.is_none());
    }

    #[test]
    fn finalize_released_accumulates_attempts() {
        let owner = MachineId::from("a");
        let mut rec = record();
        rec.attempts = 1;
        rec.lock(&owner, t0());

        rec.finalize(Finalization::Released {
            at: t0(),
            attempts_made: 3,
            error: "broker unavailable".into(),
        });

        assert_eq!(rec.state, RecordState::Pending);
        assert_eq!(rec.attempts, 4);
        assert_eq!(rec.last_error.as_deref(), Some("broker unavailable"));
        assert!(rec.sent_at.is_none());
    }

    #[test]
    fn finalize_failed_without_attempts_keeps_last_attempt() {
        let owner = MachineId::from("a");
        let mut rec = record();
        rec.attempts = 5;
        rec.lock(&owner, t0());

        rec.finalize(Finalization::Failed {
            at: t0(),
            attempts_made: 0,
            error: "budget spent".into(),
        });

        assert_eq!(rec.state, RecordState::Failed);
        assert_eq!(rec.attempts, 5);
        assert!(rec.last_attempt_at.is_none());
    }

    #[test]
    fn only_old_sent_records_are_expired() {
        let mut rec = record();
        rec.state = RecordState::Sent;
        rec.sent_at = Some(t0());

        assert!(rec.is_expired_sent(t0() + Duration::seconds(1)));
        assert!(!rec.is_expired_sent(t0()));

        rec.state = RecordState::Failed;
        assert!(!rec.is_expired_sent(t0() + Duration::days(365)));
    }
}
