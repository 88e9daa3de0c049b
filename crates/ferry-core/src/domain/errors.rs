//! Errors - エラー型
//!
//! - BrokerError: broker adapter が返す失敗（retryable / unrecoverable の分類は
//!   `retry::Classified` で包んで表現する）
//! - StoreError: Store の失敗
//! - OutboxError: 各ループが error channel に流すエラー
//! - SettingsError: 起動時検証の失敗

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

use super::{MachineId, RecordId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("message rejected by broker: {0}")]
    Rejected(String),

    #[error("broker error: {0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("record {0} not found")]
    NotFound(RecordId),

    /// The lock was reclaimed by someone else; the record was not modified.
    #[error("record {id} is no longer locked by {owner}")]
    LockLost { id: RecordId, owner: MachineId },

    #[error("store backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Terminal: the record was marked `failed`.
    #[error("record {id} marked failed after {attempts} attempt(s): {source}")]
    DeliveryFailed {
        id: RecordId,
        attempts: u32,
        source: BrokerError,
    },

    /// The record went back to `pending` and will be retried.
    #[error("record {id} not delivered after {attempts} attempt(s), released for retry: {source}")]
    DeliveryDeferred {
        id: RecordId,
        attempts: u32,
        source: BrokerError,
    },

    /// Claimed with no attempt budget left; marked `failed` without sending.
    #[error("record {id} already used {attempts} attempt(s), marked failed")]
    AttemptsExhausted { id: RecordId, attempts: u32 },

    /// `now - age` is outside the representable date range.
    #[error("{what} cutoff of {age} before {now} is out of range")]
    CutoffOutOfRange {
        what: &'static str,
        now: DateTime<Utc>,
        age: TimeDelta,
    },

    /// Aggregate of everything that went wrong in one processing cycle.
    #[error("processing cycle finished with {} error(s)", .0.len())]
    Cycle(Vec<OutboxError>),
}

impl OutboxError {
    /// Flatten `Cycle` into its parts.
    pub fn into_flat(self) -> Vec<OutboxError> {
        match self {
            OutboxError::Cycle(errors) => errors.into_iter().flat_map(Self::into_flat).collect(),
            other => vec![other],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error(
        "max_lock_time ({max_lock_time:?}) must be longer than \
         lock_checker_interval ({lock_checker_interval:?})"
    )]
    LockShorterThanChecker {
        max_lock_time: Duration,
        lock_checker_interval: Duration,
    },

    #[error("{field} is too large")]
    OutOfRange { field: &'static str },

    #[error("machine id must not be empty")]
    EmptyMachineId,
}
