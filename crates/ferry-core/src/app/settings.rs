//! DispatcherSettings - 3 つのループの設定
//!
//! ファイル形式ではすべての時間をミリ秒で書く（`process_interval_ms` など）。
//! `Default` は CLI や開発用の便宜値で、コアが強制する値ではない。

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{OutboxError, SettingsError};
use crate::retry::RetryPolicy;
use crate::serde_util::duration_ms;

/// Record-level retry settings.
///
/// `send_retry` governs the in-cycle retries of a single send;
/// `max_send_attempts` bounds the total across cycles and instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrialPolicy {
    pub max_send_attempts_enabled: bool,
    pub max_send_attempts: u32,
    pub send_retry: RetryPolicy,
}

impl Default for RetrialPolicy {
    fn default() -> Self {
        Self {
            max_send_attempts_enabled: true,
            max_send_attempts: 10,
            send_retry: RetryPolicy::default(),
        }
    }
}

impl RetrialPolicy {
    /// Attempts left for a record that already made `attempts`.
    /// `None` when the budget is disabled.
    pub fn remaining_attempts(&self, attempts: u32) -> Option<u32> {
        self.max_send_attempts_enabled
            .then(|| self.max_send_attempts.saturating_sub(attempts))
    }

    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.remaining_attempts(attempts) == Some(0)
    }

    /// In-cycle retry policy for a record that already made `attempts`,
    /// capped by what is left of its budget.
    pub fn send_policy_for(&self, attempts: u32) -> RetryPolicy {
        match self.remaining_attempts(attempts) {
            Some(remaining) => {
                let cap = self.send_retry.max_attempts.max(1).min(remaining);
                self.send_retry.clone().with_max_attempts(cap)
            }
            None => self.send_retry.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    /// Cadence of the record processor.
    #[serde(rename = "process_interval_ms", with = "duration_ms")]
    pub process_interval: Duration,

    /// Cadence of the record unlocker.
    #[serde(rename = "lock_checker_interval_ms", with = "duration_ms")]
    pub lock_checker_interval: Duration,

    /// Age beyond which a lock is considered abandoned.
    #[serde(rename = "max_lock_time_ms", with = "duration_ms")]
    pub max_lock_time: Duration,

    /// Cadence of the record cleaner.
    #[serde(rename = "cleanup_worker_interval_ms", with = "duration_ms")]
    pub cleanup_worker_interval: Duration,

    /// Age beyond which `sent` records are deleted.
    #[serde(rename = "messages_retention_ms", with = "duration_ms")]
    pub messages_retention: Duration,

    /// Max records claimed per processing cycle.
    pub batch_size: usize,

    pub retrial_policy: RetrialPolicy,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            process_interval: Duration::from_secs(1),
            lock_checker_interval: Duration::from_secs(10),
            max_lock_time: Duration::from_secs(60),
            cleanup_worker_interval: Duration::from_secs(60 * 60),
            messages_retention: Duration::from_secs(7 * 24 * 60 * 60),
            batch_size: 100,
            retrial_policy: RetrialPolicy::default(),
        }
    }
}

impl DispatcherSettings {
    /// 起動時検証（Fail-fast）
    pub fn validate(&self) -> Result<(), SettingsError> {
        let intervals = [
            ("process_interval", self.process_interval),
            ("lock_checker_interval", self.lock_checker_interval),
            ("max_lock_time", self.max_lock_time),
            ("cleanup_worker_interval", self.cleanup_worker_interval),
            ("messages_retention", self.messages_retention),
        ];
        for (field, value) in intervals {
            if value.is_zero() {
                return Err(SettingsError::Zero { field });
            }
        }
        if self.batch_size == 0 {
            return Err(SettingsError::Zero {
                field: "batch_size",
            });
        }
        if self.retrial_policy.max_send_attempts_enabled
            && self.retrial_policy.max_send_attempts == 0
        {
            return Err(SettingsError::Zero {
                field: "retrial_policy.max_send_attempts",
            });
        }
        // a lock must outlive at least one checker period
        if self.max_lock_time <= self.lock_checker_interval {
            return Err(SettingsError::LockShorterThanChecker {
                max_lock_time: self.max_lock_time,
                lock_checker_interval: self.lock_checker_interval,
            });
        }
        // cutoffs are computed as `now - age` on every cycle
        let now = Utc::now();
        let ages = [
            ("max_lock_time", self.max_lock_time_delta()?),
            ("messages_retention", self.messages_retention_delta()?),
        ];
        for (field, age) in ages {
            if now.checked_sub_signed(age).is_none() {
                return Err(SettingsError::OutOfRange { field });
            }
        }
        Ok(())
    }

    pub fn max_lock_time_delta(&self) -> Result<TimeDelta, SettingsError> {
        to_time_delta(self.max_lock_time, "max_lock_time")
    }

    pub fn messages_retention_delta(&self) -> Result<TimeDelta, SettingsError> {
        to_time_delta(self.messages_retention, "messages_retention")
    }
}

fn to_time_delta(value: Duration, field: &'static str) -> Result<TimeDelta, SettingsError> {
    TimeDelta::from_std(value).map_err(|_| SettingsError::OutOfRange { field })
}

/// `now - age`, or an error when that falls outside the calendar.
pub(crate) fn cutoff(
    now: DateTime<Utc>,
    age: TimeDelta,
    what: &'static str,
) -> Result<DateTime<Utc>, OutboxError> {
    now.checked_sub_signed(age)
        .ok_or(OutboxError::CutoffOutOfRange { what, now, age })
}
