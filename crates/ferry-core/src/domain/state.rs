//! Record state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outbox record state.
///
/// State transitions:
/// - Pending -> Locked -> Sent
/// - Pending -> Locked -> Pending (released for retry, or lock expired)
/// - Pending -> Locked -> Failed (unrecoverable, or send attempts exhausted)
///
/// `Sent` and `Failed` are terminal. Only the cleaner touches `Sent` afterwards
/// (deletion); `Failed` stays for operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    /// Waiting to be claimed.
    Pending,

    /// Claimed by a dispatcher instance (`locked_by` / `locked_at` set).
    Locked,

    /// Delivered to the broker.
    Sent,

    /// Permanently failed.
    Failed,
}

impl RecordState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RecordState::Sent | RecordState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordState::Pending => "pending",
            RecordState::Locked => "locked",
            RecordState::Sent => "sent",
            RecordState::Failed => "failed",
        }
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
