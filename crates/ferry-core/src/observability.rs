use serde::{Deserialize, Serialize};

/// Number of outbox records per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub pending: usize,
    pub locked: usize,
    pub sent: usize,
    pub failed: usize,
}

impl StoreCounts {
    pub fn total(&self) -> usize {
        self.pending + self.locked + self.sent + self.failed
    }
}
