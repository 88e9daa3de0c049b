//! Domain model (ids, messages, records, errors).

pub mod errors;
pub mod ids;
pub mod message;
pub mod record;
pub mod state;

pub use self::errors::{BrokerError, OutboxError, SettingsError, StoreError};
pub use self::ids::{MachineId, RecordId};
pub use self::message::Message;
pub use self::record::{Finalization, OutboxRecord};
pub use self::state::RecordState;
