//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。
//! Store と Broker の具体的な実装はこのクレートの外側（`impls` は開発・テスト用）。

pub mod broker;
pub mod clock;
pub mod id_generator;
pub mod store;

pub use self::broker::{MessageBroker, SendResult};
pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::store::OutboxStore;
