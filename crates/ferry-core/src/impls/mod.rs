//! Impls - 実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryStore**: OutboxStore の参照実装（claim の不可分性を含め全契約を満たす）
//! - **RecordingBroker**: 送信したメッセージを記録する broker
//! - **LogBroker**: tracing にログを出すだけの broker
//!
//! # 本番用実装
//! RDB の Store や Kafka の Broker は別クレートに配置する。

pub mod log_broker;
pub mod memory_store;
pub mod recording_broker;

pub use self::log_broker::LogBroker;
pub use self::memory_store::InMemoryStore;
pub use self::recording_broker::RecordingBroker;
