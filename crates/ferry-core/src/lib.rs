//! ferry-core
//!
//! Transactional outbox の配送エンジン。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（RecordId, Message, OutboxRecord, RecordState, errors）
//! - **retry**: エラー分類つきの有界リトライ（Classified, RetryPolicy）
//! - **ports**: 抽象化レイヤー（OutboxStore, MessageBroker, Clock, IdGenerator）
//! - **app**: 3 つのバックグラウンドループと Dispatcher（processor, unlocker, cleaner）
//! - **impls**: 実装（InMemoryStore, RecordingBroker, LogBroker）
//! - **observability**: ストアの状態別カウント

pub mod app;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod retry;

mod serde_util;

pub use app::{Dispatcher, DispatcherBuilder, DispatcherHandle, DispatcherSettings, RetrialPolicy};
pub use domain::{Message, OutboxError, OutboxRecord, RecordId, RecordState};
