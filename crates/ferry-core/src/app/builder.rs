//! DispatcherBuilder - Dispatcher の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;

use crate::domain::{MachineId, SettingsError};
use crate::ports::{Clock, MessageBroker, OutboxStore, SystemClock};

use super::dispatcher::Dispatcher;
use super::settings::DispatcherSettings;

/// DispatcherBuilder は Dispatcher を構築
///
/// # 使用例
/// ```ignore
/// let dispatcher = DispatcherBuilder::new(store, broker)
///     .settings(settings)
///     .machine_id("orders-1")
///     .build()?;
/// let handle = dispatcher.run(errors_tx, shutdown_rx);
/// ```
///
/// # Fail-fast 設計
/// - build() 時に設定値と machine id を検証
/// - 不正なら SettingsError を返す（ループは 1 つも起動しない）
pub struct DispatcherBuilder {
    store: Arc<dyn OutboxStore>,
    broker: Arc<dyn MessageBroker>,
    settings: DispatcherSettings,
    machine_id: Option<MachineId>,
    clock: Arc<dyn Clock>,
}

impl DispatcherBuilder {
    pub fn new(store: Arc<dyn OutboxStore>, broker: Arc<dyn MessageBroker>) -> Self {
        Self {
            store,
            broker,
            settings: DispatcherSettings::default(),
            machine_id: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn settings(mut self, settings: DispatcherSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Lock owner token. Every instance sharing a store needs its own;
    /// a fresh `ferry-<ulid>` is generated when unset.
    pub fn machine_id(mut self, machine_id: impl Into<MachineId>) -> Self {
        self.machine_id = Some(machine_id.into());
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<Dispatcher, SettingsError> {
        let machine_id = self.machine_id.unwrap_or_else(MachineId::generate);
        Dispatcher::from_parts(
            self.store,
            self.broker,
            self.settings,
            machine_id,
            self.clock,
        )
    }
}
