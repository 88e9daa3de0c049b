//! Periodic loop driver shared by processor / unlocker / cleaner.
//!
//! # フロー
//! 1. 起動直後に 1 回実行
//! 2. 失敗したら error channel へ送って継続
//! 3. 次の tick か shutdown を待つ（shutdown が優先）
//!
//! 実行中の 1 サイクルは中断しない。shutdown は待機中にのみ観測される。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use crate::domain::OutboxError;

/// One unit of periodic work.
#[async_trait]
pub trait PeriodicWork: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run_once(&self) -> Result<(), OutboxError>;
}

/// Run `work` every `period` until shutdown is requested.
///
/// Shutdown is `true` on the watch channel, or the sender being dropped.
/// A closed error channel is ignored; the loop keeps going.
pub async fn run_periodic(
    work: Arc<dyn PeriodicWork>,
    period: Duration,
    errors: mpsc::UnboundedSender<OutboxError>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    debug!(work = work.name(), ?period, "periodic loop started");

    loop {
        if let Err(err) = work.run_once().await {
            warn!(work = work.name(), error = %err, "periodic run failed");
            let _ = errors.send(err);
        }

        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            _ = ticker.tick() => {}
        }
    }

    debug!(work = work.name(), "periodic loop stopped");
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
