//! MessageBroker port - 配送先（Kafka など）
//!
//! adapter は失敗を分類して返す:
//! - 一時的な転送エラー → `retry::retryable`
//! - 恒久的な拒否（不正な payload など） → `retry::unrecoverable`
//!
//! 分類されていないエラー（`Classified::Plain`）は同じサイクル内では再送しない。

use async_trait::async_trait;

use crate::domain::{BrokerError, Message};
use crate::retry::Classified;

pub type SendResult = Result<(), Classified<BrokerError>>;

#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn send(&self, message: &Message) -> SendResult;
}
