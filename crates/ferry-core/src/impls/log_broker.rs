//! LogBroker - 配送せずにログだけ出す broker

use async_trait::async_trait;
use tracing::info;

use crate::domain::Message;
use crate::ports::{MessageBroker, SendResult};

#[derive(Debug, Clone, Copy, Default)]
pub struct LogBroker;

#[async_trait]
impl MessageBroker for LogBroker {
    async fn send(&self, message: &Message) -> SendResult {
        info!(
            topic = %message.topic,
            key = %message.key,
            bytes = message.body.len(),
            "message published"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_succeeds() {
        let message = Message::new("orders", "k", b"{}".to_vec());
        assert!(LogBroker.send(&message).await.is_ok());
    }
}
