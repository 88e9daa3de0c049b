//! RecordingBroker - 送信したメッセージをメモリに記録する broker

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::Message;
use crate::ports::{MessageBroker, SendResult};

#[derive(Debug, Default)]
pub struct RecordingBroker {
    sent: Mutex<Vec<Message>>,
}

impl RecordingBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages in delivery order.
    pub async fn sent(&self) -> Vec<Message> {
        self.sent.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.sent.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sent.lock().await.is_empty()
    }
}

#[async_trait]
impl MessageBroker for RecordingBroker {
    async fn send(&self, message: &Message) -> SendResult {
        self.sent.lock().await.push(message.clone());
        Ok(())
    }
}
