//! Message: the payload handed to the broker unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A message waiting in the outbox.
///
/// The core never looks inside `body`; `key`, `topic` and `headers` are
/// delivery metadata interpreted only by the broker adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Partitioning / ordering key.
    pub key: String,

    pub topic: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    pub body: Vec<u8>,
}

impl Message {
    pub fn new(
        topic: impl Into<String>,
        key: impl Into<String>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            key: key.into(),
            topic: topic.into(),
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Build a message whose body is the JSON encoding of `value`.
    pub fn json<T: Serialize>(
        topic: impl Into<String>,
        key: impl Into<String>,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(topic, key, body).with_header("content-type", "application/json"))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}
