/*!
External findings channel backed by Redis pub/sub
*/

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{ChannelStrategy, Finding, FindingListener};
use crate::error::BroadcastError;

/// One publisher connection plus one subscriber connection whose messages
/// are decoded and handed to every registered listener
pub struct RedisChannel {
    channel: String,
    publisher: redis::aio::MultiplexedConnection,
    listeners: Arc<RwLock<Vec<FindingListener>>>,
    pump: JoinHandle<()>,
}

impl RedisChannel {
    /// Open both connections and subscribe to `channel`, giving up after
    /// `connect_timeout`
    pub async fn connect(url: &str, channel: &str, connect_timeout: Duration) -> Result<Self, BroadcastError> {
        let client = redis::Client::open(url)?;

        let (publisher, pubsub) = tokio::time::timeout(connect_timeout, async {
            let publisher = client.get_multiplexed_async_connection().await?;
            let mut pubsub = client.get_async_pubsub().await?;
            pubsub.subscribe(channel).await?;
            Ok::<_, redis::RedisError>((publisher, pubsub))
        })
        .await
        .map_err(|_| BroadcastError::Timeout(connect_timeout))??;

        let listeners: Arc<RwLock<Vec<FindingListener>>> = Arc::default();
        let pump = tokio::spawn(pump_messages(pubsub.into_on_message(), listeners.clone()));

        Ok(Self {
            channel: channel.to_string(),
            publisher,
            listeners,
            pump,
        })
    }
}

impl Drop for RedisChannel {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[async_trait]
impl ChannelStrategy for RedisChannel {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn publish(&self, finding: &Finding) -> Result<(), BroadcastError> {
        let payload = serde_json::to_string(finding)?;
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn.publish(self.channel.as_str(), payload).await?;
        debug!("Published finding on {} to {} receivers", self.channel, receivers);
        Ok(())
    }

    async fn subscribe(&self, listener: FindingListener) -> Result<(), BroadcastError> {
        self.listeners.write().await.push(listener);
        Ok(())
    }
}

/// Parse a wire payload back into a finding
pub fn decode_payload(payload: &str) -> Option<Finding> {
    match serde_json::from_str(payload) {
        Ok(finding) => Some(finding),
        Err(e) => {
            warn!("Dropping undecodable finding: {}", e);
            None
        }
    }
}

async fn pump_messages<S>(messages: S, listeners: Arc<RwLock<Vec<FindingListener>>>)
where
    S: Stream<Item = redis::Msg> + Send + 'static,
{
    tokio::pin!(messages);

    while let Some(msg) = messages.next().await {
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Dropping non-text message on {}: {}", msg.get_channel_name(), e);
                continue;
            }
        };

        let Some(finding) = decode_payload(&payload) else {
            continue;
        };

        let snapshot = listeners.read().await.clone();
        for listener in snapshot {
            listener(&finding);
        }
    }

    warn!("⚠️ Findings subscription stream ended");
}
