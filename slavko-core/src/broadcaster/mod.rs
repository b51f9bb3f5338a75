/*!
Findings fan-out over an external pub/sub channel, degrading to in-process
delivery when no channel is configured or reachable
*/

pub mod in_process;
pub mod redis_channel;
pub mod sse;

use std::sync::Arc;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::BroadcasterConfig;
use crate::error::BroadcastError;

pub use in_process::InProcessChannel;
pub use redis_channel::RedisChannel;

/// Opaque observability payload; only required to survive JSON round trips
pub type Finding = serde_json::Value;

/// Callback invoked once per delivered finding
pub type FindingListener = Arc<dyn Fn(&Finding) + Send + Sync>;

/// Delivery strategy chosen once when the broadcaster is built
#[async_trait]
pub trait ChannelStrategy: Send + Sync {
    /// Name of the strategy
    fn name(&self) -> &'static str;

    /// Deliver a finding to every current subscriber
    async fn publish(&self, finding: &Finding) -> Result<(), BroadcastError>;

    /// Register a listener for all subsequent findings
    async fn subscribe(&self, listener: FindingListener) -> Result<(), BroadcastError>;
}

/// Process-wide findings broadcaster, built at startup and passed to consumers
#[derive(Clone)]
pub struct FindingsBroadcaster {
    strategy: Arc<dyn ChannelStrategy>,
}

impl FindingsBroadcaster {
    pub fn new(strategy: Arc<dyn ChannelStrategy>) -> Self {
        Self { strategy }
    }

    pub fn in_process() -> Self {
        Self::new(Arc::new(InProcessChannel::new()))
    }

    /// Pick the external channel when a URL resolves and the connection
    /// succeeds; otherwise fall back to in-process delivery for the life of
    /// this broadcaster. Connection failures are logged, never returned.
    pub async fn connect(config: &BroadcasterConfig) -> Self {
        Self::connect_to(config.resolve_url(), config).await
    }

    pub async fn connect_to(url: Option<String>, config: &BroadcasterConfig) -> Self {
        let Some(url) = url else {
            info!("📡 No findings channel configured, using in-process delivery");
            return Self::in_process();
        };

        match RedisChannel::connect(&url, &config.channel, config.connect_timeout()).await {
            Ok(channel) => {
                info!("📡 Findings channel connected: {}", config.channel);
                Self::new(Arc::new(channel))
            }
            Err(e) => {
                warn!("⚠️ Findings channel unavailable ({}), falling back to in-process delivery", e);
                Self::in_process()
            }
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub async fn publish(&self, finding: &Finding) -> Result<(), BroadcastError> {
        self.strategy.publish(finding).await
    }

    pub async fn subscribe<F>(&self, callback: F) -> Result<(), BroadcastError>
    where
        F: Fn(&Finding) + Send + Sync + 'static,
    {
        self.strategy.subscribe(Arc::new(callback)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;

    #[tokio::test]
    async fn no_url_selects_in_process() {
        let broadcaster = FindingsBroadcaster::connect_to(None, &BroadcasterConfig::default()).await;
        assert_eq!(broadcaster.strategy_name(), "in-process");
    }

    #[tokio::test]
    async fn unreachable_channel_falls_back() {
        let config = BroadcasterConfig {
            connect_timeout_ms: 500,
            ..BroadcasterConfig::default()
        };
        let broadcaster =
            FindingsBroadcaster::connect_to(Some("redis://127.0.0.1:1/".to_string()), &config).await;
        assert_eq!(broadcaster.strategy_name(), "in-process");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        broadcaster
            .subscribe(move |f| sink.lock().unwrap().push(f.clone()))
            .await
            .unwrap();
        broadcaster.publish(&json!({"id": 1})).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![json!({"id": 1})]);
    }

    #[tokio::test]
    async fn invalid_url_falls_back() {
        let config = BroadcasterConfig {
            connect_timeout_ms: 200,
            ..BroadcasterConfig::default()
        };
        let broadcaster = FindingsBroadcaster::connect_to(Some("not a url".to_string()), &config).await;
        assert_eq!(broadcaster.strategy_name(), "in-process");
    }

    #[tokio::test]
    async fn clones_share_listeners() {
        let broadcaster = FindingsBroadcaster::in_process();
        let handle = broadcaster.clone();

        let seen = Arc::new(Mutex::new(0));
        let sink = seen.clone();
        handle.subscribe(move |_| *sink.lock().unwrap() += 1).await.unwrap();
        broadcaster.publish(&json!("x")).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), 1);
    }
}
