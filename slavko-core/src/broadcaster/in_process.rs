/*!
Fallback delivery to listeners registered in this process
*/

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{ChannelStrategy, Finding, FindingListener};
use crate::error::BroadcastError;

#[derive(Default)]
pub struct InProcessChannel {
    listeners: RwLock<Vec<FindingListener>>,
}

impl InProcessChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn listener_count(&self) -> usize {
        self.listeners.read().await.len()
    }
}

#[async_trait]
impl ChannelStrategy for InProcessChannel {
    fn name(&self) -> &'static str {
        "in-process"
    }

    /// Listeners run in registration order with the finding itself, not a
    /// re-serialized copy
    async fn publish(&self, finding: &Finding) -> Result<(), BroadcastError> {
        // Snapshot so a listener may subscribe without deadlocking
        let listeners = self.listeners.read().await.clone();
        debug!("Delivering finding to {} in-process listeners", listeners.len());
        for listener in listeners {
            listener(finding);
        }
        Ok(())
    }

    async fn subscribe(&self, listener: FindingListener) -> Result<(), BroadcastError> {
        self.listeners.write().await.push(listener);
        Ok(())
    }
}
