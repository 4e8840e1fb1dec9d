use crate::cloud::poller::CloudPoller;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::info;

/// Process-global mutable runtime configuration. Whenever `restaurant_id`
/// is non-empty, at most one cloud poller is active with exactly these
/// values; whenever it is empty, no cloud poller runs.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub restaurant_id: String,
    pub device_name: String,
    pub cloud_project_id: String,
    pub device_id: String,
}

/// Owns the runtime configuration and the handle to the currently running
/// cloud poller. The supervisor is the only writer of `RuntimeConfig`;
/// pollers receive an immutable snapshot at construction time.
pub struct Supervisor {
    config: Arc<RwLock<RuntimeConfig>>,
    poller: Arc<RwLock<Option<CloudPoller>>>,
}

impl Supervisor {
    pub fn new(initial: RuntimeConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(initial)),
            poller: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn snapshot(&self) -> RuntimeConfig {
        self.config.read().await.clone()
    }

    /// Apply a config mutation, then restart the cloud poller to match.
    pub async fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut RuntimeConfig),
    {
        {
            let mut config = self.config.write().await;
            mutate(&mut config);
        }
        self.restart_cloud().await;
    }

    /// Stop the current poller if any, then start a fresh one if
    /// `restaurant_id` is non-empty, with a freshly minted `device_id`.
    pub async fn restart_cloud(&self) {
        let mut poller_slot = self.poller.write().await;
        if let Some(old) = poller_slot.take() {
            old.stop().await;
        }

        let mut config = self.config.write().await;
        if config.restaurant_id.is_empty() {
            info!("restaurantId empty, cloud poller stays stopped");
            return;
        }

        config.device_id = mint_device_id();
        let snapshot = config.clone();
        drop(config);

        info!(
            restaurant_id = %snapshot.restaurant_id,
            device_id = %snapshot.device_id,
            "starting cloud poller"
        );
        *poller_slot = Some(CloudPoller::start(snapshot));
    }
}

fn mint_device_id() -> String {
    let hostname = hostname();
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("{}-{}", hostname, millis)
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "printer-bridge-host".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starting_empty_restaurant_id_keeps_poller_stopped() {
        let supervisor = Supervisor::new(RuntimeConfig::default());
        supervisor.restart_cloud().await;
        assert!(supervisor.poller.read().await.is_none());
    }

    #[tokio::test]
    async fn setting_restaurant_id_starts_poller_then_clearing_stops_it() {
        let supervisor = Supervisor::new(RuntimeConfig::default());

        supervisor
            .update(|c| c.restaurant_id = "rest_1".to_string())
            .await;
        assert!(supervisor.poller.read().await.is_some());

        supervisor
            .update(|c| c.restaurant_id = String::new())
            .await;
        assert!(supervisor.poller.read().await.is_none());
    }
}
