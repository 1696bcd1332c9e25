use std::num::ParseIntError;
use std::sync::Arc;

use tracing::debug;

use crate::store::NewsStore;

#[derive(Debug, thiserror::Error)]
pub enum ToggleError {
    #[error("invalid subscription id {raw:?}")]
    InvalidId {
        raw: String,
        #[source]
        source: ParseIntError,
    },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub struct SubscriptionToggler {
    store: Arc<dyn NewsStore>,
}

impl SubscriptionToggler {
    pub fn new(store: Arc<dyn NewsStore>) -> Self {
        Self { store }
    }

    /// Makes `activate` the user's only active subscription. Every
    /// subscription is saved, changed or not. Does nothing without an id.
    pub async fn toggle(&self, subscribe_id: &str, activate: Option<&str>) -> Result<(), ToggleError> {
        let Some(raw) = activate else {
            return Ok(());
        };
        let target: i64 = raw.trim().parse().map_err(|source| ToggleError::InvalidId {
            raw: raw.to_string(),
            source,
        })?;

        let feeds = self.store.list_subscriptions(subscribe_id).await?;
        for mut config in feeds {
            config.active = config.id == target;
            self.store.save_subscription(&config).await?;
            if config.active {
                debug!("Set active and saved {}", config.id);
            } else {
                debug!("Cleared active and saved {}", config.id);
            }
        }
        Ok(())
    }
}
