use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

/// A feed source that users can be subscribed to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewsDefinition {
    pub id: i64,
    pub name: String,
    /// Registry name of the adapter that fetches this feed
    pub class_name: String,
    pub parameters: HashMap<String, String>,
}

/// One user's subscription to a [`NewsDefinition`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedConfiguration {
    pub id: i64,
    pub subscribe_id: String,
    pub definition: NewsDefinition,
    pub active: bool,
    pub parameters: HashMap<String, String>,
}

impl FeedConfiguration {
    /// Looks up an adapter parameter, preferring the subscription's own value
    /// over the definition's.
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .get(key)
            .or_else(|| self.definition.parameters.get(key))
            .map(String::as_str)
    }
}

#[async_trait]
pub trait NewsStore: Send + Sync {
    /// Every role name that grants a subscription to some definition.
    async fn list_configured_role_names(&self) -> anyhow::Result<Vec<String>>;

    /// Subscribes the user to every definition granted by `roles` that they
    /// are not subscribed to yet. Safe to call repeatedly.
    async fn materialize_role_subscriptions(
        &self,
        subscribe_id: &str,
        roles: &HashSet<String>,
    ) -> anyhow::Result<()>;

    /// The user's subscriptions, ordered by id.
    async fn list_subscriptions(&self, subscribe_id: &str)
        -> anyhow::Result<Vec<FeedConfiguration>>;

    async fn save_subscription(&self, config: &FeedConfiguration) -> anyhow::Result<()>;
}

/// Non-persistent [`NewsStore`], mainly for tests and demos.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    definitions: Vec<(NewsDefinition, Vec<String>)>,
    configurations: Vec<FeedConfiguration>,
    next_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_definition(
        &self,
        name: &str,
        class_name: &str,
        parameters: HashMap<String, String>,
        roles: &[&str],
    ) -> NewsDefinition {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let definition = NewsDefinition {
            id: inner.next_id,
            name: name.to_string(),
            class_name: class_name.to_string(),
            parameters,
        };
        let roles = roles.iter().map(|r| r.to_string()).collect();
        inner.definitions.push((definition.clone(), roles));
        definition
    }

    /// Inserts a subscription directly, bypassing role grants.
    pub async fn subscribe(
        &self,
        subscribe_id: &str,
        definition: &NewsDefinition,
        active: bool,
    ) -> FeedConfiguration {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let config = FeedConfiguration {
            id: inner.next_id,
            subscribe_id: subscribe_id.to_string(),
            definition: definition.clone(),
            active,
            parameters: HashMap::new(),
        };
        inner.configurations.push(config.clone());
        config
    }
}

#[async_trait]
impl NewsStore for MemoryStore {
    async fn list_configured_role_names(&self) -> anyhow::Result<Vec<String>> {
        let inner = self.inner.read().await;
        let mut roles: Vec<String> = inner
            .definitions
            .iter()
            .flat_map(|(_, roles)| roles.iter().cloned())
            .collect();
        roles.sort();
        roles.dedup();
        Ok(roles)
    }

    async fn materialize_role_subscriptions(
        &self,
        subscribe_id: &str,
        roles: &HashSet<String>,
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        let had_any = inner
            .configurations
            .iter()
            .any(|c| c.subscribe_id == subscribe_id);

        let granted: Vec<NewsDefinition> = inner
            .definitions
            .iter()
            .filter(|(_, grants)| grants.iter().any(|r| roles.contains(r)))
            .map(|(d, _)| d.clone())
            .collect();

        let mut first = !had_any;
        for definition in granted {
            let exists = inner
                .configurations
                .iter()
                .any(|c| c.subscribe_id == subscribe_id && c.definition.id == definition.id);
            if exists {
                continue;
            }
            inner.next_id += 1;
            let config = FeedConfiguration {
                id: inner.next_id,
                subscribe_id: subscribe_id.to_string(),
                definition,
                active: first,
                parameters: HashMap::new(),
            };
            first = false;
            inner.configurations.push(config);
        }
        Ok(())
    }

    async fn list_subscriptions(
        &self,
        subscribe_id: &str,
    ) -> anyhow::Result<Vec<FeedConfiguration>> {
        let inner = self.inner.read().await;
        let mut configs: Vec<FeedConfiguration> = inner
            .configurations
            .iter()
            .filter(|c| c.subscribe_id == subscribe_id)
            .cloned()
            .collect();
        configs.sort_by_key(|c| c.id);
        Ok(configs)
    }

    async fn save_subscription(&self, config: &FeedConfiguration) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        match inner.configurations.iter_mut().find(|c| c.id == config.id) {
            Some(existing) => *existing = config.clone(),
            None => anyhow::bail!("no subscription with id {}", config.id),
        }
        Ok(())
    }
}
