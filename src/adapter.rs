use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::parser;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::context::RequestContext;
use crate::store::FeedConfiguration;

/// Registry name of [`RssAdapter`].
pub const RSS_ADAPTER: &str = "rss";

/// Normalized content of a fetched feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedDocument {
    pub title: String,
    pub link: Option<String>,
    pub description: Option<String>,
    pub entries: Vec<FeedEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedEntry {
    pub title: String,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum NewsError {
    #[error("feed request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("feed could not be parsed: {0}")]
    Parse(#[from] parser::ParseFeedError),
    #[error("feed configuration has no `{0}` parameter")]
    MissingParameter(&'static str),
    #[error("feed unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait NewsAdapter: Send + Sync {
    async fn fetch(
        &self,
        config: &FeedConfiguration,
        ctx: &RequestContext,
    ) -> Result<FeedDocument, NewsError>;
}

/// Adapters by name, populated once at startup.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn NewsAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every adapter this crate ships.
    pub fn with_defaults() -> anyhow::Result<Self> {
        let mut registry = Self::new();
        registry.register(RSS_ADAPTER, Arc::new(RssAdapter::new()?));
        Ok(registry)
    }

    pub fn register(&mut self, name: &str, adapter: Arc<dyn NewsAdapter>) {
        self.adapters.insert(name.to_string(), adapter);
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn NewsAdapter>> {
        self.adapters.get(name).cloned()
    }
}

/// Fetches RSS, Atom and JSON feeds from the configuration's `url` parameter.
pub struct RssAdapter {
    client: Client,
}

impl RssAdapter {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("NewsPortal/1.0 (Feed Reader)")
            .build()?;

        Ok(Self { client })
    }

    /// Maps a parsed feed onto the portal's document shape.
    pub fn to_document(feed: feed_rs::model::Feed) -> FeedDocument {
        let entries = feed
            .entries
            .into_iter()
            .map(|entry| FeedEntry {
                title: entry
                    .title
                    .map(|t| t.content)
                    .unwrap_or_else(|| "Untitled".to_string()),
                link: entry.links.into_iter().next().map(|l| l.href),
                summary: entry.summary.map(|s| s.content),
                published: entry.published.or(entry.updated),
            })
            .collect();

        FeedDocument {
            title: feed
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled".to_string()),
            link: feed.links.into_iter().next().map(|l| l.href),
            description: feed.description.map(|d| d.content),
            entries,
        }
    }
}

#[async_trait]
impl NewsAdapter for RssAdapter {
    async fn fetch(
        &self,
        config: &FeedConfiguration,
        _ctx: &RequestContext,
    ) -> Result<FeedDocument, NewsError> {
        let url = config
            .parameter("url")
            .ok_or(NewsError::MissingParameter("url"))?;
        debug!("Fetching feed '{}' from {}", config.definition.name, url);

        let response = self.client.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        let parsed = parser::parse(&bytes[..])?;

        Ok(Self::to_document(parsed))
    }
}
