use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::adapter::{AdapterRegistry, FeedDocument};
use crate::context::RequestContext;
use crate::store::{FeedConfiguration, NewsStore};

/// Name of the view rendered for the news page.
pub const VIEW_NEWS: &str = "viewNews";

#[derive(Debug, Clone, Default, Serialize)]
pub struct NewsModel {
    pub feeds: Vec<FeedConfiguration>,
    pub feed: Option<FeedDocument>,
    #[serde(rename = "feedId")]
    pub feed_id: Option<i64>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelAndView {
    pub view: &'static str,
    pub model: NewsModel,
}

pub fn unavailable_message(feed_name: &str) -> String {
    format!("The news \"{}\" is currently unavailable.", feed_name)
}

pub struct FeedAggregator {
    store: Arc<dyn NewsStore>,
    registry: AdapterRegistry,
}

impl FeedAggregator {
    pub fn new(store: Arc<dyn NewsStore>, registry: AdapterRegistry) -> Self {
        Self { store, registry }
    }

    /// Builds the news view for the current user.
    ///
    /// Only the first active subscription is fetched. Adapter failures end up
    /// in `errors`; a subscription whose adapter is not registered is skipped.
    pub async fn render(&self, ctx: &RequestContext) -> anyhow::Result<ModelAndView> {
        let feeds = self.store.list_subscriptions(&ctx.subscribe_id).await?;
        let mut model = NewsModel::default();

        let mut active = feeds.iter().filter(|c| c.active);
        if let Some(config) = active.next() {
            self.fetch_into(config, ctx, &mut model).await;
        }
        for extra in active {
            warn!(
                "Subscription {} of {} is also marked active, ignoring it",
                extra.id, ctx.subscribe_id
            );
        }

        model.feeds = feeds;
        debug!("forwarding to {}", VIEW_NEWS);
        Ok(ModelAndView {
            view: VIEW_NEWS,
            model,
        })
    }

    async fn fetch_into(&self, config: &FeedConfiguration, ctx: &RequestContext, model: &mut NewsModel) {
        debug!("Active feed is {}", config.id);

        let Some(adapter) = self.registry.resolve(&config.definition.class_name) else {
            error!(
                "News adapter '{}' could not be found for feed '{}'",
                config.definition.class_name, config.definition.name
            );
            return;
        };

        match adapter.fetch(config, ctx).await {
            Ok(feed) => {
                debug!("Got feed '{}' from adapter", feed.title);
                model.feed = Some(feed);
                model.feed_id = Some(config.id);
            }
            Err(e) => {
                warn!("Failed to fetch feed '{}': {}", config.definition.name, e);
                model
                    .errors
                    .push(unavailable_message(&config.definition.name));
            }
        }
    }
}
