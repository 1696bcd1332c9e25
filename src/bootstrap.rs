use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::context::RequestContext;
use crate::session::SessionState;
use crate::store::NewsStore;

/// Role that marks a user as a news administrator.
pub const ADMIN_ROLE: &str = "newsAdmin";

/// User attribute read by [`ItemsPreferenceInitializer`].
pub const ITEMS_ATTRIBUTE: &str = "news.items";

/// Extra setup run once for every new session.
#[async_trait]
pub trait SessionInitializer: Send + Sync {
    async fn initialize(&self, ctx: &RequestContext, state: &mut SessionState)
        -> anyhow::Result<()>;
}

/// Overrides the items preference from the user's `news.items` attribute.
pub struct ItemsPreferenceInitializer;

#[async_trait]
impl SessionInitializer for ItemsPreferenceInitializer {
    async fn initialize(
        &self,
        ctx: &RequestContext,
        state: &mut SessionState,
    ) -> anyhow::Result<()> {
        if let Some(raw) = ctx.attribute(ITEMS_ATTRIBUTE) {
            state.items = raw
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid {} attribute {:?}: {}", ITEMS_ATTRIBUTE, raw, e))?;
        }
        Ok(())
    }
}

/// Resolves initializer names from configuration, in order.
pub fn initializers_from_config(
    names: &[String],
) -> anyhow::Result<Vec<Arc<dyn SessionInitializer>>> {
    names
        .iter()
        .map(|name| match name.as_str() {
            "items-preference" => Ok(Arc::new(ItemsPreferenceInitializer) as Arc<dyn SessionInitializer>),
            other => anyhow::bail!("unknown session initializer '{}'", other),
        })
        .collect()
}

pub struct SessionBootstrapper {
    store: Arc<dyn NewsStore>,
    initializers: Vec<Arc<dyn SessionInitializer>>,
    default_items: u32,
}

impl SessionBootstrapper {
    pub fn new(
        store: Arc<dyn NewsStore>,
        initializers: Vec<Arc<dyn SessionInitializer>>,
        default_items: u32,
    ) -> Self {
        Self {
            store,
            initializers,
            default_items,
        }
    }

    /// Initializes a new session state for the requesting subscriber.
    /// No-op once the state is marked initialized.
    ///
    /// Initializers run in registration order and the first failure aborts
    /// the rest. `session` is left untouched in that case, so the whole
    /// bootstrap is retried on the next request.
    pub async fn bootstrap(&self, ctx: &RequestContext, session: &mut SessionState) -> anyhow::Result<()> {
        if session.initialized {
            return Ok(());
        }

        let mut state = session.clone();
        state.subscribe_id = Some(ctx.subscribe_id.clone());

        let all_roles = self.store.list_configured_role_names().await?;
        debug!("all roles: {:?}", all_roles);

        state.roles = all_roles
            .into_iter()
            .filter(|role| ctx.is_user_in_role(role))
            .collect::<HashSet<_>>();
        state.is_admin = ctx.is_user_in_role(ADMIN_ROLE);

        self.store
            .materialize_role_subscriptions(&ctx.subscribe_id, &state.roles)
            .await?;

        state.items = self.default_items;

        for initializer in &self.initializers {
            initializer.initialize(ctx, &mut state).await?;
        }

        state.initialized = true;
        *session = state;
        info!(
            "Initialized session for {} with roles {:?}",
            ctx.subscribe_id, session.roles
        );
        Ok(())
    }
}
