use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use time::Duration;
use tower_sessions::{Expiry, Session, SessionManagerLayer, SessionStore};
use tracing::info;

/// Name of the cookie carrying the session id.
pub const SESSION_COOKIE: &str = "NEWS_SESSION";

/// Key under which [`SessionState`] is stored in the session.
pub const SESSION_STATE_KEY: &str = "news.state";

/// Inactivity timeout applied once a session is initialized.
pub const SESSION_INACTIVE_INTERVAL: Duration = Duration::hours(2);

/// Typed per-session data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub initialized: bool,
    /// Subscriber the session was initialized for
    pub subscribe_id: Option<String>,
    pub roles: HashSet<String>,
    pub is_admin: bool,
    /// Number of items to show
    pub items: u32,
    /// Free-form values set by session initializers
    pub attributes: HashMap<String, String>,
}

/// Session middleware. Sessions expire after `idle` until they are
/// initialized, then after [`SESSION_INACTIVE_INTERVAL`].
pub fn session_layer<S: SessionStore + Clone>(
    store: S,
    idle: Duration,
    secure: bool,
) -> SessionManagerLayer<S> {
    SessionManagerLayer::new(store)
        .with_name(SESSION_COOKIE)
        .with_secure(secure)
        .with_expiry(Expiry::OnInactivity(idle))
}

/// Loads the state stored for `subscribe_id`. A session that belongs to
/// another subscriber is flushed and a fresh state is returned, so the next
/// save issues a new session id.
pub async fn load_state(session: &Session, subscribe_id: &str) -> anyhow::Result<SessionState> {
    match session.get::<SessionState>(SESSION_STATE_KEY).await? {
        Some(state) if state.subscribe_id.as_deref() == Some(subscribe_id) => Ok(state),
        Some(state) => {
            info!(
                "Session of {:?} presented by {}, starting a new one",
                state.subscribe_id, subscribe_id
            );
            session.flush().await?;
            Ok(SessionState::default())
        }
        None => Ok(SessionState::default()),
    }
}

/// Stores the state. Initialized sessions switch to the longer
/// inactivity timeout.
pub async fn save_state(session: &Session, state: &SessionState) -> anyhow::Result<()> {
    if state.initialized {
        session.set_expiry(Some(Expiry::OnInactivity(SESSION_INACTIVE_INTERVAL)));
    }
    session.insert(SESSION_STATE_KEY, state).await?;
    Ok(())
}
