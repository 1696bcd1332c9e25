use std::sync::Arc;

use askama::Template;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tower_sessions::{Session, SessionManagerLayer, SessionStore};
use tracing::debug;

use crate::aggregator::{FeedAggregator, ModelAndView, NewsModel};
use crate::bootstrap::SessionBootstrapper;
use crate::context::RequestContext;
use crate::session::{load_state, save_state};
use crate::toggler::{SubscriptionToggler, ToggleError};

pub struct AppState {
    pub bootstrapper: SessionBootstrapper,
    pub aggregator: FeedAggregator,
    pub toggler: SubscriptionToggler,
    /// Name of the user attribute holding the subscriber id
    pub user_token: String,
}

pub fn router<S: SessionStore + Clone>(
    state: Arc<AppState>,
    sessions: SessionManagerLayer<S>,
) -> Router {
    Router::new()
        .route("/", get(view_news))
        .route("/model", get(view_model))
        .route("/action", post(action))
        .route("/health", get(health))
        .nest_service("/static", ServeDir::new("static"))
        .layer(sessions)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Template)]
#[template(path = "view_news.html")]
pub struct ViewNewsTemplate {
    pub model: NewsModel,
    pub is_admin: bool,
}

// Wrapper for HTML responses
struct HtmlTemplate<T>(T);

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to render template: {}", err),
            )
                .into_response(),
        }
    }
}

pub enum AppError {
    Unauthorized,
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "Error: no authenticated user").into_response()
            }
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, format!("Error: {}", msg)).into_response()
            }
            AppError::Internal(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error: {}", err),
            )
                .into_response(),
        }
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        AppError::Internal(err.into())
    }
}

fn request_context(state: &AppState, headers: &HeaderMap) -> Result<RequestContext, AppError> {
    RequestContext::from_headers(headers, &state.user_token).ok_or(AppError::Unauthorized)
}

/// Render phase shared by the HTML and JSON views. The session state is
/// stored only once bootstrap succeeded, so a failed bootstrap leaves no
/// session behind.
async fn render(
    state: &AppState,
    headers: &HeaderMap,
    session: &Session,
) -> Result<(ModelAndView, bool), AppError> {
    let ctx = request_context(state, headers)?;

    let mut session_state = load_state(session, &ctx.subscribe_id).await?;
    if !session_state.initialized {
        state.bootstrapper.bootstrap(&ctx, &mut session_state).await?;
        save_state(session, &session_state).await?;
    }

    let mv = state.aggregator.render(&ctx).await?;
    Ok((mv, session_state.is_admin))
}

// Route handlers
pub async fn view_news(
    State(state): State<Arc<AppState>>,
    session: Session,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let (mv, is_admin) = render(&state, &headers, &session).await?;
    Ok(HtmlTemplate(ViewNewsTemplate {
        model: mv.model,
        is_admin,
    }))
}

pub async fn view_model(
    State(state): State<Arc<AppState>>,
    session: Session,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let (mv, _) = render(&state, &headers, &session).await?;
    Ok(Json(mv))
}

/// Action parameters. `activeateNews` is the misspelled name older pages
/// still post; `activateNews` wins when both are sent.
#[derive(Debug, Deserialize)]
pub struct ActionForm {
    #[serde(rename = "activateNews")]
    pub activate_news: Option<String>,
    #[serde(rename = "activeateNews")]
    pub legacy_activate_news: Option<String>,
}

impl ActionForm {
    pub fn target(&self) -> Option<&str> {
        self.activate_news
            .as_deref()
            .or(self.legacy_activate_news.as_deref())
    }
}

pub async fn action(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<ActionForm>,
) -> Result<impl IntoResponse, AppError> {
    let ctx = request_context(&state, &headers)?;
    debug!("action for {}: {:?}", ctx.subscribe_id, form);

    match state
        .toggler
        .toggle(&ctx.subscribe_id, form.target())
        .await
    {
        Ok(()) => Ok(Redirect::to("/")),
        Err(err @ ToggleError::InvalidId { .. }) => Err(AppError::BadRequest(err.to_string())),
        Err(err) => Err(err.into()),
    }
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}
