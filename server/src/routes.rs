//! HTTP route handlers for the Feedgate server.
//!
//! This module provides the HTTP API endpoints:
//!
//! - `POST /api/auth/login` - Exchange credentials for a session cookie
//! - `POST /api/auth/logout` - End the session and expire the cookie
//! - `GET /api/auth/status` - Report that the caller is authenticated
//! - `GET /api/messages` - Page through a user's stored events
//! - `POST /webhooks/twitter` - Ingest an event from the webhook provider
//! - `GET /ws/live-events` - WebSocket stream of live events
//! - `GET /login`, `GET /login.html`, `GET /` - Dashboard pages
//! - `/public/*` - Static assets
//!
//! # Architecture
//!
//! All routes share application state through [`AppState`], which contains:
//! - Configuration
//! - The auth gateway and its session store
//! - The event distributor for live subscribers
//! - The message store
//!
//! Every request first passes [`require_auth`], including requests that
//! match no route.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use feedgate_server::config::Config;
//! use feedgate_server::routes::{create_router, AppState};
//! use feedgate_server::store::SqliteMessageStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = SqliteMessageStore::open(&config.db_path).await?;
//!     let app = create_router(AppState::new(config, Arc::new(store)));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{ws::WebSocket, DefaultBodyLimit, FromRef, Query, State, WebSocketUpgrade},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, trace, warn};

use crate::broadcast::{EventDistributor, Subscription};
use crate::config::Config;
use crate::error::ServerError;
use crate::gateway::{self, require_auth, AuthGateway};
use crate::policy::{
    LIVE_EVENTS_PATH, LOGIN_API_PATH, LOGIN_PATH, LOGOUT_API_PATH, MESSAGES_API_PATH,
    STATUS_API_PATH, WEBHOOK_CALLBACK_PATH,
};
use crate::session::SessionStore;
use crate::store::{MessageStore, Page, PageError};
use crate::types::EventRecord;

// ============================================================================
// Constants
// ============================================================================

/// Maximum request body size (1 MB).
const MAX_BODY_SIZE: usize = 1024 * 1024;

const LOGIN_PAGE: &str = "login.html";
const INDEX_PAGE: &str = "index.html";

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<Config>,

    /// Request gate and session operations.
    pub gateway: AuthGateway,

    /// Fan-out to live event subscribers.
    pub distributor: EventDistributor,

    /// Persisted event history.
    pub store: Arc<dyn MessageStore>,
}

impl AppState {
    /// Creates application state with a fresh session store.
    #[must_use]
    pub fn new(config: Config, store: Arc<dyn MessageStore>) -> Self {
        let gateway = AuthGateway::new(
            Arc::new(SessionStore::default()),
            config.credentials.clone(),
        );
        let distributor = EventDistributor::new(Arc::clone(&store));
        Self::with_components(config, gateway, distributor, store)
    }

    /// Creates application state from prebuilt components.
    ///
    /// Useful for testing or when a custom session TTL or channel capacity
    /// is needed.
    #[must_use]
    pub fn with_components(
        config: Config,
        gateway: AuthGateway,
        distributor: EventDistributor,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            gateway,
            distributor,
            store,
        }
    }

    /// Returns the session store.
    pub fn sessions(&self) -> &Arc<SessionStore> {
        self.gateway.sessions()
    }
}

impl FromRef<AppState> for AuthGateway {
    fn from_ref(state: &AppState) -> Self {
        state.gateway.clone()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"<Config>")
            .field("gateway", &self.gateway)
            .field("distributor", &self.distributor)
            .finish()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
pub fn create_router(state: AppState) -> Router {
    let assets = ServeDir::new(&state.config.public_dir);
    let auth_layer = middleware::from_fn_with_state(state.gateway.clone(), require_auth);

    Router::new()
        .route(LOGIN_API_PATH, post(gateway::login_handler))
        .route(LOGOUT_API_PATH, post(gateway::logout_handler))
        .route(WEBHOOK_CALLBACK_PATH, post(post_webhook))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .route(STATUS_API_PATH, get(gateway::status_handler))
        .route(MESSAGES_API_PATH, get(get_messages))
        .route(LIVE_EVENTS_PATH, get(get_live_events))
        .route(LOGIN_PATH, get(get_login_page))
        .route("/login.html", get(get_login_page))
        .route("/", get(get_index_page))
        .nest_service("/public", assets)
        .fallback(not_found)
        .layer(auth_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// GET /api/messages - Message History
// ============================================================================

/// Query parameters for the message history endpoint.
///
/// Numbers arrive as raw strings so malformed values get a descriptive 400.
#[derive(Debug, Default, Deserialize)]
pub struct MessagesQueryParams {
    pub user_id: Option<String>,
    pub size: Option<String>,
    pub cursor: Option<String>,
}

impl MessagesQueryParams {
    fn page(&self) -> Result<Page, PageError> {
        let size = parse_optional_int(self.size.as_deref(), PageError::InvalidSize)?;
        let cursor = parse_optional_int(self.cursor.as_deref(), PageError::InvalidCursor)?;
        Page::new(size, cursor)
    }
}

fn parse_optional_int(raw: Option<&str>, err: PageError) -> Result<Option<i64>, PageError> {
    raw.map(|value| value.trim().parse::<i64>().map_err(|_| err))
        .transpose()
}

/// Response body for the message history endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub user_id: String,
    pub count: usize,
    pub messages: Vec<EventRecord>,
}

/// GET /api/messages - Page through a user's stored events, newest first.
///
/// # Authentication
///
/// Session cookie or `X-API-Key` header.
///
/// # Responses
///
/// - `200 OK` - `{user_id, count, messages}`
/// - `400 Bad Request` - Missing `user_id` or invalid `size`/`cursor`
/// - `500 Internal Server Error` - Store failure
async fn get_messages(
    State(state): State<AppState>,
    Query(params): Query<MessagesQueryParams>,
) -> Result<Json<MessagesResponse>, ServerError> {
    let user_id = params
        .user_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            ServerError::validation(
                "Missing or invalid 'user_id' query parameter. Usage: /api/messages?user_id=<userId>",
            )
        })?;

    let page = params
        .page()
        .map_err(|err| ServerError::validation(err.to_string()))?;

    let messages = state.store.query(user_id, page).await?;
    debug!(
        user_id = %user_id,
        size = page.size(),
        cursor = page.cursor(),
        count = messages.len(),
        "Served message history"
    );

    Ok(Json(MessagesResponse {
        user_id: user_id.to_string(),
        count: messages.len(),
        messages,
    }))
}

// ============================================================================
// POST /webhooks/twitter - Event Ingestion
// ============================================================================

/// Acknowledgment returned to the webhook provider.
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAck {
    pub received: bool,
}

/// POST /webhooks/twitter - Accept an event from the webhook provider.
///
/// The event is persisted and fanned out to live subscribers; the response
/// does not wait for persistence.
///
/// # Responses
///
/// - `200 OK` - `{"received": true}`
/// - `400 Bad Request` - Body is not valid JSON
async fn post_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<WebhookAck>, ServerError> {
    let payload: Value = serde_json::from_slice(&body).map_err(|err| {
        debug!(error = %err, "Webhook body is not valid JSON");
        ServerError::validation("Invalid JSON payload")
    })?;

    let event = EventRecord::new(payload);
    debug!(for_user_id = ?event.for_user_id(), "Webhook event received");

    // Persistence completes on its own; the handle is not awaited.
    drop(state.distributor.ingest(event));

    Ok(Json(WebhookAck { received: true }))
}

// ============================================================================
// GET /ws/live-events - Live Event Stream
// ============================================================================

/// GET /ws/live-events - Upgrade to a live event WebSocket.
///
/// The session check happens in [`require_auth`] before the upgrade.
async fn get_live_events(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_live_events(socket, state.distributor))
}

/// Handles an established live event connection.
///
/// Joins the distributor on open and leaves exactly once on any exit.
async fn handle_live_events(socket: WebSocket, distributor: EventDistributor) {
    use axum::extract::ws::Message;
    use futures_util::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut subscription: Subscription = distributor.join();
    let subscriber_id = subscription.id();

    // Forward queued payloads to the client
    let forward_task = tokio::spawn(async move {
        while let Some(payload) = subscription.recv().await {
            if let Err(err) = sender.send(Message::Text(payload.to_string().into())).await {
                debug!(error = %err, "Failed to send event to WebSocket client");
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) => {
                debug!("WebSocket client sent close frame");
                break;
            }
            Ok(Message::Text(text)) => {
                info!(len = text.as_str().len(), "Ignoring message from live event client");
            }
            Ok(Message::Ping(data)) => {
                trace!(data_len = data.len(), "Received ping");
            }
            Ok(_) => {}
            Err(err) => {
                debug!(error = %err, "WebSocket error");
                break;
            }
        }
    }

    distributor.leave(subscriber_id);
    forward_task.abort();
}

// ============================================================================
// Pages
// ============================================================================

/// GET /login, /login.html - Serve the login page.
///
/// Callers that already hold a valid session are sent to the dashboard.
async fn get_login_page(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if state.gateway.has_valid_session(&headers) {
        return (StatusCode::FOUND, [(header::LOCATION, "/")]).into_response();
    }
    serve_page(&state.config.public_dir, LOGIN_PAGE).await
}

/// GET / - Serve the dashboard.
async fn get_index_page(State(state): State<AppState>) -> Response {
    serve_page(&state.config.public_dir, INDEX_PAGE).await
}

async fn serve_page(public_dir: &Path, name: &str) -> Response {
    let path = public_dir.join(name);
    match tokio::fs::read_to_string(&path).await {
        Ok(html) => Html(html).into_response(),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Failed to read page");
            not_found().await
        }
    }
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::json;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::auth::Credentials;
    use crate::gateway::SESSION_COOKIE_NAME;
    use crate::store::SqliteMessageStore;

    const API_KEY: &str = "test-api-key";

    struct TestApp {
        state: AppState,
        _public_dir: TempDir,
    }

    impl TestApp {
        async fn new() -> Self {
            let public_dir = tempfile::tempdir().unwrap();
            std::fs::write(public_dir.path().join(LOGIN_PAGE), "<h1>login</h1>").unwrap();
            std::fs::write(public_dir.path().join(INDEX_PAGE), "<h1>dashboard</h1>").unwrap();
            std::fs::create_dir_all(public_dir.path().join("css")).unwrap();
            std::fs::write(public_dir.path().join("css/login.css"), "body{}").unwrap();
            std::fs::create_dir_all(public_dir.path().join("js")).unwrap();
            std::fs::write(public_dir.path().join("js/app.js"), "run()").unwrap();

            let config = Config {
                credentials: Credentials::new("operator", "s3cret", Some(API_KEY.to_string())),
                public_dir: public_dir.path().to_path_buf(),
                ..Config::default()
            };
            let store = SqliteMessageStore::in_memory().await.unwrap();
            Self {
                state: AppState::new(config, Arc::new(store)),
                _public_dir: public_dir,
            }
        }

        fn router(&self) -> Router {
            create_router(self.state.clone())
        }

        fn session_cookie(&self) -> String {
            format!("{SESSION_COOKIE_NAME}={}", self.state.sessions().create())
        }

        async fn send(&self, request: Request<Body>) -> Response {
            self.router().oneshot(request).await.unwrap()
        }
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn get_with_cookie(uri: &str, cookie: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_str(&body_string(response).await).unwrap()
    }

    // ========================================================================
    // Pages and static assets
    // ========================================================================

    #[tokio::test]
    async fn login_page_served_without_session() {
        let app = TestApp::new().await;
        for uri in ["/login", "/login.html"] {
            let response = app.send(get(uri)).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_string(response).await, "<h1>login</h1>");
        }
    }

    #[tokio::test]
    async fn login_page_redirects_when_authenticated() {
        let app = TestApp::new().await;
        let response = app.send(get_with_cookie("/login", &app.session_cookie())).await;

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/");
    }

    #[tokio::test]
    async fn dashboard_redirects_without_session() {
        let app = TestApp::new().await;
        let response = app.send(get("/")).await;

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/login");
    }

    #[tokio::test]
    async fn dashboard_served_with_session() {
        let app = TestApp::new().await;
        let response = app.send(get_with_cookie("/", &app.session_cookie())).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "<h1>dashboard</h1>");
    }

    #[tokio::test]
    async fn public_css_is_served_without_session() {
        let app = TestApp::new().await;
        let response = app.send(get("/public/css/login.css")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "body{}");
    }

    #[tokio::test]
    async fn other_public_assets_require_session() {
        let app = TestApp::new().await;
        let response = app.send(get("/public/js/app.js")).await;
        assert_eq!(response.status(), StatusCode::FOUND);

        let response = app
            .send(get_with_cookie("/public/js/app.js", &app.session_cookie()))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_path_is_gated_then_404() {
        let app = TestApp::new().await;
        assert_eq!(app.send(get("/nope")).await.status(), StatusCode::FOUND);
        assert_eq!(app.send(get("/api/nope")).await.status(), StatusCode::UNAUTHORIZED);

        let response = app.send(get_with_cookie("/nope", &app.session_cookie())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, "Not Found");
    }

    // ========================================================================
    // Webhook ingestion
    // ========================================================================

    #[tokio::test]
    async fn webhook_accepts_json_without_auth() {
        let app = TestApp::new().await;
        let mut subscription = app.state.distributor.join();
        let _ack = subscription.recv().await;

        let response = app
            .send(post_json(WEBHOOK_CALLBACK_PATH, r#"{"for_user_id":"u1","n":1}"#))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"received": true}));

        let payload = subscription.recv().await.unwrap();
        let received: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(received, json!({"for_user_id": "u1", "n": 1}));
    }

    #[tokio::test]
    async fn webhook_rejects_malformed_json() {
        let app = TestApp::new().await;
        let response = app.send(post_json(WEBHOOK_CALLBACK_PATH, "{not json")).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "Invalid JSON payload");
    }

    // ========================================================================
    // Message history
    // ========================================================================

    async fn seed(app: &TestApp, user_id: &str, count: usize) {
        for n in 0..count {
            let event = EventRecord::new(json!({"for_user_id": user_id, "n": n}));
            app.state.store.persist(&event).await.unwrap();
        }
    }

    fn messages_request(query: &str) -> Request<Body> {
        Request::builder()
            .uri(format!("{MESSAGES_API_PATH}?{query}"))
            .header("X-API-Key", API_KEY)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn messages_requires_credentials() {
        let app = TestApp::new().await;
        let response = app.send(get("/api/messages?user_id=u1")).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await, json!({"error": "Unauthorized"}));
    }

    #[tokio::test]
    async fn messages_returns_newest_first() {
        let app = TestApp::new().await;
        seed(&app, "u1", 3).await;
        seed(&app, "u2", 2).await;

        let response = app.send(messages_request("user_id=u1")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["user_id"], "u1");
        assert_eq!(json["count"], 3);
        let ns: Vec<i64> = json["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["n"].as_i64().unwrap())
            .collect();
        assert_eq!(ns, vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn messages_with_session_cookie() {
        let app = TestApp::new().await;
        seed(&app, "u1", 1).await;

        let response = app
            .send(get_with_cookie("/api/messages?user_id=u1", &app.session_cookie()))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["count"], 1);
    }

    #[tokio::test]
    async fn messages_validates_parameters() {
        let app = TestApp::new().await;
        let cases = [
            ("size=5", "Missing or invalid 'user_id'"),
            ("user_id=", "Missing or invalid 'user_id'"),
            ("user_id=u1&size=0", "'size' must be a number between 1 and 25"),
            ("user_id=u1&size=26", "'size' must be a number between 1 and 25"),
            ("user_id=u1&size=ten", "'size' must be a number between 1 and 25"),
            ("user_id=u1&cursor=-1", "'cursor' must be a non-negative number"),
            ("user_id=u1&cursor=x", "'cursor' must be a non-negative number"),
        ];

        for (query, expected) in cases {
            let response = app.send(messages_request(query)).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{query}");
            let json = body_json(response).await;
            assert!(
                json["error"].as_str().unwrap().starts_with(expected),
                "{query}: {json}"
            );
        }
    }

    #[test]
    fn query_params_default_page() {
        let params = MessagesQueryParams::default();
        assert_eq!(params.page().unwrap(), Page::default());
    }

    // ========================================================================
    // Auth endpoints through the router
    // ========================================================================

    #[tokio::test]
    async fn status_requires_session() {
        let app = TestApp::new().await;
        assert_eq!(
            app.send(get(STATUS_API_PATH)).await.status(),
            StatusCode::UNAUTHORIZED
        );

        let response = app
            .send(get_with_cookie(STATUS_API_PATH, &app.session_cookie()))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"authenticated": true}));
    }

    #[tokio::test]
    async fn live_events_requires_session() {
        let app = TestApp::new().await;
        let response = app.send(get(LIVE_EVENTS_PATH)).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(app.state.distributor.subscriber_count(), 0);
    }
}
