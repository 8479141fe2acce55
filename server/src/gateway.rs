//! Authentication gateway.
//!
//! Sits in front of every route and decides, per request, whether it may
//! proceed. It also owns the login, logout, and status operations that
//! mint and revoke sessions.
//!
//! # Decisions
//!
//! | Path policy | Credentials | Outcome |
//! |-------------|-------------|---------|
//! | public | any | allow |
//! | session or API key | valid session cookie or valid `X-API-Key` | allow |
//! | session or API key | neither | 401 JSON |
//! | session only | valid session cookie | allow |
//! | session only, `/api/` or `/ws/` | none | 401 JSON |
//! | session only, anything else | none | 302 to `/login` |
//!
//! Session tokens, passwords, and API keys are never logged.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::Credentials;
use crate::error::ServerError;
use crate::policy::{self, AuthPolicy, LOGIN_PATH};
use crate::session::SessionStore;

/// Name of the session cookie.
pub const SESSION_COOKIE_NAME: &str = "feedgate_session";

/// Header carrying an API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Pause before answering a failed login.
pub const LOGIN_FAILURE_DELAY: Duration = Duration::from_secs(1);

const UNAUTHORIZED_MESSAGE: &str = "Unauthorized";
const INVALID_LOGIN_MESSAGE: &str = "Invalid username or password";

/// Outcome of [`AuthGateway::authorize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed.
    Allow,
    /// Redirect the browser to the login page.
    DenyRedirect,
    /// Reject with 401 and a JSON body.
    DenyUnauthorized,
}

/// `{"success": true}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// `{"authenticated": true}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub authenticated: bool,
}

/// Request gate plus the login, logout, and status operations.
///
/// Cheap to clone; clones share the session store.
#[derive(Clone)]
pub struct AuthGateway {
    sessions: Arc<SessionStore>,
    credentials: Arc<Credentials>,
    failure_delay: Duration,
}

impl AuthGateway {
    #[must_use]
    pub fn new(sessions: Arc<SessionStore>, credentials: Credentials) -> Self {
        Self {
            sessions,
            credentials: Arc::new(credentials),
            failure_delay: LOGIN_FAILURE_DELAY,
        }
    }

    /// Overrides the failed-login delay.
    #[must_use]
    pub fn with_failure_delay(mut self, delay: Duration) -> Self {
        self.failure_delay = delay;
        self
    }

    /// Returns the session store backing this gateway.
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Decides whether a request for `path` carrying `headers` may proceed.
    pub fn authorize(&self, path: &str, headers: &HeaderMap) -> Decision {
        match policy::policy_for(path) {
            AuthPolicy::Skip => Decision::Allow,
            AuthPolicy::SessionOrApiKey => {
                if self.has_valid_session(headers) || self.has_valid_api_key(headers) {
                    Decision::Allow
                } else {
                    Decision::DenyUnauthorized
                }
            }
            AuthPolicy::SessionOnly => {
                if self.has_valid_session(headers) {
                    Decision::Allow
                } else if policy::is_api_path(path) {
                    Decision::DenyUnauthorized
                } else {
                    Decision::DenyRedirect
                }
            }
        }
    }

    /// Returns `true` if `headers` carry a live session cookie.
    pub fn has_valid_session(&self, headers: &HeaderMap) -> bool {
        let jar = CookieJar::from_headers(headers);
        self.sessions
            .validate(jar.get(SESSION_COOKIE_NAME).map(|cookie| cookie.value()))
    }

    fn has_valid_api_key(&self, headers: &HeaderMap) -> bool {
        headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|key| self.credentials.verify_api_key(key))
    }

    /// Handles a login attempt.
    ///
    /// On success a session is created and its cookie added to `jar`. On a
    /// credential mismatch the answer is delayed by the configured failure
    /// delay; no lock is held while waiting.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Validation`] if the body is not JSON or a field is
    ///   missing, empty, or not a string
    /// - [`ServerError::Auth`] if the credentials do not match
    pub async fn login(
        &self,
        jar: CookieJar,
        body: &[u8],
    ) -> Result<(CookieJar, Json<SuccessResponse>), ServerError> {
        let payload: Value = serde_json::from_slice(body).map_err(|err| {
            debug!(error = %err, "Login body is not valid JSON");
            ServerError::validation("Invalid request")
        })?;

        let username = required_string(&payload, "username")
            .ok_or_else(|| ServerError::validation("Username is required"))?;
        let password = required_string(&payload, "password")
            .ok_or_else(|| ServerError::validation("Password is required"))?;

        if !self.credentials.verify_credentials(username, password) {
            info!("Login failed: invalid credentials");
            tokio::time::sleep(self.failure_delay).await;
            return Err(ServerError::auth(INVALID_LOGIN_MESSAGE));
        }

        let token = self.sessions.create();
        info!("Login successful");

        Ok((
            jar.add(session_cookie(token, self.sessions.ttl())),
            Json(SuccessResponse { success: true }),
        ))
    }

    /// Ends the caller's session, if any, and expires the cookie.
    ///
    /// Always succeeds.
    pub fn logout(&self, jar: CookieJar) -> (CookieJar, Json<SuccessResponse>) {
        if let Some(cookie) = jar.get(SESSION_COOKIE_NAME) {
            self.sessions.invalidate(cookie.value());
        }
        info!("Logout successful");

        (
            jar.add(expired_session_cookie()),
            Json(SuccessResponse { success: true }),
        )
    }

    /// Reports an authenticated status.
    ///
    /// Only reachable past [`require_auth`], so the answer is always `true`.
    pub fn status(&self) -> Json<StatusResponse> {
        Json(StatusResponse {
            authenticated: true,
        })
    }
}

impl std::fmt::Debug for AuthGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGateway")
            .field("sessions", &self.sessions)
            .field("credentials", &self.credentials)
            .field("failure_delay", &self.failure_delay)
            .finish()
    }
}

fn required_string<'a>(payload: &'a Value, field: &str) -> Option<&'a str> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
}

fn session_cookie(token: String, ttl: Duration) -> Cookie<'static> {
    let max_age = time::Duration::try_from(ttl).unwrap_or(time::Duration::MAX);
    Cookie::build((SESSION_COOKIE_NAME, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .max_age(max_age)
        .build()
}

fn expired_session_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .max_age(time::Duration::ZERO)
        .build()
}

/// `302 Found` to the login page.
///
/// Built by hand because [`axum::response::Redirect::to`] answers 303.
pub fn redirect_to_login() -> Response {
    (StatusCode::FOUND, [(header::LOCATION, LOGIN_PATH)]).into_response()
}

/// Middleware applying [`AuthGateway::authorize`] to every request.
pub async fn require_auth(
    State(gateway): State<AuthGateway>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();

    match gateway.authorize(path, request.headers()) {
        Decision::Allow => next.run(request).await,
        Decision::DenyRedirect => {
            debug!(path = %path, "Unauthenticated page request, redirecting to login");
            redirect_to_login()
        }
        Decision::DenyUnauthorized => {
            warn!(path = %path, "Unauthorized request");
            ServerError::auth(UNAUTHORIZED_MESSAGE).into_response()
        }
    }
}

/// Handler for `POST /api/auth/login`.
pub async fn login_handler(
    State(gateway): State<AuthGateway>,
    jar: CookieJar,
    body: Bytes,
) -> Result<(CookieJar, Json<SuccessResponse>), ServerError> {
    gateway.login(jar, &body).await
}

/// Handler for `POST /api/auth/logout`.
pub async fn logout_handler(
    State(gateway): State<AuthGateway>,
    jar: CookieJar,
) -> (CookieJar, Json<SuccessResponse>) {
    gateway.logout(jar)
}

/// Handler for `GET /api/auth/status`.
pub async fn status_handler(State(gateway): State<AuthGateway>) -> Json<StatusResponse> {
    gateway.status()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue};
    use std::time::Instant;

    use crate::session::SessionStoreConfig;

    const NO_DELAY: Duration = Duration::from_millis(0);

    fn api_key_header() -> HeaderName {
        HeaderName::from_bytes(API_KEY_HEADER.as_bytes()).unwrap()
    }

    fn gateway_with(credentials: Credentials) -> AuthGateway {
        AuthGateway::new(Arc::new(SessionStore::default()), credentials)
            .with_failure_delay(NO_DELAY)
    }

    fn gateway() -> AuthGateway {
        gateway_with(Credentials::new("operator", "s3cret", Some("key-123".to_string())))
    }

    fn session_headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("{SESSION_COOKIE_NAME}={token}")).unwrap(),
        );
        headers
    }

    fn api_key_headers(key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(api_key_header(), HeaderValue::from_str(key).unwrap());
        headers
    }

    fn set_cookie_value(jar: CookieJar) -> String {
        let response = (jar, ()).into_response();
        response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    // ========================================================================
    // authorize
    // ========================================================================

    #[test]
    fn public_paths_always_allowed() {
        let gateway = gateway();
        for path in ["/login", "/api/auth/login", "/webhooks/twitter", "/public/css/app.css"] {
            assert_eq!(gateway.authorize(path, &HeaderMap::new()), Decision::Allow);
            assert_eq!(
                gateway.authorize(path, &session_headers("garbage")),
                Decision::Allow
            );
        }
    }

    #[test]
    fn session_only_page_redirects_without_session() {
        let gateway = gateway();
        assert_eq!(gateway.authorize("/", &HeaderMap::new()), Decision::DenyRedirect);
        assert_eq!(
            gateway.authorize("/index.html", &session_headers("forged")),
            Decision::DenyRedirect
        );
    }

    #[test]
    fn session_only_api_and_ws_paths_get_401() {
        let gateway = gateway();
        assert_eq!(
            gateway.authorize("/api/auth/status", &HeaderMap::new()),
            Decision::DenyUnauthorized
        );
        assert_eq!(
            gateway.authorize("/ws/live-events", &HeaderMap::new()),
            Decision::DenyUnauthorized
        );
    }

    #[test]
    fn api_key_does_not_open_session_only_paths() {
        let gateway = gateway();
        assert_eq!(
            gateway.authorize("/ws/live-events", &api_key_headers("key-123")),
            Decision::DenyUnauthorized
        );
        assert_eq!(
            gateway.authorize("/", &api_key_headers("key-123")),
            Decision::DenyRedirect
        );
    }

    #[test]
    fn valid_session_allows_session_only_paths() {
        let gateway = gateway();
        let token = gateway.sessions().create();
        let headers = session_headers(&token);

        assert_eq!(gateway.authorize("/", &headers), Decision::Allow);
        assert_eq!(gateway.authorize("/ws/live-events", &headers), Decision::Allow);
        assert_eq!(gateway.authorize("/api/auth/status", &headers), Decision::Allow);
    }

    #[test]
    fn dual_mode_accepts_either_credential() {
        let gateway = gateway();
        let token = gateway.sessions().create();

        assert_eq!(
            gateway.authorize("/api/messages", &api_key_headers("key-123")),
            Decision::Allow
        );
        assert_eq!(
            gateway.authorize("/api/messages", &session_headers(&token)),
            Decision::Allow
        );

        // Valid session with a wrong API key still passes.
        let mut both = session_headers(&token);
        both.insert(api_key_header(), HeaderValue::from_static("wrong"));
        assert_eq!(gateway.authorize("/api/messages", &both), Decision::Allow);

        assert_eq!(
            gateway.authorize("/api/webhooks/env/subscriptions", &api_key_headers("key-123")),
            Decision::Allow
        );
    }

    #[test]
    fn dual_mode_without_credentials_is_401_not_redirect() {
        let gateway = gateway();
        assert_eq!(
            gateway.authorize("/api/messages", &HeaderMap::new()),
            Decision::DenyUnauthorized
        );
        assert_eq!(
            gateway.authorize("/api/messages", &api_key_headers("key-124")),
            Decision::DenyUnauthorized
        );
    }

    #[test]
    fn api_key_rejected_when_not_configured() {
        let gateway = gateway_with(Credentials::new("operator", "s3cret", None));
        assert_eq!(
            gateway.authorize("/api/messages", &api_key_headers("")),
            Decision::DenyUnauthorized
        );
        assert_eq!(
            gateway.authorize("/api/messages", &api_key_headers("anything")),
            Decision::DenyUnauthorized
        );
    }

    #[test]
    fn expired_session_is_rejected() {
        let sessions = Arc::new(SessionStore::new(SessionStoreConfig::new(
            Duration::from_millis(10),
        )));
        let gateway = AuthGateway::new(sessions, Credentials::default());
        let token = gateway.sessions().create();

        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(
            gateway.authorize("/", &session_headers(&token)),
            Decision::DenyRedirect
        );
    }

    // ========================================================================
    // login / logout / status
    // ========================================================================

    #[tokio::test]
    async fn login_success_sets_session_cookie() {
        let gateway = gateway();
        let (jar, Json(body)) = gateway
            .login(CookieJar::new(), br#"{"username":"operator","password":"s3cret"}"#)
            .await
            .unwrap();

        assert!(body.success);
        let token = jar.get(SESSION_COOKIE_NAME).unwrap().value().to_string();
        assert!(gateway.sessions().validate(Some(&token)));

        let set_cookie = set_cookie_value(jar);
        assert!(set_cookie.starts_with(&format!("{SESSION_COOKIE_NAME}={token}")));
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("SameSite=Strict"));
        assert!(set_cookie.contains("Path=/"));
        assert!(set_cookie.contains("Max-Age=86400"));
    }

    #[tokio::test]
    async fn login_failure_creates_no_session() {
        let gateway = gateway();
        let err = gateway
            .login(CookieJar::new(), br#"{"username":"operator","password":"wrong"}"#)
            .await
            .unwrap_err();

        assert!(matches!(err, ServerError::Auth(ref msg) if msg == INVALID_LOGIN_MESSAGE));
        assert!(gateway.sessions().is_empty());
    }

    #[tokio::test]
    async fn login_failure_is_delayed() {
        let gateway = gateway().with_failure_delay(Duration::from_millis(200));
        let start = Instant::now();
        let result = gateway
            .login(CookieJar::new(), br#"{"username":"nobody","password":"x"}"#)
            .await;

        assert!(result.is_err());
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn default_failure_delay_is_one_second() {
        let gateway = AuthGateway::new(Arc::new(SessionStore::default()), Credentials::default());
        let start = Instant::now();
        let result = gateway
            .login(CookieJar::new(), br#"{"username":"admin","password":"nope"}"#)
            .await;

        assert!(result.is_err());
        assert!(start.elapsed() >= LOGIN_FAILURE_DELAY);
    }

    #[tokio::test]
    async fn login_validation_errors() {
        let gateway = gateway();
        let cases: &[(&[u8], &str)] = &[
            (b"not json", "Invalid request"),
            (br#"{"password":"s3cret"}"#, "Username is required"),
            (br#"{"username":"","password":"s3cret"}"#, "Username is required"),
            (br#"{"username":42,"password":"s3cret"}"#, "Username is required"),
            (br#"{"username":"operator"}"#, "Password is required"),
            (br#"{"username":"operator","password":["x"]}"#, "Password is required"),
            (b"[]", "Username is required"),
        ];

        for (body, expected) in cases {
            let err = gateway.login(CookieJar::new(), body).await.unwrap_err();
            assert!(
                matches!(err, ServerError::Validation(ref msg) if msg == expected),
                "body {:?} gave {err}",
                String::from_utf8_lossy(body)
            );
        }
        assert!(gateway.sessions().is_empty());
    }

    #[test]
    fn logout_invalidates_session_and_expires_cookie() {
        let gateway = gateway();
        let token = gateway.sessions().create();
        let jar = CookieJar::from_headers(&session_headers(&token));

        let (jar, Json(body)) = gateway.logout(jar);

        assert!(body.success);
        assert!(!gateway.sessions().validate(Some(&token)));
        let set_cookie = set_cookie_value(jar);
        assert!(set_cookie.starts_with(&format!("{SESSION_COOKIE_NAME}=;")));
        assert!(set_cookie.contains("Max-Age=0"));
    }

    #[test]
    fn logout_without_session_still_expires_cookie() {
        let gateway = gateway();
        let (jar, Json(body)) = gateway.logout(CookieJar::new());

        assert!(body.success);
        assert!(set_cookie_value(jar).contains("Max-Age=0"));
    }

    #[test]
    fn status_reports_authenticated() {
        let Json(status) = gateway().status();
        assert!(status.authenticated);
    }

    #[test]
    fn redirect_is_302_to_login() {
        let response = redirect_to_login();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/login");
    }

    #[test]
    fn debug_output_hides_secrets() {
        let debug_str = format!("{:?}", gateway());
        assert!(!debug_str.contains("s3cret"));
        assert!(!debug_str.contains("key-123"));
    }
}
