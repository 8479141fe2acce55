//! Route authorization policy.
//!
//! Maps a request path to the credential modes that satisfy it. The rules
//! live in one ordered table and the first matching rule wins:
//!
//! 1. exact public paths (login flow, webhook callback, login stylesheet)
//! 2. public static-asset prefixes
//! 3. API-key-eligible endpoints (message query, webhook subscriptions)
//! 4. everything else requires a session
//!
//! Every predicate here is a pure function of the path string.

use std::sync::LazyLock;

use regex::Regex;

/// Path of the login page; unauthenticated page requests redirect here.
pub const LOGIN_PATH: &str = "/login";

/// Login API endpoint.
pub const LOGIN_API_PATH: &str = "/api/auth/login";

/// Logout API endpoint.
pub const LOGOUT_API_PATH: &str = "/api/auth/logout";

/// Authentication status endpoint.
pub const STATUS_API_PATH: &str = "/api/auth/status";

/// Inbound webhook callback from the event provider.
pub const WEBHOOK_CALLBACK_PATH: &str = "/webhooks/twitter";

/// Message history query endpoint.
pub const MESSAGES_API_PATH: &str = "/api/messages";

/// Live event WebSocket endpoint.
pub const LIVE_EVENTS_PATH: &str = "/ws/live-events";

const PUBLIC_PATHS: &[&str] = &[
    LOGIN_PATH,
    "/login.html",
    LOGIN_API_PATH,
    LOGOUT_API_PATH,
    WEBHOOK_CALLBACK_PATH,
    "/public/css/login.css",
];

const PUBLIC_PREFIXES: &[&str] = &["/public/css/", "/public/img/"];

const API_KEY_PATHS: &[&str] = &[MESSAGES_API_PATH];

/// Prefixes of machine-facing paths, which get 401 instead of a redirect.
const API_PREFIXES: &[&str] = &["/api/", "/ws/"];

static SUBSCRIPTIONS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/api/webhooks/[^/]+/subscriptions(?:/[^/]+)?$")
        .unwrap_or_else(|err| unreachable!("static pattern is valid: {err}"))
});

/// Which credentials a path accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPolicy {
    /// Public; no credentials needed.
    Skip,
    /// A valid session cookie is required.
    SessionOnly,
    /// A valid session cookie or a valid API key header is required.
    SessionOrApiKey,
}

/// How a rule matches a path.
#[derive(Debug)]
enum PathMatcher {
    Exact(&'static [&'static str]),
    Prefix(&'static [&'static str]),
    Pattern(&'static LazyLock<Regex>),
}

impl PathMatcher {
    fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(paths) => paths.contains(&path),
            Self::Prefix(prefixes) => prefixes.iter().any(|prefix| path.starts_with(prefix)),
            Self::Pattern(pattern) => pattern.is_match(path),
        }
    }
}

#[derive(Debug)]
struct RouteRule {
    matcher: PathMatcher,
    policy: AuthPolicy,
}

/// Rules in priority order.
static RULES: &[RouteRule] = &[
    RouteRule {
        matcher: PathMatcher::Exact(PUBLIC_PATHS),
        policy: AuthPolicy::Skip,
    },
    RouteRule {
        matcher: PathMatcher::Prefix(PUBLIC_PREFIXES),
        policy: AuthPolicy::Skip,
    },
    RouteRule {
        matcher: PathMatcher::Exact(API_KEY_PATHS),
        policy: AuthPolicy::SessionOrApiKey,
    },
    RouteRule {
        matcher: PathMatcher::Pattern(&SUBSCRIPTIONS_PATTERN),
        policy: AuthPolicy::SessionOrApiKey,
    },
];

/// Returns the policy of the first rule matching `path`.
pub fn policy_for(path: &str) -> AuthPolicy {
    RULES
        .iter()
        .find(|rule| rule.matcher.matches(path))
        .map_or(AuthPolicy::SessionOnly, |rule| rule.policy)
}

/// Returns `true` if `path` is reachable without authentication.
pub fn should_skip_auth(path: &str) -> bool {
    policy_for(path) == AuthPolicy::Skip
}

/// Returns `true` if `path` accepts an API key in place of a session.
pub fn supports_api_key(path: &str) -> bool {
    policy_for(path) == AuthPolicy::SessionOrApiKey
}

/// Returns `true` for API and realtime-stream paths.
pub fn is_api_path(path: &str) -> bool {
    API_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}
