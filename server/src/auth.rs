//! Credential verification for dashboard logins and API keys.
//!
//! The dashboard has a single operator account (username + password) and an
//! optional static API key for programmatic callers. Both are loaded once at
//! startup and compared with constant-time primitives so that response
//! timing does not reveal how much of a guess was correct.
//!
//! # Example
//!
//! ```rust
//! use feedgate_server::auth::Credentials;
//!
//! let credentials = Credentials::new("operator", "hunter2", Some("key-123".to_string()));
//!
//! assert!(credentials.verify_credentials("operator", "hunter2"));
//! assert!(!credentials.verify_credentials("operator", "hunter3"));
//! assert!(credentials.verify_api_key("key-123"));
//! ```

use std::fmt;

use subtle::{Choice, ConstantTimeEq};

/// Username used when `DASHBOARD_USERNAME` is not configured.
pub const DEFAULT_USERNAME: &str = "admin";

/// Password used when `DASHBOARD_PASSWORD` is not configured.
pub const DEFAULT_PASSWORD: &str = "admin";

/// Configured secrets for the dashboard.
///
/// Immutable after construction. An absent `api_key` disables API key
/// authentication entirely.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
    api_key: Option<String>,
}

impl Credentials {
    /// Creates a credential set.
    ///
    /// An empty API key is treated the same as no API key.
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            api_key: api_key.filter(|key| !key.is_empty()),
        }
    }

    /// Returns the configured username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns `true` if API key authentication is enabled.
    pub fn api_key_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Returns `true` if both the username and password match.
    ///
    /// Both fields are always compared in full, and the two results are
    /// combined without short-circuiting, so a wrong username costs the
    /// same as a wrong password.
    pub fn verify_credentials(&self, username: &str, password: &str) -> bool {
        let username_match = padded_ct_eq(username.as_bytes(), self.username.as_bytes());
        let password_match = padded_ct_eq(password.as_bytes(), self.password.as_bytes());

        (username_match & password_match).into()
    }

    /// Returns `true` if `key` matches the configured API key.
    ///
    /// Always `false` when no API key is configured.
    pub fn verify_api_key(&self, key: &str) -> bool {
        match &self.api_key {
            Some(expected) => padded_ct_eq(key.as_bytes(), expected.as_bytes()).into(),
            None => false,
        }
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new(DEFAULT_USERNAME, DEFAULT_PASSWORD, None)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Compares two byte strings in constant time with respect to their content.
///
/// Both operands are zero-padded to the longer length and compared over the
/// full padded buffer. The padded result is AND-ed with a length equality
/// check so a trailing NUL in the input can never stand in for padding.
pub fn padded_ct_eq(input: &[u8], expected: &[u8]) -> Choice {
    let max_len = input.len().max(expected.len());

    let mut padded_input = vec![0u8; max_len];
    let mut padded_expected = vec![0u8; max_len];
    padded_input[..input.len()].copy_from_slice(input);
    padded_expected[..expected.len()].copy_from_slice(expected);

    let bytes_match = padded_input.as_slice().ct_eq(padded_expected.as_slice());
    let len_match = (input.len() as u64).ct_eq(&(expected.len() as u64));

    bytes_match & len_match
}
