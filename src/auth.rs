//! # Credentials
//!
//! Authentication is attached per resource type and travels with every
//! [`Request`](crate::transport::Request). The transport turns it into headers.
//!
//! Session authentication rides on Django's cookies: the HTTP transport keeps a cookie
//! jar, and a [`Credential::Session`] without an explicit token sends the jar's
//! `csrftoken` as `X-CSRFToken`.

use crate::error::{Result, TastyError};
use std::fmt;

#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// TastyPie `ApiKeyAuthentication`: `Authorization: ApiKey <user>:<key>`.
    ApiKey { username: String, key: String },
    /// HTTP basic authentication.
    Basic { username: String, password: String },
    /// Django session authentication. Writes need the CSRF token from the session cookie.
    Session { csrf_token: Option<String> },
}

impl Credential {
    pub fn api_key(username: impl Into<String>, key: impl Into<String>) -> Self {
        Credential::ApiKey {
            username: username.into(),
            key: key.into(),
        }
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credential::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn session(csrf_token: Option<String>) -> Self {
        Credential::Session { csrf_token }
    }

    /// Extra headers this credential adds to a request.
    ///
    /// Basic auth is left to the HTTP client and produces no headers here.
    pub fn headers(&self) -> Result<Vec<(&'static str, String)>> {
        self.headers_with_csrf(None)
    }

    /// Like [`Credential::headers`], but a session without its own token falls back
    /// to `cookie_token`, the `csrftoken` cookie of the session.
    pub fn headers_with_csrf(&self, cookie_token: Option<&str>) -> Result<Vec<(&'static str, String)>> {
        match self {
            Credential::ApiKey { username, key } => {
                Ok(vec![("Authorization", format!("ApiKey {username}:{key}"))])
            }
            Credential::Basic { .. } => Ok(Vec::new()),
            Credential::Session { csrf_token } => {
                let token = csrf_token
                    .as_deref()
                    .or(cookie_token)
                    .ok_or(TastyError::MissingCsrfToken)?;
                Ok(vec![("X-CSRFToken", token.to_string())])
            }
        }
    }
}

/// Django's CSRF cookie.
pub const CSRF_COOKIE: &str = "csrftoken";

/// Reads the `csrftoken` value out of a `Cookie` header (`a=1; csrftoken=abc`).
pub fn csrf_from_cookies(header: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == CSRF_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

// Keeps secrets out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::ApiKey { username, .. } => {
                f.debug_struct("ApiKey").field("username", username).finish_non_exhaustive()
            }
            Credential::Basic { username, .. } => {
                f.debug_struct("Basic").field("username", username).finish_non_exhaustive()
            }
            Credential::Session { csrf_token } => f
                .debug_struct("Session")
                .field("has_csrf_token", &csrf_token.is_some())
                .finish(),
        }
    }
}
