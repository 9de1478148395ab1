//! # HTTP Transport
//!
//! [`HttpTransport`] talks to a real TastyPie deployment with a blocking `reqwest`
//! client. Status and body handling lives in [`classify_response`] so the in-memory
//! server can share it.
//!
//! The client keeps cookies. Seed a Django session with [`HttpTransport::add_cookie`]
//! (or let a login response set it); [`Credential::Session`] then reads its CSRF token
//! from the stored `csrftoken` cookie.

use super::{query_pairs, Method, Request, Transport};
use crate::auth::{csrf_from_cookies, Credential};
use crate::config::ClientConfig;
use crate::error::{Result, TastyError};
use reqwest::cookie::{CookieStore, Jar};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

pub struct HttpTransport {
    client: reqwest::blocking::Client,
    cookies: Arc<Jar>,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let cookies = Arc::new(Jar::default());
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .cookie_provider(cookies.clone())
            .build()
            .map_err(|e| TastyError::CannotConnectToAddress {
                url: config.api_url.clone(),
                source: Some(Box::new(e)),
            })?;
        Ok(Self { client, cookies })
    }

    /// Stores a `Set-Cookie` style string (`sessionid=...; Path=/`) for `url`.
    pub fn add_cookie(&self, cookie: &str, url: &str) -> Result<()> {
        let url = Url::parse(url).map_err(|_| TastyError::BadUri { uri: url.to_string() })?;
        self.cookies.add_cookie_str(cookie, &url);
        Ok(())
    }

    /// The `csrftoken` cookie the jar would send to `url`.
    pub fn csrf_token(&self, url: &Url) -> Option<String> {
        let header = self.cookies.cookies(url)?;
        csrf_from_cookies(header.to_str().ok()?)
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: Request) -> Result<Option<Value>> {
        let mut url = Url::parse(&request.url).map_err(|_| TastyError::BadUri {
            uri: request.url.clone(),
        })?;
        let pairs = query_pairs(&request.params);
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }

        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.client.request(method, url.as_str());
        if let Some(credential) = &request.credential {
            let cookie_token = match credential {
                Credential::Session { csrf_token: None } => self.csrf_token(&url),
                _ => None,
            };
            for (name, value) in credential.headers_with_csrf(cookie_token.as_deref())? {
                builder = builder.header(name, value);
            }
            if let Credential::Basic { username, password } = credential {
                builder = builder.basic_auth(username, Some(password));
            }
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().map_err(|e| {
            warn!(url = %request.url, error = %e, "Request failed");
            TastyError::CannotConnectToAddress {
                url: request.url.clone(),
                source: Some(Box::new(e)),
            }
        })?;
        let status = response.status().as_u16();
        let body = response.text().map_err(|e| TastyError::CannotConnectToAddress {
            url: request.url.clone(),
            source: Some(Box::new(e)),
        })?;
        debug!(url = %request.url, status, bytes = body.len(), "Response");
        classify_response(status, &body, &request.url, request.method)
    }
}

const NOT_FOUND_MARKER: &str = "NotFound: Invalid resource";
const MISSING_KEYWORD_MARKER: &str = "MultiValueDictKeyError: ";

/// Maps a status code and body onto the crate's error taxonomy.
pub fn classify_response(status: u16, body: &str, url: &str, method: Method) -> Result<Option<Value>> {
    match status {
        404 | 410 => Err(TastyError::ResourceDeleted {
            uri: url.to_string(),
        }),
        405 => Err(TastyError::MethodNotAllowed {
            url: url.to_string(),
            method: method.to_string(),
        }),
        s if s >= 400 => {
            if body.contains(MISSING_KEYWORD_MARKER) {
                return Err(TastyError::MissingKeyword {
                    url: url.to_string(),
                    body: body.to_string(),
                });
            }
            Err(TastyError::ErrorResponse {
                status,
                url: url.to_string(),
                body: body.to_string(),
            })
        }
        _ if body.trim().is_empty() => Ok(None),
        _ => match serde_json::from_str(body) {
            Ok(value) => Ok(Some(value)),
            Err(_) if body.contains(NOT_FOUND_MARKER) => Err(TastyError::NonExistentResource {
                url: url.to_string(),
            }),
            Err(_) if body.contains(MISSING_KEYWORD_MARKER) => Err(TastyError::MissingKeyword {
                url: url.to_string(),
                body: body.to_string(),
            }),
            Err(_) => Err(TastyError::BadJsonResponse {
                url: url.to_string(),
                body: body.to_string(),
            }),
        },
    }
}
