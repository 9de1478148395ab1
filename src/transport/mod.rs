//! # Transport
//!
//! Everything the ORM knows about the wire goes through one seam: the [`Transport`]
//! trait, which sends a single [`Request`] and hands back the decoded JSON body (or
//! `None` for an empty body). Status codes have already been mapped to
//! [`TastyError`] variants by the time a result leaves `send`.
//!
//! Three implementations ship with the crate:
//!
//! | Transport | Use |
//! |-----------|-----|
//! | [`HttpTransport`] | Real servers, over blocking `reqwest` |
//! | [`MemoryServer`] | An in-process TastyPie server for tests and demos |
//! | [`MockTransport`] | Canned responses with expectations, for unit tests |
//!
//! [`Connection`] layers the operations the ORM needs (`get`, `post`, `paginate`,
//! `bulk`, ...) on top of any transport, resolving relative URIs against the API root.

pub mod http;
pub mod memory;
pub mod mock;

pub use http::{classify_response, HttpTransport};
pub use memory::{MemoryServer, MemoryTransport};
pub use mock::MockTransport;

use crate::auth::Credential;
use crate::error::{Result, TastyError};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Query parameters. Arrays are sent as repeated keys.
pub type Params = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Lowercase name, as used in `allowed_*_http_methods`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "get",
            Method::Post => "post",
            Method::Put => "put",
            Method::Patch => "patch",
            Method::Delete => "delete",
        }
    }

    pub fn parse(name: &str) -> Option<Method> {
        match name.to_ascii_lowercase().as_str() {
            "get" => Some(Method::Get),
            "post" => Some(Method::Post),
            "put" => Some(Method::Put),
            "patch" => Some(Method::Patch),
            "delete" => Some(Method::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Absolute URL. May already carry a query string (e.g. `meta.next`).
    pub url: String,
    pub params: Params,
    pub body: Option<Value>,
    pub credential: Option<Credential>,
}

/// Sends one request and returns the decoded body.
pub trait Transport: Send + Sync {
    fn send(&self, request: Request) -> Result<Option<Value>>;
}

/// Flattens params into the `(key, value)` pairs of a query string.
///
/// Nulls are dropped, arrays become repeated keys and objects are sent as JSON text.
pub fn query_pairs(params: &Params) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (key, value) in params {
        match value {
            Value::Array(items) => {
                for item in items {
                    if let Some(text) = query_value(item) {
                        pairs.push((key.clone(), text));
                    }
                }
            }
            other => {
                if let Some(text) = query_value(other) {
                    pairs.push((key.clone(), text));
                }
            }
        }
    }
    pairs
}

fn query_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// A transport bound to an API root and, optionally, a credential.
#[derive(Clone)]
pub struct Connection {
    transport: Arc<dyn Transport>,
    base: Url,
    credential: Option<Credential>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("base", &self.base.as_str())
            .field("credential", &self.credential)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(api_url: &str, transport: Arc<dyn Transport>) -> Result<Self> {
        let mut root = api_url.to_string();
        if !root.ends_with('/') {
            root.push('/');
        }
        let base = Url::parse(&root).map_err(|_| TastyError::BadUri { uri: root.clone() })?;
        Ok(Self {
            transport,
            base,
            credential: None,
        })
    }

    /// A copy of this connection that authenticates with `credential`.
    pub fn with_credential(&self, credential: Option<Credential>) -> Self {
        Self {
            transport: self.transport.clone(),
            base: self.base.clone(),
            credential,
        }
    }

    pub fn api_url(&self) -> &str {
        self.base.as_str()
    }

    /// Resolves a server-relative URI (`/api/v1/tree/1/`) to an absolute URL.
    pub fn resolve(&self, uri: &str) -> Result<String> {
        self.base
            .join(uri)
            .map(String::from)
            .map_err(|_| TastyError::BadUri { uri: uri.to_string() })
    }

    fn send(&self, method: Method, uri: &str, params: Params, body: Option<Value>) -> Result<Option<Value>> {
        let url = self.resolve(uri)?;
        debug!(%method, %url, params = params.len(), has_body = body.is_some(), "Sending request");
        self.transport.send(Request {
            method,
            url,
            params,
            body,
            credential: self.credential.clone(),
        })
    }

    /// GET; an empty body reads as `null`.
    pub fn get(&self, uri: &str, params: Params) -> Result<Value> {
        Ok(self.send(Method::Get, uri, params, None)?.unwrap_or(Value::Null))
    }

    pub fn post(&self, uri: &str, body: Value) -> Result<Option<Value>> {
        self.send(Method::Post, uri, Params::new(), Some(body))
    }

    pub fn put(&self, uri: &str, body: Value) -> Result<Option<Value>> {
        self.send(Method::Put, uri, Params::new(), Some(body))
    }

    pub fn patch(&self, uri: &str, body: Value) -> Result<Option<Value>> {
        self.send(Method::Patch, uri, Params::new(), Some(body))
    }

    pub fn delete(&self, uri: &str) -> Result<()> {
        self.send(Method::Delete, uri, Params::new(), None).map(|_| ())
    }

    /// Sends an arbitrary verb with both params and a body. Used by nested endpoints.
    pub fn request(&self, method: Method, uri: &str, params: Params, body: Option<Value>) -> Result<Option<Value>> {
        self.send(method, uri, params, body)
    }

    /// Lazily walks a list endpoint page by page, following `meta.next`.
    pub fn paginate(&self, uri: &str, params: Params) -> Pages {
        Pages {
            conn: self.clone(),
            next: Some((uri.to_string(), params)),
        }
    }

    /// One PATCH on a list endpoint creating/updating `objects` and deleting `deleted`.
    ///
    /// TastyPie answers 202: the server may still fail the batch after accepting it.
    pub fn bulk(&self, uri: &str, objects: Vec<Value>, deleted: Vec<String>) -> Result<()> {
        let body = json!({ "objects": objects, "deleted_objects": deleted });
        self.patch(uri, body).map(|_| ())
    }
}

/// Iterator over the pages of a list endpoint.
///
/// Each call to [`Connection::paginate`] starts again from the first page.
pub struct Pages {
    conn: Connection,
    next: Option<(String, Params)>,
}

impl Iterator for Pages {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        let (uri, params) = self.next.take()?;
        match self.conn.get(&uri, params) {
            Ok(page) => {
                self.next = page
                    .pointer("/meta/next")
                    .and_then(Value::as_str)
                    .filter(|next| !next.is_empty())
                    .map(|next| (next.to_string(), Params::new()));
                Some(Ok(page))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_pairs_repeat_arrays_and_drop_nulls() {
        let mut params = Params::new();
        params.insert("rating__in".into(), json!([20, 30]));
        params.insert("path".into(), json!("a b"));
        params.insert("date".into(), Value::Null);
        params.insert("flag".into(), json!(true));
        assert_eq!(
            query_pairs(&params),
            vec![
                ("flag".to_string(), "true".to_string()),
                ("path".to_string(), "a b".to_string()),
                ("rating__in".to_string(), "20".to_string()),
                ("rating__in".to_string(), "30".to_string()),
            ]
        );
    }

    #[test]
    fn method_round_trips_through_schema_names() {
        for method in [Method::Get, Method::Post, Method::Put, Method::Patch, Method::Delete] {
            assert_eq!(Method::parse(method.as_str()), Some(method));
        }
        assert_eq!(Method::Get.to_string(), "GET");
    }
}
