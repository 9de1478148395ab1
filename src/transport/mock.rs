//! # Mock Transport
//!
//! `MockTransport` answers requests from a queue of expectations instead of a server.
//! It is the quickest way to pin down exactly which calls an operation makes, or to
//! inject failures that are awkward to provoke from a real server.
//!
//! | Feature | MockTransport | MemoryServer |
//! |---------|---------------|--------------|
//! | **State** | None (canned responses) | Real store, filtering, pagination |
//! | **Call order** | Asserted | Logged |
//! | **Error injection** | Easy (`return_err`) | Needs the right data |
//!
//! ```rust
//! use serde_json::json;
//! use std::sync::Arc;
//! use tastytopping::transport::{Method, MockTransport};
//! use tastytopping::{Context, ResourceFactory};
//!
//! let mock = MockTransport::new();
//! mock.expect(Method::Get, "/api/v1/")
//!     .return_ok(json!({"tree": {"list_endpoint": "/api/v1/tree/", "schema": "/api/v1/tree/schema/"}}));
//!
//! let factory = ResourceFactory::with_context("http://test/api/v1/", Arc::new(mock.clone()), Context::new()).unwrap();
//! assert_eq!(factory.resource_names().unwrap(), vec!["tree".to_string()]);
//! mock.verify();
//! ```

use super::{Method, Request, Transport};
use crate::error::{Result, TastyError};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;

struct Expectation {
    method: Method,
    url: String,
    response: Result<Option<Value>>,
}

/// A transport that replays queued responses in order.
///
/// An expectation matches when the method is equal and the request URL (without its
/// query string) ends with the expected URL, so tests can use server-relative paths.
#[derive(Clone, Default)]
pub struct MockTransport {
    expectations: Arc<Mutex<VecDeque<Expectation>>>,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expects a request with this method and URL next.
    pub fn expect(&self, method: Method, url: &str) -> ExpectationBuilder {
        ExpectationBuilder {
            method,
            url: url.to_string(),
            expectations: self.expectations.clone(),
        }
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    /// Panics if any expectation is still outstanding.
    pub fn verify(&self) {
        let remaining = self.expectations.lock();
        if !remaining.is_empty() {
            let pending: Vec<String> = remaining
                .iter()
                .map(|e| format!("{} {}", e.method, e.url))
                .collect();
            panic!("Not all expectations were met. {} remaining: {pending:?}", remaining.len());
        }
    }
}

impl Transport for MockTransport {
    fn send(&self, request: Request) -> Result<Option<Value>> {
        self.requests.lock().push(request.clone());
        let expectation = self.expectations.lock().pop_front();
        let path = request.url.split('?').next().unwrap_or_default();
        match expectation {
            Some(e) if e.method == request.method && path.ends_with(&e.url) => e.response,
            Some(e) => panic!(
                "Unexpected request {} {}; expected {} {}",
                request.method, request.url, e.method, e.url
            ),
            None => panic!("Unexpected request {} {}; no expectations left", request.method, request.url),
        }
    }
}

/// Builder returned by [`MockTransport::expect`].
pub struct ExpectationBuilder {
    method: Method,
    url: String,
    expectations: Arc<Mutex<VecDeque<Expectation>>>,
}

impl ExpectationBuilder {
    /// Responds with a JSON body.
    pub fn return_ok(self, body: Value) {
        self.push(Ok(Some(body)));
    }

    /// Responds with an empty body (e.g. 202/204).
    pub fn return_empty(self) {
        self.push(Ok(None));
    }

    pub fn return_err(self, error: TastyError) {
        self.push(Err(error));
    }

    fn push(self, response: Result<Option<Value>>) {
        self.expectations.lock().push_back(Expectation {
            method: self.method,
            url: self.url,
            response,
        });
    }
}
