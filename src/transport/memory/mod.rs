//! # In-memory TastyPie server
//!
//! A small TastyPie look-alike running on its own thread, for tests and demos that
//! want real query semantics without a Django process:
//!
//! ```rust
//! use tastytopping::fields;
//! use tastytopping::transport::memory::{FieldDef, Filtering, MemoryServer, ResourceDef};
//!
//! let server = MemoryServer::builder("http://memory/api/v1/")
//!     .resource(
//!         ResourceDef::new("tree")
//!             .field(FieldDef::string("name").unique())
//!             .filter("name", Filtering::All)
//!             .ordering(&["name"]),
//!     )
//!     .start()
//!     .unwrap();
//!
//! let trees = server.factory().unwrap().resource("tree");
//! trees.create(vec![fields! { "name" => "oak" }, fields! { "name" => "elm" }]).unwrap();
//! assert_eq!(trees.all().count().unwrap(), 2);
//! ```
//!
//! The server actor owns the store and processes one request at a time:
//!
//! ```text
//! MemoryTransport::send ──> [ channel ] ──> ServerActor::run
//!          ^                                     │
//!          └──────────── [ reply channel ] <─────┘
//! ```
//!
//! | Behaviour | Detail |
//! |-----------|--------|
//! | Listing | `GET <api>/` lists every resource |
//! | Schema | generated from the [`ResourceDef`] |
//! | Filtering | every TastyPie suffix except `regex`, `iregex`, `search` and `week_day`, one relation deep |
//! | Paging | `limit` (default 20, `0` for all), `offset`, `meta.next` |
//! | Bulk | `PATCH` on a list endpoint, all or nothing, answers 202 |
//! | Errors | 404/405/401, 400 for bad data, 500 for unique violations |
//!
//! Status codes and bodies are mapped to errors by the same code the HTTP transport
//! uses.

mod definition;
mod server;

pub use definition::{EndpointCall, EndpointHandler, EndpointResponse, FieldDef, Filtering, ResourceDef};
pub use server::LoggedRequest;

use super::{classify_response, Request, Transport};
use crate::context::Context;
use crate::error::{Result, TastyError};
use crate::factory::ResourceFactory;
use parking_lot::Mutex;
use serde_json::Value;
use server::{ServerActor, ServerRequest};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use tracing::info;
use url::Url;

pub struct MemoryServerBuilder {
    api_url: String,
    defs: Vec<ResourceDef>,
}

impl MemoryServerBuilder {
    pub fn resource(mut self, def: ResourceDef) -> Self {
        self.defs.push(def);
        self
    }

    /// Spawns the server thread.
    pub fn start(self) -> Result<MemoryServer> {
        let mut api_url = self.api_url;
        if !api_url.ends_with('/') {
            api_url.push('/');
        }
        let api_path = Url::parse(&api_url)
            .map_err(|_| TastyError::BadUri { uri: api_url.clone() })?
            .path()
            .to_string();

        let (sender, receiver) = mpsc::channel();
        let actor = ServerActor::new(receiver, api_path, self.defs);
        let handle = thread::Builder::new()
            .name("tasty-memory-server".into())
            .spawn(move || actor.run())
            .map_err(|e| TastyError::CannotConnectToAddress {
                url: api_url.clone(),
                source: Some(Box::new(e)),
            })?;
        info!(api_url = %api_url, "Memory server spawned");
        Ok(MemoryServer {
            api_url,
            sender,
            handle: Mutex::new(Some(handle)),
        })
    }
}

/// Handle on a running in-memory server. Dropping it stops the server.
pub struct MemoryServer {
    api_url: String,
    sender: mpsc::Sender<ServerRequest>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryServer {
    pub fn builder(api_url: &str) -> MemoryServerBuilder {
        MemoryServerBuilder {
            api_url: api_url.to_string(),
            defs: Vec::new(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            sender: self.sender.clone(),
        }
    }

    /// A factory talking to this server, with its own [`Context`].
    pub fn factory(&self) -> Result<ResourceFactory> {
        self.factory_with(Context::new())
    }

    pub fn factory_with(&self, context: Arc<Context>) -> Result<ResourceFactory> {
        ResourceFactory::with_context(&self.api_url, Arc::new(self.transport()), context)
    }

    /// Every request handled since start or the last [`MemoryServer::clear_log`].
    pub fn requests(&self) -> Vec<LoggedRequest> {
        let (respond_to, response) = mpsc::channel();
        if self.sender.send(ServerRequest::Log { respond_to }).is_err() {
            return Vec::new();
        }
        response.recv().unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests().len()
    }

    pub fn clear_log(&self) {
        let _ = self.sender.send(ServerRequest::ClearLog);
    }

    /// Stops the server thread and waits for it. Later requests fail to connect.
    pub fn shutdown(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        let _ = self.sender.send(ServerRequest::Shutdown);
        let _ = handle.join();
    }
}

impl Drop for MemoryServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// [`Transport`] that hands requests to a [`MemoryServer`].
#[derive(Clone)]
pub struct MemoryTransport {
    sender: mpsc::Sender<ServerRequest>,
}

impl Transport for MemoryTransport {
    fn send(&self, request: Request) -> Result<Option<Value>> {
        let url = request.url.clone();
        let method = request.method;
        let unreachable = || TastyError::CannotConnectToAddress {
            url: url.clone(),
            source: None,
        };
        let (respond_to, response) = mpsc::channel();
        self.sender
            .send(ServerRequest::Handle { request, respond_to })
            .map_err(|_| unreachable())?;
        let reply = response.recv().map_err(|_| unreachable())?;
        classify_response(reply.status, &reply.body, &url, method)
    }
}
