//! # Resource Factory
//!
//! The entry point of the client. A [`ResourceFactory`] is bound to one API root and
//! hands out a [`ResourceType`] per resource name:
//!
//! ```rust,no_run
//! use tastytopping::{fields, ClientConfig, ResourceFactory};
//!
//! # fn main() -> tastytopping::Result<()> {
//! let factory = ResourceFactory::from_config(&ClientConfig::new("http://localhost:8000/api/v1/"))?;
//! let trees = factory.resource("tree");
//! let oak = trees.get(fields! { "name" => "oak" })?;
//! println!("{}", oak.get("height")?);
//! # Ok(())
//! # }
//! ```
//!
//! The API root listing (`GET /api/v1/`) is fetched on first use and kept for the life
//! of the factory. Resource types are created on first request and then reused, so
//! every lookup of `"tree"` shares one descriptor and one schema.

use crate::auth::Credential;
use crate::config::ClientConfig;
use crate::context::Context;
use crate::error::{Result, TastyError};
use crate::field::resource_name_from_uri;
use crate::resource::descriptor::Descriptor;
use crate::resource::{Resource, ResourceType};
use crate::transport::{Connection, HttpTransport, Params, Transport};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

/// One entry of the API root listing.
#[derive(Debug, Clone, Deserialize)]
pub struct Endpoint {
    pub list_endpoint: String,
    pub schema: String,
}

struct FactoryInner {
    conn: Connection,
    context: Arc<Context>,
    root: Arc<Descriptor>,
    types: RwLock<HashMap<String, Arc<Descriptor>>>,
    listing: OnceCell<BTreeMap<String, Endpoint>>,
}

#[derive(Clone)]
pub struct ResourceFactory {
    inner: Arc<FactoryInner>,
}

impl fmt::Debug for ResourceFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceFactory")
            .field("api_url", &self.api_url())
            .finish_non_exhaustive()
    }
}

impl ResourceFactory {
    /// A factory sharing the process-wide [`Context`].
    pub fn new(api_url: &str, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::with_context(api_url, transport, Context::global())
    }

    pub fn with_context(api_url: &str, transport: Arc<dyn Transport>, context: Arc<Context>) -> Result<Self> {
        let conn = Connection::new(api_url, transport)?;
        let root = Descriptor::new(&context, "", None, true);
        Ok(Self {
            inner: Arc::new(FactoryInner {
                conn,
                context,
                root,
                types: RwLock::new(HashMap::new()),
                listing: OnceCell::new(),
            }),
        })
    }

    /// An HTTP-backed factory.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(config)?;
        let factory = Self::new(&config.api_url, Arc::new(transport))?;
        factory.set_caching(config.caching);
        Ok(factory)
    }

    /// The resource type called `name`. Nothing is fetched until it is used.
    pub fn resource(&self, name: &str) -> ResourceType {
        if let Some(desc) = self.inner.types.read().get(name) {
            return ResourceType::new(self.clone(), desc.clone());
        }
        let mut types = self.inner.types.write();
        let desc = types
            .entry(name.to_string())
            .or_insert_with(|| Descriptor::new(&self.inner.context, name, Some(&self.inner.root), self.inner.root.caching()))
            .clone();
        ResourceType::new(self.clone(), desc)
    }

    /// Sets the credential of every resource type this factory has made or will make.
    pub fn set_credential(&self, credential: Option<Credential>) {
        self.inner.root.set_credential(credential.clone());
        for desc in self.inner.context.descendants(self.inner.root.id()) {
            desc.set_credential(credential.clone());
        }
    }

    /// Sets the caching default of every resource type. Existing instances keep theirs.
    pub fn set_caching(&self, caching: bool) {
        self.inner.root.set_caching(caching);
        for desc in self.inner.context.descendants(self.inner.root.id()) {
            desc.set_caching(caching);
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.inner.context
    }

    pub fn connection(&self) -> &Connection {
        &self.inner.conn
    }

    pub fn api_url(&self) -> &str {
        self.inner.conn.api_url()
    }

    /// The API root listing: resource name to list and schema endpoints.
    #[instrument(skip(self))]
    pub fn listing(&self) -> Result<&BTreeMap<String, Endpoint>> {
        self.inner.listing.get_or_try_init(|| {
            let conn = self.inner.conn.with_credential(self.inner.root.credential());
            let body = conn.get("", Params::new())?;
            let listing: BTreeMap<String, Endpoint> =
                serde_json::from_value(body.clone()).map_err(|_| TastyError::BadJsonResponse {
                    url: self.api_url().to_string(),
                    body: body.to_string(),
                })?;
            debug!(resources = listing.len(), "Fetched API listing");
            Ok(listing)
        })
    }

    pub fn resource_names(&self) -> Result<Vec<String>> {
        Ok(self.listing()?.keys().cloned().collect())
    }

    pub fn endpoint(&self, name: &str) -> Result<&Endpoint> {
        self.listing()?
            .get(name)
            .ok_or_else(|| TastyError::NonExistentResource {
                url: format!("{}{name}/", self.api_url()),
            })
    }

    /// Whether `uri` points into a resource this API lists.
    pub fn knows_uri(&self, uri: &str) -> bool {
        let Ok(name) = resource_name_from_uri(uri) else {
            return false;
        };
        self.listing().map(|l| l.contains_key(name)).unwrap_or(false)
    }

    pub fn resource_from_uri(&self, uri: &str) -> Result<Resource> {
        let name = resource_name_from_uri(uri)?;
        self.resource(name).from_uri(uri)
    }

    /// Wraps an embedded object (`full=True` relation) without fetching it.
    pub fn resource_from_details(&self, details: &Value) -> Result<Resource> {
        let uri = details
            .get("resource_uri")
            .and_then(Value::as_str)
            .ok_or_else(|| TastyError::BadUri { uri: details.to_string() })?;
        let name = resource_name_from_uri(uri)?;
        self.resource(name).from_details(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Method, MockTransport};
    use serde_json::json;

    fn factory(mock: &MockTransport) -> ResourceFactory {
        ResourceFactory::with_context("http://test/api/v1", Arc::new(mock.clone()), Context::new()).unwrap()
    }

    fn listing() -> Value {
        json!({
            "tree": {"list_endpoint": "/api/v1/tree/", "schema": "/api/v1/tree/schema/"},
            "user": {"list_endpoint": "/api/v1/user/", "schema": "/api/v1/user/schema/"}
        })
    }

    #[test]
    fn listing_is_fetched_once() {
        let mock = MockTransport::new();
        mock.expect(Method::Get, "/api/v1/").return_ok(listing());
        let factory = factory(&mock);

        assert_eq!(factory.resource_names().unwrap(), vec!["tree", "user"]);
        assert!(factory.knows_uri("/api/v1/tree/3/"));
        assert!(!factory.knows_uri("/api/v1/forest/3/"));
        assert!(!factory.knows_uri("no slashes"));
        mock.verify();
        assert_eq!(mock.requests().len(), 1);
    }

    #[test]
    fn unknown_resource_is_reported_with_its_url() {
        let mock = MockTransport::new();
        mock.expect(Method::Get, "/api/v1/").return_ok(listing());
        let err = factory(&mock).endpoint("forest").unwrap_err();
        assert!(matches!(err, TastyError::NonExistentResource { ref url } if url == "http://test/api/v1/forest/"));
    }

    #[test]
    fn resource_types_are_reused() {
        let mock = MockTransport::new();
        let factory = factory(&mock);
        let a = factory.resource("tree");
        let b = factory.resource("tree");
        a.set_caching(false);
        assert!(!b.caching());
        assert!(factory.resource("user").caching());
    }

    #[test]
    fn credentials_cascade_to_existing_and_new_types() {
        let mock = MockTransport::new();
        let factory = factory(&mock);
        let tree = factory.resource("tree");
        let derived = tree.derive();

        factory.set_credential(Some(Credential::api_key("alice", "k")));
        assert!(tree.credential().is_some());
        assert!(derived.credential().is_some());
        assert!(factory.resource("user").credential().is_some());

        tree.set_credential(None);
        assert!(tree.credential().is_none());
        assert!(derived.credential().is_none());
        assert!(factory.resource("user").credential().is_some());
    }
}
