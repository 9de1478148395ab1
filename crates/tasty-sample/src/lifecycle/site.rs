use crate::clients::{EntryClient, TreeClient, UserClient};
use crate::error::SiteError;
use serde_json::{json, Value};
use tastytopping::transport::memory::{EndpointResponse, FieldDef, Filtering, MemoryServer, ResourceDef};
use tastytopping::transport::Method;
use tastytopping::{ClientConfig, ResourceFactory, TastyError};
use tracing::{info, instrument};

/// API root the in-memory site is served under.
pub const MEMORY_API_URL: &str = "http://memory/api/v1/";

/// The running site: a factory, the clients built from it, and the in-memory server
/// when there is no remote one.
pub struct Site {
    pub users: UserClient,
    pub trees: TreeClient,
    pub entries: EntryClient,
    factory: ResourceFactory,
    server: Option<MemoryServer>,
}

impl Site {
    /// Serves the site from an in-memory server with a fresh identity context.
    #[instrument]
    pub fn in_memory() -> Result<Self, SiteError> {
        let server = definitions()
            .into_iter()
            .fold(MemoryServer::builder(MEMORY_API_URL), |builder, def| builder.resource(def))
            .start()?;
        let factory = server.factory()?;
        info!(api_url = MEMORY_API_URL, "Site served from memory");
        Ok(Self::wire(factory, Some(server)))
    }

    #[instrument(skip(config), fields(api_url = %config.api_url))]
    pub fn connect(config: &ClientConfig) -> Result<Self, SiteError> {
        let factory = ResourceFactory::from_config(config)?;
        info!("Site connected");
        Ok(Self::wire(factory, None))
    }

    /// Connects to `TASTY_API_URL`, or serves from memory when it is unset.
    pub fn from_env() -> Result<Self, SiteError> {
        match ClientConfig::from_env() {
            Ok(config) => Self::connect(&config),
            Err(TastyError::Config { key: "TASTY_API_URL", .. }) => Self::in_memory(),
            Err(e) => Err(e.into()),
        }
    }

    fn wire(factory: ResourceFactory, server: Option<MemoryServer>) -> Self {
        Self {
            users: UserClient::new(factory.resource("user")),
            trees: TreeClient::new(factory.resource("tree")),
            entries: EntryClient::new(factory.resource("entry")),
            factory,
            server,
        }
    }

    pub fn factory(&self) -> &ResourceFactory {
        &self.factory
    }

    /// Requests the in-memory server has handled, or `None` for a remote site.
    pub fn request_count(&self) -> Option<usize> {
        self.server.as_ref().map(MemoryServer::request_count)
    }

    pub fn shutdown(self) {
        if let Some(server) = &self.server {
            server.shutdown();
        }
        info!("Site shut down");
    }
}

fn depth_of(objects: &[Value], node: &Value) -> i64 {
    let mut depth = 0;
    let mut parent = node["parent"].clone();
    while let Some(uri) = parent.as_str() {
        depth += 1;
        parent = objects
            .iter()
            .find(|o| o["resource_uri"] == json!(uri))
            .map(|o| o["parent"].clone())
            .unwrap_or(Value::Null);
    }
    depth
}

/// The resources the in-memory site serves.
pub fn definitions() -> Vec<ResourceDef> {
    let user = ResourceDef::new("user")
        .field(FieldDef::string("username").unique())
        .filter("id", Filtering::All)
        .filter("username", Filtering::All)
        .list_methods(&[Method::Get, Method::Post])
        .detail_methods(&[Method::Get]);

    let tree = ResourceDef::new("tree")
        .field(FieldDef::string("name").unique())
        .field(FieldDef::to_one("parent", "tree").nullable())
        .field(FieldDef::to_many("children", "tree").reverse_of("parent"))
        .filter("name", Filtering::All)
        .filter("parent", Filtering::AllWithRelations)
        .ordering(&["name"])
        .list_endpoint("depth", 0, |call| {
            let deepest = call.objects.iter().map(|o| depth_of(&call.objects, o)).max().unwrap_or(0);
            Ok(EndpointResponse::objects(json!(deepest)))
        })
        .detail_endpoint("depth", 0, |call| {
            let node = call.object.clone().unwrap_or(Value::Null);
            Ok(EndpointResponse::json(json!(depth_of(&call.objects, &node))))
        });

    let entry = ResourceDef::new("entry")
        .field(FieldDef::string("path").unique())
        .field(FieldDef::integer("rating").default(50))
        .field(FieldDef::string("title").nullable())
        .field(FieldDef::datetime("date").nullable())
        .field(FieldDef::to_one("created_by", "user").nullable())
        .filter("path", Filtering::All)
        .filter("rating", Filtering::All)
        .filter("date", Filtering::All)
        .filter("created_by", Filtering::AllWithRelations)
        .ordering(&["rating", "path", "date"])
        .list_methods(&[Method::Get, Method::Post, Method::Patch, Method::Delete])
        .detail_methods(&[Method::Get, Method::Put, Method::Patch, Method::Delete]);

    vec![user, tree, entry]
}
