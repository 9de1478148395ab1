#![allow(dead_code)]

use serde_json::{json, Value};
use tastytopping::transport::memory::{EndpointResponse, FieldDef, Filtering, LoggedRequest, MemoryServer, ResourceDef};
use tastytopping::transport::Method;
use tastytopping::{fields, Credential, Fields, ResourceFactory, ResourceType};

pub const API_URL: &str = "http://memory/api/v1/";

pub fn api_key() -> Credential {
    Credential::api_key("testuser", "6f2c0e")
}

pub fn user_def() -> ResourceDef {
    ResourceDef::new("user")
        .field(FieldDef::string("username").unique())
        .filter("id", Filtering::All)
        .filter("username", Filtering::All)
        .list_methods(&[Method::Get, Method::Post])
        .detail_methods(&[Method::Get])
}

/// Answers POST with an empty body, so creation has to look the object up again.
/// Detail PATCH is not allowed, so writes go out as PUT.
pub fn test_resource_def() -> ResourceDef {
    ResourceDef::new("test_resource")
        .field(FieldDef::string("path").unique())
        .field(FieldDef::integer("rating").default(50))
        .field(FieldDef::datetime("date").nullable())
        .field(FieldDef::string("title").nullable())
        .field(FieldDef::string("text").nullable().blank())
        .field(FieldDef::to_one("created_by", "user").nullable())
        .filter(
            "path",
            Filtering::only(&["exact", "iexact", "contains", "icontains", "in", "startswith", "endswith"]),
        )
        .filter("rating", Filtering::only(&["exact", "in", "gt", "gte", "lt", "lte", "range", "isnull"]))
        .filter("date", Filtering::All)
        .filter("title", Filtering::All)
        .filter("created_by", Filtering::AllWithRelations)
        .ordering(&["rating", "date", "path"])
        .list_methods(&[Method::Get, Method::Post, Method::Patch, Method::Delete])
        .detail_methods(&[Method::Get, Method::Post, Method::Put, Method::Delete])
        .always_return_data(false)
}

pub fn no_filter_def() -> ResourceDef {
    ResourceDef::new("no_filter")
        .field(FieldDef::string("path").unique())
        .field(FieldDef::integer("rating").default(50))
        .list_methods(&[Method::Get, Method::Post])
        .detail_methods(&[Method::Get, Method::Put, Method::Delete])
        .always_return_data(false)
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

pub fn tree_def() -> ResourceDef {
    ResourceDef::new("tree")
        .field(FieldDef::string("name").unique())
        .field(FieldDef::to_one("parent", "tree").nullable())
        .field(FieldDef::to_many("children", "tree").reverse_of("parent"))
        .filter("name", Filtering::All)
        .filter("parent", Filtering::AllWithRelations)
        .filter("children", Filtering::AllWithRelations)
        .ordering(&["name"])
        .list_endpoint("depth", 0, |call| {
            let deepest = call.objects.iter().map(|o| depth_of(&call.objects, o)).max().unwrap_or(0);
            Ok(EndpointResponse::objects(json!(deepest)))
        })
        .list_endpoint("add", 2, |call| Ok(EndpointResponse::json(json!(call.int_arg(0)? + call.int_arg(1)?))))
        .list_endpoint("mult", 0, |call| {
            Ok(EndpointResponse::json(json!(call.int_kwarg("num1")? * call.int_kwarg("num2")?)))
        })
        .list_endpoint("chained", 2, |call| match call.args.as_slice() {
            [a, b] if a == "nested" && b == "child" => Ok(EndpointResponse::json(json!(true))),
            _ => Err(EndpointResponse::error(404, "")),
        })
        .list_endpoint("prune", 0, |_| Ok(EndpointResponse::empty()))
        .detail_endpoint("depth", 0, |call| {
            let node = call.object.clone().unwrap_or(Value::Null);
            Ok(EndpointResponse::json(json!(depth_of(&call.objects, &node))))
        })
        .detail_endpoint("nested_children", 0, |call| {
            let node = call.object.clone().unwrap_or(Value::Null);
            Ok(EndpointResponse::objects(node["children"].clone()))
        })
}

pub fn container_def() -> ResourceDef {
    ResourceDef::new("container")
        .field(FieldDef::to_one("test", "test_resource").nullable().full())
        .filter("test", Filtering::AllWithRelations)
}

pub fn secret_def() -> ResourceDef {
    ResourceDef::new("secret")
        .field(FieldDef::string("code").unique())
        .filter("code", Filtering::All)
        .require(api_key())
}

/// Logs to the test output when `RUST_LOG` is set. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .with_target(false)
        .compact()
        .try_init();
}

pub fn server() -> MemoryServer {
    init_tracing();
    MemoryServer::builder(API_URL)
        .resource(user_def())
        .resource(test_resource_def())
        .resource(no_filter_def())
        .resource(tree_def())
        .resource(container_def())
        .resource(secret_def())
        .start()
        .expect("memory server starts")
}

pub fn factory(server: &MemoryServer) -> ResourceFactory {
    server.factory().expect("factory builds")
}

/// `test_resource` rows with paths `p0`.. and ratings `0, 10, 20, ...`.
pub fn seed_ratings(resources: &ResourceType, n: usize) {
    let objects: Vec<Fields> = (0..n)
        .map(|i| fields! { "path" => format!("p{i}"), "rating" => (i * 10) as i64 })
        .collect();
    resources.create(objects).expect("bulk create");
}

/// Requests matching `method` whose path ends with `suffix`.
pub fn count_requests(log: &[LoggedRequest], method: Method, suffix: &str) -> usize {
    log.iter().filter(|r| r.method == method && r.path.ends_with(suffix)).count()
}

pub fn ratings(resources: &[tastytopping::Resource]) -> Vec<i64> {
    resources
        .iter()
        .map(|r| r.get("rating").ok().and_then(|f| f.as_i64()).unwrap_or(-1))
        .collect()
}
