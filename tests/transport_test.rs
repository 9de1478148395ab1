//! Wire-level behaviour: the exact requests the client sends, checked with
//! `MockTransport` expectations.

use serde_json::{json, Value};
use std::sync::Arc;
use tastytopping::transport::{Method, MockTransport};
use tastytopping::{fields, Context, Credential, ResourceFactory, ResourceType, TastyError};

fn listing() -> Value {
    json!({
        "tree": {"list_endpoint": "/api/v1/tree/", "schema": "/api/v1/tree/schema/"}
    })
}

fn tree_schema(detail: &[&str]) -> Value {
    json!({
        "fields": {
            "id": {"type": "integer", "unique": true, "readonly": true},
            "name": {"type": "string", "unique": true},
            "parent": {"type": "related", "related_type": "to_one", "nullable": true},
            "resource_uri": {"type": "string", "readonly": true}
        },
        "filtering": {"name": 1, "parent": 2},
        "ordering": ["name"],
        "allowed_list_http_methods": ["get", "post", "patch", "delete"],
        "allowed_detail_http_methods": detail
    })
}

fn oak(id: u64) -> Value {
    json!({"id": id, "name": "oak", "parent": null, "resource_uri": format!("/api/v1/tree/{id}/")})
}

/// A `tree` type whose listing and schema are already loaded.
fn trees(mock: &MockTransport, detail: &[&str]) -> ResourceType {
    mock.expect(Method::Get, "/api/v1/").return_ok(listing());
    mock.expect(Method::Get, "/api/v1/tree/schema/").return_ok(tree_schema(detail));
    let factory =
        ResourceFactory::with_context("http://test/api/v1/", Arc::new(mock.clone()), Context::new()).unwrap();
    let trees = factory.resource("tree");
    trees.schema().unwrap();
    trees
}

#[test]
fn creation_posts_the_streamed_fields() {
    let mock = MockTransport::new();
    let trees = trees(&mock, &["get", "patch"]);
    mock.expect(Method::Post, "/api/v1/tree/").return_ok(oak(1));
    mock.expect(Method::Post, "/api/v1/tree/").return_ok(json!({
        "id": 2, "name": "acorn", "parent": "/api/v1/tree/1/", "resource_uri": "/api/v1/tree/2/"
    }));

    let parent = trees.new_resource(fields! { "name" => "oak" }).unwrap();
    let child = trees.new_resource(fields! { "name" => "acorn", "parent" => &parent }).unwrap();
    child.save().unwrap();

    let sent = mock.requests();
    assert_eq!(sent[2].body, Some(json!({"name": "oak"})));
    assert_eq!(sent[3].body, Some(json!({"name": "acorn", "parent": "/api/v1/tree/1/"})));
    assert_eq!(sent[3].url, "http://test/api/v1/tree/");
    mock.verify();
}

#[test]
fn bulk_body_has_objects_and_deleted_objects() {
    let mock = MockTransport::new();
    let trees = trees(&mock, &["get", "patch"]);
    mock.expect(Method::Patch, "/api/v1/tree/").return_empty();

    let doomed = trees.from_details(&oak(4)).unwrap();
    let renamed = trees.from_details(&json!({
        "id": 5, "name": "elm", "parent": null, "resource_uri": "/api/v1/tree/5/"
    }))
    .unwrap();
    renamed.set("name", "old elm").unwrap();
    trees.bulk(vec![fields! { "name" => "ash" }], &[renamed], &[doomed.clone()]).unwrap();

    let body = mock.requests().last().and_then(|r| r.body.clone()).unwrap();
    assert_eq!(
        body,
        json!({
            "objects": [{"name": "ash"}, {"name": "old elm", "resource_uri": "/api/v1/tree/5/"}],
            "deleted_objects": ["/api/v1/tree/4/"]
        })
    );
    assert!(!doomed.is_alive());
    mock.verify();
}

#[test]
fn refused_patch_falls_back_to_put_with_every_field() {
    let mock = MockTransport::new();
    let trees = trees(&mock, &["get", "patch", "put"]);
    mock.expect(Method::Patch, "/api/v1/tree/1/").return_err(TastyError::MethodNotAllowed {
        url: "http://test/api/v1/tree/1/".into(),
        method: "PATCH".into(),
    });
    mock.expect(Method::Put, "/api/v1/tree/1/").return_empty();

    let tree = trees.from_details(&oak(1)).unwrap();
    tree.set("name", "birch").unwrap();
    tree.save().unwrap();

    let put = mock.requests().last().cloned().unwrap();
    assert_eq!(
        put.body,
        Some(json!({"id": 1, "name": "birch", "parent": null, "resource_uri": "/api/v1/tree/1/"}))
    );
    mock.verify();
}

#[test]
fn disallowed_methods_never_reach_the_wire() {
    let mock = MockTransport::new();
    let trees = trees(&mock, &["get"]);
    let tree = trees.from_details(&oak(1)).unwrap();

    tree.set("name", "birch").unwrap();
    assert!(matches!(tree.save(), Err(TastyError::RestMethodNotAllowed { scope: "detail", .. })));
    assert!(matches!(tree.delete(), Err(TastyError::RestMethodNotAllowed { .. })));
    assert_eq!(mock.requests().len(), 2);
    mock.verify();
}

#[test]
fn pagination_follows_next_links() {
    let mock = MockTransport::new();
    let trees = trees(&mock, &["get"]);
    mock.expect(Method::Get, "/api/v1/tree/").return_ok(json!({
        "meta": {"next": "/api/v1/tree/?limit=1&offset=1", "total_count": 2},
        "objects": [oak(1)]
    }));
    mock.expect(Method::Get, "/api/v1/tree/").return_ok(json!({
        "meta": {"next": null, "total_count": 2},
        "objects": [oak(2)]
    }));

    let found: Vec<_> = trees.all().iterator().unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(found.len(), 2);
    let sent = mock.requests();
    assert_eq!(sent[3].url, "http://test/api/v1/tree/?limit=1&offset=1");
    assert!(sent[3].params.is_empty());
    mock.verify();
}

#[test]
fn credentials_ride_along() {
    let mock = MockTransport::new();
    let trees = trees(&mock, &["get"]);
    trees.set_credential(Some(Credential::api_key("alice", "k")));
    mock.expect(Method::Get, "/api/v1/tree/").return_ok(json!({"meta": {"total_count": 0}, "objects": []}));

    assert_eq!(trees.all().count().unwrap(), 0);
    let sent = mock.requests();
    assert_eq!(sent.last().and_then(|r| r.credential.clone()), Some(Credential::api_key("alice", "k")));
    mock.verify();
}

#[test]
fn unreachable_memory_server() {
    let server = tastytopping::transport::MemoryServer::builder("http://memory/api/v1/").start().unwrap();
    let factory = server.factory().unwrap();
    server.shutdown();

    let err = factory.resource_names().unwrap_err();
    assert!(matches!(err, TastyError::CannotConnectToAddress { .. }));
}
