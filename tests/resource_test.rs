mod common;

use chrono::NaiveDate;
use common::count_requests;
use std::collections::HashSet;
use tastytopping::transport::Method;
use tastytopping::{fields, Attr, Field, TastyError};

// ============================================================================
// CREATION
// ============================================================================

#[test]
fn creation_is_deferred_until_first_use() {
    let server = common::server();
    let trees = common::factory(&server).resource("tree");
    trees.schema().unwrap();
    server.clear_log();

    let oak = trees.new_resource(fields! { "name" => "oak" }).unwrap();
    assert!(oak.peek_uri().is_none());
    assert_eq!(server.request_count(), 0);
    assert_eq!(oak.to_string(), "<\"unsaved\": {\"name\": \"oak\"}>");

    assert_eq!(oak.get("name").unwrap().as_str(), Some("oak"));
    assert_eq!(oak.peek_uri().as_deref(), Some("/api/v1/tree/1/"));
    assert_eq!(count_requests(&server.requests(), Method::Post, "/api/v1/tree/"), 1);

    // Reads after creation come from the POST response.
    oak.get("parent").unwrap();
    assert_eq!(server.request_count(), 1);
}

#[test]
fn creation_without_a_response_body_looks_the_object_up() {
    let server = common::server();
    let resources = common::factory(&server).resource("test_resource");
    resources.schema().unwrap();
    server.clear_log();

    let created = resources.new_resource(fields! { "path" => "look/me/up" }).unwrap().save().unwrap();
    assert_eq!(created.peek_uri().as_deref(), Some("/api/v1/test_resource/1/"));
    assert_eq!(created.get("rating").unwrap().as_i64(), Some(50));

    let log = server.requests();
    assert_eq!(count_requests(&log, Method::Post, "/api/v1/test_resource/"), 1);
    assert_eq!(count_requests(&log, Method::Get, "/api/v1/test_resource/"), 1);
    assert!(log[1].query.contains(&("path".to_string(), "look/me/up".to_string())));
}

#[test]
fn creation_without_filters_cannot_be_found_again() {
    let server = common::server();
    let unfiltered = common::factory(&server).resource("no_filter");

    let err = unfiltered.new_resource(fields! { "path" => "a" }).unwrap().save().unwrap_err();
    assert!(matches!(err, TastyError::CreatedResourceNotFound { ref resource, .. } if resource == "no_filter"));
}

#[test]
fn server_side_validation_errors_surface() {
    let server = common::server();
    let trees = common::factory(&server).resource("tree");
    trees.new_resource(fields! { "name" => "oak" }).unwrap().save().unwrap();

    let err = trees.new_resource(fields! { "name" => "oak" }).unwrap().save().unwrap_err();
    assert!(matches!(err, TastyError::ErrorResponse { status: 500, ref body, .. } if body.contains("UNIQUE")));
    let err = common::factory(&server)
        .resource("test_resource")
        .new_resource(fields! {})
        .unwrap()
        .save()
        .unwrap_err();
    assert!(matches!(err, TastyError::ErrorResponse { status: 400, .. }));
}

// ============================================================================
// READS
// ============================================================================

#[test]
fn defaults_fill_fields_the_server_left_out() {
    let server = common::server();
    let resources = common::factory(&server).resource("test_resource");
    let created = resources.new_resource(fields! { "path" => "x" }).unwrap().save().unwrap();

    assert_eq!(created.get("rating").unwrap().as_i64(), Some(50));
    assert!(created.get("title").unwrap().is_null());
    assert!(matches!(created.get("nope"), Err(TastyError::UnknownField { .. })));
}

#[test]
fn embedded_resources_need_no_extra_request() {
    let server = common::server();
    let factory = common::factory(&server);
    let inner = factory
        .resource("test_resource")
        .new_resource(fields! { "path" => "inner", "title" => "embedded" })
        .unwrap()
        .save()
        .unwrap();
    factory
        .resource("container")
        .new_resource(fields! { "test" => &inner })
        .unwrap()
        .save()
        .unwrap();

    let fresh = server.factory().unwrap().resource("container");
    let container = fresh.all().first().unwrap().unwrap();
    server.clear_log();
    let test = container.get("test").unwrap();
    let test = test.as_resource().unwrap();
    assert_eq!(test.get("title").unwrap().as_str(), Some("embedded"));
    assert_eq!(server.request_count(), 0);
}

#[test]
fn reverse_relations_list_the_children() {
    let server = common::server();
    let trees = common::factory(&server).resource("tree");
    let root = trees.new_resource(fields! { "name" => "root" }).unwrap().save().unwrap();
    let a = trees.new_resource(fields! { "name" => "a", "parent" => &root }).unwrap().save().unwrap();
    let b = trees.new_resource(fields! { "name" => "b", "parent" => &root }).unwrap().save().unwrap();

    root.refresh();
    let children = root.get("children").unwrap();
    assert_eq!(children.as_resources().unwrap(), &[a.clone(), b.clone()]);
    assert_eq!(trees.count(fields! { "children" => vec![a, b] }).unwrap(), 1);
}

#[test]
fn attr_falls_back_to_endpoints() {
    let server = common::server();
    let trees = common::factory(&server).resource("tree");
    let root = trees.new_resource(fields! { "name" => "root" }).unwrap().save().unwrap();
    trees.new_resource(fields! { "name" => "leaf", "parent" => &root }).unwrap().save().unwrap();
    let leaf = trees.get(fields! { "name" => "leaf" }).unwrap();

    match leaf.attr("name").unwrap() {
        Attr::Value(value) => assert_eq!(value.as_str(), Some("leaf")),
        Attr::Endpoint(_) => panic!("name is a field"),
    }
    match leaf.attr("depth").unwrap() {
        Attr::Endpoint(endpoint) => {
            assert_eq!(endpoint.url(), "/api/v1/tree/2/depth/");
            assert_eq!(endpoint.get(fields! {}).unwrap().as_i64(), Some(1));
        }
        Attr::Value(_) => panic!("depth is an endpoint"),
    }
}

// ============================================================================
// WRITES
// ============================================================================

#[test]
fn cached_writes_wait_for_save() {
    let server = common::server();
    let trees = common::factory(&server).resource("tree");
    let oak = trees.new_resource(fields! { "name" => "oak" }).unwrap().save().unwrap();
    server.clear_log();

    oak.set("name", "old oak").unwrap();
    assert_eq!(oak.get("name").unwrap().as_str(), Some("old oak"));
    assert_eq!(server.request_count(), 0);

    oak.save().unwrap();
    assert_eq!(count_requests(&server.requests(), Method::Patch, "/api/v1/tree/1/"), 1);
    oak.save().unwrap();
    assert_eq!(server.request_count(), 1);

    let other = server.factory().unwrap().resource("tree");
    assert_eq!(other.get(fields! { "name" => "old oak" }).unwrap().peek_uri(), oak.peek_uri());
}

#[test]
fn writes_use_put_when_patch_is_not_allowed() {
    let server = common::server();
    let resources = common::factory(&server).resource("test_resource");
    let held = resources.new_resource(fields! { "path" => "put/me" }).unwrap().save().unwrap();
    server.clear_log();

    held.update(fields! { "title" => "replaced", "rating" => 7 }).unwrap();
    held.save().unwrap();

    let log = server.requests();
    assert_eq!(count_requests(&log, Method::Patch, "/api/v1/test_resource/1/"), 0);
    assert_eq!(count_requests(&log, Method::Put, "/api/v1/test_resource/1/"), 1);
    let reread = server.factory().unwrap().resource("test_resource").get(fields! { "path" => "put/me" }).unwrap();
    assert_eq!(reread.get("title").unwrap().as_str(), Some("replaced"));
    assert_eq!(reread.get("rating").unwrap().as_i64(), Some(7));
}

#[test]
fn uncached_instances_read_and_write_through() {
    let server = common::server();
    let trees = common::factory(&server).resource("tree");
    let oak = trees.new_resource(fields! { "name" => "oak" }).unwrap().save().unwrap();
    oak.set_caching(false);
    server.clear_log();

    oak.get("name").unwrap();
    oak.get("name").unwrap();
    assert_eq!(count_requests(&server.requests(), Method::Get, "/api/v1/tree/1/"), 2);

    oak.set("name", "birch").unwrap();
    assert_eq!(count_requests(&server.requests(), Method::Patch, "/api/v1/tree/1/"), 1);
}

#[test]
fn values_are_checked_against_the_schema() {
    let server = common::server();
    let resources = common::factory(&server).resource("test_resource");
    let held = resources.new_resource(fields! { "path" => "typed" }).unwrap();

    assert!(matches!(held.set("resource_uri", "/x/"), Err(TastyError::ReadOnlyField { .. })));
    assert!(matches!(held.set("rating", Field::null()), Err(TastyError::FieldNotNullable { .. })));
    assert!(matches!(held.set("created_by", "alice"), Err(TastyError::BadRelatedType { .. })));
    assert!(matches!(
        held.set("date", "not a date"),
        Err(TastyError::InvalidFieldValue { .. })
    ));
    assert_eq!(held.to_string(), "<\"unsaved\": {\"path\": \"typed\"}>");
}

#[test]
fn rejected_writes_leave_pending_changes_alone() {
    let server = common::server();
    let trees = common::factory(&server).resource("tree");
    let oak = trees.new_resource(fields! { "name" => "oak" }).unwrap().save().unwrap();
    oak.set("name", "kept").unwrap();
    server.clear_log();

    assert!(matches!(oak.set("parent", "birch"), Err(TastyError::BadRelatedType { .. })));
    assert!(matches!(
        oak.update(fields! { "name" => "lost", "parent" => "birch" }),
        Err(TastyError::BadRelatedType { .. })
    ));
    assert_eq!(server.request_count(), 0);

    let fields = oak.fields().unwrap();
    assert_eq!(fields["name"].as_str(), Some("kept"));
    assert!(fields["parent"].is_null());
    assert_eq!(server.request_count(), 0);

    oak.save().unwrap();
    assert_eq!(trees.get(fields! { "name" => "kept" }).unwrap(), oak);
}

#[test]
fn datetimes_round_trip() {
    let server = common::server();
    let resources = common::factory(&server).resource("test_resource");
    let when = NaiveDate::from_ymd_opt(2014, 3, 2).unwrap().and_hms_opt(10, 20, 30).unwrap();
    resources
        .new_resource(fields! { "path" => "dated", "date" => when })
        .unwrap()
        .save()
        .unwrap();

    let reread = server.factory().unwrap().resource("test_resource").get(fields! { "path" => "dated" }).unwrap();
    assert_eq!(reread.get("date").unwrap().as_datetime(), Some(when));
    assert_eq!(resources.count(fields! { "date__year" => 2014 }).unwrap(), 1);
    assert_eq!(resources.count(fields! { "date__lt" => when }).unwrap(), 0);
}

// ============================================================================
// DELETION
// ============================================================================

#[test]
fn deleted_resources_stay_deleted() {
    let server = common::server();
    let trees = common::factory(&server).resource("tree");
    let oak = trees.new_resource(fields! { "name" => "oak" }).unwrap().save().unwrap();
    let uri = oak.uri().unwrap();

    oak.delete().unwrap();
    assert!(!oak.is_alive());
    assert!(matches!(oak.get("name"), Err(TastyError::ResourceDeleted { .. })));
    assert!(matches!(oak.delete(), Err(TastyError::ResourceDeleted { .. })));
    assert!(matches!(oak.set("name", "ash"), Err(TastyError::ResourceDeleted { .. })));
    assert!(matches!(
        oak.update(fields! { "name" => "ash" }),
        Err(TastyError::ResourceDeleted { .. })
    ));
    assert!(matches!(oak.save(), Err(TastyError::ResourceDeleted { .. })));
    assert!(matches!(oak.fields(), Err(TastyError::ResourceDeleted { .. })));

    let again = trees.from_uri(&uri).unwrap();
    assert!(!again.is_alive());
    assert_eq!(trees.all().count().unwrap(), 0);
}

#[test]
fn deletes_by_other_clients_show_up_as_missing() {
    let server = common::server();
    let trees = common::factory(&server).resource("tree");
    let oak = trees.new_resource(fields! { "name" => "oak" }).unwrap().save().unwrap();

    let elsewhere = server.factory().unwrap().resource("tree");
    elsewhere.get(fields! { "name" => "oak" }).unwrap().delete().unwrap();

    oak.refresh();
    assert!(matches!(oak.get("name"), Err(TastyError::ResourceDeleted { .. })));
}

// ============================================================================
// BULK
// ============================================================================

#[test]
fn bulk_creates_updates_and_deletes_in_one_request() {
    let server = common::server();
    let trees = common::factory(&server).resource("tree");
    trees
        .create(vec![fields! { "name" => "a" }, fields! { "name" => "b" }, fields! { "name" => "c" }])
        .unwrap();
    let a = trees.get(fields! { "name" => "a" }).unwrap();
    let b = trees.get(fields! { "name" => "b" }).unwrap();
    a.set("name", "a2").unwrap();
    server.clear_log();

    trees.bulk(vec![fields! { "name" => "d" }], &[a.clone()], &[b.clone()]).unwrap();

    assert_eq!(server.request_count(), 1);
    assert!(!b.is_alive());
    let names: Vec<String> = trees
        .all()
        .order_by(&["name"])
        .to_vec()
        .unwrap()
        .iter()
        .map(|t| t.get("name").unwrap().as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(names, vec!["a2", "c", "d"]);
}

#[test]
fn failed_bulk_changes_nothing() {
    let server = common::server();
    let trees = common::factory(&server).resource("tree");
    trees.create(vec![fields! { "name" => "a" }]).unwrap();

    let err = trees
        .create(vec![fields! { "name" => "b" }, fields! { "name" => "a" }])
        .unwrap_err();
    assert!(matches!(err, TastyError::ErrorResponse { status: 500, .. }));
    assert_eq!(trees.all().count().unwrap(), 1);
}

#[test]
fn bulk_checks_related_values_before_sending() {
    let server = common::server();
    let trees = common::factory(&server).resource("tree");
    let oak = trees.new_resource(fields! { "name" => "oak" }).unwrap().save().unwrap();
    trees.schema().unwrap();
    server.clear_log();

    let err = trees
        .create(vec![fields! { "name" => "ash" }, fields! { "name" => "acorn", "parent" => "oak" }])
        .unwrap_err();
    assert!(matches!(err, TastyError::BadRelatedType { .. }));
    let err = trees.bulk(vec![fields! { "name" => "acorn", "parent" => 1 }], &[], &[]).unwrap_err();
    assert!(matches!(err, TastyError::BadRelatedType { .. }));
    assert_eq!(server.request_count(), 0);

    trees.create(vec![fields! { "name" => "acorn", "parent" => &oak }]).unwrap();

    assert_eq!(count_requests(&server.requests(), Method::Patch, "/api/v1/tree/"), 1);
    assert_eq!(trees.all().count().unwrap(), 2);
}

#[test]
fn bulk_requires_patch_on_the_list() {
    let server = common::server();
    let users = common::factory(&server).resource("user");
    let err = users.create(vec![fields! { "username" => "alice" }]).unwrap_err();
    assert!(matches!(err, TastyError::RestMethodNotAllowed { scope: "list", .. }));
}

// ============================================================================
// CREDENTIALS AND TYPES
// ============================================================================

#[test]
fn credentials_travel_with_the_type() {
    let server = common::server();
    let factory = common::factory(&server);
    let secrets = factory.resource("secret");

    let err = secrets.all().count().unwrap_err();
    assert!(matches!(err, TastyError::ErrorResponse { status: 401, .. }));

    secrets.set_credential(Some(common::api_key()));
    secrets.new_resource(fields! { "code" => "1234" }).unwrap().save().unwrap();
    assert_eq!(secrets.all().count().unwrap(), 1);

    let derived = secrets.derive();
    derived.set_credential(Some(tastytopping::Credential::api_key("someone", "else")));
    assert!(matches!(derived.all().count(), Err(TastyError::ErrorResponse { status: 401, .. })));
    assert_eq!(secrets.all().count().unwrap(), 1);
}

#[test]
fn help_describes_the_schema() {
    let server = common::server();
    let help = common::factory(&server).resource("test_resource").help().unwrap();
    assert!(help.contains("Resource: test_resource"));
    assert!(help.contains("path (string) [unique]"));
    assert!(help.contains("rating, date, path"));
}

#[test]
fn equal_uris_are_equal_resources() {
    let server = common::server();
    let factory = common::factory(&server);
    let trees = factory.resource("tree");
    let oak = trees.new_resource(fields! { "name" => "oak" }).unwrap().save().unwrap();

    let wrapped = trees.from_uri(&format!("http://memory{}", oak.uri().unwrap())).unwrap();
    assert_eq!(wrapped, oak);
    assert_ne!(trees.new_resource(fields! { "name" => "x" }).unwrap(), oak);
}

#[test]
fn unsaved_resources_can_be_found_after_saving() {
    let server = common::server();
    let trees = common::factory(&server).resource("tree");
    let oak = trees.new_resource(fields! { "name" => "oak" }).unwrap();

    let mut seen = HashSet::new();
    seen.insert(oak.clone());
    oak.save().unwrap();

    assert!(seen.contains(&oak));
    assert!(seen.contains(&trees.get(fields! { "name" => "oak" }).unwrap()));
}
