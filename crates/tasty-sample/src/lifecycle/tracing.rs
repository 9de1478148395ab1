//! # Observability & Tracing
//!
//! [`setup_tracing`] installs a compact `tracing_subscriber` formatter filtered by
//! `RUST_LOG`. The module path is hidden (`with_target(false)`); the client library
//! records the resource name as a field instead.
//!
//! ## What Gets Traced
//!
//! | Level | Events |
//! |-------|--------|
//! | `info` | factory and server startup, instances created, bulk requests accepted, deletes |
//! | `debug` | every client call, every request sent with its method and URL, schema fetches |
//! | `trace` | response bodies |
//!
//! ```bash
//! RUST_LOG=info cargo run -p tasty-sample
//! RUST_LOG=tastytopping=debug cargo run -p tasty-sample
//! ```
//!
//! With `RUST_LOG=info` the tour reads roughly:
//!
//! ```text
//! INFO Memory server spawned api_url="http://memory/api/v1/"
//! INFO planting:plant: Created resource="tree" uri="/api/v1/tree/1/"
//! INFO planting:plant: Planted uri="/api/v1/tree/1/"
//! INFO publishing:publish_all: Bulk request accepted resource="entry" created=6 updated=0 deleted=0
//! INFO housekeeping:purge_below: Entries purged count=2
//! ```
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}
