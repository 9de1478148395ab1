//! # TastyTopping Sample Site
//!
//! A small forestry site built on the `tastytopping` client: users, a tree of `tree`
//! resources and rated `entry` resources. It runs against the in-memory TastyPie server
//! unless `TASTY_API_URL` points it at a real one.
//!
//! ## Components
//!
//! - **[model]**: plain data read out of resources ([`User`](model::User),
//!   [`Tree`](model::Tree), [`Entry`](model::Entry)) and the payloads used to create them.
//! - **[clients]**: typed wrappers (e.g. [`TreeClient`](clients::TreeClient)) that hide
//!   field names, filters and custom endpoints behind domain methods.
//! - **[lifecycle]**: [`Site`](lifecycle::Site) wires the server, the factory and the
//!   clients together and shuts them down.
//!
//! ## Quick Start
//!
//! The binary in `main.rs` plants a small forest, publishes entries and walks through
//! queries, bulk updates and deletes with tracing enabled.

pub mod clients;
pub mod error;
pub mod lifecycle;
pub mod model;

pub use error::SiteError;
