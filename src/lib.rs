//! # TastyTopping
//!
//! > **An ORM-style client for TastyPie REST APIs.**
//!
//! Remote resources behave like local objects: fields are read and written by name,
//! collections are queried with lazy, composable QuerySets, and batches of changes go
//! to the server as single bulk requests.
//!
//! ```rust,no_run
//! use tastytopping::{fields, ClientConfig, ResourceFactory};
//!
//! # fn main() -> tastytopping::Result<()> {
//! let factory = ResourceFactory::from_config(&ClientConfig::from_env()?)?;
//! let trees = factory.resource("tree");
//!
//! let oak = trees.new_resource(fields! { "name" => "oak" })?.save()?;
//! let acorn = trees.new_resource(fields! { "name" => "acorn", "parent" => &oak })?;
//! acorn.save()?;
//!
//! for tree in trees.filter(fields! { "parent" => &oak }).iter()? {
//!     println!("{}", tree?.get("name")?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Tour
//!
//! ### 1. Entry point ([`factory`])
//! - **Role**: binds an API root to a transport and hands out one [`ResourceType`] per
//!   resource name.
//! - **Key items**: [`ResourceFactory`], [`ClientConfig`].
//!
//! ### 2. Resources ([`resource`], [`field`])
//! - **Role**: type-level operations ([`ResourceType`]) and instances ([`Resource`])
//!   with typed [`Field`] values. Related fields hold other resources.
//!
//! ### 3. Queries ([`queryset`], [`nested`])
//! - **Role**: [`QuerySet`] filters, orders, slices and bulk-updates collections;
//!   [`NestedResource`] reaches custom endpoints.
//!
//! ### 4. Guards ([`schema`], [`identity`], [`context`])
//! - **Role**: reject invalid requests before they are sent and remember which URIs
//!   this process has deleted.
//!
//! ### 5. The wire ([`transport`], [`auth`])
//! - **Role**: the [`Transport`](transport::Transport) seam with HTTP, in-memory and
//!   mock implementations, plus credentials.
//!
//! ## Observability
//!
//! Everything logs through `tracing`; install a subscriber to see it:
//!
//! ```bash
//! RUST_LOG=tastytopping=debug cargo run -p tasty-sample
//! ```

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod factory;
pub mod field;
pub mod identity;
pub mod nested;
pub mod queryset;
pub mod resource;
pub mod schema;
pub mod transport;
pub mod types;

pub use auth::Credential;
pub use config::ClientConfig;
pub use context::Context;
pub use error::{Result, TastyError};
pub use factory::ResourceFactory;
pub use field::{DateFormat, Field, Fields};
pub use nested::NestedResource;
pub use queryset::QuerySet;
pub use resource::{Attr, Resource, ResourceType};

/// Builds a [`Fields`] map: `fields! { "name" => "oak", "height" => 12 }`.
///
/// Values go through [`Field::from`], so anything with a `From` impl works, including
/// resources and lists of resources.
#[macro_export]
macro_rules! fields {
    () => {
        $crate::Fields::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut fields = $crate::Fields::new();
        $(
            fields.insert(::std::string::String::from($name), $crate::Field::from($value));
        )+
        fields
    }};
}
