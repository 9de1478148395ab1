//! # Site Lifecycle
//!
//! Wires a [`ResourceFactory`](tastytopping::ResourceFactory) to the domain clients and
//! owns whatever has to be torn down afterwards.
//!
//! ## Startup
//!
//! | Constructor | Server | Identity context |
//! |-------------|--------|------------------|
//! | [`Site::in_memory`] | spawned on its own thread from [`definitions`] | fresh, per site |
//! | [`Site::connect`] | remote, through the HTTP transport | process-wide |
//! | [`Site::from_env`] | remote when `TASTY_API_URL` is set, memory otherwise | either |
//!
//! Each in-memory site has its own context, so two sites in one process do not see
//! each other's deleted URIs.
//!
//! ```rust,ignore
//! let site = Site::in_memory()?;
//! let oak = site.trees.plant(TreeCreate::root("oak"))?;
//! site.trees.plant(TreeCreate::under("acorn", &oak))?;
//! assert_eq!(site.trees.deepest()?, 1);
//! site.shutdown();
//! ```
//!
//! ## Shutdown
//!
//! [`Site::shutdown`] stops the in-memory server and joins its thread. Resources held
//! after that fail with `CannotConnectToAddress`. Remote sites have nothing to stop.

mod site;
pub mod tracing;

pub use site::{definitions, Site, MEMORY_API_URL};
