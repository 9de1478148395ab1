//! # Resources
//!
//! [`ResourceType`] is the type-level half (queries, bulk writes, collection delete)
//! and [`Resource`] the instance-level half (field access, save, delete). Both read
//! their endpoint, schema and credential from a shared [`descriptor::Descriptor`].

pub mod class;
pub mod descriptor;
pub mod instance;

pub use class::ResourceType;
pub use instance::{Attr, Resource};
