//! Per resource type state: name, endpoint, schema, credential and caching default.
//!
//! The endpoint and schema are fetched at most once and then kept for the life of the
//! process. Credentials are the only mutable part, and they cascade from a descriptor
//! to everything derived from it (see [`Context::descendants`]).

use crate::auth::Credential;
use crate::context::Context;
use crate::error::Result;
use crate::schema::Schema;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorId(pub(crate) u64);

#[derive(Debug)]
pub struct Descriptor {
    id: DescriptorId,
    name: String,
    /// Every ancestor, nearest first.
    lineage: Vec<DescriptorId>,
    full_name: OnceCell<String>,
    schema: OnceCell<Arc<Schema>>,
    credential: RwLock<Option<Credential>>,
    caching: AtomicBool,
}

impl Descriptor {
    /// Creates and registers a descriptor. It starts with its parent's credential and
    /// caching default.
    pub(crate) fn new(context: &Context, name: &str, parent: Option<&Descriptor>, caching: bool) -> Arc<Self> {
        let mut lineage = Vec::new();
        let mut credential = None;
        let mut caching = caching;
        if let Some(parent) = parent {
            lineage.push(parent.id);
            lineage.extend(parent.lineage.iter().copied());
            credential = parent.credential();
            caching = parent.caching();
        }
        let descriptor = Arc::new(Self {
            id: context.next_descriptor_id(),
            name: name.to_string(),
            lineage,
            full_name: OnceCell::new(),
            schema: OnceCell::new(),
            credential: RwLock::new(credential),
            caching: AtomicBool::new(caching),
        });
        context.register(descriptor.clone());
        descriptor
    }

    pub fn id(&self) -> DescriptorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn derives_from(&self, ancestor: DescriptorId) -> bool {
        self.lineage.contains(&ancestor)
    }

    pub(crate) fn full_name(&self, init: impl FnOnce() -> Result<String>) -> Result<&str> {
        self.full_name.get_or_try_init(init).map(String::as_str)
    }

    pub(crate) fn schema(&self, init: impl FnOnce() -> Result<Arc<Schema>>) -> Result<Arc<Schema>> {
        self.schema.get_or_try_init(init).cloned()
    }

    pub fn credential(&self) -> Option<Credential> {
        self.credential.read().clone()
    }

    pub(crate) fn set_credential(&self, credential: Option<Credential>) {
        *self.credential.write() = credential;
    }

    pub fn caching(&self) -> bool {
        self.caching.load(Ordering::Relaxed)
    }

    pub(crate) fn set_caching(&self, caching: bool) {
        self.caching.store(caching, Ordering::Relaxed);
    }
}
