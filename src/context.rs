//! # Runtime Context
//!
//! Process-scoped state shared by every resource type: the alive-set and the registry
//! of resource descriptors that credential changes cascade through.
//!
//! Most code uses [`Context::global`]. Tests build their own with [`Context::new`] so
//! that liveness and registrations never leak between test cases.

use crate::identity::ResourceIdentity;
use crate::resource::descriptor::{Descriptor, DescriptorId};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static GLOBAL: Lazy<Arc<Context>> = Lazy::new(Context::new);

#[derive(Debug, Default)]
pub struct Context {
    identity: ResourceIdentity,
    // Append-only.
    registry: RwLock<Vec<Arc<Descriptor>>>,
    next_id: AtomicU64,
}

impl Context {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The process-wide context. Created on first use and never torn down.
    pub fn global() -> Arc<Self> {
        GLOBAL.clone()
    }

    pub fn identity(&self) -> &ResourceIdentity {
        &self.identity
    }

    pub(crate) fn next_descriptor_id(&self) -> DescriptorId {
        DescriptorId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn register(&self, descriptor: Arc<Descriptor>) {
        self.registry.write().push(descriptor);
    }

    /// Every registered descriptor that derives from `ancestor`, directly or not.
    pub(crate) fn descendants(&self, ancestor: DescriptorId) -> Vec<Arc<Descriptor>> {
        self.registry
            .read()
            .iter()
            .filter(|d| d.derives_from(ancestor))
            .cloned()
            .collect()
    }

    pub fn registered(&self) -> usize {
        self.registry.read().len()
    }
}
