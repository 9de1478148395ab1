//! # Resource Identity
//!
//! The alive-set: every URI the client believes still exists on the server. A URI
//! enters the set when an instance is created or wrapped and leaves it on delete. The
//! check is local only, so deletions made by other clients are not seen.
//!
//! Deleted URIs are remembered. Wrapping one again ([`ResourceIdentity::adopt`]) does
//! not bring it back; only the server handing it out again ([`ResourceIdentity::add`])
//! does.

use parking_lot::RwLock;
use std::collections::HashSet;

#[derive(Debug, Default)]
struct Sets {
    alive: HashSet<String>,
    deleted: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct ResourceIdentity {
    sets: RwLock<Sets>,
}

impl ResourceIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a URI the server just returned as alive.
    pub fn add(&self, uri: &str) {
        let mut sets = self.sets.write();
        sets.deleted.remove(uri);
        sets.alive.insert(uri.to_string());
    }

    /// Marks a URI alive unless it was deleted locally. Returns whether it is alive.
    pub fn adopt(&self, uri: &str) -> bool {
        let mut sets = self.sets.write();
        if sets.deleted.contains(uri) {
            return false;
        }
        sets.alive.insert(uri.to_string());
        true
    }

    /// Returns `false` if the URI was not alive.
    pub fn remove(&self, uri: &str) -> bool {
        let mut sets = self.sets.write();
        sets.deleted.insert(uri.to_string());
        sets.alive.remove(uri)
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.sets.read().alive.contains(uri)
    }

    /// Forgets every URI under a collection endpoint. Returns how many were dropped.
    pub fn clear_prefix(&self, prefix: &str) -> usize {
        let mut sets = self.sets.write();
        let dropped: Vec<String> = sets
            .alive
            .iter()
            .filter(|uri| uri.starts_with(prefix))
            .cloned()
            .collect();
        for uri in &dropped {
            sets.alive.remove(uri);
        }
        sets.deleted.extend(dropped.iter().cloned());
        dropped.len()
    }

    pub fn len(&self) -> usize {
        self.sets.read().alive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.read().alive.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn add_remove_contains() {
        let identity = ResourceIdentity::new();
        identity.add("/api/v1/tree/1/");
        assert!(identity.contains("/api/v1/tree/1/"));
        assert!(identity.remove("/api/v1/tree/1/"));
        assert!(!identity.contains("/api/v1/tree/1/"));
        assert!(!identity.remove("/api/v1/tree/1/"));
    }

    #[test]
    fn deleted_uris_are_not_adopted_again() {
        let identity = ResourceIdentity::new();
        assert!(identity.adopt("/api/v1/tree/1/"));
        identity.remove("/api/v1/tree/1/");
        assert!(!identity.adopt("/api/v1/tree/1/"));
        assert!(!identity.contains("/api/v1/tree/1/"));

        identity.add("/api/v1/tree/1/");
        assert!(identity.contains("/api/v1/tree/1/"));
    }

    #[test]
    fn clear_prefix_only_touches_one_collection() {
        let identity = ResourceIdentity::new();
        identity.add("/api/v1/tree/1/");
        identity.add("/api/v1/tree/2/");
        identity.add("/api/v1/user/1/");
        assert_eq!(identity.clear_prefix("/api/v1/tree/"), 2);
        assert!(identity.contains("/api/v1/user/1/"));
        assert!(!identity.adopt("/api/v1/tree/2/"));
        assert_eq!(identity.len(), 1);
    }

    #[test]
    fn delete_is_visible_across_threads() {
        let identity = Arc::new(ResourceIdentity::new());
        identity.add("/api/v1/tree/7/");
        let other = identity.clone();
        std::thread::spawn(move || other.remove("/api/v1/tree/7/"))
            .join()
            .unwrap();
        assert!(!identity.contains("/api/v1/tree/7/"));
    }
}
