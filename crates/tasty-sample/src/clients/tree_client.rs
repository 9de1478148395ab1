//! # Tree Client
//!
//! Plants, walks and fells trees. Depths come from the `depth` endpoints the server
//! exposes on the list and on each tree.
use crate::error::SiteError;
use crate::model::{Tree, TreeCreate};
use tastytopping::{fields, Fields, Resource, ResourceType, TastyError};
use tracing::{debug, info, instrument};

#[derive(Debug, Clone)]
pub struct TreeClient {
    trees: ResourceType,
}

impl TreeClient {
    pub fn new(trees: ResourceType) -> Self {
        Self { trees }
    }

    #[instrument(skip(self))]
    pub fn plant(&self, params: TreeCreate) -> Result<Resource, SiteError> {
        debug!("Sending request");
        let tree = self.trees.new_resource(params.into_fields())?;
        let uri = tree.uri()?;
        info!(%uri, "Planted");
        Ok(tree)
    }

    #[instrument(skip(self))]
    pub fn find(&self, name: &str) -> Result<Option<Resource>, SiteError> {
        debug!("Sending request");
        match self.trees.get(fields! { "name" => name }) {
            Ok(tree) => Ok(Some(tree)),
            Err(TastyError::NoResourcesExist { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Direct children, ordered by name. Streams the listing without caching it.
    #[instrument(skip(self, parent), fields(parent = ?parent.peek_uri()))]
    pub fn children_of(&self, parent: &Resource) -> Result<Vec<Tree>, SiteError> {
        debug!("Sending request");
        self.trees
            .filter(fields! { "parent" => parent })
            .order_by(&["name"])
            .iterator()?
            .map(|child| Tree::try_from(&child?))
            .collect()
    }

    #[instrument(skip(self, tree), fields(tree = ?tree.peek_uri()))]
    pub fn depth(&self, tree: &Resource) -> Result<i64, SiteError> {
        debug!("Sending request");
        let depth = tree.nested()?.child("depth").get(Fields::new())?;
        depth.as_i64().ok_or_else(|| SiteError::MissingField {
            resource: self.trees.name().to_string(),
            field: "depth",
        })
    }

    /// Depth of the deepest tree in the forest.
    #[instrument(skip(self))]
    pub fn deepest(&self) -> Result<i64, SiteError> {
        debug!("Sending request");
        let depth = self.trees.nested()?.child("depth").get(Fields::new())?;
        depth.as_i64().ok_or_else(|| SiteError::MissingField {
            resource: self.trees.name().to_string(),
            field: "depth",
        })
    }

    #[instrument(skip(self, tree), fields(tree = ?tree.peek_uri()))]
    pub fn rename(&self, tree: &Resource, name: &str) -> Result<Tree, SiteError> {
        debug!("Sending request");
        tree.set("name", name)?;
        let saved = tree.save()?;
        Tree::try_from(&saved)
    }

    /// Deletes a tree. Its children stay, pointing at a parent that is gone.
    #[instrument(skip(self, tree), fields(tree = ?tree.peek_uri()))]
    pub fn fell(&self, tree: &Resource) -> Result<(), SiteError> {
        debug!("Sending request");
        tree.delete()?;
        Ok(())
    }

    /// The schema summary of the `tree` resource.
    pub fn describe(&self) -> Result<String, SiteError> {
        Ok(self.trees.help()?)
    }
}
