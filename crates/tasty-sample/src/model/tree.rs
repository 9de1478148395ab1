use super::{related_uri, text};
use crate::error::SiteError;
use tastytopping::{fields, Fields, Resource};

/// A node of the forest. `parent` and `children` are URIs.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    pub uri: String,
    pub name: String,
    pub parent: Option<String>,
    pub children: Vec<String>,
}

/// Payload for planting a tree, optionally under a parent.
#[derive(Debug, Clone)]
pub struct TreeCreate {
    pub name: String,
    pub parent: Option<Resource>,
}

impl TreeCreate {
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
        }
    }

    pub fn under(name: impl Into<String>, parent: &Resource) -> Self {
        Self {
            name: name.into(),
            parent: Some(parent.clone()),
        }
    }

    pub fn into_fields(self) -> Fields {
        let mut fields = fields! { "name" => self.name };
        if let Some(parent) = self.parent {
            fields.insert("parent".into(), parent.into());
        }
        fields
    }
}

impl TryFrom<&Resource> for Tree {
    type Error = SiteError;

    fn try_from(resource: &Resource) -> Result<Self, Self::Error> {
        let children = resource
            .get("children")?
            .as_resources()
            .map(|list| list.iter().filter_map(Resource::peek_uri).collect())
            .unwrap_or_default();
        Ok(Self {
            uri: resource.uri()?,
            name: text(resource, "name")?,
            parent: related_uri(resource, "parent")?,
            children,
        })
    }
}
