use super::text;
use crate::error::SiteError;
use tastytopping::{fields, Fields, Resource};

/// A registered user.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub uri: String,
    pub username: String,
}

/// Payload for registering a user.
#[derive(Debug, Clone)]
pub struct UserCreate {
    pub username: String,
}

impl UserCreate {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }

    pub fn into_fields(self) -> Fields {
        fields! { "username" => self.username }
    }
}

impl TryFrom<&Resource> for User {
    type Error = SiteError;

    fn try_from(resource: &Resource) -> Result<Self, Self::Error> {
        Ok(Self {
            uri: resource.uri()?,
            username: text(resource, "username")?,
        })
    }
}
