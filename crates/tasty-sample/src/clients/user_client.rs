//! # User Client
//!
//! Registers and looks up users by name.
use crate::error::SiteError;
use crate::model::{User, UserCreate};
use tastytopping::{fields, Resource, ResourceType, TastyError};
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
pub struct UserClient {
    users: ResourceType,
}

impl UserClient {
    pub fn new(users: ResourceType) -> Self {
        Self { users }
    }

    /// Creates the user on the server right away, so duplicate names fail here.
    #[instrument(skip(self))]
    pub fn register(&self, params: UserCreate) -> Result<Resource, SiteError> {
        debug!("Sending request");
        let user = self.users.new_resource(params.into_fields())?;
        user.uri()?;
        Ok(user)
    }

    #[instrument(skip(self))]
    pub fn by_username(&self, username: &str) -> Result<Option<User>, SiteError> {
        debug!("Sending request");
        match self.users.get(fields! { "username" => username }) {
            Ok(user) => Ok(Some(User::try_from(&user)?)),
            Err(TastyError::NoResourcesExist { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
