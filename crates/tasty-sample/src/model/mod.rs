//! Plain snapshots of remote resources, and the payloads that create them.

mod entry;
mod tree;
mod user;

pub use entry::{Entry, EntryCreate, EntryUpdate};
pub use tree::{Tree, TreeCreate};
pub use user::{User, UserCreate};

use crate::error::SiteError;
use tastytopping::Resource;

fn missing(resource: &Resource, field: &'static str) -> SiteError {
    SiteError::MissingField {
        resource: resource.resource_type().name().to_string(),
        field,
    }
}

pub(crate) fn text(resource: &Resource, field: &'static str) -> Result<String, SiteError> {
    optional_text(resource, field)?.ok_or_else(|| missing(resource, field))
}

pub(crate) fn optional_text(resource: &Resource, field: &'static str) -> Result<Option<String>, SiteError> {
    let value = resource.get(field)?;
    if value.is_null() {
        return Ok(None);
    }
    value
        .as_str()
        .map(|s| Some(s.to_string()))
        .ok_or_else(|| missing(resource, field))
}

pub(crate) fn integer(resource: &Resource, field: &'static str) -> Result<i64, SiteError> {
    resource.get(field)?.as_i64().ok_or_else(|| missing(resource, field))
}

/// The URI a to-one field points at, without fetching the target.
pub(crate) fn related_uri(resource: &Resource, field: &'static str) -> Result<Option<String>, SiteError> {
    Ok(resource.get(field)?.as_resource().and_then(Resource::peek_uri))
}
