//! Type-level operations: query construction, lookups and bulk writes.

use super::descriptor::Descriptor;
use super::instance::Resource;
use crate::auth::Credential;
use crate::error::{Result, TastyError};
use crate::factory::ResourceFactory;
use crate::field::{Field, Fields};
use crate::identity::ResourceIdentity;
use crate::nested::NestedResource;
use crate::queryset::QuerySet;
use crate::schema::Schema;
use crate::transport::{Connection, Method, Params};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument};
use url::Url;

/// A handle on one remote resource type, such as `tree` or `user`.
///
/// Cheap to clone. All clones, and every [`Resource`] built from them, share the
/// descriptor: one endpoint lookup, one schema fetch, one credential.
#[derive(Clone)]
pub struct ResourceType {
    factory: ResourceFactory,
    desc: Arc<Descriptor>,
}

impl fmt::Debug for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceType")
            .field("name", &self.name())
            .field("id", &self.desc.id())
            .finish()
    }
}

impl PartialEq for ResourceType {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name() && self.factory.api_url() == other.factory.api_url()
    }
}

impl ResourceType {
    pub(crate) fn new(factory: ResourceFactory, desc: Arc<Descriptor>) -> Self {
        Self { factory, desc }
    }

    pub fn name(&self) -> &str {
        self.desc.name()
    }

    pub fn factory(&self) -> &ResourceFactory {
        &self.factory
    }

    pub fn identity(&self) -> &ResourceIdentity {
        self.factory.context().identity()
    }

    /// The factory's connection with this type's credential attached.
    pub fn connection(&self) -> Connection {
        self.factory.connection().with_credential(self.desc.credential())
    }

    /// The list endpoint, e.g. `/api/v1/tree/`.
    pub fn list_endpoint(&self) -> Result<String> {
        self.desc
            .full_name(|| Ok(self.factory.endpoint(self.name())?.list_endpoint.clone()))
            .map(str::to_string)
    }

    #[instrument(skip(self), fields(resource = self.name()))]
    pub fn schema(&self) -> Result<Arc<Schema>> {
        self.desc.schema(|| {
            let url = self.factory.endpoint(self.name())?.schema.clone();
            let body = self.connection().get(&url, Params::new())?;
            Schema::from_value(self.name(), body).map(Arc::new)
        })
    }

    pub fn credential(&self) -> Option<Credential> {
        self.desc.credential()
    }

    /// Sets the credential here and on every type derived from this one.
    pub fn set_credential(&self, credential: Option<Credential>) {
        self.desc.set_credential(credential.clone());
        for desc in self.factory.context().descendants(self.desc.id()) {
            desc.set_credential(credential.clone());
        }
    }

    pub fn caching(&self) -> bool {
        self.desc.caching()
    }

    /// Sets the caching default for instances created from now on.
    pub fn set_caching(&self, caching: bool) {
        self.desc.set_caching(caching);
    }

    /// A new handle on the same resource with its own credential and caching
    /// settings. Changes made to this type later still cascade to it.
    pub fn derive(&self) -> ResourceType {
        let desc = Descriptor::new(self.factory.context(), self.name(), Some(&self.desc), self.desc.caching());
        ResourceType::new(self.factory.clone(), desc)
    }

    // ========================================================================
    // INSTANCES
    // ========================================================================

    /// A new, not yet created instance. The fields are checked against the schema
    /// now; the POST happens on first use.
    pub fn new_resource(&self, fields: Fields) -> Result<Resource> {
        let resource = Resource::unsaved(self.clone());
        resource.update(fields)?;
        Ok(resource)
    }

    /// An instance for an existing URI. Its fields are fetched on first read.
    ///
    /// A URI deleted through this client stays deleted.
    pub fn from_uri(&self, uri: &str) -> Result<Resource> {
        let uri = match Url::parse(uri) {
            Ok(url) => url.path().to_string(),
            Err(_) => uri.to_string(),
        };
        self.identity().adopt(&uri);
        Ok(Resource::existing(self.clone(), uri, None))
    }

    /// An instance from a JSON object the server already returned.
    pub fn from_details(&self, details: &Value) -> Result<Resource> {
        let uri = details
            .get("resource_uri")
            .and_then(Value::as_str)
            .ok_or_else(|| TastyError::BadUri { uri: details.to_string() })?
            .to_string();
        let fields = self.decode_fields(details)?;
        self.identity().add(&uri);
        Ok(Resource::existing(self.clone(), uri, Some(fields)))
    }

    pub(crate) fn decode_fields(&self, details: &Value) -> Result<Fields> {
        let Value::Object(map) = details else {
            return Err(TastyError::BadJsonResponse {
                url: self.list_endpoint().unwrap_or_else(|_| self.name().to_string()),
                body: details.to_string(),
            });
        };
        let schema = self.schema()?;
        map.iter()
            .map(|(name, raw)| {
                let declared = schema.field(name).map(|f| f.field_type);
                Field::decode(raw, declared, &self.factory).map(|field| (name.clone(), field))
            })
            .collect()
    }

    pub(crate) fn stream_fields(&self, fields: &Fields) -> Result<Map<String, Value>> {
        fields
            .iter()
            .map(|(name, field)| field.stream().map(|value| (name.clone(), value)))
            .collect()
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn filter(&self, fields: Fields) -> QuerySet {
        QuerySet::new(self.clone()).filter(fields)
    }

    pub fn all(&self) -> QuerySet {
        QuerySet::new(self.clone())
    }

    /// A QuerySet that never touches the network and is always empty.
    pub fn none(&self) -> QuerySet {
        QuerySet::new(self.clone()).none()
    }

    /// The single instance matching `fields`.
    pub fn get(&self, fields: Fields) -> Result<Resource> {
        self.filter(fields).get()
    }

    /// Number of matches, from `meta.total_count` of a `limit=1` request.
    pub fn count(&self, fields: Fields) -> Result<usize> {
        self.filter(fields).count()
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Creates every object in one bulk request. The new instances are not returned.
    pub fn create(&self, objects: Vec<Fields>) -> Result<()> {
        self.bulk(objects, &[], &[])
    }

    /// Creates, updates and deletes in one PATCH on the list endpoint.
    ///
    /// Updated instances send their unsaved changes. Deleted instances are marked as
    /// deleted locally as soon as the server accepts the request. TastyPie answers
    /// 202 and may still fail the batch afterwards; that failure is not seen here.
    #[instrument(skip_all, fields(resource = self.name()))]
    pub fn bulk(&self, create: Vec<Fields>, update: &[Resource], delete: &[Resource]) -> Result<()> {
        for resource in update.iter().chain(delete) {
            resource.check_alive()?;
        }
        let schema = self.schema()?;
        schema.check_list_request_allowed(Method::Patch)?;

        let mut objects = Vec::with_capacity(create.len() + update.len());
        for fields in &create {
            let checked = schema.check_write(fields)?;
            objects.push(Value::Object(self.stream_fields(&checked)?));
        }
        let mut flushed = Vec::with_capacity(update.len());
        for resource in update {
            let changes = resource.unsaved_changes();
            let mut object = self.stream_fields(&changes)?;
            object.insert("resource_uri".into(), Value::String(resource.uri()?));
            objects.push(Value::Object(object));
            flushed.push((resource, changes));
        }
        let deleted = delete.iter().map(Resource::uri).collect::<Result<Vec<_>>>()?;

        self.send_bulk(objects, deleted.clone())?;

        for uri in &deleted {
            self.identity().remove(uri);
        }
        for (resource, changes) in flushed {
            resource.mark_flushed(&changes);
        }
        info!(
            resource = self.name(),
            created = create.len(),
            updated = update.len(),
            deleted = deleted.len(),
            "Bulk request accepted"
        );
        Ok(())
    }

    pub(crate) fn send_bulk(&self, objects: Vec<Value>, deleted: Vec<String>) -> Result<()> {
        let endpoint = self.list_endpoint()?;
        self.connection().bulk(&endpoint, objects, deleted)
    }

    /// Deletes the whole collection in one request. Every local instance of this type
    /// is marked as deleted.
    #[instrument(skip(self), fields(resource = self.name()))]
    pub fn delete_all(&self) -> Result<()> {
        let schema = self.schema()?;
        schema.check_list_request_allowed(Method::Delete)?;
        let endpoint = self.list_endpoint()?;
        self.connection().delete(&endpoint)?;
        let dropped = self.identity().clear_prefix(&endpoint);
        info!(resource = self.name(), dropped, "Deleted collection");
        Ok(())
    }

    // ========================================================================
    // MISC
    // ========================================================================

    /// Custom endpoints under the list endpoint, e.g. `/api/v1/tree/depth/`.
    pub fn nested(&self) -> Result<NestedResource> {
        self.schema()?.check_list_request_allowed(Method::Get)?;
        Ok(NestedResource::new(
            self.factory.clone(),
            self.list_endpoint()?,
            self.desc.credential(),
        ))
    }

    pub fn help(&self) -> Result<String> {
        Ok(self.schema()?.help())
    }
}
