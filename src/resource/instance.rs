//! # Resource Instances
//!
//! A [`Resource`] is one remote object. It moves through three states and never back:
//!
//! | State | URI | Entered by |
//! |-------|-----|------------|
//! | **Unsaved** | none | [`ResourceType::new_resource`] |
//! | **Created** | known, alive | first field read, [`Resource::uri`] or [`Resource::save`] on an unsaved instance; wrapping a URI or server object |
//! | **Deleted** | known, not alive | [`Resource::delete`], bulk deletes, [`ResourceType::delete_all`] |
//!
//! With caching on (the default), fields are fetched once and writes are buffered
//! until [`Resource::save`]. With caching off, every read is a GET and every write is
//! sent straight away.
//!
//! Writes use PATCH when the schema allows it on the detail endpoint. Otherwise, or
//! when the server answers 405, the full field set is sent with PUT.
//!
//! Clones share state: a field set through one clone is seen through all of them.

use super::class::ResourceType;
use crate::error::{Result, TastyError};
use crate::field::{Field, Fields};
use crate::nested::NestedResource;
use crate::schema::Schema;
use crate::transport::{Method, Params};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// The result of looking up a name on an instance.
#[derive(Debug, Clone)]
pub enum Attr {
    Value(Field),
    /// The name is not a field, so it is taken to be a custom endpoint.
    Endpoint(NestedResource),
}

struct State {
    uri: Option<String>,
    /// Fields as last seen on the server. `None` means not loaded.
    fields: Option<Fields>,
    /// Fields given before creation.
    pending: Fields,
    /// Writes not yet sent.
    dirty: Fields,
    caching: bool,
}

struct Inner {
    class: ResourceType,
    state: Mutex<State>,
    // Held for the whole POST so two threads cannot create the same instance twice.
    creating: Mutex<()>,
}

#[derive(Clone)]
pub struct Resource {
    inner: Arc<Inner>,
}

impl Resource {
    fn build(class: ResourceType, uri: Option<String>, fields: Option<Fields>) -> Self {
        let caching = class.caching();
        Self {
            inner: Arc::new(Inner {
                class,
                state: Mutex::new(State {
                    uri,
                    fields,
                    pending: Fields::new(),
                    dirty: Fields::new(),
                    caching,
                }),
                creating: Mutex::new(()),
            }),
        }
    }

    pub(crate) fn unsaved(class: ResourceType) -> Self {
        Self::build(class, None, None)
    }

    pub(crate) fn existing(class: ResourceType, uri: String, fields: Option<Fields>) -> Self {
        Self::build(class, Some(uri), fields)
    }

    pub fn resource_type(&self) -> &ResourceType {
        &self.inner.class
    }

    /// The URI if the instance has been created. Never touches the network.
    pub fn peek_uri(&self) -> Option<String> {
        self.inner.state.lock().uri.clone()
    }

    /// The URI, creating the instance first if needed.
    pub fn uri(&self) -> Result<String> {
        match self.peek_uri() {
            Some(uri) => Ok(uri),
            None => self.create(),
        }
    }

    /// Unsaved instances count as alive.
    pub fn is_alive(&self) -> bool {
        match self.peek_uri() {
            Some(uri) => self.inner.class.identity().contains(&uri),
            None => true,
        }
    }

    pub fn check_alive(&self) -> Result<()> {
        match self.peek_uri() {
            Some(uri) if !self.inner.class.identity().contains(&uri) => Err(TastyError::ResourceDeleted { uri }),
            _ => Ok(()),
        }
    }

    pub fn set_caching(&self, caching: bool) {
        self.inner.state.lock().caching = caching;
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// The value of a field.
    ///
    /// Looks at unsaved writes, then the server's fields, then the schema default.
    pub fn get(&self, name: &str) -> Result<Field> {
        self.check_alive()?;
        if let Some(value) = self.inner.state.lock().dirty.get(name) {
            return Ok(value.clone());
        }
        let fields = self.load()?;
        if let Some(value) = fields.get(name) {
            return Ok(value.clone());
        }
        let schema = self.inner.class.schema()?;
        match schema.field(name) {
            Some(desc) => {
                let default = schema.default(name)?;
                Field::decode(&default, Some(desc.field_type), self.inner.class.factory())
            }
            None => Err(TastyError::UnknownField {
                resource: self.inner.class.name().to_string(),
                name: name.to_string(),
            }),
        }
    }

    /// Like [`Resource::get`], but a name that is not a field becomes a custom
    /// endpoint under this instance.
    pub fn attr(&self, name: &str) -> Result<Attr> {
        match self.get(name) {
            Ok(value) => Ok(Attr::Value(value)),
            Err(TastyError::UnknownField { .. }) => Ok(Attr::Endpoint(self.nested()?.child(name))),
            Err(e) => Err(e),
        }
    }

    /// Every field, including unsaved writes.
    pub fn fields(&self) -> Result<Fields> {
        self.check_alive()?;
        let mut fields = self.load()?;
        fields.extend(self.inner.state.lock().dirty.clone());
        Ok(fields)
    }

    /// Forgets cached fields and unsaved writes. The next read fetches again.
    pub fn refresh(&self) {
        let mut state = self.inner.state.lock();
        state.fields = None;
        state.dirty.clear();
    }

    fn load(&self) -> Result<Fields> {
        let uri = {
            let state = self.inner.state.lock();
            match (&state.uri, &state.fields) {
                (Some(_), Some(fields)) if state.caching => return Ok(fields.clone()),
                (Some(uri), _) => Some(uri.clone()),
                (None, _) => None,
            }
        };
        let Some(uri) = uri else {
            self.create()?;
            return Ok(self.inner.state.lock().fields.clone().unwrap_or_default());
        };
        let fields = self.fetch(&uri)?;
        self.inner.state.lock().fields = Some(fields.clone());
        Ok(fields)
    }

    #[instrument(skip(self))]
    fn fetch(&self, uri: &str) -> Result<Fields> {
        let class = &self.inner.class;
        class.schema()?.check_detail_request_allowed(Method::Get)?;
        let details = class.connection().get(uri, Params::new())?;
        class.decode_fields(&details)
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    pub fn set(&self, name: &str, value: impl Into<Field>) -> Result<()> {
        let mut fields = Fields::new();
        fields.insert(name.to_string(), value.into());
        self.update(fields)
    }

    /// Sets several fields. Every value is checked before any is applied.
    pub fn update(&self, fields: Fields) -> Result<()> {
        self.check_alive()?;
        let checked = self.inner.class.schema()?.check_write(&fields)?;

        let push_now = {
            let mut state = self.inner.state.lock();
            if state.uri.is_none() {
                state.pending.extend(checked);
                return Ok(());
            }
            if state.caching {
                state.dirty.extend(checked);
                return Ok(());
            }
            checked
        };
        self.push(&push_now)?;
        if let Some(loaded) = self.inner.state.lock().fields.as_mut() {
            loaded.extend(push_now);
        }
        Ok(())
    }

    /// Creates the instance, or sends its unsaved writes.
    #[instrument(skip(self), fields(resource = self.inner.class.name()))]
    pub fn save(&self) -> Result<Resource> {
        self.check_alive()?;
        if self.peek_uri().is_none() {
            self.create()?;
            return Ok(self.clone());
        }
        let changes = self.unsaved_changes();
        if changes.is_empty() {
            return Ok(self.clone());
        }
        self.push(&changes)?;
        self.mark_flushed(&changes);
        Ok(self.clone())
    }

    #[instrument(skip(self), fields(resource = self.inner.class.name()))]
    pub fn delete(&self) -> Result<()> {
        self.check_alive()?;
        let uri = self.uri()?;
        let class = &self.inner.class;
        class.schema()?.check_detail_request_allowed(Method::Delete)?;
        class.connection().delete(&uri)?;
        class.identity().remove(&uri);
        info!(resource = class.name(), %uri, "Deleted");
        Ok(())
    }

    fn push(&self, changes: &Fields) -> Result<()> {
        let class = &self.inner.class;
        let uri = self.uri()?;
        let schema = class.schema()?;
        if schema.check_detail_request_allowed(Method::Patch).is_ok() {
            let body = Value::Object(class.stream_fields(changes)?);
            match class.connection().patch(&uri, body) {
                Ok(_) => return Ok(()),
                Err(TastyError::MethodNotAllowed { .. }) => {
                    debug!(resource = class.name(), %uri, "PATCH refused, falling back to PUT");
                }
                Err(e) => return Err(e),
            }
        }
        schema.check_detail_request_allowed(Method::Put)?;
        let loaded = self.inner.state.lock().fields.clone();
        let mut full = match loaded {
            Some(fields) => fields,
            None => self.fetch(&uri)?,
        };
        full.extend(changes.clone());
        let body = Value::Object(class.stream_fields(&full)?);
        class.connection().put(&uri, body)?;
        Ok(())
    }

    /// Writes that have not reached the server.
    pub(crate) fn unsaved_changes(&self) -> Fields {
        self.inner.state.lock().dirty.clone()
    }

    /// Records that `sent` reached the server. Writes made since are kept.
    pub(crate) fn mark_flushed(&self, sent: &Fields) {
        let mut state = self.inner.state.lock();
        state.dirty.retain(|name, value| sent.get(name) != Some(&*value));
        if let Some(loaded) = state.fields.as_mut() {
            loaded.extend(sent.clone());
        }
    }

    /// A field as already loaded, without any network access.
    pub(crate) fn cached_field(&self, name: &str) -> Option<Field> {
        self.inner.state.lock().fields.as_ref()?.get(name).cloned()
    }

    pub(crate) fn replace_cached_field(&self, name: &str, value: Field) {
        if let Some(loaded) = self.inner.state.lock().fields.as_mut() {
            loaded.insert(name.to_string(), value);
        }
    }

    /// Applies values the server has already accepted in a bulk request.
    pub(crate) fn apply_remote(&self, values: &Fields) {
        let mut state = self.inner.state.lock();
        if let Some(loaded) = state.fields.as_mut() {
            loaded.extend(values.clone());
        }
        state.dirty.retain(|name, _| !values.contains_key(name));
    }

    // ========================================================================
    // CREATION
    // ========================================================================

    fn create(&self) -> Result<String> {
        let _creating = self.inner.creating.lock();
        let pending = {
            let state = self.inner.state.lock();
            if let Some(uri) = &state.uri {
                return Ok(uri.clone());
            }
            state.pending.clone()
        };

        let class = &self.inner.class;
        let schema = class.schema()?;
        schema.check_list_request_allowed(Method::Post)?;
        let body = Value::Object(class.stream_fields(&pending)?);
        let endpoint = class.list_endpoint()?;
        let details = match class.connection().post(&endpoint, body)? {
            Some(details) if details.get("resource_uri").is_some() => details,
            _ => self.find_created(&schema, &endpoint, &pending)?,
        };
        let uri = details
            .get("resource_uri")
            .and_then(Value::as_str)
            .ok_or_else(|| TastyError::BadUri { uri: details.to_string() })?
            .to_string();
        let fields = class.decode_fields(&details)?;

        class.identity().add(&uri);
        let mut state = self.inner.state.lock();
        state.uri = Some(uri.clone());
        state.fields = Some(fields);
        state.pending.clear();
        info!(resource = class.name(), %uri, "Created");
        Ok(uri)
    }

    /// The server created the object but did not return it: look it up again using
    /// the fields it was created with.
    fn find_created(&self, schema: &Schema, endpoint: &str, pending: &Fields) -> Result<Value> {
        let class = &self.inner.class;
        let mut clauses = Params::new();
        for (name, value) in pending {
            let (key, value) = value.filter_clause(name)?;
            clauses.insert(key, value);
        }
        let filters = match schema.remove_fields_not_in_filters(&clauses) {
            Ok(filters) => filters,
            Err(TastyError::NoFiltersInSchema { .. }) => {
                return Err(TastyError::CreatedResourceNotFound {
                    resource: class.name().to_string(),
                    filters: clauses,
                    found: Vec::new(),
                })
            }
            Err(e) => return Err(e),
        };
        warn!(resource = class.name(), ?filters, "Created without a response body, searching for it");

        let mut params = filters.clone();
        params.insert("limit".into(), Value::from(2));
        let page = class.connection().get(endpoint, params)?;
        let mut found = page
            .get("objects")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        match found.len() {
            1 => Ok(found.remove(0)),
            0 => Err(TastyError::CreatedResourceNotFound {
                resource: class.name().to_string(),
                filters,
                found,
            }),
            _ => Err(TastyError::MultipleResourcesReturned {
                resource: class.name().to_string(),
                filters,
                found,
            }),
        }
    }

    // ========================================================================
    // MISC
    // ========================================================================

    /// The field to filter on when this instance is used as a filter value.
    pub fn filter_field(&self) -> Result<String> {
        self.inner.class.schema()?.filterable_key()
    }

    /// Custom endpoints under this instance, e.g. `/api/v1/tree/3/mult/`.
    pub fn nested(&self) -> Result<NestedResource> {
        self.check_alive()?;
        let class = &self.inner.class;
        class.schema()?.check_detail_request_allowed(Method::Get)?;
        Ok(NestedResource::new(class.factory().clone(), self.uri()?, class.credential()))
    }

    pub fn help(&self) -> Result<String> {
        self.inner.class.help()
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        match (self.peek_uri(), other.peek_uri()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Resource {}

// Only the type name is hashed: it never changes, while the URI appears on creation.
// A resource used as a key before `save()` can still be found afterwards.
impl Hash for Resource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.class.name().hash(state);
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("resource", &self.inner.class.name())
            .field("uri", &self.peek_uri())
            .finish()
    }
}

/// `<"uri": {fields}>`, from cached fields only.
impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (uri, fields) = {
            let state = self.inner.state.lock();
            let mut fields = state.fields.clone().unwrap_or_else(|| state.pending.clone());
            fields.extend(state.dirty.clone());
            (state.uri.clone(), fields)
        };
        write!(f, "<\"{}\": {{", uri.as_deref().unwrap_or("unsaved"))?;
        for (i, (name, value)) in fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "\"{name}\": {value}")?;
        }
        f.write_str("}>")
    }
}
