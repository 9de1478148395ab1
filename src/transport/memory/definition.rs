//! Declarative description of a resource served by [`MemoryServer`](super::MemoryServer).

use crate::auth::Credential;
use crate::transport::Method;
use crate::types::{FieldType, RelatedType};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub(crate) name: String,
    pub(crate) field_type: FieldType,
    pub(crate) nullable: bool,
    pub(crate) readonly: bool,
    pub(crate) unique: bool,
    pub(crate) blank: bool,
    pub(crate) default: Option<Value>,
    pub(crate) related: Option<Relation>,
    pub(crate) help_text: String,
}

#[derive(Debug, Clone)]
pub(crate) struct Relation {
    pub(crate) resource: String,
    pub(crate) arity: RelatedType,
    pub(crate) full: bool,
    /// Computed from the named to-one field of `resource` pointing back here.
    pub(crate) reverse_of: Option<String>,
}

impl FieldDef {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            nullable: false,
            readonly: false,
            unique: false,
            blank: false,
            default: None,
            related: None,
            help_text: String::new(),
        }
    }

    pub fn string(name: &str) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn float(name: &str) -> Self {
        Self::new(name, FieldType::Float)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn datetime(name: &str) -> Self {
        Self::new(name, FieldType::Datetime)
    }

    pub fn date(name: &str) -> Self {
        Self::new(name, FieldType::Date)
    }

    /// A foreign key to `resource`, stored as its URI.
    pub fn to_one(name: &str, resource: &str) -> Self {
        Self::related(name, resource, RelatedType::ToOne)
    }

    /// A list of URIs of `resource`.
    pub fn to_many(name: &str, resource: &str) -> Self {
        Self::related(name, resource, RelatedType::ToMany)
    }

    fn related(name: &str, resource: &str, arity: RelatedType) -> Self {
        let mut field = Self::new(name, FieldType::Related);
        field.related = Some(Relation {
            resource: resource.to_string(),
            arity,
            full: false,
            reverse_of: None,
        });
        field
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn blank(mut self) -> Self {
        self.blank = true;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn help(mut self, text: &str) -> Self {
        self.help_text = text.to_string();
        self
    }

    /// Embeds related objects instead of their URIs (`full=True`).
    pub fn full(mut self) -> Self {
        if let Some(relation) = self.related.as_mut() {
            relation.full = true;
        }
        self
    }

    /// Makes a to-many field the reverse side of `field` on the related resource, like
    /// Django's `related_name`. The value is computed and cannot be written.
    pub fn reverse_of(mut self, field: &str) -> Self {
        if let Some(relation) = self.related.as_mut() {
            relation.reverse_of = Some(field.to_string());
        }
        self.readonly = true;
        self.nullable = true;
        self
    }

    fn schema(&self) -> Value {
        let mut schema = json!({
            "type": self.field_type,
            "nullable": self.nullable,
            "readonly": self.readonly,
            "unique": self.unique,
            "blank": self.blank,
            "default": self.default.clone().unwrap_or_else(|| Value::String(crate::schema::NO_DEFAULT.into())),
            "help_text": self.help_text,
        });
        if let Some(relation) = &self.related {
            schema["related_type"] = json!(relation.arity);
        }
        schema
    }
}

/// Which filters a field accepts.
#[derive(Debug, Clone)]
pub enum Filtering {
    /// `ALL`: every suffix on the field itself.
    All,
    /// `ALL_WITH_RELATIONS`: every suffix, also across a relation (`parent__name`).
    AllWithRelations,
    Only(Vec<String>),
}

impl Filtering {
    pub fn only(suffixes: &[&str]) -> Self {
        Filtering::Only(suffixes.iter().map(|s| s.to_string()).collect())
    }

    fn schema(&self) -> Value {
        match self {
            Filtering::All => json!(crate::types::FILTER_ALL),
            Filtering::AllWithRelations => json!(crate::types::FILTER_ALL_WITH_RELATIONS),
            Filtering::Only(suffixes) => json!(suffixes),
        }
    }

    pub(crate) fn allows(&self, suffix: &str, across_relation: bool) -> bool {
        match self {
            Filtering::AllWithRelations => true,
            Filtering::All => !across_relation,
            Filtering::Only(suffixes) => !across_relation && suffixes.iter().any(|s| s == suffix),
        }
    }
}

// ============================================================================
// CUSTOM ENDPOINTS
// ============================================================================

/// What a custom endpoint handler receives.
#[derive(Debug)]
pub struct EndpointCall {
    pub method: Method,
    /// Path segments after the endpoint name.
    pub args: Vec<String>,
    /// Query parameters for GET, the JSON body otherwise.
    pub kwargs: Map<String, Value>,
    /// The object a detail-level endpoint hangs off.
    pub object: Option<Value>,
    /// Every object of the resource, rendered.
    pub objects: Vec<Value>,
}

impl EndpointCall {
    /// A keyword argument, or the error page Django shows when it is missing.
    pub fn kwarg(&self, name: &str) -> Result<&Value, EndpointResponse> {
        self.kwargs.get(name).ok_or_else(|| EndpointResponse {
            status: 500,
            body: format!("MultiValueDictKeyError: \"'{name}'\""),
        })
    }

    /// A keyword argument as an integer; query strings carry numbers as text.
    pub fn int_kwarg(&self, name: &str) -> Result<i64, EndpointResponse> {
        let value = self.kwarg(name)?;
        value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
            .ok_or_else(|| EndpointResponse::error(400, &format!("'{name}' is not an integer")))
    }

    pub fn int_arg(&self, index: usize) -> Result<i64, EndpointResponse> {
        self.args
            .get(index)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| EndpointResponse::error(400, &format!("argument {index} is not an integer")))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndpointResponse {
    pub status: u16,
    pub body: String,
}

impl EndpointResponse {
    /// 200 with `{"meta": {}, "objects": value}`, the shape TastyPie list views use.
    pub fn objects(value: Value) -> Self {
        Self::json(json!({ "meta": {}, "objects": value }))
    }

    pub fn json(value: Value) -> Self {
        Self {
            status: 200,
            body: value.to_string(),
        }
    }

    pub fn empty() -> Self {
        Self {
            status: 204,
            body: String::new(),
        }
    }

    pub fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: message.to_string(),
        }
    }
}

pub type EndpointHandler = Arc<dyn Fn(&EndpointCall) -> Result<EndpointResponse, EndpointResponse> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct CustomEndpoint {
    /// Number of path segments after the name. A different count is a 404.
    pub(crate) arity: usize,
    pub(crate) handler: EndpointHandler,
}

// ============================================================================
// RESOURCE
// ============================================================================

#[derive(Clone)]
pub struct ResourceDef {
    pub(crate) name: String,
    pub(crate) fields: Vec<FieldDef>,
    pub(crate) filtering: BTreeMap<String, Filtering>,
    pub(crate) ordering: Vec<String>,
    pub(crate) list_methods: Vec<Method>,
    pub(crate) detail_methods: Vec<Method>,
    pub(crate) credential: Option<Credential>,
    pub(crate) always_return_data: bool,
    pub(crate) default_limit: usize,
    pub(crate) max_limit: usize,
    pub(crate) list_endpoints: BTreeMap<String, CustomEndpoint>,
    pub(crate) detail_endpoints: BTreeMap<String, CustomEndpoint>,
}

impl fmt::Debug for ResourceDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDef")
            .field("name", &self.name)
            .field("fields", &self.fields.iter().map(|f| &f.name).collect::<Vec<_>>())
            .field("list_endpoints", &self.list_endpoints.keys().collect::<Vec<_>>())
            .field("detail_endpoints", &self.detail_endpoints.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

const ALL_METHODS: [Method; 5] = [Method::Get, Method::Post, Method::Put, Method::Patch, Method::Delete];

impl ResourceDef {
    /// A resource with `id` and `resource_uri` fields, every method allowed, no
    /// filtering, a page size of 20 and at most 1000 objects per page.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: vec![
                FieldDef::integer("id").unique().blank(),
                FieldDef::string("resource_uri").readonly(),
            ],
            filtering: BTreeMap::new(),
            ordering: Vec::new(),
            list_methods: ALL_METHODS.to_vec(),
            detail_methods: ALL_METHODS.to_vec(),
            credential: None,
            always_return_data: true,
            default_limit: 20,
            max_limit: 1000,
            list_endpoints: BTreeMap::new(),
            detail_endpoints: BTreeMap::new(),
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.retain(|f| f.name != field.name);
        self.fields.push(field);
        self
    }

    pub fn filter(mut self, field: &str, filtering: Filtering) -> Self {
        self.filtering.insert(field.to_string(), filtering);
        self
    }

    pub fn ordering(mut self, fields: &[&str]) -> Self {
        self.ordering = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn list_methods(mut self, methods: &[Method]) -> Self {
        self.list_methods = methods.to_vec();
        self
    }

    pub fn detail_methods(mut self, methods: &[Method]) -> Self {
        self.detail_methods = methods.to_vec();
        self
    }

    /// Requests without exactly this credential get a 401.
    pub fn require(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Whether POST/PUT/PATCH answer with the object. When off, POST answers 201 with
    /// an empty body.
    pub fn always_return_data(mut self, enabled: bool) -> Self {
        self.always_return_data = enabled;
        self
    }

    pub fn default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    /// Largest page served, whatever `limit` asks for. `0` lifts the cap.
    pub fn max_limit(mut self, limit: usize) -> Self {
        self.max_limit = limit;
        self
    }

    /// A custom endpoint at `<list_endpoint>/<name>/<arg>/...`.
    pub fn list_endpoint<F>(mut self, name: &str, arity: usize, handler: F) -> Self
    where
        F: Fn(&EndpointCall) -> Result<EndpointResponse, EndpointResponse> + Send + Sync + 'static,
    {
        self.list_endpoints.insert(
            name.to_string(),
            CustomEndpoint {
                arity,
                handler: Arc::new(handler),
            },
        );
        self
    }

    /// A custom endpoint at `<detail_uri>/<name>/<arg>/...`.
    pub fn detail_endpoint<F>(mut self, name: &str, arity: usize, handler: F) -> Self
    where
        F: Fn(&EndpointCall) -> Result<EndpointResponse, EndpointResponse> + Send + Sync + 'static,
    {
        self.detail_endpoints.insert(
            name.to_string(),
            CustomEndpoint {
                arity,
                handler: Arc::new(handler),
            },
        );
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn field_def(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The schema document TastyPie would publish for this resource.
    pub fn schema(&self) -> Value {
        let fields: Map<String, Value> = self.fields.iter().map(|f| (f.name.clone(), f.schema())).collect();
        let filtering: Map<String, Value> = self
            .filtering
            .iter()
            .map(|(name, filtering)| (name.clone(), filtering.schema()))
            .collect();
        let methods = |methods: &[Method]| methods.iter().map(Method::as_str).collect::<Vec<_>>();
        let mut schema = json!({
            "fields": fields,
            "ordering": self.ordering,
            "allowed_list_http_methods": methods(&self.list_methods),
            "allowed_detail_http_methods": methods(&self.detail_methods),
            "default_format": "application/json",
            "default_limit": self.default_limit,
        });
        // TastyPie leaves the key out entirely when nothing is filterable.
        if !filtering.is_empty() {
            schema["filtering"] = Value::Object(filtering);
        }
        schema
    }
}
