//! # Resource Schema
//!
//! TastyPie publishes a schema for each resource at `<list_endpoint>/schema/`. The
//! client reads it once per resource type and uses it to reject bad requests before
//! they are sent:
//!
//! - which HTTP verbs are allowed on the list and detail endpoints;
//! - which fields may be filtered on, and with which suffixes (`rating__gt`);
//! - whether a field is nullable, read-only or unique, and its default;
//! - which fields may be used with `order_by`.
//!
//! ```json
//! {
//!   "fields": {"rating": {"type": "integer", "nullable": false, "default": 50, ...}},
//!   "filtering": {"rating": ["exact", "gt", "lt"], "title": 1},
//!   "ordering": ["rating"],
//!   "allowed_list_http_methods": ["get", "post"],
//!   "allowed_detail_http_methods": ["get", "put", "delete"]
//! }
//! ```

use crate::error::{Result, TastyError};
use crate::field::{parse_datetime, Field, Fields};
use crate::transport::{Method, Params};
use crate::types::{
    is_filter_suffix, FieldType, RelatedType, FILTER_ALL, FILTER_ALL_WITH_RELATIONS, RESERVED_NAMES,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write;

/// What TastyPie writes when a field has no default.
pub const NO_DEFAULT: &str = "No default provided.";

/// Description of one field.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldSchema {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub blank: bool,
    #[serde(default)]
    pub default: Value,
    #[serde(default)]
    pub related_type: Option<RelatedType>,
    #[serde(default)]
    pub help_text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SchemaDocument {
    fields: BTreeMap<String, FieldSchema>,
    #[serde(default)]
    filtering: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    ordering: Vec<String>,
    #[serde(default)]
    allowed_list_http_methods: Vec<String>,
    #[serde(default)]
    allowed_detail_http_methods: Vec<String>,
    #[serde(default)]
    default_limit: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Schema {
    resource: String,
    doc: SchemaDocument,
}

impl Schema {
    /// Parses a schema document, rejecting field names the client reserves.
    pub fn from_value(resource: &str, value: Value) -> Result<Self> {
        let doc: SchemaDocument =
            serde_json::from_value(value.clone()).map_err(|e| TastyError::BadJsonResponse {
                url: format!("{resource}/schema/"),
                body: format!("{e}: {value}"),
            })?;
        let reserved: Vec<String> = doc
            .fields
            .keys()
            .filter(|name| RESERVED_NAMES.contains(&name.as_str()))
            .cloned()
            .collect();
        if !reserved.is_empty() {
            return Err(TastyError::InvalidFieldName {
                resource: resource.to_string(),
                fields: reserved,
            });
        }
        Ok(Self {
            resource: resource.to_string(),
            doc,
        })
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.doc.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldSchema)> {
        self.doc.fields.iter()
    }

    pub fn ordering(&self) -> &[String] {
        &self.doc.ordering
    }

    pub fn default_limit(&self) -> Option<u64> {
        self.doc.default_limit
    }

    pub fn check_list_request_allowed(&self, method: Method) -> Result<()> {
        self.check_request_allowed("list", &self.doc.allowed_list_http_methods, method)
    }

    pub fn check_detail_request_allowed(&self, method: Method) -> Result<()> {
        self.check_request_allowed("detail", &self.doc.allowed_detail_http_methods, method)
    }

    fn check_request_allowed(&self, scope: &'static str, allowed: &[String], method: Method) -> Result<()> {
        if allowed.iter().any(|m| m.eq_ignore_ascii_case(method.as_str())) {
            return Ok(());
        }
        Err(TastyError::RestMethodNotAllowed {
            resource: self.resource.clone(),
            scope,
            method: method.as_str().to_string(),
            allowed: allowed.to_vec(),
        })
    }

    fn filters(&self) -> Result<&BTreeMap<String, Value>> {
        self.doc.filtering.as_ref().ok_or_else(|| TastyError::NoFiltersInSchema {
            resource: self.resource.clone(),
        })
    }

    /// A unique field that can be filtered on: `id` when possible.
    pub fn filterable_key(&self) -> Result<String> {
        let filters = self.filters()?;
        if filters.contains_key("id") {
            return Ok("id".to_string());
        }
        self.doc
            .fields
            .iter()
            .find(|(name, desc)| desc.unique && filters.contains_key(name.as_str()))
            .map(|(name, _)| name.clone())
            .ok_or_else(|| TastyError::NoUniqueFilterableFields {
                resource: self.resource.clone(),
            })
    }

    /// Rejects values the schema forbids for `name`. Unknown fields pass.
    pub fn validate(&self, name: &str, value: &Field) -> Result<()> {
        let Some(desc) = self.field(name) else {
            return Ok(());
        };
        if value.is_null() && !desc.nullable {
            return Err(TastyError::FieldNotNullable {
                resource: self.resource.clone(),
                field: name.to_string(),
            });
        }
        if desc.readonly {
            return Err(TastyError::ReadOnlyField {
                resource: self.resource.clone(),
                field: name.to_string(),
            });
        }
        Ok(())
    }

    /// Checks a written value against the field's declared type. Related fields must
    /// hold a resource (to-one) or a list of resources (to-many); datetime strings are
    /// parsed. Names absent from the schema pass through.
    pub(crate) fn coerce(&self, name: &str, value: Field) -> Result<Field> {
        let Some(desc) = self.field(name) else {
            return Ok(value);
        };
        if value.is_null() {
            return Ok(value);
        }
        match desc.field_type {
            FieldType::Related => {
                let to_many = desc.related_type == Some(RelatedType::ToMany);
                match (&value, to_many) {
                    (Field::Related(_), false) | (Field::RelatedList(_), true) => Ok(value),
                    _ => Err(TastyError::BadRelatedType {
                        resource: self.resource.clone(),
                        field: name.to_string(),
                        expected: if to_many { "a list of resources" } else { "a resource" },
                        value: value.to_string(),
                    }),
                }
            }
            FieldType::Datetime | FieldType::Date => match &value {
                Field::Scalar(Value::String(raw)) => parse_datetime(raw)
                    .map(|(dt, format)| Field::DateTime(dt, format))
                    .map_err(|e| TastyError::InvalidFieldValue {
                        field_type: desc.field_type.to_string(),
                        value: Value::String(raw.clone()),
                        source: Box::new(e),
                    }),
                _ => Ok(value),
            },
            _ => Ok(value),
        }
    }

    /// Validates and coerces every field of a write, before anything is sent.
    pub(crate) fn check_write(&self, fields: &Fields) -> Result<Fields> {
        let mut checked = Fields::new();
        for (name, value) in fields {
            self.validate(name, value)?;
            checked.insert(name.clone(), self.coerce(name, value.clone())?);
        }
        Ok(checked)
    }

    /// The value a field takes when the server was given nothing for it.
    pub fn default(&self, name: &str) -> Result<Value> {
        let desc = self.field(name).ok_or_else(|| TastyError::FieldNotInSchema {
            resource: self.resource.clone(),
            field: name.to_string(),
        })?;
        if desc.default.as_str() != Some(NO_DEFAULT) {
            return Ok(desc.default.clone());
        }
        if desc.blank {
            Ok(Value::String(String::new()))
        } else if desc.nullable {
            Ok(Value::Null)
        } else {
            Err(TastyError::NoDefaultValueInSchema {
                resource: self.resource.clone(),
                field: name.to_string(),
            })
        }
    }

    fn allows_filter(filters: &BTreeMap<String, Value>, key: &str) -> bool {
        let base = key.split("__").next().unwrap_or(key);
        RESERVED_NAMES.contains(&base) || filters.contains_key(base)
    }

    fn check_filter(&self, filters: &BTreeMap<String, Value>, key: &str) -> Result<()> {
        if RESERVED_NAMES.contains(&key) {
            return Ok(());
        }
        let mut parts = key.split("__");
        let base = parts.next().unwrap_or(key);
        let Some(suffix) = parts.last() else {
            return Ok(());
        };
        let Some(allowed) = filters.get(base) else {
            return Ok(());
        };
        if allowed.as_u64() == Some(FILTER_ALL) || allowed.as_u64() == Some(FILTER_ALL_WITH_RELATIONS) {
            return Ok(());
        }
        let permitted = allowed
            .as_array()
            .map(|list| list.iter().any(|s| s.as_str() == Some(suffix)))
            .unwrap_or(false);
        if is_filter_suffix(suffix) && !permitted {
            return Err(TastyError::FilterNotAllowedForField {
                resource: self.resource.clone(),
                fields: vec![key.to_string()],
            });
        }
        Ok(())
    }

    /// Keeps only the params that can be sent as filters.
    ///
    /// A param whose field is filterable but whose suffix is not allowed is an error,
    /// not silently dropped.
    pub fn remove_fields_not_in_filters(&self, params: &Params) -> Result<Params> {
        if params.is_empty() {
            return Ok(Params::new());
        }
        let filters = self.filters()?;
        let mut kept = Params::new();
        for (key, value) in params {
            if Self::allows_filter(filters, key) {
                self.check_filter(filters, key)?;
                kept.insert(key.clone(), value.clone());
            }
        }
        Ok(kept)
    }

    /// Fails with every key that cannot be used as a filter.
    pub fn check_fields_in_filters<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let keys: Vec<&str> = keys.into_iter().collect();
        if keys.is_empty() {
            return Ok(());
        }
        let filters = self.filters()?;
        let mut bad = Vec::new();
        for key in keys {
            if Self::allows_filter(filters, key) {
                self.check_filter(filters, key)?;
            } else {
                bad.push(key.to_string());
            }
        }
        if bad.is_empty() {
            Ok(())
        } else {
            Err(TastyError::FilterNotAllowedForField {
                resource: self.resource.clone(),
                fields: bad,
            })
        }
    }

    /// Fails if any `order_by` field is not declared orderable.
    pub fn check_ordering(&self, ordering: &[String]) -> Result<()> {
        let bad: Vec<String> = ordering
            .iter()
            .filter(|field| {
                let name = field.trim_start_matches('-');
                let base = name.split("__").next().unwrap_or(name);
                !self.doc.ordering.iter().any(|o| o == base)
            })
            .cloned()
            .collect();
        if bad.is_empty() {
            Ok(())
        } else {
            Err(TastyError::FilterNotAllowedForField {
                resource: self.resource.clone(),
                fields: bad,
            })
        }
    }

    /// Inserts a related resource's key into a filter, keeping the suffix last:
    /// `created_by__in` + `id` gives `created_by__id__in`.
    pub fn append_to_filter(filter: &str, related_key: &str) -> String {
        match filter.rsplit_once("__") {
            Some((head, suffix)) if is_filter_suffix(suffix) => format!("{head}__{related_key}__{suffix}"),
            _ => format!("{filter}__{related_key}"),
        }
    }

    /// A human-readable summary of the resource.
    pub fn help(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Resource: {}", self.resource);
        let _ = writeln!(out, "  list methods:   {}", self.doc.allowed_list_http_methods.join(", "));
        let _ = writeln!(out, "  detail methods: {}", self.doc.allowed_detail_http_methods.join(", "));
        let _ = writeln!(out, "  ordering:       {}", self.doc.ordering.join(", "));
        let _ = writeln!(out, "  fields:");
        for (name, desc) in &self.doc.fields {
            let mut flags = Vec::new();
            if desc.nullable {
                flags.push("nullable");
            }
            if desc.readonly {
                flags.push("readonly");
            }
            if desc.unique {
                flags.push("unique");
            }
            let filtering = self
                .doc
                .filtering
                .as_ref()
                .and_then(|f| f.get(name))
                .map(|f| match f.as_u64() {
                    Some(FILTER_ALL) => "all filters".to_string(),
                    Some(FILTER_ALL_WITH_RELATIONS) => "all filters, with relations".to_string(),
                    _ => format!("filters {f}"),
                });
            let _ = write!(out, "    {name} ({})", desc.field_type);
            if !flags.is_empty() {
                let _ = write!(out, " [{}]", flags.join(", "));
            }
            if let Some(filtering) = filtering {
                let _ = write!(out, " {filtering}");
            }
            if !desc.help_text.is_empty() {
                let _ = write!(out, ": {}", desc.help_text);
            }
            out.push('\n');
        }
        out
    }
}
