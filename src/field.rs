//! # Field Codec
//!
//! Converts between wire JSON and typed field values.
//!
//! - **Known types** ([`Field::decode`] with a schema type): related values become
//!   [`Resource`] handles, datetimes are parsed. Failures are fatal and reported as
//!   [`TastyError::InvalidFieldValue`] with the original error attached.
//! - **Unknown types** ([`Field::guess`], for schema-less nested endpoints): URIs and
//!   objects carrying a `resource_uri` become resources, ISO-8601 looking strings become
//!   datetimes, everything else stays a scalar. Guessing never fails.
//!
//! [`Field::stream`] is the inverse, and [`Field::filter_clause`] produces the
//! `(name, value)` pair to put in a query string. Related resources cannot be filtered
//! by URI in TastyPie, so they are filtered through their own unique key instead
//! (`created_by__id=3`).

use crate::error::{Result, TastyError};
use crate::factory::ResourceFactory;
use crate::resource::Resource;
use crate::schema::Schema;
use crate::types::{FieldType, DATETIME_FORMAT_MICROS, DATETIME_FORMAT_SECONDS, DATE_FORMAT};
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Field values keyed by name.
pub type Fields = BTreeMap<String, Field>;

/// The wire format a datetime was read in, so it is written back the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    Micros,
    Seconds,
    Date,
}

#[derive(Debug, Clone)]
pub enum Field {
    Scalar(Value),
    DateTime(NaiveDateTime, DateFormat),
    Related(Resource),
    RelatedList(Vec<Resource>),
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Field::Scalar(a), Field::Scalar(b)) => a == b,
            (Field::DateTime(a, _), Field::DateTime(b, _)) => a == b,
            (Field::Related(a), Field::Related(b)) => a == b,
            (Field::RelatedList(a), Field::RelatedList(b)) => a == b,
            _ => false,
        }
    }
}

/// Parses a wire datetime: fractional seconds, then whole seconds, then a bare date.
pub fn parse_datetime(raw: &str) -> Result<(NaiveDateTime, DateFormat), chrono::ParseError> {
    if raw.contains('.') {
        return NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT_MICROS).map(|dt| (dt, DateFormat::Micros));
    }
    match NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT_SECONDS) {
        Ok(dt) => Ok((dt, DateFormat::Seconds)),
        Err(_) => NaiveDate::parse_from_str(raw, DATE_FORMAT)
            .map(|d| (d.and_hms_opt(0, 0, 0).unwrap_or_default(), DateFormat::Date)),
    }
}

pub fn format_datetime(value: &NaiveDateTime, format: DateFormat) -> String {
    match format {
        DateFormat::Micros => value.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        DateFormat::Seconds => value.format(DATETIME_FORMAT_SECONDS).to_string(),
        DateFormat::Date => value.format(DATE_FORMAT).to_string(),
    }
}

fn looks_like_datetime(raw: &str) -> bool {
    raw.matches(':').count() == 2 && raw.matches('-').count() == 2 && raw.matches('T').count() == 1
}

/// The resource name a URI points into: `/api/v1/tree/3/` gives `tree`.
pub fn resource_name_from_uri(uri: &str) -> Result<&str> {
    let parts: Vec<&str> = uri.split('/').collect();
    if parts.len() < 3 {
        return Err(TastyError::BadUri { uri: uri.to_string() });
    }
    match parts[parts.len() - 3] {
        "" => Err(TastyError::BadUri { uri: uri.to_string() }),
        name => Ok(name),
    }
}

fn invalid(field_type: FieldType, value: &Value, source: impl std::error::Error + Send + Sync + 'static) -> TastyError {
    TastyError::InvalidFieldValue {
        field_type: field_type.to_string(),
        value: value.clone(),
        source: Box::new(source),
    }
}

impl Field {
    pub fn null() -> Self {
        Field::Scalar(Value::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Field::Scalar(Value::Null))
    }

    /// Decodes a wire value. `declared` is the schema type, `None` when there is no schema.
    pub fn decode(raw: &Value, declared: Option<FieldType>, factory: &ResourceFactory) -> Result<Field> {
        if raw.is_null() {
            return Ok(Field::null());
        }
        let Some(field_type) = declared else {
            return Ok(Self::guess(raw, factory));
        };
        match field_type {
            FieldType::Related => Self::decode_related(raw, factory).map_err(|e| invalid(field_type, raw, e)),
            FieldType::Datetime | FieldType::Date => match raw {
                Value::String(s) => parse_datetime(s)
                    .map(|(dt, format)| Field::DateTime(dt, format))
                    .map_err(|e| invalid(field_type, raw, e)),
                _ => Err(invalid(
                    field_type,
                    raw,
                    TastyError::BadUri { uri: raw.to_string() },
                )),
            },
            _ => Ok(Field::Scalar(raw.clone())),
        }
    }

    fn decode_related(raw: &Value, factory: &ResourceFactory) -> Result<Field> {
        match raw {
            Value::Array(items) => items
                .iter()
                .map(|item| Self::decode_one_related(item, factory))
                .collect::<Result<Vec<_>>>()
                .map(Field::RelatedList),
            other => Self::decode_one_related(other, factory).map(Field::Related),
        }
    }

    fn decode_one_related(raw: &Value, factory: &ResourceFactory) -> Result<Resource> {
        match raw {
            Value::String(uri) => factory.resource_from_uri(uri),
            Value::Object(map) if map.contains_key("resource_uri") => factory.resource_from_details(raw),
            other => Err(TastyError::BadUri { uri: other.to_string() }),
        }
    }

    fn is_probably_resource(raw: &Value, factory: &ResourceFactory) -> bool {
        let uri = match raw {
            Value::String(s) => s.as_str(),
            Value::Object(map) => match map.get("resource_uri").and_then(Value::as_str) {
                Some(uri) => uri,
                None => return false,
            },
            _ => return false,
        };
        uri.contains('/') && factory.knows_uri(uri)
    }

    /// Best-effort decoding without a schema. Never fails.
    pub fn guess(raw: &Value, factory: &ResourceFactory) -> Field {
        let guessed = match raw {
            Value::Array(items)
                if !items.is_empty() && items.iter().all(|item| Self::is_probably_resource(item, factory)) =>
            {
                Self::decode_related(raw, factory)
            }
            _ if Self::is_probably_resource(raw, factory) => Self::decode_related(raw, factory),
            Value::String(s) if looks_like_datetime(s) => parse_datetime(s)
                .map(|(dt, format)| Field::DateTime(dt, format))
                .map_err(|e| invalid(FieldType::Datetime, raw, e)),
            _ => Ok(Field::Scalar(raw.clone())),
        };
        guessed.unwrap_or_else(|e| {
            debug!(error = %e, "Falling back to a scalar field");
            Field::Scalar(raw.clone())
        })
    }

    /// The wire representation. Related resources that do not exist yet are created.
    pub fn stream(&self) -> Result<Value> {
        match self {
            Field::Scalar(value) => Ok(value.clone()),
            Field::DateTime(dt, format) => Ok(Value::String(format_datetime(dt, *format))),
            Field::Related(resource) => resource.uri().map(Value::String),
            Field::RelatedList(resources) => resources
                .iter()
                .map(|r| r.uri().map(Value::String))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
        }
    }

    /// The `(filter, value)` pair that selects on this value under `name`.
    pub fn filter_clause(&self, name: &str) -> Result<(String, Value)> {
        match self {
            Field::Related(resource) => {
                let key = resource.filter_field()?;
                let value = resource.get(&key)?.stream()?;
                Ok((Schema::append_to_filter(name, &key), value))
            }
            Field::RelatedList(resources) => {
                let Some(first) = resources.first() else {
                    return Ok((name.to_string(), Value::Array(Vec::new())));
                };
                let key = first.filter_field()?;
                let values = resources
                    .iter()
                    .map(|r| r.get(&key).and_then(|f| f.stream()))
                    .collect::<Result<Vec<_>>>()?;
                Ok((Schema::append_to_filter(name, &key), Value::Array(values)))
            }
            other => Ok((name.to_string(), other.stream()?)),
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Field::Scalar(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_value().and_then(Value::as_i64)
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_value().and_then(Value::as_f64)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_value().and_then(Value::as_bool)
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Field::DateTime(dt, _) => Some(*dt),
            _ => None,
        }
    }

    pub fn as_resource(&self) -> Option<&Resource> {
        match self {
            Field::Related(resource) => Some(resource),
            _ => None,
        }
    }

    pub fn as_resources(&self) -> Option<&[Resource]> {
        match self {
            Field::RelatedList(resources) => Some(resources),
            _ => None,
        }
    }
}

// Never touches the network: unsaved resources render as `<new name>`.
impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn resource(f: &mut fmt::Formatter<'_>, r: &Resource) -> fmt::Result {
            match r.peek_uri() {
                Some(uri) => write!(f, "{uri}"),
                None => write!(f, "<new {}>", r.resource_type().name()),
            }
        }
        match self {
            Field::Scalar(value) => write!(f, "{value}"),
            Field::DateTime(dt, format) => f.write_str(&format_datetime(dt, *format)),
            Field::Related(r) => resource(f, r),
            Field::RelatedList(list) => {
                f.write_str("[")?;
                for (i, r) in list.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    resource(f, r)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<Value> for Field {
    fn from(value: Value) -> Self {
        Field::Scalar(value)
    }
}

impl From<&str> for Field {
    fn from(value: &str) -> Self {
        Field::Scalar(Value::String(value.to_string()))
    }
}

impl From<String> for Field {
    fn from(value: String) -> Self {
        Field::Scalar(Value::String(value))
    }
}

impl From<i32> for Field {
    fn from(value: i32) -> Self {
        Field::Scalar(Value::from(value))
    }
}

impl From<i64> for Field {
    fn from(value: i64) -> Self {
        Field::Scalar(Value::from(value))
    }
}

impl From<u64> for Field {
    fn from(value: u64) -> Self {
        Field::Scalar(Value::from(value))
    }
}

impl From<f64> for Field {
    fn from(value: f64) -> Self {
        Field::Scalar(Value::from(value))
    }
}

impl From<bool> for Field {
    fn from(value: bool) -> Self {
        Field::Scalar(Value::Bool(value))
    }
}

impl From<NaiveDateTime> for Field {
    fn from(value: NaiveDateTime) -> Self {
        Field::DateTime(value, DateFormat::Micros)
    }
}

impl From<Resource> for Field {
    fn from(value: Resource) -> Self {
        Field::Related(value)
    }
}

impl From<&Resource> for Field {
    fn from(value: &Resource) -> Self {
        Field::Related(value.clone())
    }
}

impl From<Vec<Resource>> for Field {
    fn from(value: Vec<Resource>) -> Self {
        Field::RelatedList(value)
    }
}

impl<T: Into<Field>> From<Option<T>> for Field {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_else(Field::null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32, micro: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2014, 3, 2)
            .unwrap()
            .and_hms_micro_opt(h, m, s, micro)
            .unwrap()
    }

    #[test]
    fn datetime_formats_fall_back_in_order() {
        assert_eq!(
            parse_datetime("2014-03-02T10:20:30.123456").unwrap(),
            (at(10, 20, 30, 123456), DateFormat::Micros)
        );
        assert_eq!(
            parse_datetime("2014-03-02T10:20:30").unwrap(),
            (at(10, 20, 30, 0), DateFormat::Seconds)
        );
        assert_eq!(parse_datetime("2014-03-02").unwrap(), (at(0, 0, 0, 0), DateFormat::Date));
        assert!(parse_datetime("yesterday").is_err());
    }

    #[test]
    fn datetimes_stream_in_the_format_they_were_read() {
        for raw in ["2014-03-02T10:20:30.123456", "2014-03-02T10:20:30", "2014-03-02"] {
            let (dt, format) = parse_datetime(raw).unwrap();
            assert_eq!(Field::DateTime(dt, format).stream().unwrap(), Value::String(raw.into()));
        }
    }

    #[test]
    fn datetime_shape_heuristic() {
        assert!(looks_like_datetime("2014-03-02T10:20:30"));
        assert!(!looks_like_datetime("2014-03-02"));
        assert!(!looks_like_datetime("10:20:30"));
    }

    #[test]
    fn resource_name_is_third_from_last_segment() {
        assert_eq!(resource_name_from_uri("/api/v1/tree/3/").unwrap(), "tree");
        assert_eq!(resource_name_from_uri("http://host/api/v1/user/12/").unwrap(), "user");
        assert!(resource_name_from_uri("tree").is_err());
        assert!(resource_name_from_uri("/3/").is_err());
    }

    #[test]
    fn scalar_accessors() {
        assert_eq!(Field::from(10).as_i64(), Some(10));
        assert_eq!(Field::from("a").as_str(), Some("a"));
        assert_eq!(Field::from(true).as_bool(), Some(true));
        assert!(Field::from(None::<i64>).is_null());
        assert_eq!(Field::from(Some(2.5)).as_f64(), Some(2.5));
    }

    #[test]
    fn scalar_filter_clause_is_identity() {
        let (name, value) = Field::from(10).filter_clause("rating__gt").unwrap();
        assert_eq!(name, "rating__gt");
        assert_eq!(value, Value::from(10));
    }

    #[test]
    fn empty_related_list_filters_by_field_name() {
        let (name, value) = Field::RelatedList(Vec::new()).filter_clause("children").unwrap();
        assert_eq!(name, "children");
        assert_eq!(value, Value::Array(Vec::new()));
    }
}
