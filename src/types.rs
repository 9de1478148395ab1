//! # TastyPie Types
//!
//! Constants shared with the server side of the protocol: field types, relation
//! arities, datetime wire formats and the filter suffixes TastyPie understands.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The `type` of a field as declared in a resource schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Decimal,
    Boolean,
    Datetime,
    Date,
    Time,
    Related,
    List,
    Dict,
    #[serde(other)]
    Other,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Decimal => "decimal",
            FieldType::Boolean => "boolean",
            FieldType::Datetime => "datetime",
            FieldType::Date => "date",
            FieldType::Time => "time",
            FieldType::Related => "related",
            FieldType::List => "list",
            FieldType::Dict => "dict",
            FieldType::Other => "other",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arity of a related field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelatedType {
    ToOne,
    ToMany,
}

/// Primary datetime format, with fractional seconds.
pub const DATETIME_FORMAT_MICROS: &str = "%Y-%m-%dT%H:%M:%S%.f";
/// Fallback datetime format, whole seconds.
pub const DATETIME_FORMAT_SECONDS: &str = "%Y-%m-%dT%H:%M:%S";
/// Last-resort format, a bare date.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Query parameters the client consumes itself; no schema field may use them.
pub const RESERVED_NAMES: [&str; 3] = ["limit", "order_by", "offset"];

/// `filtering` value that allows every filter on a field.
pub const FILTER_ALL: u64 = 1;
/// `filtering` value that allows every filter, including across relations.
pub const FILTER_ALL_WITH_RELATIONS: u64 = 2;

/// Filter suffixes understood by TastyPie.
pub const POSSIBLE_FILTERS: [&str; 25] = [
    "exact",
    "iexact",
    "contains",
    "icontains",
    "in",
    "gt",
    "gte",
    "lt",
    "lte",
    "startswith",
    "istartswith",
    "endswith",
    "iendswith",
    "range",
    "year",
    "month",
    "day",
    "week_day",
    "hour",
    "minute",
    "second",
    "isnull",
    "search",
    "regex",
    "iregex",
];

pub fn is_filter_suffix(suffix: &str) -> bool {
    POSSIBLE_FILTERS.contains(&suffix)
}
