//! # Client Errors
//!
//! Every failure the client can surface is a variant of [`TastyError`]. Variants carry
//! the context a caller needs to log a precise diagnostic: the resource name, the
//! offending field or value, the filters that were used and, for transport failures,
//! the status code and body the server sent back.
//!
//! The variants fall into four groups:
//!
//! - **Schema/usage**: detected locally from the resource schema before anything is sent.
//! - **Remote state**: detected after a round trip (deleted, missing or ambiguous objects).
//! - **Value/type**: raised while encoding or decoding field values.
//! - **Transport**: raised by a [`Transport`](crate::transport::Transport) implementation.
//!
//! None of them are retried by the client.

use serde_json::Value;
use std::collections::BTreeMap;

/// Result alias used across the crate.
pub type Result<T, E = TastyError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum TastyError {
    // --- schema / usage -----------------------------------------------------
    #[error("Field '{field}' is not in the schema of '{resource}'")]
    FieldNotInSchema { resource: String, field: String },

    #[error("Field '{field}' of '{resource}' cannot be null")]
    FieldNotNullable { resource: String, field: String },

    #[error("Field '{field}' of '{resource}' is read-only")]
    ReadOnlyField { resource: String, field: String },

    #[error("Resource '{resource}' declares reserved field names: {fields:?}")]
    InvalidFieldName { resource: String, fields: Vec<String> },

    #[error("Filters {fields:?} are not allowed on '{resource}'")]
    FilterNotAllowedForField { resource: String, fields: Vec<String> },

    #[error("Resource '{resource}' does not allow '{method}' on {scope}. Allowed are {allowed:?}")]
    RestMethodNotAllowed {
        resource: String,
        scope: &'static str,
        method: String,
        allowed: Vec<String>,
    },

    #[error("Resource '{resource}' has no filtering in its schema")]
    NoFiltersInSchema { resource: String },

    #[error("No unique fields can be filtered on for '{resource}'")]
    NoUniqueFilterableFields { resource: String },

    #[error("Field '{field}' of '{resource}' has no default value")]
    NoDefaultValueInSchema { resource: String, field: String },

    #[error("'{resource}' has no field or endpoint named '{name}'")]
    UnknownField { resource: String, name: String },

    #[error("reverse() requires order_by() on '{resource}'")]
    OrderByRequiredForReverse { resource: String },

    #[error("Index {index} is out of range for '{resource}'")]
    IndexOutOfRange { resource: String, index: isize },

    #[error("Slice step cannot be zero")]
    InvalidSliceStep,

    #[error("Cannot combine a QuerySet of '{left}' with one of '{right}'")]
    TypeMismatch { left: String, right: String },

    // --- remote state -------------------------------------------------------
    #[error("Resource '{uri}' has been deleted")]
    ResourceDeleted { uri: String },

    #[error("No '{resource}' resources exist for filters {filters:?}")]
    NoResourcesExist {
        resource: String,
        filters: BTreeMap<String, Value>,
    },

    #[error("Multiple '{resource}' resources returned for filters {filters:?}")]
    MultipleResourcesReturned {
        resource: String,
        filters: BTreeMap<String, Value>,
        found: Vec<Value>,
    },

    #[error("Created '{resource}' could not be found again with filters {filters:?} ({} matches)", .found.len())]
    CreatedResourceNotFound {
        resource: String,
        filters: BTreeMap<String, Value>,
        found: Vec<Value>,
    },

    // --- value / type -------------------------------------------------------
    #[error("Encountered '{source}' while creating a '{field_type}' field with the value {value}")]
    InvalidFieldValue {
        field_type: String,
        value: Value,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Field '{field}' of '{resource}' must be {expected}, got {value}")]
    BadRelatedType {
        resource: String,
        field: String,
        expected: &'static str,
        value: String,
    },

    #[error("'{uri}' is not a resource URI")]
    BadUri { uri: String },

    // --- nested endpoints ---------------------------------------------------
    #[error("Incorrect positional arguments for endpoint '{url}'")]
    IncorrectNestedResourceArgs {
        url: String,
        #[source]
        source: Box<TastyError>,
    },

    #[error("Incorrect keyword arguments for endpoint '{url}'")]
    IncorrectNestedResourceKwargs {
        url: String,
        #[source]
        source: Box<TastyError>,
    },

    // --- transport ----------------------------------------------------------
    #[error("Cannot connect to '{url}'")]
    CannotConnectToAddress {
        url: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Error response {status} from '{url}': {body}")]
    ErrorResponse { status: u16, url: String, body: String },

    #[error("Response from '{url}' is not JSON: {body}")]
    BadJsonResponse { url: String, body: String },

    #[error("'{url}' is not a resource on this API")]
    NonExistentResource { url: String },

    #[error("'{method}' is not allowed on '{url}'")]
    MethodNotAllowed { url: String, method: String },

    #[error("Missing keyword argument for '{url}': {body}")]
    MissingKeyword { url: String, body: String },

    #[error("No CSRF token available for session authentication")]
    MissingCsrfToken,

    #[error("Invalid configuration for '{key}': {reason}")]
    Config { key: &'static str, reason: String },
}

impl TastyError {
    /// Returns `true` for the errors a transport raises when the target is gone.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TastyError::ResourceDeleted { .. } | TastyError::NonExistentResource { .. }
        )
    }
}
