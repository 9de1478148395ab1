use tastytopping::TastyError;

/// Errors surfaced by the sample clients.
#[derive(Debug, thiserror::Error)]
pub enum SiteError {
    #[error(transparent)]
    Api(#[from] TastyError),

    #[error("'{resource}' has no usable '{field}' value")]
    MissingField { resource: String, field: &'static str },
}
