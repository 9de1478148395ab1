//! # Nested Resources
//!
//! TastyPie resources can expose custom endpoints (`prepend_urls`) below their list
//! or detail URLs. They have no schema, so [`NestedResource`] builds the URL one
//! segment at a time and guesses the types of whatever comes back:
//!
//! ```rust,no_run
//! # use tastytopping::{fields, ResourceType};
//! # use serde_json::json;
//! # fn demo(tree: ResourceType) -> tastytopping::Result<()> {
//! // GET /api/v1/tree/depth/
//! let depth = tree.nested()?.child("depth").get(fields! {})?;
//! // PUT /api/v1/tree/add/1/2/
//! let sum = tree.nested()?.child("add").call(&[json!(1), json!(2)], fields! {}).put(fields! {})?;
//! # Ok(())
//! # }
//! ```
//!
//! GET sends its arguments as filters, the other verbs send them as a JSON body. A
//! 404 from a custom endpoint usually means the wrong number of path arguments and is
//! reported as [`TastyError::IncorrectNestedResourceArgs`]; a Django
//! `MultiValueDictKeyError` means a missing keyword and is reported as
//! [`TastyError::IncorrectNestedResourceKwargs`].

use crate::auth::Credential;
use crate::error::{Result, TastyError};
use crate::factory::ResourceFactory;
use crate::field::{Field, Fields};
use crate::transport::{Method, Params};
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, instrument};

#[derive(Clone)]
pub struct NestedResource {
    factory: ResourceFactory,
    url: String,
    credential: Option<Credential>,
    kwargs: Fields,
}

impl fmt::Debug for NestedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NestedResource")
            .field("url", &self.url)
            .field("kwargs", &self.kwargs.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn with_slash(mut url: String) -> String {
    if !url.ends_with('/') {
        url.push('/');
    }
    url
}

fn segment(arg: &Value) -> String {
    match arg {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl NestedResource {
    pub(crate) fn new(factory: ResourceFactory, url: String, credential: Option<Credential>) -> Self {
        Self {
            factory,
            url: with_slash(url),
            credential,
            kwargs: Fields::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The endpoint one path segment further down.
    pub fn child(&self, name: &str) -> NestedResource {
        Self::new(
            self.factory.clone(),
            format!("{}{name}", self.url),
            self.credential.clone(),
        )
    }

    /// Appends positional arguments as path segments and keeps `kwargs` as the
    /// arguments for a verb called with none of its own.
    pub fn call(&self, args: &[Value], kwargs: Fields) -> NestedResource {
        let path: Vec<String> = args.iter().map(segment).collect();
        let mut next = Self::new(
            self.factory.clone(),
            format!("{}{}", self.url, path.join("/")),
            self.credential.clone(),
        );
        next.kwargs = kwargs;
        next
    }

    pub fn get(&self, kwargs: Fields) -> Result<Field> {
        self.send(Method::Get, kwargs)
    }

    pub fn post(&self, kwargs: Fields) -> Result<Field> {
        self.send(Method::Post, kwargs)
    }

    pub fn put(&self, kwargs: Fields) -> Result<Field> {
        self.send(Method::Put, kwargs)
    }

    pub fn patch(&self, kwargs: Fields) -> Result<Field> {
        self.send(Method::Patch, kwargs)
    }

    pub fn delete(&self, kwargs: Fields) -> Result<Field> {
        self.send(Method::Delete, kwargs)
    }

    #[instrument(skip(self, kwargs), fields(url = %self.url))]
    fn send(&self, method: Method, kwargs: Fields) -> Result<Field> {
        let kwargs = if kwargs.is_empty() { self.kwargs.clone() } else { kwargs };
        let conn = self.factory.connection().with_credential(self.credential.clone());

        let result = if method == Method::Get {
            let mut params = Params::new();
            for (name, value) in &kwargs {
                let (key, value) = value.filter_clause(name)?;
                params.insert(key, value);
            }
            conn.request(method, &self.url, params, None)
        } else {
            let body = kwargs
                .iter()
                .map(|(name, value)| value.stream().map(|v| (name.clone(), v)))
                .collect::<Result<Map<String, Value>>>()?;
            let body = (!body.is_empty()).then_some(Value::Object(body));
            conn.request(method, &self.url, Params::new(), body)
        };

        let body = match result {
            Ok(body) => body,
            Err(e) if e.is_not_found() => {
                return Err(TastyError::IncorrectNestedResourceArgs {
                    url: self.url.clone(),
                    source: Box::new(e),
                })
            }
            Err(e @ TastyError::MissingKeyword { .. }) => {
                return Err(TastyError::IncorrectNestedResourceKwargs {
                    url: self.url.clone(),
                    source: Box::new(e),
                })
            }
            Err(e) => return Err(e),
        };
        let Some(mut body) = body else {
            return Ok(Field::null());
        };
        if let Some(objects) = body.get_mut("objects") {
            body = objects.take();
        }
        debug!(%method, "Nested endpoint answered");
        Ok(Field::guess(&body, &self.factory))
    }
}
