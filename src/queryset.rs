//! # QuerySet
//!
//! A lazy, composable view over a remote list endpoint. Building a QuerySet never
//! touches the network; reading from it does:
//!
//! | Operation | Requests |
//! |-----------|----------|
//! | [`QuerySet::count`] | one `limit=1` GET, then memoized |
//! | [`QuerySet::get_index`] | one `offset=i, limit=1` GET (plus a count for negative `i`) |
//! | [`QuerySet::slice`] | one GET for the range (plus a count for open or negative bounds) |
//! | [`QuerySet::iter`] | one GET per page, results cached and shared by later reads |
//! | [`QuerySet::iterator`] | one GET per page, nothing cached |
//! | [`QuerySet::update`] | the pages, then one bulk PATCH |
//! | [`QuerySet::delete`] | one DELETE without filters, otherwise the pages and one bulk PATCH |
//!
//! Every builder (`filter`, `order_by`, `reverse`, `prefetch_related`, `all`, `none`)
//! returns a new QuerySet with an empty cache and leaves the original untouched.
//!
//! ```rust,no_run
//! # use tastytopping::{fields, ResourceType};
//! # fn demo(posts: ResourceType) -> tastytopping::Result<()> {
//! let popular = posts.filter(fields! { "rating__gt" => 10 }).order_by(&["-rating"]);
//! for post in popular.iter()? {
//!     println!("{}", post?.get("title")?);
//! }
//! let top_three = popular.slice(Some(0), Some(3), 1)?;
//! # Ok(())
//! # }
//! ```
//!
//! Reversal flips the direction of every `order_by` field when the request is built,
//! so reversed results still stream page by page.

use crate::error::{Result, TastyError};
use crate::field::{Field, Fields};
use crate::resource::{Resource, ResourceType};
use crate::transport::{Method, Pages, Params};
use crate::types::FieldType;
use parking_lot::Mutex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::ops::BitAnd;
use std::sync::Arc;
use tracing::{debug, info, instrument};

#[derive(Default)]
struct Cache {
    /// Results of `iter()` so far, in query order.
    results: Vec<Resource>,
    stream: Option<ResourceIter>,
    complete: bool,
    count: Option<usize>,
    prefetcher: Option<Prefetcher>,
}

#[derive(Clone)]
pub struct QuerySet {
    class: ResourceType,
    filters: Fields,
    ordering: Vec<String>,
    reversed: bool,
    prefetch: BTreeSet<String>,
    limit: Option<i64>,
    offset: Option<i64>,
    empty: bool,
    cache: Arc<Mutex<Cache>>,
}

fn flip(field: &str) -> String {
    match field.strip_prefix('-') {
        Some(ascending) => ascending.to_string(),
        None => format!("-{field}"),
    }
}

impl QuerySet {
    pub(crate) fn new(class: ResourceType) -> Self {
        Self {
            class,
            filters: Fields::new(),
            ordering: Vec::new(),
            reversed: false,
            prefetch: BTreeSet::new(),
            limit: None,
            offset: None,
            empty: false,
            cache: Arc::default(),
        }
    }

    /// A copy with a fresh cache.
    fn derive(&self) -> Self {
        Self {
            cache: Arc::default(),
            ..self.clone()
        }
    }

    pub fn resource_type(&self) -> &ResourceType {
        &self.class
    }

    pub fn filters(&self) -> &Fields {
        &self.filters
    }

    /// The ordering sent to the server, with reversal applied.
    pub fn ordering(&self) -> Vec<String> {
        if self.reversed {
            self.ordering.iter().map(|f| flip(f)).collect()
        } else {
            self.ordering.clone()
        }
    }

    pub fn is_none(&self) -> bool {
        self.empty
    }

    // ========================================================================
    // BUILDERS
    // ========================================================================

    /// Adds filters. `order_by`, `limit` and `offset` are taken out and applied as
    /// query options rather than sent as filters.
    pub fn filter(&self, fields: Fields) -> QuerySet {
        let mut next = self.derive();
        for (name, value) in fields {
            match name.as_str() {
                "order_by" => match value.as_value() {
                    Some(Value::Array(items)) => next
                        .ordering
                        .extend(items.iter().filter_map(Value::as_str).map(str::to_string)),
                    Some(Value::String(field)) => next.ordering.push(field.clone()),
                    _ => {}
                },
                "limit" => next.limit = value.as_i64(),
                "offset" => next.offset = value.as_i64(),
                _ => {
                    next.filters.insert(name, value);
                }
            }
        }
        next
    }

    pub fn all(&self) -> QuerySet {
        self.derive()
    }

    pub fn none(&self) -> QuerySet {
        let mut next = self.derive();
        next.empty = true;
        next
    }

    /// Appends ordering fields; the first one ever given is the primary key.
    pub fn order_by(&self, fields: &[&str]) -> QuerySet {
        let mut next = self.derive();
        next.ordering.extend(fields.iter().map(|f| f.to_string()));
        next
    }

    /// Flips every ordering field. Needs an ordering.
    pub fn reverse(&self) -> Result<QuerySet> {
        if self.ordering.is_empty() {
            return Err(TastyError::OrderByRequiredForReverse {
                resource: self.class.name().to_string(),
            });
        }
        let mut next = self.derive();
        next.reversed = !self.reversed;
        Ok(next)
    }

    /// Loads these related fields for every result with one request per field.
    ///
    /// Each field costs a fetch of the entire related collection, so this only pays
    /// off when that collection is small.
    pub fn prefetch_related(&self, fields: &[&str]) -> QuerySet {
        let mut next = self.derive();
        next.prefetch.extend(fields.iter().map(|f| f.to_string()));
        next
    }

    // ========================================================================
    // REQUEST BUILDING
    // ========================================================================

    fn no_resources(&self) -> TastyError {
        TastyError::NoResourcesExist {
            resource: self.class.name().to_string(),
            filters: self.describe_filters(),
        }
    }

    fn out_of_range(&self, index: isize) -> TastyError {
        TastyError::IndexOutOfRange {
            resource: self.class.name().to_string(),
            index,
        }
    }

    /// Filters for error messages. Never touches the network.
    fn describe_filters(&self) -> Params {
        self.filters
            .iter()
            .map(|(name, value)| {
                let shown = value.as_value().cloned().unwrap_or_else(|| Value::String(value.to_string()));
                (name.clone(), shown)
            })
            .collect()
    }

    /// Filter clauses and ordering, checked against the schema.
    fn query_params(&self) -> Result<Params> {
        let schema = self.class.schema()?;
        schema.check_list_request_allowed(Method::Get)?;
        let mut params = Params::new();
        for (name, value) in &self.filters {
            let (key, value) = value.filter_clause(name)?;
            params.insert(key, value);
        }
        schema.check_fields_in_filters(params.keys().map(String::as_str))?;
        let ordering = self.ordering();
        if !ordering.is_empty() {
            schema.check_ordering(&ordering)?;
            params.insert(
                "order_by".into(),
                Value::Array(ordering.into_iter().map(Value::String).collect()),
            );
        }
        Ok(params)
    }

    fn page(&self, offset: usize, limit: usize) -> Result<(Vec<Value>, usize)> {
        let mut params = self.query_params()?;
        params.insert("offset".into(), Value::from(offset));
        params.insert("limit".into(), Value::from(limit));
        let page = self.class.connection().get(&self.class.list_endpoint()?, params)?;
        let total = page
            .pointer("/meta/total_count")
            .and_then(Value::as_u64)
            .unwrap_or_default() as usize;
        let objects = page
            .get("objects")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok((objects, total))
    }

    /// Results `lo..hi` in query order, from the iteration cache when it already
    /// holds them. Fails if `hi` is beyond the end. A server that caps `limit`
    /// below the range size is asked again from where its page ended.
    fn fetch_range(&self, lo: usize, hi: usize) -> Result<Vec<Resource>> {
        {
            let cache = self.cache.lock();
            if hi <= cache.results.len() {
                debug!(resource = self.class.name(), lo, hi, "Range served from cache");
                return Ok(cache.results[lo..hi].to_vec());
            }
        }
        let mut objects = Vec::with_capacity(hi - lo);
        while lo + objects.len() < hi {
            let offset = lo + objects.len();
            let (page, total) = self.page(offset, hi - offset)?;
            self.cache.lock().count = Some(total);
            if hi > total {
                return Err(self.out_of_range(hi as isize));
            }
            if page.is_empty() {
                break;
            }
            if offset + page.len() < hi {
                let got = page.len();
                debug!(resource = self.class.name(), offset, got, hi, "Short page, fetching the rest");
            }
            objects.extend(page);
        }
        let resources = objects
            .iter()
            .map(|details| self.class.from_details(details))
            .collect::<Result<Vec<_>>>()?;
        if !self.prefetch.is_empty() {
            let mut cache = self.cache.lock();
            let prefetcher = cache
                .prefetcher
                .get_or_insert_with(|| Prefetcher::new(self.prefetch.iter().cloned().collect()));
            for resource in &resources {
                prefetcher.apply(resource)?;
            }
        }
        Ok(resources)
    }

    // ========================================================================
    // EVALUATION
    // ========================================================================

    /// Number of matching resources. Memoized for the life of this QuerySet.
    #[instrument(skip(self), fields(resource = self.class.name()))]
    pub fn count(&self) -> Result<usize> {
        if self.empty {
            return Ok(0);
        }
        if let Some(count) = self.cache.lock().count {
            return Ok(count);
        }
        let mut params = self.query_params()?;
        params.insert("limit".into(), Value::from(1));
        let page = self.class.connection().get(&self.class.list_endpoint()?, params)?;
        let count = page
            .pointer("/meta/total_count")
            .and_then(Value::as_u64)
            .unwrap_or_default() as usize;
        self.cache.lock().count = Some(count);
        Ok(count)
    }

    pub fn exists(&self) -> Result<bool> {
        Ok(self.count()? > 0)
    }

    /// A single-pass iterator that always queries again and caches nothing.
    /// Unlike [`QuerySet::iter`] it yields nothing for an empty result.
    pub fn iterator(&self) -> Result<ResourceIter> {
        if self.empty {
            return Ok(ResourceIter::empty(self.class.clone()));
        }
        let mut params = self.query_params()?;
        params.insert("limit".into(), Value::from(self.limit.unwrap_or(0)));
        if let Some(offset) = self.offset {
            params.insert("offset".into(), Value::from(offset));
        }
        let pages = self.class.connection().paginate(&self.class.list_endpoint()?, params);
        let prefetcher = (!self.prefetch.is_empty()).then(|| Prefetcher::new(self.prefetch.iter().cloned().collect()));
        Ok(ResourceIter {
            class: self.class.clone(),
            pages: Some(pages),
            buffer: VecDeque::new(),
            prefetcher,
        })
    }

    /// The cached result at `pos`, pulling one more from the network if needed.
    fn cached_at(&self, pos: usize) -> Option<Result<Resource>> {
        let mut cache = self.cache.lock();
        if let Some(resource) = cache.results.get(pos) {
            return Some(Ok(resource.clone()));
        }
        if cache.complete {
            return None;
        }
        if cache.stream.is_none() {
            match self.iterator() {
                Ok(stream) => cache.stream = Some(stream),
                Err(e) => return Some(Err(e)),
            }
        }
        let next = cache.stream.as_mut()?.next();
        match next {
            Some(Ok(resource)) => {
                cache.results.push(resource.clone());
                Some(Ok(resource))
            }
            Some(Err(e)) => Some(Err(e)),
            None => {
                cache.complete = true;
                cache.stream = None;
                cache.count = Some(cache.results.len());
                None
            }
        }
    }

    /// Iterates the results, caching them for later reads of this QuerySet.
    ///
    /// An empty result is [`TastyError::NoResourcesExist`].
    pub fn iter(&self) -> Result<Iter> {
        if self.empty {
            return Err(self.no_resources());
        }
        match self.cached_at(0) {
            Some(Ok(_)) => Ok(Iter {
                qs: self.clone(),
                pos: 0,
            }),
            Some(Err(e)) => Err(e),
            None => Err(self.no_resources()),
        }
    }

    pub fn to_vec(&self) -> Result<Vec<Resource>> {
        self.iter()?.collect()
    }

    /// The result at `index`; negative indices count from the end.
    #[instrument(skip(self), fields(resource = self.class.name()))]
    pub fn get_index(&self, index: isize) -> Result<Resource> {
        if self.empty {
            return Err(self.out_of_range(index));
        }
        let position = if index < 0 {
            let total = self.count()? as isize;
            total + index
        } else {
            index
        };
        if position < 0 {
            return Err(self.out_of_range(index));
        }
        let position = position as usize;
        let mut found = self
            .fetch_range(position, position + 1)
            .map_err(|e| match e {
                TastyError::IndexOutOfRange { .. } => self.out_of_range(index),
                other => other,
            })?;
        found.pop().ok_or_else(|| self.out_of_range(index))
    }

    /// `qs[start:stop:step]` with Python slice semantics, except that bounds past
    /// the end are an error rather than clamped.
    #[instrument(skip(self), fields(resource = self.class.name()))]
    pub fn slice(&self, start: Option<isize>, stop: Option<isize>, step: isize) -> Result<Vec<Resource>> {
        if step == 0 {
            return Err(TastyError::InvalidSliceStep);
        }
        if start.is_some() && start == stop {
            return Ok(Vec::new());
        }
        if self.empty {
            return Err(self.out_of_range(start.unwrap_or(0)));
        }
        let known_bounds = matches!((start, stop), (Some(a), Some(b)) if a >= 0 && b >= 0);
        let total = if step > 0 && known_bounds { None } else { Some(self.count()? as isize) };
        let normalize = |i: isize| match total {
            Some(total) if i < 0 => total + i,
            _ => i,
        };

        if step > 0 {
            let lo = start.map(normalize).unwrap_or(0);
            let hi = match stop {
                Some(stop) => normalize(stop),
                None => total.unwrap_or(0),
            };
            if lo < 0 {
                return Err(self.out_of_range(start.unwrap_or(0)));
            }
            if hi < 0 || total.is_some_and(|total| hi > total) {
                return Err(self.out_of_range(stop.unwrap_or(hi)));
            }
            if lo >= hi {
                return Ok(Vec::new());
            }
            let range = self.fetch_range(lo as usize, hi as usize)?;
            Ok(range.into_iter().step_by(step as usize).collect())
        } else {
            let total = total.unwrap_or(0);
            let top = start.map(normalize).unwrap_or(total - 1);
            let bottom = stop.map(normalize).unwrap_or(-1);
            if top < 0 || top >= total {
                return Err(self.out_of_range(start.unwrap_or(top)));
            }
            if stop.is_some() && bottom < 0 {
                return Err(self.out_of_range(stop.unwrap_or(bottom)));
            }
            if top <= bottom {
                return Ok(Vec::new());
            }
            let range = self.fetch_range((bottom + 1) as usize, (top + 1) as usize)?;
            Ok(range.into_iter().rev().step_by(step.unsigned_abs()).collect())
        }
    }

    pub fn first(&self) -> Result<Option<Resource>> {
        self.get_index_opt(0)
    }

    pub fn last(&self) -> Result<Option<Resource>> {
        self.get_index_opt(-1)
    }

    fn get_index_opt(&self, index: isize) -> Result<Option<Resource>> {
        match self.get_index(index) {
            Ok(resource) => Ok(Some(resource)),
            Err(TastyError::IndexOutOfRange { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The only result. Asks for at most two so ambiguity is cheap to detect.
    #[instrument(skip(self), fields(resource = self.class.name()))]
    pub fn get(&self) -> Result<Resource> {
        if self.empty {
            return Err(self.no_resources());
        }
        let mut params = self.query_params()?;
        params.insert("limit".into(), Value::from(2));
        let page = self.class.connection().get(&self.class.list_endpoint()?, params)?;
        let mut found = page
            .get("objects")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        match found.len() {
            0 => Err(self.no_resources()),
            1 => {
                let resource = self.class.from_details(&found.remove(0))?;
                if !self.prefetch.is_empty() {
                    Prefetcher::new(self.prefetch.iter().cloned().collect()).apply(&resource)?;
                }
                Ok(resource)
            }
            _ => Err(TastyError::MultipleResourcesReturned {
                resource: self.class.name().to_string(),
                filters: self.describe_filters(),
                found,
            }),
        }
    }

    fn first_by(&self, field: String) -> Result<Resource> {
        if self.empty {
            return Err(self.no_resources());
        }
        let mut ordered = self.derive();
        ordered.ordering = std::iter::once(field).chain(self.ordering()).collect();
        ordered.reversed = false;
        ordered.get_index(0).map_err(|e| match e {
            TastyError::IndexOutOfRange { .. } => self.no_resources(),
            other => other,
        })
    }

    /// The result with the greatest `field`, ahead of any existing ordering.
    pub fn latest(&self, field: &str) -> Result<Resource> {
        self.first_by(flip(field))
    }

    /// The result with the smallest `field`, ahead of any existing ordering.
    pub fn earliest(&self, field: &str) -> Result<Resource> {
        self.first_by(field.to_string())
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Sets `fields` on every match with a single bulk request. Nothing matching is
    /// not an error.
    #[instrument(skip_all, fields(resource = self.class.name()))]
    pub fn update(&self, fields: Fields) -> Result<()> {
        if self.empty {
            return Ok(());
        }
        let schema = self.class.schema()?;
        let fields = schema.check_write(&fields)?;
        schema.check_list_request_allowed(Method::Patch)?;
        let matched = self.iterator()?.collect::<Result<Vec<_>>>()?;
        if matched.is_empty() {
            return Ok(());
        }
        let streamed = self.class.stream_fields(&fields)?;
        let mut objects = Vec::with_capacity(matched.len());
        for resource in &matched {
            resource.check_alive()?;
            let mut object = streamed.clone();
            object.insert("resource_uri".into(), Value::String(resource.uri()?));
            objects.push(Value::Object(object));
        }
        self.class.send_bulk(objects, Vec::new())?;
        for resource in &matched {
            resource.apply_remote(&fields);
        }
        info!(resource = self.class.name(), updated = matched.len(), "Bulk update accepted");
        Ok(())
    }

    /// Deletes every match. Without filters the whole collection goes in one request.
    pub fn delete(&self) -> Result<()> {
        if self.empty {
            return Ok(());
        }
        if self.filters.is_empty() {
            self.class.delete_all()?;
        } else {
            let matched = self.iterator()?.collect::<Result<Vec<_>>>()?;
            if !matched.is_empty() {
                self.class.bulk(Vec::new(), &[], &matched)?;
            }
        }
        *self.cache.lock() = Cache::default();
        Ok(())
    }

    // ========================================================================
    // COMBINATION
    // ========================================================================

    /// Both sets of conditions at once.
    ///
    /// Filters on different fields are kept side by side. When both sides filter the
    /// same key: `__in` lists intersect, `__gt`/`__gte` keep the larger bound,
    /// `__lt`/`__lte` the smaller, and anything else must be equal. A contradiction
    /// gives an empty QuerySet. Orderings are concatenated.
    pub fn and(&self, other: &QuerySet) -> Result<QuerySet> {
        if self.class != other.class {
            return Err(TastyError::TypeMismatch {
                left: self.class.name().to_string(),
                right: other.class.name().to_string(),
            });
        }
        if self.empty || other.empty {
            return Ok(self.none());
        }
        let mut combined = self.derive();
        for (key, theirs) in &other.filters {
            let merged = match combined.filters.get(key) {
                None => Some(theirs.clone()),
                Some(ours) => intersect(key, ours, theirs),
            };
            match merged {
                Some(value) => {
                    combined.filters.insert(key.clone(), value);
                }
                None => {
                    debug!(resource = self.class.name(), key, "Contradicting filters, result is empty");
                    return Ok(self.none());
                }
            }
        }
        combined.ordering = self.ordering().into_iter().chain(other.ordering()).collect();
        combined.reversed = false;
        combined.prefetch.extend(other.prefetch.iter().cloned());
        Ok(combined)
    }
}

fn compare(a: &Field, b: &Field) -> Option<Ordering> {
    match (a, b) {
        (Field::DateTime(x, _), Field::DateTime(y, _)) => Some(x.cmp(y)),
        (Field::Scalar(Value::String(x)), Field::Scalar(Value::String(y))) => Some(x.cmp(y)),
        (Field::Scalar(x), Field::Scalar(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        _ => None,
    }
}

/// Merges two values for the same filter key. `None` means no value satisfies both.
fn intersect(key: &str, ours: &Field, theirs: &Field) -> Option<Field> {
    let suffix = key.rsplit_once("__").map(|(_, suffix)| suffix);
    match suffix {
        Some("in") => match (ours, theirs) {
            (Field::Scalar(Value::Array(a)), Field::Scalar(Value::Array(b))) => {
                let both: Vec<Value> = a.iter().filter(|v| b.contains(v)).cloned().collect();
                (!both.is_empty()).then_some(Field::Scalar(Value::Array(both)))
            }
            (Field::RelatedList(a), Field::RelatedList(b)) => {
                let both: Vec<Resource> = a.iter().filter(|r| b.contains(r)).cloned().collect();
                (!both.is_empty()).then_some(Field::RelatedList(both))
            }
            _ => (ours == theirs).then(|| ours.clone()),
        },
        Some("gt") | Some("gte") => match compare(ours, theirs)? {
            Ordering::Less => Some(theirs.clone()),
            _ => Some(ours.clone()),
        },
        Some("lt") | Some("lte") => match compare(ours, theirs)? {
            Ordering::Greater => Some(theirs.clone()),
            _ => Some(ours.clone()),
        },
        _ => (ours == theirs).then(|| ours.clone()),
    }
}

impl BitAnd for &QuerySet {
    type Output = Result<QuerySet>;

    fn bitand(self, other: &QuerySet) -> Result<QuerySet> {
        self.and(other)
    }
}

impl fmt::Debug for QuerySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySet")
            .field("resource", &self.class.name())
            .field("filters", &self.describe_filters())
            .field("ordering", &self.ordering())
            .field("prefetch", &self.prefetch)
            .field("empty", &self.empty)
            .finish()
    }
}

impl fmt::Display for QuerySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.empty {
            return write!(f, "<EmptyQuerySet {}>", self.class.name());
        }
        write!(f, "<QuerySet {}", self.class.name())?;
        if !self.filters.is_empty() {
            let filters: Vec<String> = self.filters.iter().map(|(k, v)| format!("{k}={v}")).collect();
            write!(f, " filter({})", filters.join(", "))?;
        }
        let ordering = self.ordering();
        if !ordering.is_empty() {
            write!(f, " order_by({})", ordering.join(", "))?;
        }
        f.write_str(">")
    }
}

/// Iterator returned by [`QuerySet::iter`]. Shares the QuerySet's cache.
pub struct Iter {
    qs: QuerySet,
    pos: usize,
}

impl Iterator for Iter {
    type Item = Result<Resource>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.qs.cached_at(self.pos);
        if matches!(item, Some(Ok(_))) {
            self.pos += 1;
        }
        item
    }
}

/// Iterator returned by [`QuerySet::iterator`]: pages are fetched as it advances.
pub struct ResourceIter {
    class: ResourceType,
    pages: Option<Pages>,
    buffer: VecDeque<Value>,
    prefetcher: Option<Prefetcher>,
}

impl ResourceIter {
    fn empty(class: ResourceType) -> Self {
        Self {
            class,
            pages: None,
            buffer: VecDeque::new(),
            prefetcher: None,
        }
    }
}

impl Iterator for ResourceIter {
    type Item = Result<Resource>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(details) = self.buffer.pop_front() {
                let resource = match self.class.from_details(&details) {
                    Ok(resource) => resource,
                    Err(e) => return Some(Err(e)),
                };
                if let Some(prefetcher) = self.prefetcher.as_mut() {
                    if let Err(e) = prefetcher.apply(&resource) {
                        return Some(Err(e));
                    }
                }
                return Some(Ok(resource));
            }
            match self.pages.as_mut()?.next()? {
                Ok(page) => {
                    let objects = page.get("objects").and_then(Value::as_array).cloned().unwrap_or_default();
                    self.buffer.extend(objects);
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Replaces shallow related references with fully loaded resources.
struct Prefetcher {
    fields: Vec<String>,
    /// Per field: URI to loaded resource. Filled on first use.
    tables: HashMap<String, HashMap<String, Resource>>,
}

impl Prefetcher {
    fn new(fields: Vec<String>) -> Self {
        Self {
            fields,
            tables: HashMap::new(),
        }
    }

    fn table(&mut self, field: &str, related: &ResourceType) -> Result<&HashMap<String, Resource>> {
        if !self.tables.contains_key(field) {
            let mut table = HashMap::new();
            for resource in related.all().iterator()? {
                let resource = resource?;
                if let Some(uri) = resource.peek_uri() {
                    table.insert(uri, resource);
                }
            }
            info!(field, resource = related.name(), loaded = table.len(), "Prefetched related collection");
            self.tables.insert(field.to_string(), table);
        }
        Ok(&self.tables[field])
    }

    fn apply(&mut self, resource: &Resource) -> Result<()> {
        let schema = resource.resource_type().schema()?;
        for field in self.fields.clone() {
            if schema.field(&field).map(|f| f.field_type) != Some(FieldType::Related) {
                continue;
            }
            let Some(value) = resource.cached_field(&field) else {
                continue;
            };
            let replaced = match &value {
                Field::Related(shallow) => {
                    let table = self.table(&field, shallow.resource_type())?;
                    let full = shallow.peek_uri().and_then(|uri| table.get(&uri).cloned());
                    Field::Related(full.unwrap_or_else(|| shallow.clone()))
                }
                Field::RelatedList(shallow) if !shallow.is_empty() => {
                    let table = self.table(&field, shallow[0].resource_type())?;
                    Field::RelatedList(
                        shallow
                            .iter()
                            .map(|r| r.peek_uri().and_then(|uri| table.get(&uri).cloned()).unwrap_or_else(|| r.clone()))
                            .collect(),
                    )
                }
                _ => continue,
            };
            resource.replace_cached_field(&field, replaced);
        }
        Ok(())
    }
}
