//! The actor behind [`MemoryServer`](super::MemoryServer).
//!
//! One thread owns every table and serves requests one at a time from a channel, so
//! the store needs no locks. Replies travel back on a per-request channel.

use super::definition::{EndpointCall, FieldDef, ResourceDef};
use crate::field::parse_datetime;
use crate::transport::{query_pairs, Method, Request};
use crate::types::{is_filter_suffix, FieldType, RelatedType};
use chrono::{NaiveDateTime, Timelike};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

pub(crate) enum ServerRequest {
    Handle {
        request: Request,
        respond_to: mpsc::Sender<Reply>,
    },
    Log {
        respond_to: mpsc::Sender<Vec<LoggedRequest>>,
    },
    ClearLog,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Reply {
    pub(crate) status: u16,
    pub(crate) body: String,
}

impl Reply {
    fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            body: body.to_string(),
        }
    }

    fn empty(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: message.into(),
        }
    }

    fn not_found() -> Self {
        Self::empty(404)
    }

    fn method_not_allowed() -> Self {
        Self::empty(405)
    }
}

/// One request as the server saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
}

type Row = Map<String, Value>;

#[derive(Debug, Clone, Default)]
struct Table {
    last_id: u64,
    rows: BTreeMap<u64, Row>,
}

pub(crate) struct ServerActor {
    receiver: mpsc::Receiver<ServerRequest>,
    api_path: String,
    defs: BTreeMap<String, ResourceDef>,
    tables: BTreeMap<String, Table>,
    log: Vec<LoggedRequest>,
}

fn isoformat(value: &NaiveDateTime, field_type: FieldType) -> String {
    if field_type == FieldType::Date {
        value.format("%Y-%m-%d").to_string()
    } else if value.nanosecond() == 0 {
        value.format("%Y-%m-%dT%H:%M:%S").to_string()
    } else {
        value.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn equals(candidate: &Value, raw: &str) -> bool {
    match candidate {
        Value::String(s) => {
            s == raw
                || matches!((parse_datetime(s), parse_datetime(raw)), (Ok((a, _)), Ok((b, _))) if a == b)
        }
        Value::Number(n) => raw.parse::<f64>().ok() == n.as_f64(),
        Value::Bool(b) => parse_bool(raw) == Some(*b),
        Value::Null => raw == "None",
        other => other.to_string() == raw,
    }
}

fn compare(candidate: &Value, raw: &str) -> Option<Ordering> {
    match candidate {
        Value::Number(n) => n.as_f64()?.partial_cmp(&raw.parse::<f64>().ok()?),
        Value::String(s) => match (parse_datetime(s), parse_datetime(raw)) {
            (Ok((a, _)), Ok((b, _))) => Some(a.cmp(&b)),
            _ => Some(s.as_str().cmp(raw)),
        },
        _ => None,
    }
}

fn order_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => x.as_f64().partial_cmp(&y.as_f64()).unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Whether `candidate` passes `field__op=values`.
fn passes(op: &str, candidate: &Value, values: &[String]) -> Result<bool, Reply> {
    let first = values.first().map(String::as_str).unwrap_or_default();
    let split = || values.iter().flat_map(|v| v.split(',')).map(str::to_string).collect::<Vec<_>>();
    let lower = |s: &str| s.to_lowercase();
    let result = match op {
        "exact" => equals(candidate, first),
        "iexact" => text(candidate).is_some_and(|t| lower(&t) == lower(first)),
        "contains" => text(candidate).is_some_and(|t| t.contains(first)),
        "icontains" => text(candidate).is_some_and(|t| lower(&t).contains(&lower(first))),
        "startswith" => text(candidate).is_some_and(|t| t.starts_with(first)),
        "istartswith" => text(candidate).is_some_and(|t| lower(&t).starts_with(&lower(first))),
        "endswith" => text(candidate).is_some_and(|t| t.ends_with(first)),
        "iendswith" => text(candidate).is_some_and(|t| lower(&t).ends_with(&lower(first))),
        "in" => split().iter().any(|v| equals(candidate, v)),
        "gt" => compare(candidate, first) == Some(Ordering::Greater),
        "gte" => matches!(compare(candidate, first), Some(Ordering::Greater | Ordering::Equal)),
        "lt" => compare(candidate, first) == Some(Ordering::Less),
        "lte" => matches!(compare(candidate, first), Some(Ordering::Less | Ordering::Equal)),
        "range" => match split().as_slice() {
            [lo, hi] => {
                matches!(compare(candidate, lo), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(compare(candidate, hi), Some(Ordering::Less | Ordering::Equal))
            }
            _ => return Err(Reply::error(400, "range needs two values")),
        },
        "isnull" => {
            let wanted = parse_bool(first).ok_or_else(|| Reply::error(400, "isnull needs a boolean"))?;
            let null = candidate.is_null() || candidate.as_array().is_some_and(Vec::is_empty);
            null == wanted
        }
        "year" | "month" | "day" | "hour" | "minute" | "second" => {
            let Some(Ok((dt, _))) = candidate.as_str().map(parse_datetime) else {
                return Ok(false);
            };
            let part = match op {
                "year" => i64::from(chrono::Datelike::year(&dt)),
                "month" => i64::from(chrono::Datelike::month(&dt)),
                "day" => i64::from(chrono::Datelike::day(&dt)),
                "hour" => i64::from(dt.hour()),
                "minute" => i64::from(dt.minute()),
                _ => i64::from(dt.second()),
            };
            first.parse::<i64>().ok() == Some(part)
        }
        other => return Err(Reply::error(400, format!("The '{other}' filter is not supported here"))),
    };
    Ok(result)
}

impl ServerActor {
    pub(crate) fn new(receiver: mpsc::Receiver<ServerRequest>, api_path: String, defs: Vec<ResourceDef>) -> Self {
        let tables = defs.iter().map(|d| (d.name.clone(), Table::default())).collect();
        Self {
            receiver,
            api_path,
            defs: defs.into_iter().map(|d| (d.name.clone(), d)).collect(),
            tables,
            log: Vec::new(),
        }
    }

    pub(crate) fn run(mut self) {
        info!(api = %self.api_path, resources = self.defs.len(), "Memory server started");
        while let Ok(msg) = self.receiver.recv() {
            match msg {
                ServerRequest::Handle { request, respond_to } => {
                    let reply = self.handle(request);
                    let _ = respond_to.send(reply);
                }
                ServerRequest::Log { respond_to } => {
                    let _ = respond_to.send(self.log.clone());
                }
                ServerRequest::ClearLog => self.log.clear(),
                ServerRequest::Shutdown => break,
            }
        }
        let size: usize = self.tables.values().map(|t| t.rows.len()).sum();
        info!(size, handled = self.log.len(), "Shutdown");
    }

    fn handle(&mut self, request: Request) -> Reply {
        let Ok(url) = Url::parse(&request.url) else {
            return Reply::error(400, format!("Bad URL '{}'", request.url));
        };
        let mut query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        query.extend(query_pairs(&request.params));
        let path = url.path().to_string();
        let method = request.method;
        debug!(%method, %path, params = query.len(), "Handling");
        self.log.push(LoggedRequest {
            method,
            path: path.clone(),
            query: query.clone(),
        });

        let reply = self.route(&path, method, &query, request);
        if reply.status >= 400 {
            warn!(%method, %path, status = reply.status, body = %reply.body, "Rejected");
        }
        reply
    }

    fn route(&mut self, path: &str, method: Method, query: &[(String, String)], request: Request) -> Reply {
        let Some(rest) = path.strip_prefix(&self.api_path) else {
            return Reply::not_found();
        };
        let segments: Vec<String> = rest.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect();
        let Some((name, rest)) = segments.split_first() else {
            return self.listing(method);
        };
        let Some(def) = self.defs.get(name).cloned() else {
            return Reply::not_found();
        };
        if let Some(required) = &def.credential {
            if request.credential.as_ref() != Some(required) {
                return Reply::error(401, "Unauthorized");
            }
        }
        let body = request.body;
        let id = rest.first().and_then(|s| s.parse::<u64>().ok());
        match (rest, id) {
            ([], _) => self.list(&def, method, query, body),
            ([schema], _) if schema == "schema" => match method {
                Method::Get => Reply::json(200, &def.schema()),
                _ => Reply::method_not_allowed(),
            },
            ([_], Some(id)) => self.detail(&def, id, method, body),
            ([_, endpoint, args @ ..], Some(id)) => {
                let Some(row) = self.row(&def.name, id) else {
                    return Reply::not_found();
                };
                let object = self.render(&def, id, &row, 0);
                self.custom(&def, endpoint, args, Some(object), method, query, body, false)
            }
            ([endpoint, args @ ..], None) => self.custom(&def, endpoint, args, None, method, query, body, true),
        }
    }

    fn listing(&self, method: Method) -> Reply {
        if method != Method::Get {
            return Reply::method_not_allowed();
        }
        let listing: Map<String, Value> = self
            .defs
            .keys()
            .map(|name| {
                let list = format!("{}{name}/", self.api_path);
                let schema = format!("{list}schema/");
                (name.clone(), json!({ "list_endpoint": list, "schema": schema }))
            })
            .collect();
        Reply::json(200, &Value::Object(listing))
    }

    // ========================================================================
    // ROWS
    // ========================================================================

    fn uri(&self, resource: &str, id: u64) -> String {
        format!("{}{resource}/{id}/", self.api_path)
    }

    /// `(resource, id)` of a detail URI, absolute or not.
    fn parse_uri(&self, uri: &str) -> Option<(String, u64)> {
        let path = match Url::parse(uri) {
            Ok(url) => url.path().to_string(),
            Err(_) => uri.to_string(),
        };
        let rest = path.strip_prefix(&self.api_path)?;
        match rest.split('/').filter(|s| !s.is_empty()).collect::<Vec<_>>().as_slice() {
            [name, id] => Some((name.to_string(), id.parse().ok()?)),
            _ => None,
        }
    }

    fn row(&self, resource: &str, id: u64) -> Option<Row> {
        self.tables.get(resource)?.rows.get(&id).cloned()
    }

    fn value_of(&self, def: &ResourceDef, id: u64, row: &Row, field: &str) -> Value {
        match field {
            "id" => json!(id),
            "resource_uri" => Value::String(self.uri(&def.name, id)),
            _ => {
                let reverse = def
                    .field_def(field)
                    .and_then(|f| f.related.as_ref())
                    .and_then(|r| r.reverse_of.clone().map(|back| (r.resource.clone(), back)));
                match reverse {
                    Some((resource, back)) => Value::Array(self.pointing_at(&resource, &back, &self.uri(&def.name, id))),
                    None => row.get(field).cloned().unwrap_or(Value::Null),
                }
            }
        }
    }

    /// URIs of `resource` rows whose `field` points at `target`.
    fn pointing_at(&self, resource: &str, field: &str, target: &str) -> Vec<Value> {
        let Some(table) = self.tables.get(resource) else {
            return Vec::new();
        };
        table
            .rows
            .iter()
            .filter(|(_, row)| row.get(field).and_then(Value::as_str) == Some(target))
            .map(|(id, _)| Value::String(self.uri(resource, *id)))
            .collect()
    }

    fn render(&self, def: &ResourceDef, id: u64, row: &Row, depth: usize) -> Value {
        let mut object = Map::new();
        for field in &def.fields {
            let value = self.value_of(def, id, row, &field.name);
            let value = match &field.related {
                Some(relation) if relation.full && depth < 2 => self.embed(&relation.resource, value, depth + 1),
                _ => value,
            };
            object.insert(field.name.clone(), value);
        }
        Value::Object(object)
    }

    fn embed(&self, resource: &str, value: Value, depth: usize) -> Value {
        let Some(def) = self.defs.get(resource) else {
            return value;
        };
        let one = |uri: &Value| -> Value {
            uri.as_str()
                .and_then(|uri| self.parse_uri(uri))
                .and_then(|(_, id)| self.row(resource, id).map(|row| self.render(def, id, &row, depth)))
                .unwrap_or_else(|| uri.clone())
        };
        match &value {
            Value::Array(items) => Value::Array(items.iter().map(one).collect()),
            Value::Null => Value::Null,
            other => one(other),
        }
    }

    fn normalize(&self, def: &ResourceDef, field: &FieldDef, value: &Value) -> Result<Value, Reply> {
        if value.is_null() {
            if field.nullable {
                return Ok(Value::Null);
            }
            return Err(Reply::error(400, format!("The '{}' field does not allow null values.", field.name)));
        }
        match field.field_type {
            FieldType::Datetime | FieldType::Date => {
                let parsed = value.as_str().map(parse_datetime);
                match parsed {
                    Some(Ok((dt, _))) => Ok(Value::String(isoformat(&dt, field.field_type))),
                    _ => Err(Reply::error(
                        400,
                        format!("Datetime provided to '{}' field doesn't appear to be a valid datetime string: '{value}'", field.name),
                    )),
                }
            }
            FieldType::Integer => value
                .as_i64()
                .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
                .map(Value::from)
                .ok_or_else(|| Reply::error(400, format!("'{value}' is not an integer for '{}'", field.name))),
            FieldType::Related => {
                let Some(relation) = &field.related else {
                    return Ok(value.clone());
                };
                let resolve = |item: &Value| -> Result<Value, Reply> {
                    let uri = item
                        .as_str()
                        .or_else(|| item.get("resource_uri").and_then(Value::as_str))
                        .unwrap_or_default();
                    match self.parse_uri(uri) {
                        Some((resource, id)) if resource == relation.resource && self.row(&resource, id).is_some() => {
                            Ok(Value::String(self.uri(&resource, id)))
                        }
                        _ => Err(Reply::error(
                            400,
                            format!("Could not find the provided object via resource URI '{uri}' for '{}'.", def.name),
                        )),
                    }
                };
                match (relation.arity, value) {
                    (RelatedType::ToMany, Value::Array(items)) => {
                        items.iter().map(resolve).collect::<Result<Vec<_>, _>>().map(Value::Array)
                    }
                    (RelatedType::ToMany, other) => Err(Reply::error(400, format!("'{other}' is not a list of URIs"))),
                    (RelatedType::ToOne, item) => resolve(item),
                }
            }
            _ => Ok(value.clone()),
        }
    }

    /// Builds the stored row from a request body. `existing` is the row being
    /// patched; fields the body leaves out keep their value.
    fn hydrate(&self, def: &ResourceDef, id: Option<u64>, body: &Value, existing: Option<&Row>) -> Result<Row, Reply> {
        let Value::Object(body) = body else {
            return Err(Reply::error(400, "The request body must be a JSON object"));
        };
        let mut row = existing.cloned().unwrap_or_default();
        for field in &def.fields {
            let computed = field.related.as_ref().is_some_and(|r| r.reverse_of.is_some());
            if field.name == "id" || field.name == "resource_uri" || field.readonly || computed {
                continue;
            }
            let value = match (body.get(&field.name), existing) {
                (Some(value), _) => self.normalize(def, field, value)?,
                (None, Some(_)) => continue,
                (None, None) => match &field.default {
                    Some(default) => default.clone(),
                    None if field.nullable => Value::Null,
                    None if field.blank => Value::String(String::new()),
                    None => {
                        return Err(Reply::error(
                            400,
                            format!("The '{}' field has no data and doesn't allow a default or null value.", field.name),
                        ))
                    }
                },
            };
            row.insert(field.name.clone(), value);
        }

        let table = self.tables.get(&def.name);
        for field in def.fields.iter().filter(|f| f.unique && f.name != "id") {
            let Some(value) = row.get(&field.name).filter(|v| !v.is_null()) else {
                continue;
            };
            let clash = table.is_some_and(|t| {
                t.rows
                    .iter()
                    .any(|(other, r)| Some(*other) != id && r.get(&field.name) == Some(value))
            });
            if clash {
                return Err(Reply::error(
                    500,
                    format!("IntegrityError: UNIQUE constraint failed: {}.{}", def.name, field.name),
                ));
            }
        }
        Ok(row)
    }

    fn create(&mut self, def: &ResourceDef, body: &Value) -> Result<u64, Reply> {
        let row = self.hydrate(def, None, body, None)?;
        let uri_prefix = self.api_path.clone();
        let table = self.tables.entry(def.name.clone()).or_default();
        table.last_id += 1;
        let id = table.last_id;
        table.rows.insert(id, row);
        info!(resource = %def.name, uri = %format!("{uri_prefix}{}/{id}/", def.name), size = table.rows.len(), "Created");
        Ok(id)
    }

    fn update(&mut self, def: &ResourceDef, id: u64, body: &Value, partial: bool) -> Result<(), Reply> {
        let existing = self.row(&def.name, id).ok_or_else(Reply::not_found)?;
        let row = self.hydrate(def, Some(id), body, partial.then_some(&existing))?;
        if let Some(table) = self.tables.get_mut(&def.name) {
            table.rows.insert(id, row);
        }
        debug!(resource = %def.name, id, partial, "Updated");
        Ok(())
    }

    /// Removes rows and unhooks every reference to them.
    fn remove(&mut self, resource: &str, ids: &[u64]) {
        let uris: Vec<Value> = ids.iter().map(|id| Value::String(self.uri(resource, *id))).collect();
        if let Some(table) = self.tables.get_mut(resource) {
            for id in ids {
                table.rows.remove(id);
            }
        }
        for (name, def) in &self.defs {
            let Some(table) = self.tables.get_mut(name) else {
                continue;
            };
            for field in def.fields.iter().filter(|f| f.related.as_ref().is_some_and(|r| r.resource == resource)) {
                for row in table.rows.values_mut() {
                    match row.get_mut(&field.name) {
                        Some(Value::Array(items)) => items.retain(|item| !uris.contains(item)),
                        Some(value) if uris.contains(value) => *value = Value::Null,
                        _ => {}
                    }
                }
            }
        }
        info!(resource, deleted = ids.len(), "Deleted");
    }

    // ========================================================================
    // LIST
    // ========================================================================

    fn list(&mut self, def: &ResourceDef, method: Method, query: &[(String, String)], body: Option<Value>) -> Reply {
        if !def.list_methods.contains(&method) {
            return Reply::method_not_allowed();
        }
        let body = body.unwrap_or(Value::Null);
        match method {
            Method::Get => self.list_get(def, query).unwrap_or_else(|reply| reply),
            Method::Post => match self.create(def, &body) {
                Ok(id) if def.always_return_data => {
                    let row = self.row(&def.name, id).unwrap_or_default();
                    Reply::json(201, &self.render(def, id, &row, 0))
                }
                Ok(_) => Reply::empty(201),
                Err(reply) => reply,
            },
            Method::Patch => self.bulk(def, &body),
            Method::Put => {
                let objects = body.get("objects").and_then(Value::as_array).cloned().unwrap_or_default();
                let snapshot = self.tables.clone();
                let ids: Vec<u64> = self.tables.get(&def.name).map(|t| t.rows.keys().copied().collect()).unwrap_or_default();
                self.remove(&def.name, &ids);
                for object in &objects {
                    if let Err(reply) = self.create(def, object) {
                        self.tables = snapshot;
                        return reply;
                    }
                }
                Reply::empty(204)
            }
            Method::Delete => {
                let ids: Vec<u64> = self.tables.get(&def.name).map(|t| t.rows.keys().copied().collect()).unwrap_or_default();
                self.remove(&def.name, &ids);
                Reply::empty(204)
            }
        }
    }

    fn list_get(&self, def: &ResourceDef, query: &[(String, String)]) -> Result<Reply, Reply> {
        let mut limit = def.default_limit;
        let mut offset = 0usize;
        let mut ordering = Vec::new();
        let mut filters: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for (key, value) in query {
            match key.as_str() {
                "limit" => limit = value.parse().map_err(|_| Reply::error(400, format!("Invalid limit '{value}'")))?,
                "offset" => offset = value.parse().map_err(|_| Reply::error(400, format!("Invalid offset '{value}'")))?,
                "order_by" => ordering.push(value.clone()),
                "format" => {}
                _ => filters.entry(key.as_str()).or_default().push(value.clone()),
            }
        }
        if def.max_limit != 0 && (limit == 0 || limit > def.max_limit) {
            limit = def.max_limit;
        }

        let empty = Table::default();
        let table = self.tables.get(&def.name).unwrap_or(&empty);
        let mut matched = Vec::new();
        for (id, row) in &table.rows {
            let mut keep = true;
            for (key, values) in &filters {
                if !self.filter_row(def, *id, row, key, values)? {
                    keep = false;
                    break;
                }
            }
            if keep {
                matched.push((*id, row));
            }
        }

        for field in &ordering {
            let name = field.trim_start_matches('-');
            if !def.ordering.iter().any(|o| o == name) {
                return Err(Reply::error(400, format!("No matching '{name}' field for ordering on.")));
            }
        }
        matched.sort_by(|(a_id, a), (b_id, b)| {
            for field in &ordering {
                let name = field.trim_start_matches('-');
                let order = order_values(&self.value_of(def, *a_id, a, name), &self.value_of(def, *b_id, b, name));
                let order = if field.starts_with('-') { order.reverse() } else { order };
                if order != Ordering::Equal {
                    return order;
                }
            }
            a_id.cmp(b_id)
        });

        let total = matched.len();
        let take = if limit == 0 { total } else { limit };
        let objects: Vec<Value> = matched
            .iter()
            .skip(offset)
            .take(take)
            .map(|(id, row)| self.render(def, *id, row, 0))
            .collect();
        let link = |offset: usize| {
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            for (key, value) in query.iter().filter(|(k, _)| k != "limit" && k != "offset") {
                serializer.append_pair(key, value);
            }
            serializer.append_pair("limit", &take.to_string());
            serializer.append_pair("offset", &offset.to_string());
            Value::String(format!("{}{}/?{}", self.api_path, def.name, serializer.finish()))
        };
        let next = if limit != 0 && offset + take < total { link(offset + take) } else { Value::Null };
        let previous = if limit != 0 && offset > 0 { link(offset.saturating_sub(take)) } else { Value::Null };
        Ok(Reply::json(
            200,
            &json!({
                "meta": {"limit": limit, "offset": offset, "total_count": total, "next": next, "previous": previous},
                "objects": objects,
            }),
        ))
    }

    fn filter_row(&self, def: &ResourceDef, id: u64, row: &Row, key: &str, values: &[String]) -> Result<bool, Reply> {
        let parts: Vec<&str> = key.split("__").collect();
        let field = parts[0];
        let (path, op) = match parts.split_last() {
            Some((last, init)) if !init.is_empty() && is_filter_suffix(last) => (&init[1..], *last),
            _ => (&parts[1..], "exact"),
        };
        let Some(filtering) = def.filtering.get(field) else {
            return Err(Reply::error(400, format!("The '{field}' field does not allow filtering.")));
        };
        if !filtering.allows(op, !path.is_empty()) {
            return Err(Reply::error(400, format!("'{op}' is not an allowed filter on the '{field}' field.")));
        }

        let value = self.value_of(def, id, row, field);
        let candidates: Vec<Value> = match path {
            [] => match value {
                Value::Array(items) if op != "isnull" => items,
                other => vec![other],
            },
            [sub] => {
                let relation = def
                    .field_def(field)
                    .and_then(|f| f.related.as_ref())
                    .ok_or_else(|| Reply::error(400, format!("'{field}' is not a relation")))?;
                let Some(related) = self.defs.get(&relation.resource) else {
                    return Ok(false);
                };
                let uris = match value {
                    Value::Array(items) => items,
                    Value::Null => Vec::new(),
                    other => vec![other],
                };
                uris.iter()
                    .filter_map(|uri| uri.as_str().and_then(|u| self.parse_uri(u)))
                    .filter_map(|(resource, rid)| self.row(&resource, rid).map(|r| self.value_of(related, rid, &r, sub)))
                    .collect()
            }
            _ => return Err(Reply::error(400, format!("Filter '{key}' goes too deep"))),
        };
        if op == "isnull" && candidates.is_empty() {
            return passes(op, &Value::Null, values);
        }
        for candidate in &candidates {
            if passes(op, candidate, values)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn bulk(&mut self, def: &ResourceDef, body: &Value) -> Reply {
        let objects = body.get("objects").and_then(Value::as_array).cloned().unwrap_or_default();
        let deleted = body
            .get("deleted_objects")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let snapshot = self.tables.clone();
        let result = self.apply_bulk(def, &objects, &deleted);
        match result {
            Ok((created, updated, deleted)) => {
                info!(resource = %def.name, created, updated, deleted, "Bulk");
                Reply::empty(202)
            }
            Err(reply) => {
                self.tables = snapshot;
                reply
            }
        }
    }

    /// Creates or patches every object, then deletes. The caller rolls back on error.
    fn apply_bulk(&mut self, def: &ResourceDef, objects: &[Value], deleted: &[Value]) -> Result<(usize, usize, usize), Reply> {
        let (mut created, mut updated) = (0, 0);
        for object in objects {
            match object.get("resource_uri").and_then(Value::as_str).and_then(|u| self.parse_uri(u)) {
                Some((resource, id)) if resource == def.name => {
                    self.update(def, id, object, true)?;
                    updated += 1;
                }
                Some(_) => return Err(Reply::error(400, "resource_uri belongs to another resource")),
                None => {
                    self.create(def, object)?;
                    created += 1;
                }
            }
        }
        let mut ids = Vec::new();
        for uri in deleted {
            match uri.as_str().and_then(|u| self.parse_uri(u)) {
                Some((resource, id)) if resource == def.name && self.row(&resource, id).is_some() => ids.push(id),
                _ => return Err(Reply::not_found()),
            }
        }
        self.remove(&def.name, &ids);
        Ok((created, updated, ids.len()))
    }

    // ========================================================================
    // DETAIL
    // ========================================================================

    fn detail(&mut self, def: &ResourceDef, id: u64, method: Method, body: Option<Value>) -> Reply {
        if !def.detail_methods.contains(&method) {
            return Reply::method_not_allowed();
        }
        if self.row(&def.name, id).is_none() {
            return Reply::not_found();
        }
        let body = body.unwrap_or(Value::Null);
        let written = match method {
            Method::Get => None,
            Method::Put => Some((self.update(def, id, &body, false), 204)),
            Method::Patch => Some((self.update(def, id, &body, true), 202)),
            Method::Delete => {
                self.remove(&def.name, &[id]);
                return Reply::empty(204);
            }
            Method::Post => return Reply::error(501, "Not implemented"),
        };
        match written {
            Some((Err(reply), _)) => reply,
            Some((Ok(()), status)) if !def.always_return_data => Reply::empty(status),
            _ => {
                let row = self.row(&def.name, id).unwrap_or_default();
                let status = if method == Method::Get { 200 } else { 202 };
                Reply::json(status, &self.render(def, id, &row, 0))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn custom(
        &self,
        def: &ResourceDef,
        endpoint: &str,
        args: &[String],
        object: Option<Value>,
        method: Method,
        query: &[(String, String)],
        body: Option<Value>,
        list_level: bool,
    ) -> Reply {
        let endpoints = if list_level { &def.list_endpoints } else { &def.detail_endpoints };
        let Some(custom) = endpoints.get(endpoint) else {
            return Reply::not_found();
        };
        if custom.arity != args.len() {
            return Reply::not_found();
        }
        let kwargs = if method == Method::Get {
            let mut kwargs = Map::new();
            for (key, value) in query {
                match kwargs.get_mut(key) {
                    Some(Value::Array(items)) => items.push(Value::String(value.clone())),
                    Some(existing) => *existing = json!([existing.clone(), value]),
                    None => {
                        kwargs.insert(key.clone(), Value::String(value.clone()));
                    }
                }
            }
            kwargs
        } else {
            match body {
                Some(Value::Object(map)) => map,
                _ => Map::new(),
            }
        };
        let objects = self
            .tables
            .get(&def.name)
            .map(|t| t.rows.iter().map(|(id, row)| self.render(def, *id, row, 0)).collect())
            .unwrap_or_default();
        let call = EndpointCall {
            method,
            args: args.to_vec(),
            kwargs,
            object,
            objects,
        };
        let response = (custom.handler)(&call).unwrap_or_else(|e| e);
        debug!(resource = %def.name, endpoint, status = response.status, "Custom endpoint");
        Reply {
            status: response.status,
            body: response.body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_compare_like_the_database() {
        assert!(passes("gt", &json!(40), &["30".into()]).unwrap());
        assert!(!passes("lt", &json!(40), &["30".into()]).unwrap());
        assert!(passes("in", &json!(20), &["20".into(), "30".into()]).unwrap());
        assert!(passes("in", &json!(30), &["20,30".into()]).unwrap());
        assert!(passes("range", &json!(25), &["20".into(), "30".into()]).unwrap());
        assert!(passes("icontains", &json!("Hello World"), &["world".into()]).unwrap());
        assert!(passes("isnull", &Value::Null, &["true".into()]).unwrap());
        assert!(passes("exact", &json!(true), &["true".into()]).unwrap());
        assert!(passes("gte", &json!("2014-01-01T00:00:00"), &["2014-01-01T00:00:00.000000".into()]).unwrap());
        assert!(passes("year", &json!("2014-06-01T10:00:00"), &["2014".into()]).unwrap());
        assert!(passes("regex", &json!("a"), &["a".into()]).is_err());
    }

    #[test]
    fn datetimes_are_stored_like_django_writes_them() {
        let (dt, _) = parse_datetime("2014-03-04T05:06:07.000000").unwrap();
        assert_eq!(isoformat(&dt, FieldType::Datetime), "2014-03-04T05:06:07");
        let (dt, _) = parse_datetime("2014-03-04T05:06:07.250000").unwrap();
        assert_eq!(isoformat(&dt, FieldType::Datetime), "2014-03-04T05:06:07.250000");
        assert_eq!(isoformat(&dt, FieldType::Date), "2014-03-04");
    }

    #[test]
    fn nulls_sort_first() {
        assert_eq!(order_values(&Value::Null, &json!(1)), Ordering::Less);
        assert_eq!(order_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(order_values(&json!("b"), &json!("a")), Ordering::Greater);
    }
}
