//! Per-request context: the one value a controller lifecycle reads its input from.
//!
//! A [`RequestContext`] is built once per incoming request and never mutated
//! afterwards. It merges every parameter source into a single [`Params`]
//! mapping:
//!
//! 1. the query string,
//! 2. an `application/x-www-form-urlencoded` body,
//! 3. the top-level object of an `application/json` body.
//!
//! Later sources overwrite earlier ones key by key. Form-style keys follow the
//! usual bracket conventions: `tag[]=a&tag[]=b` becomes an array and
//! `user[name]=Ann` becomes an object.

use std::collections::BTreeMap;

use bytes::Bytes;
use percent_encoding::percent_decode_str;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::http::{Method, Request};

const FORM_MEDIA_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_MEDIA_TYPE: &str = "application/json";

/// Request parameters: name → raw value.
///
/// Values are strings for form input and arbitrary JSON for JSON bodies. Keys
/// are kept sorted, so iteration order never depends on how the request was
/// assembled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    map: BTreeMap<String, Value>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a `key=value&…` string into parameters.
    ///
    /// ```
    /// use simplectl::context::Params;
    /// use serde_json::json;
    ///
    /// let params = Params::from_form("name=Ann+Lee&tag[]=a&tag[]=b&user[id]=7");
    /// assert_eq!(params.get("name"), Some(&json!("Ann Lee")));
    /// assert_eq!(params.get("tag"), Some(&json!(["a", "b"])));
    /// assert_eq!(params.get("user"), Some(&json!({ "id": "7" })));
    /// ```
    pub fn from_form(input: &str) -> Self {
        let mut params = Self::new();
        params.merge_form(input);
        params
    }

    /// Merges `key=value&…` pairs into this mapping.
    pub fn merge_form(&mut self, input: &str) {
        for pair in input.split('&').filter(|p| !p.is_empty()) {
            let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = decode_component(raw_key);
            if key.is_empty() {
                continue;
            }
            let value = Value::String(decode_component(raw_value));
            self.insert_form_pair(key, value);
        }
    }

    fn insert_form_pair(&mut self, key: String, value: Value) {
        if let Some(base) = key.strip_suffix("[]") {
            let slot = self
                .map
                .entry(base.to_owned())
                .or_insert_with(|| Value::Array(Vec::new()));
            match slot {
                Value::Array(items) => items.push(value),
                other => *other = Value::Array(vec![value]),
            }
            return;
        }

        if let Some((base, rest)) = key.split_once('[') {
            if let Some(sub) = rest.strip_suffix(']') {
                if !base.is_empty() && !sub.is_empty() {
                    let slot = self
                        .map
                        .entry(base.to_owned())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if !slot.is_object() {
                        *slot = Value::Object(Map::new());
                    }
                    if let Value::Object(fields) = slot {
                        fields.insert(sub.to_owned(), value);
                    }
                    return;
                }
            }
        }

        self.map.insert(key, value);
    }

    /// Overwrites parameters with the fields of a JSON object.
    pub fn merge_object(&mut self, object: Map<String, Value>) {
        self.map.extend(object);
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.map.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.map.get(name)
    }

    /// Returns the parameter as a string slice, if it is a string.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.map.get(name).and_then(Value::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            map: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// Immutable snapshot of one incoming request, as seen by a controller.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    params: Params,
    service: Option<String>,
    method: Method,
    content_type: Option<String>,
    body: Bytes,
    target: String,
    fetch: bool,
}

impl RequestContext {
    /// Builds the context for a parsed HTTP request.
    pub fn from_request(request: &Request, config: &Config) -> Self {
        let mut params = Params::new();
        if let Some(query) = request.query_string() {
            params.merge_form(query);
        }

        let content_type = request.headers().media_type();
        let body = request.body().clone();

        match content_type.as_deref() {
            Some(FORM_MEDIA_TYPE) => match std::str::from_utf8(&body) {
                Ok(form) => params.merge_form(form),
                Err(e) => warn!(error = %e, "form body is not valid UTF-8, ignoring it"),
            },
            Some(JSON_MEDIA_TYPE) if !body.is_empty() => {
                match serde_json::from_slice::<Value>(&body) {
                    Ok(Value::Object(object)) => params.merge_object(object),
                    Ok(_) => debug!("JSON body is not an object, not merged into parameters"),
                    Err(e) => warn!(error = %e, "malformed JSON body, ignoring it"),
                }
            }
            _ => {}
        }

        let service = params.get_str(&config.service_param).map(str::to_owned);
        let fetch = request.headers().contains(&config.fetch_header);

        Self {
            params,
            service,
            method: request.method().clone(),
            content_type,
            body,
            target: request.target(),
            fetch,
        }
    }

    /// Starts a context by hand, for tests and non-HTTP hosts.
    pub fn builder() -> RequestContextBuilder {
        RequestContextBuilder::default()
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// The requested service token, e.g. `"create-item"`.
    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Media type of the body, without parameters.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The URL the client asked for (path and query). Default redirect target.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// `true` when the client announced itself as a fetch-style client.
    pub fn is_fetch(&self) -> bool {
        self.fetch
    }
}

/// Builder for [`RequestContext`].
///
/// ```
/// use simplectl::context::RequestContext;
///
/// let ctx = RequestContext::builder()
///     .param("service", "get-user")
///     .param("id", "7")
///     .build();
/// assert_eq!(ctx.service(), Some("get-user"));
/// assert_eq!(ctx.params().get_str("id"), Some("7"));
/// ```
#[derive(Debug)]
pub struct RequestContextBuilder {
    params: Params,
    service_param: String,
    method: Method,
    content_type: Option<String>,
    body: Bytes,
    target: String,
    fetch: bool,
}

impl Default for RequestContextBuilder {
    fn default() -> Self {
        Self {
            params: Params::new(),
            service_param: Config::default().service_param,
            method: Method::Get,
            content_type: None,
            body: Bytes::new(),
            target: "/".to_owned(),
            fetch: false,
        }
    }
}

impl RequestContextBuilder {
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name, value);
        self
    }

    #[must_use]
    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Name of the parameter holding the service token. Defaults to `service`.
    #[must_use]
    pub fn service_param(mut self, name: impl Into<String>) -> Self {
        self.service_param = name.into();
        self
    }

    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn body(mut self, content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.content_type = Some(content_type.into());
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    #[must_use]
    pub fn fetch(mut self, fetch: bool) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn build(self) -> RequestContext {
        let service = self.params.get_str(&self.service_param).map(str::to_owned);
        RequestContext {
            params: self.params,
            service,
            method: self.method,
            content_type: self.content_type,
            body: self.body,
            target: self.target,
            fetch: self.fetch,
        }
    }
}
