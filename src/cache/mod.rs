//! Cache key derivation for rendered pages.
//!
//! A page is cached under `baseId|requestHash`:
//!
//! - the **base id** names the controller instance. It defaults to the
//!   controller's concrete type name and can be overridden per instance.
//! - the **request hash** is a SHA-256 digest over every request parameter.
//!   Parameters are visited in sorted key order and both the name and the
//!   value are serialized to JSON first, so structurally equal requests always
//!   hash alike and neither half can smuggle in a separator.
//!
//! Both halves are computed on first use and then stay fixed for the lifetime
//! of the [`CacheIdentity`].

use std::cell::OnceCell;
use std::fmt::Write;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::context::Params;

/// Separator between the base id and the request hash.
pub const ID_SEPARATOR: char = '|';

/// Hex-encoded SHA-256 over the canonical form of `params`.
///
/// The canonical form is `<json name>=<json value>|` for each parameter in
/// ascending key order. An empty mapping hashes the empty string.
///
/// ```
/// use simplectl::cache::request_hash;
/// use simplectl::context::Params;
///
/// let a: Params = [("b", "2"), ("a", "1")].into_iter().collect();
/// let b: Params = [("a", "1"), ("b", "2")].into_iter().collect();
/// assert_eq!(request_hash(&a), request_hash(&b));
/// assert_eq!(request_hash(&Params::new()).len(), 64);
/// ```
pub fn request_hash(params: &Params) -> String {
    let mut hasher = Sha256::new();
    for (name, value) in params.iter() {
        // `Value`'s Display is its compact JSON encoding; object keys are sorted.
        hasher.update(Value::from(name).to_string().as_bytes());
        hasher.update(b"=");
        hasher.update(value.to_string().as_bytes());
        hasher.update(b"|");
    }

    hasher
        .finalize()
        .iter()
        .fold(String::with_capacity(64), |mut hex, byte| {
            let _ = write!(hex, "{byte:02x}");
            hex
        })
}

/// The composite cache key of one controller instance.
///
/// ```
/// use simplectl::cache::CacheIdentity;
/// use simplectl::context::Params;
///
/// let params: Params = [("id", "7")].into_iter().collect();
/// let identity = CacheIdentity::new("app::UserController");
///
/// assert_eq!(identity.base_id(), "app::UserController");
/// let id = identity.request_id(&params);
/// assert!(id.starts_with("app::UserController|"));
/// assert_eq!(id, identity.request_id(&params));
/// ```
#[derive(Debug, Clone)]
pub struct CacheIdentity {
    type_name: &'static str,
    base_override: Option<String>,
    base: OnceCell<String>,
    hash: OnceCell<String>,
}

impl CacheIdentity {
    /// Identity for an instance of the named controller type.
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            base_override: None,
            base: OnceCell::new(),
            hash: OnceCell::new(),
        }
    }

    /// Replaces the type-derived base id.
    ///
    /// Has no effect once the base id has been computed.
    #[must_use]
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base_override = Some(base.into());
        self
    }

    /// The base id, computed once.
    pub fn base_id(&self) -> &str {
        self.base.get_or_init(|| {
            self.base_override
                .clone()
                .unwrap_or_else(|| self.type_name.to_owned())
        })
    }

    /// `base_id|request_hash`. The hash is taken from the first `params` seen.
    pub fn request_id(&self, params: &Params) -> String {
        let hash = self.hash.get_or_init(|| request_hash(params));
        format!("{}{ID_SEPARATOR}{hash}", self.base_id())
    }

    /// `true` if `cache_id` belongs to this identity's base id.
    pub fn owns(&self, cache_id: &str) -> bool {
        cache_belongs_to(cache_id, self.base_id())
    }
}

/// `true` if `cache_id` is `base_id` itself or `base_id|…`.
pub fn cache_belongs_to(cache_id: &str, base_id: &str) -> bool {
    match cache_id.strip_prefix(base_id) {
        Some(rest) => rest.is_empty() || rest.starts_with(ID_SEPARATOR),
        None => false,
    }
}
