//! Template rendering boundary.
//!
//! The template language itself is not part of this crate. Controllers talk to
//! a [`TemplateEngine`] through a [`Renderer`], which adds the page output
//! cache keyed by `(template path, cache id)`.
//!
//! - [`TemplateVars`]: name → value variables visible to a template.
//! - [`TemplateEngine`]: the pluggable engine; [`FsEngine`] is a minimal
//!   file-based implementation.
//! - [`Renderer`]: cache lookup, render-and-store, per-controller invalidation.
//! - [`path`]: template naming conventions and fallback directories.

use std::path::PathBuf;
use std::time::SystemTime;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub mod fs;
pub mod path;
pub mod renderer;

pub use fs::FsEngine;
pub use path::TemplateDirs;
pub use renderer::Renderer;

/// Errors raised while rendering a template.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template {template} not found under {}", root.display())]
    NotFound { template: String, root: PathBuf },

    #[error("failed to read template {template}: {source}")]
    Io {
        template: String,
        #[source]
        source: std::io::Error,
    },

    #[error("syntax error in {template} at byte {offset}: {message}")]
    Syntax {
        template: String,
        offset: usize,
        message: String,
    },

    #[error("includes nested deeper than {limit} levels in {template}")]
    IncludeDepth { template: String, limit: usize },

    #[error("template variable {name} could not be serialized: {source}")]
    Variable {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// Failure reported by a third-party engine.
    #[error("template engine failed on {template}: {message}")]
    Engine { template: String, message: String },
}

/// Variables handed to a template. Assigning a name twice keeps the last value.
///
/// ```
/// use simplectl::template::TemplateVars;
/// use serde_json::json;
///
/// let mut vars = TemplateVars::new();
/// vars.assign("title", "Guestbook");
/// vars.assign("title", "Guests");
/// vars.assign("entries", json!([{ "name": "Ann" }]));
///
/// assert_eq!(vars.get("title"), Some(&json!("Guests")));
/// assert_eq!(vars.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateVars {
    map: Map<String, Value>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.map.insert(name.into(), value.into());
    }

    /// Assigns any serializable value.
    pub fn assign_serialized<T: Serialize + ?Sized>(
        &mut self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<(), RenderError> {
        let name = name.into();
        let value = serde_json::to_value(value).map_err(|source| RenderError::Variable {
            name: name.clone(),
            source,
        })?;
        self.map.insert(name, value);
        Ok(())
    }

    /// Assigns every variable of `other`, overwriting on collision.
    pub fn extend(&mut self, other: TemplateVars) {
        self.map.extend(other.map);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.map.get(name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for TemplateVars {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut vars = Self::new();
        for (k, v) in iter {
            vars.assign(k, v);
        }
        vars
    }
}

/// A template engine the [`Renderer`] delegates to.
///
/// Template names are paths relative to the engine's template root, e.g.
/// `user/profile.tpl`.
pub trait TemplateEngine: Send + Sync {
    /// Returns `true` if `template` exists.
    fn exists(&self, template: &str) -> bool;

    /// Last modification time of `template`, if the engine can tell.
    ///
    /// Used to expire cached pages whose template changed.
    fn modified(&self, _template: &str) -> Option<SystemTime> {
        None
    }

    /// Renders `template` with `vars`.
    fn render(&self, template: &str, vars: &TemplateVars) -> Result<String, RenderError>;

    /// Renders like [`render`](Self::render) and also names every template
    /// read on the way, `template` first.
    ///
    /// Engines with includes override this so cached pages expire when an
    /// included template changes.
    fn render_traced(
        &self,
        template: &str,
        vars: &TemplateVars,
    ) -> Result<(String, Vec<String>), RenderError> {
        Ok((self.render(template, vars)?, vec![template.to_owned()]))
    }
}
