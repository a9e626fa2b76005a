//! Page output cache in front of a [`TemplateEngine`].
//!
//! The store is a `moka` cache keyed by `(template path, cache id)`, bounded
//! by [`CacheSettings::max_entries`] and expiring entries after
//! [`CacheSettings::lifetime`]. Each page remembers the templates it was
//! rendered from, so with renewal enabled a change to any included template
//! expires it too. Concurrent requests computing the same key may
//! both render; the last store wins and no lock is held around rendering.

use std::sync::Arc;
use std::time::SystemTime;

use moka::sync::Cache;
use tracing::debug;

use super::{RenderError, TemplateEngine, TemplateVars};
use crate::cache::cache_belongs_to;
use crate::config::{CacheSettings, Mode};

type PageKey = (String, String);

#[derive(Debug, Clone)]
struct CachedPage {
    body: Arc<str>,
    templates: Arc<[String]>,
    rendered_at: SystemTime,
}

/// Shared handle to a template engine plus its page cache.
///
/// Cloning is cheap; clones share the engine and the store.
#[derive(Clone)]
pub struct Renderer {
    engine: Arc<dyn TemplateEngine>,
    store: Cache<PageKey, CachedPage>,
    settings: CacheSettings,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("settings", &self.settings)
            .field("entries", &self.store.entry_count())
            .finish_non_exhaustive()
    }
}

impl Renderer {
    /// Creates a renderer; `mode` decides whether caching is actually applied.
    pub fn new(engine: impl TemplateEngine + 'static, settings: &CacheSettings, mode: Mode) -> Self {
        Self::from_shared(Arc::new(engine), settings, mode)
    }

    pub fn from_shared(engine: Arc<dyn TemplateEngine>, settings: &CacheSettings, mode: Mode) -> Self {
        let settings = settings.effective(mode);
        let store = Cache::builder()
            .max_capacity(settings.max_entries)
            .time_to_live(settings.lifetime())
            .build();
        Self {
            engine,
            store,
            settings,
        }
    }

    pub fn engine(&self) -> &dyn TemplateEngine {
        self.engine.as_ref()
    }

    /// `true` if pages are stored at all.
    pub fn caching(&self) -> bool {
        self.settings.enabled
    }

    pub fn exists(&self, template: &str) -> bool {
        self.engine.exists(template)
    }

    /// `true` if a fresh page is stored. Never fails: anything odd counts as a miss.
    pub fn is_cached(&self, template: &str, cache_id: &str) -> bool {
        self.lookup(template, cache_id).is_some()
    }

    /// The fresh cached page, if any.
    pub fn lookup(&self, template: &str, cache_id: &str) -> Option<Arc<str>> {
        if !self.settings.enabled {
            return None;
        }

        let key = (template.to_owned(), cache_id.to_owned());
        let page = self.store.get(&key)?;

        if self.settings.renew_on_template_change {
            let changed = page.templates.iter().find(|read| {
                self.engine
                    .modified(read.as_str())
                    .is_some_and(|modified| modified > page.rendered_at)
            });
            if let Some(changed) = changed {
                debug!(template, cache_id, changed = %changed, "template changed since caching, dropping page");
                self.store.invalidate(&key);
                return None;
            }
        }

        Some(page.body)
    }

    /// Returns the cached page, or renders it with `vars` and stores it.
    pub fn render(
        &self,
        template: &str,
        cache_id: &str,
        vars: &TemplateVars,
    ) -> Result<String, RenderError> {
        if let Some(body) = self.lookup(template, cache_id) {
            return Ok(body.to_string());
        }

        let rendered_at = SystemTime::now();
        let (body, templates) = self.engine.render_traced(template, vars)?;

        if self.settings.enabled {
            debug!(template, cache_id, bytes = body.len(), "caching rendered page");
            self.store.insert(
                (template.to_owned(), cache_id.to_owned()),
                CachedPage {
                    body: Arc::from(body.as_str()),
                    templates: Arc::from(templates),
                    rendered_at,
                },
            );
        }

        Ok(body)
    }

    /// Drops every cached page whose cache id belongs to `base_id`.
    ///
    /// Returns the number of pages removed.
    pub fn clear(&self, base_id: &str) -> usize {
        let doomed: Vec<PageKey> = self
            .store
            .iter()
            .filter(|(key, _)| cache_belongs_to(&key.1, base_id))
            .map(|(key, _)| (*key).clone())
            .collect();

        for key in &doomed {
            self.store.invalidate(key);
        }
        debug!(base_id, removed = doomed.len(), "cleared cached pages");
        doomed.len()
    }

    /// Drops every cached page.
    pub fn clear_all(&self) {
        self.store.invalidate_all();
    }
}
