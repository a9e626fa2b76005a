//! Page controllers.
//!
//! A controller type implements [`Controller`] and is mounted through a
//! [`ControllerHost`], which precomputes everything that only depends on the
//! type: its [`TemplateDirs`] and its [`ServiceRegistry`]. Every request then
//! gets a fresh controller instance and a fresh [`Page`]:
//!
//! ```text
//! factory(ctx) → controller
//!     setup(page, ctx)        base template, defaults          (Setup phase)
//!     serve:
//!       CheckCache            cached base page?  → Reply::Page
//!       Dispatch              service named?     → its Reply, or fall through
//!       Render                render(page, ctx), then the base template
//! ```
//!
//! # Examples
//!
//! ```rust,no_run
//! use simplectl::binder::{BoundArgs, MethodSignature, ParamSpec};
//! use simplectl::config::Config;
//! use simplectl::controller::{Controller, ControllerHost, Endpoint, Page};
//! use simplectl::context::RequestContext;
//! use simplectl::service::{RegistryError, ServiceError, ServiceRegistry};
//!
//! struct GuestbookController;
//!
//! impl GuestbookController {
//!     fn sign(&mut self, page: &mut Page, args: &BoundArgs) -> Result<bool, ServiceError> {
//!         page.assign("signed", args.str("name").unwrap_or("anonymous"));
//!         Ok(true)
//!     }
//! }
//!
//! impl Controller for GuestbookController {
//!     fn services(registry: &mut ServiceRegistry<Self>) -> Result<(), RegistryError> {
//!         registry.register(
//!             "signService",
//!             MethodSignature::new().param(ParamSpec::string("name")),
//!             Self::sign,
//!         )?;
//!         Ok(())
//!     }
//!
//!     fn setup(&mut self, page: &mut Page, _ctx: &RequestContext) {
//!         page.set_base_template("frame");
//!         page.set_main_template("entries");
//!     }
//! }
//!
//! let host = ControllerHost::new(&Config::default(), |_| GuestbookController).unwrap();
//! let reply = host.handle(&RequestContext::builder().param("service", "sign").build());
//! ```

use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::cache::CacheIdentity;
use crate::config::{Config, Mode};
use crate::context::RequestContext;
use crate::service::{RegistryError, ServiceError, ServiceRegistry};
use crate::template::{FsEngine, RenderError, Renderer, TemplateDirs, TemplateVars};

pub mod lifecycle;
pub mod reply;

pub use lifecycle::serve;
pub use reply::{Redirect, Reply};

/// Suffix stripped from type names when deriving the template directory.
pub const CONTROLLER_SUFFIX: &str = "Controller";

const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Template variable pointing at the main template.
pub const MAIN_TEMPLATE_VAR: &str = "mainTemplate";

/// Template variable telling the frame to render the main template as itself.
pub const SHOW_MAIN_AS_BASE_VAR: &str = "showMainAsBaseTemplate";

/// Template variable holding the page title.
pub const TITLE_VAR: &str = "title";

/// A page controller type.
///
/// Everything has a default; a controller usually overrides [`setup`](Self::setup)
/// and [`services`](Self::services).
pub trait Controller: Send + Sized + 'static {
    /// Class-prefix identifiers of this type and the types it specialises,
    /// most specific first. Each names a template directory
    /// (`AdminUser` → `admin_user/`); the template root is always searched last.
    ///
    /// Defaults to the type's own name without the `Controller` suffix.
    fn lineage() -> Vec<String> {
        vec![type_prefix(type_name::<Self>())]
    }

    /// Declares the service operations of this type.
    fn services(_registry: &mut ServiceRegistry<Self>) -> Result<(), RegistryError> {
        Ok(())
    }

    /// Overrides the cache base id, which otherwise is the type name.
    fn base_cache_id(&self) -> Option<String> {
        None
    }

    /// Construction phase: pick the base template and set up defaults.
    fn setup(&mut self, _page: &mut Page, _ctx: &RequestContext) {}

    /// Assign phase, run right before the base template is rendered.
    fn render(&mut self, _page: &mut Page, _ctx: &RequestContext) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// `app::admin::AdminUserController<T>` → `AdminUser`.
///
/// ```
/// use simplectl::controller::type_prefix;
///
/// assert_eq!(type_prefix("app::admin::AdminUserController"), "AdminUser");
/// assert_eq!(type_prefix("Shop<u8>"), "Shop");
/// ```
pub fn type_prefix(type_name: &str) -> String {
    let path = type_name.split('<').next().unwrap_or(type_name);
    let name = path.rsplit("::").next().unwrap_or(path);
    name.strip_suffix(CONTROLLER_SUFFIX)
        .unwrap_or(name)
        .to_owned()
}

/// Whether the page is still being set up by [`Controller::setup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Running,
}

/// The template state of one controller instance.
///
/// Holds the two template areas (base frame and main content), the variables
/// handed to them, and the instance's [`CacheIdentity`].
pub struct Page {
    renderer: Renderer,
    dirs: Arc<TemplateDirs>,
    identity: CacheIdentity,
    base_template: String,
    main_template: String,
    vars: TemplateVars,
    title: Option<String>,
    content_type: String,
    mode: Mode,
    phase: Phase,
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("base_template", &self.base_template)
            .field("main_template", &self.main_template)
            .field("vars", &self.vars)
            .field("title", &self.title)
            .field("mode", &self.mode)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl Page {
    /// A page in the [`Phase::Setup`] phase with no templates chosen.
    pub fn new(
        renderer: Renderer,
        dirs: Arc<TemplateDirs>,
        identity: CacheIdentity,
        mode: Mode,
    ) -> Self {
        Self {
            renderer,
            dirs,
            identity,
            base_template: String::new(),
            main_template: String::new(),
            vars: TemplateVars::new(),
            title: None,
            content_type: DEFAULT_CONTENT_TYPE.to_owned(),
            mode,
            phase: Phase::Setup,
        }
    }

    /// Ends the setup phase.
    pub fn start(&mut self) {
        self.phase = Phase::Running;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn template_dirs(&self) -> &TemplateDirs {
        &self.dirs
    }

    pub fn identity(&self) -> &CacheIdentity {
        &self.identity
    }

    /// `baseId|requestHash` for this instance.
    pub fn request_cache_id(&self, ctx: &RequestContext) -> String {
        self.identity.request_id(ctx.params())
    }

    pub fn assign(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.assign(name, value);
    }

    pub fn assign_serialized<T: Serialize + ?Sized>(
        &mut self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<(), RenderError> {
        self.vars.assign_serialized(name, value)
    }

    pub fn var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn vars(&self) -> &TemplateVars {
        &self.vars
    }

    /// Resolves a template reference against this controller's directories.
    pub fn resolve_template(&self, name: &str) -> String {
        self.dirs.resolve(name, self.renderer.engine())
    }

    /// Sets the frame template.
    ///
    /// Only the setup phase really replaces the frame, since the frame path is
    /// part of the cache lookup. Later calls make `name` the main template and
    /// set `showMainAsBaseTemplate`, so the frame can render it in its place.
    pub fn set_base_template(&mut self, name: &str) {
        match self.phase {
            Phase::Setup => self.base_template = self.resolve_template(name),
            Phase::Running => {
                debug!(template = name, "emulating base template change");
                self.set_main_template(name);
                self.assign(SHOW_MAIN_AS_BASE_VAR, true);
            }
        }
    }

    /// Sets the main content template and, if it exists, exposes its path as `mainTemplate`.
    pub fn set_main_template(&mut self, name: &str) {
        self.main_template = self.resolve_template(name);
        if self.renderer.exists(&self.main_template) {
            let path = self.main_template.clone();
            self.assign(MAIN_TEMPLATE_VAR, path);
        }
    }

    pub fn base_template(&self) -> &str {
        &self.base_template
    }

    pub fn main_template(&self) -> &str {
        &self.main_template
    }

    /// Title handed to the frame as `title`.
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.content_type = content_type.into();
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Renders the base template under `cache_id`, through the page cache.
    pub fn display(&mut self, cache_id: &str) -> Result<String, RenderError> {
        if let Some(title) = self.title.clone() {
            self.vars.assign(TITLE_VAR, title);
        }
        self.renderer.render(&self.base_template, cache_id, &self.vars)
    }

    /// Renders a template with the current variables, bypassing the page cache.
    pub fn fetch(&self, name: &str) -> Result<String, RenderError> {
        let template = self.resolve_template(name);
        self.renderer.engine().render(&template, &self.vars)
    }

    /// Drops every cached page of this controller identity.
    pub fn clear_cache(&self) -> usize {
        self.renderer.clear(self.identity.base_id())
    }
}

/// Something that turns a request into a reply. The server runs one.
pub trait Endpoint: Send + Sync + 'static {
    fn handle(&self, ctx: &RequestContext) -> Reply;
}

impl<F> Endpoint for F
where
    F: Fn(&RequestContext) -> Reply + Send + Sync + 'static,
{
    fn handle(&self, ctx: &RequestContext) -> Reply {
        self(ctx)
    }
}

type Factory<C> = dyn Fn(&RequestContext) -> C + Send + Sync;

/// Mounts a controller type: registration-time state plus a per-request factory.
pub struct ControllerHost<C: Controller> {
    factory: Box<Factory<C>>,
    services: ServiceRegistry<C>,
    dirs: Arc<TemplateDirs>,
    renderer: Renderer,
    mode: Mode,
}

impl<C: Controller> fmt::Debug for ControllerHost<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerHost")
            .field("controller", &type_name::<C>())
            .field("services", &self.services)
            .field("dirs", &self.dirs)
            .field("renderer", &self.renderer)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl<C: Controller> ControllerHost<C> {
    /// Mounts `C` with a [`FsEngine`] rooted at the configured template directory.
    pub fn new<F>(config: &Config, factory: F) -> Result<Self, RegistryError>
    where
        F: Fn(&RequestContext) -> C + Send + Sync + 'static,
    {
        let renderer = Renderer::new(
            FsEngine::new(config.template_dir.clone()),
            &config.cache,
            config.mode,
        );
        Self::with_renderer(renderer, config.mode, factory)
    }

    /// Mounts `C` on an existing renderer, which may be shared with other hosts.
    pub fn with_renderer<F>(renderer: Renderer, mode: Mode, factory: F) -> Result<Self, RegistryError>
    where
        F: Fn(&RequestContext) -> C + Send + Sync + 'static,
    {
        let mut services = ServiceRegistry::new();
        C::services(&mut services)?;
        let dirs = TemplateDirs::from_lineage(C::lineage());

        debug!(
            controller = type_name::<C>(),
            services = services.len(),
            dirs = ?dirs.as_slice(),
            "controller mounted"
        );

        Ok(Self {
            factory: Box::new(factory),
            services,
            dirs: Arc::new(dirs),
            renderer,
            mode,
        })
    }

    pub fn services(&self) -> &ServiceRegistry<C> {
        &self.services
    }

    pub fn template_dirs(&self) -> &TemplateDirs {
        &self.dirs
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Creates the controller and its page and runs its setup phase.
    pub fn instantiate(&self, ctx: &RequestContext) -> (C, Page) {
        let mut controller = (self.factory)(ctx);

        let mut identity = CacheIdentity::new(type_name::<C>());
        if let Some(base) = controller.base_cache_id() {
            identity = identity.with_base(base);
        }

        let mut page = Page::new(self.renderer.clone(), Arc::clone(&self.dirs), identity, self.mode);
        controller.setup(&mut page, ctx);
        page.start();
        (controller, page)
    }
}

impl<C: Controller> Endpoint for ControllerHost<C> {
    fn handle(&self, ctx: &RequestContext) -> Reply {
        let (mut controller, mut page) = self.instantiate(ctx);
        serve(&mut controller, &mut page, &self.services, ctx)
    }
}
