//! # simplectl
//!
//! A base layer for server-rendered web controllers: page rendering behind a
//! page-level output cache, and request dispatch to typed "service"
//! operations.
//!
//! A request flows through a fixed lifecycle:
//!
//! 1. **CheckCache**: a fresh cached base page for this controller and these
//!    request parameters is served as is.
//! 2. **Dispatch**: a `service` parameter (`create-item`) selects a registered
//!    operation (`createItemService`); its parameters are bound from the
//!    request and coerced to their declared types.
//! 3. **Render**: unless the operation answered the request itself, the base
//!    template is rendered, cached and sent.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use simplectl::config::Config;
//! use simplectl::controller::{Controller, ControllerHost, Page};
//! use simplectl::context::RequestContext;
//! use simplectl::server::Server;
//!
//! struct HomeController;
//!
//! impl Controller for HomeController {
//!     fn setup(&mut self, page: &mut Page, _ctx: &RequestContext) {
//!         page.set_base_template("frame");
//!         page.set_title("Home");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let host = ControllerHost::new(&config, |_| HomeController)?;
//!     Server::bind("127.0.0.1:8080")
//!         .await?
//!         .with_config(config)
//!         .run(host)
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod binder;
pub mod cache;
pub mod config;
pub mod context;
pub mod controller;
pub mod http;
pub mod server;
pub mod service;
pub mod template;

pub use binder::{BindError, BoundArgs, MethodSignature, ParamSpec, ParamType};
pub use config::{Config, Mode};
pub use context::{Params, RequestContext};
pub use controller::{Controller, ControllerHost, Endpoint, Page, Redirect, Reply};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use server::{Server, ServerError};
pub use service::{ServiceError, ServiceOutcome, ServiceRegistry};
pub use template::{FsEngine, Renderer, TemplateEngine, TemplateVars};
