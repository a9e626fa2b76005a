//! A guestbook served by a single controller.
//!
//! ```text
//! cargo run --example guestbook
//! curl localhost:8080/
//! curl -d 'service=sign&name=Ann&message=hi' localhost:8080/
//! curl 'localhost:8080/?service=entries'
//! curl 'localhost:8080/?service=count'
//! ```
//!
//! Set `SIMPLECTL_MODE=development` to disable the page cache and get full
//! diagnostics in error responses.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing_subscriber::EnvFilter;

use simplectl::binder::{BoundArgs, MethodSignature, ParamSpec};
use simplectl::config::{Config, ENV_TEMPLATE_DIR};
use simplectl::context::RequestContext;
use simplectl::controller::{Controller, ControllerHost, Page, Redirect};
use simplectl::server::Server;
use simplectl::service::{RegistryError, ServiceError, ServiceOutcome, ServiceRegistry};

#[derive(Debug, Clone, Serialize)]
struct Entry {
    name: String,
    message: String,
}

type Book = Arc<Mutex<Vec<Entry>>>;

struct GuestbookController {
    book: Book,
}

impl GuestbookController {
    fn entries(&self) -> Result<Vec<Entry>, ServiceError> {
        self.book
            .lock()
            .map(|entries| entries.clone())
            .map_err(|_| ServiceError::unexpected("guestbook lock poisoned"))
    }

    fn sign(&mut self, page: &mut Page, args: &BoundArgs) -> Result<Redirect, ServiceError> {
        let name = args.str("name").unwrap_or("").trim();
        let message = args.str("message").unwrap_or("").trim();

        let mut err = ServiceError::invalid("please fill in the form");
        if name.is_empty() {
            err = err.with_field("name", "is required");
        }
        if message.is_empty() {
            err = err.with_field("message", "is required");
        }
        if name.is_empty() || message.is_empty() {
            return Err(err);
        }

        let mut book = self
            .book
            .lock()
            .map_err(|_| ServiceError::unexpected("guestbook lock poisoned"))?;
        if book.iter().any(|e| e.name == name && e.message == message) {
            return Err(ServiceError::conflict("you already signed with that message"));
        }
        book.push(Entry {
            name: name.to_owned(),
            message: message.to_owned(),
        });
        drop(book);

        let removed = page.clear_cache();
        tracing::info!(guest = name, removed, "guestbook signed");
        Ok(Redirect::to("/"))
    }

    fn list(&mut self, _page: &mut Page, _args: &BoundArgs) -> Result<ServiceOutcome, ServiceError> {
        ServiceOutcome::json(&self.entries()?)
    }

    fn count(&mut self, _page: &mut Page, _args: &BoundArgs) -> Result<String, ServiceError> {
        Ok(self.entries()?.len().to_string())
    }
}

impl Controller for GuestbookController {
    fn services(registry: &mut ServiceRegistry<Self>) -> Result<(), RegistryError> {
        registry
            .register(
                "signService",
                MethodSignature::new()
                    .param(ParamSpec::string("name"))
                    .param(ParamSpec::string("message")),
                Self::sign,
            )?
            .register("entriesService", MethodSignature::new(), Self::list)?
            .register("countService", MethodSignature::new(), Self::count)?;
        Ok(())
    }

    // One cache identity for every guestbook page.
    fn base_cache_id(&self) -> Option<String> {
        Some("guestbook".to_owned())
    }

    fn setup(&mut self, page: &mut Page, _ctx: &RequestContext) {
        page.set_base_template("frame");
        page.set_main_template("entries");
        page.set_title("Guestbook");
    }

    fn render(&mut self, page: &mut Page, _ctx: &RequestContext) -> Result<(), ServiceError> {
        let items: String = self
            .entries()?
            .iter()
            .map(|e| format!("<li><b>{}</b>: {}</li>", escape(&e.name), escape(&e.message)))
            .collect();
        page.assign("entries", items);
        Ok(())
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,simplectl=debug")),
        )
        .init();

    let mut config = Config::from_env()?;
    if std::env::var_os(ENV_TEMPLATE_DIR).is_none() {
        config = config.with_template_dir(concat!(env!("CARGO_MANIFEST_DIR"), "/demos/templates"));
    }

    let book: Book = Arc::default();
    let host = ControllerHost::new(&config, move |_| GuestbookController {
        book: Arc::clone(&book),
    })?;

    let server = Server::bind("127.0.0.1:8080").await?.with_config(config);
    println!("Guestbook on http://{}", server.local_addr());
    server.run(host).await?;
    Ok(())
}
