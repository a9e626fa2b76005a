use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tempfile::TempDir;

use simplectl::binder::{BoundArgs, MethodSignature, ParamSpec};
use simplectl::config::{CacheSettings, Config, Mode};
use simplectl::context::RequestContext;
use simplectl::controller::{Controller, ControllerHost, Endpoint, Page, Redirect};
use simplectl::http::{Request, Response, StatusCode};
use simplectl::service::{RegistryError, ServiceError, ServiceOutcome, ServiceRegistry};
use simplectl::template::{FsEngine, Renderer};

struct UserController {
    dispatched: Arc<AtomicUsize>,
}

impl UserController {
    fn count(&self) {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
    }

    fn save_user(&mut self, page: &mut Page, args: &BoundArgs) -> Result<bool, ServiceError> {
        self.count();
        page.assign("saved", args.str("name").unwrap_or("nobody"));
        Ok(true)
    }

    fn get_user(&mut self, _page: &mut Page, args: &BoundArgs) -> Result<Value, ServiceError> {
        self.count();
        Ok(json!({ "id": args.int("id"), "name": "Ann" }))
    }

    fn create_item(&mut self, _page: &mut Page, args: &BoundArgs) -> Result<(), ServiceError> {
        self.count();
        match args.str("title").unwrap_or("") {
            "" => Err(ServiceError::invalid("invalid item").with_field("title", "is required")),
            "dup" => Err(ServiceError::conflict("item exists")),
            _ => Ok(()),
        }
    }

    fn go_home(&mut self, _page: &mut Page, _args: &BoundArgs) -> Result<Redirect, ServiceError> {
        self.count();
        Ok(Redirect::to("/"))
    }

    fn print(&mut self, page: &mut Page, _args: &BoundArgs) -> Result<ServiceOutcome, ServiceError> {
        self.count();
        page.set_base_template("print");
        Ok(ServiceOutcome::FallThrough)
    }
}

impl Controller for UserController {
    fn services(registry: &mut ServiceRegistry<Self>) -> Result<(), RegistryError> {
        registry
            .register(
                "saveUserService",
                MethodSignature::new().param(ParamSpec::string("name")),
                Self::save_user,
            )?
            .register(
                "getUserService",
                MethodSignature::new().param(ParamSpec::int("id")),
                Self::get_user,
            )?
            .register(
                "createItemService",
                MethodSignature::new().param(ParamSpec::string("title").default("")),
                Self::create_item,
            )?
            .register("goHomeService", MethodSignature::new(), Self::go_home)?
            .register("printService", MethodSignature::new(), Self::print)?;
        Ok(())
    }

    fn setup(&mut self, page: &mut Page, _ctx: &RequestContext) {
        page.set_base_template("frame");
        page.set_main_template("profile");
        page.set_title("Users");
    }
}

struct Site {
    _dir: TempDir,
    host: ControllerHost<UserController>,
    dispatched: Arc<AtomicUsize>,
}

impl Site {
    fn new(mode: Mode) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let files = [
            ("frame.tpl", "<title>{{ title }}</title>{{ include mainTemplate }}"),
            ("user/profile.tpl", "Saved {{ saved }}"),
            ("user/print.tpl", "printable"),
        ];
        for (name, body) in files {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
        }

        let renderer = Renderer::new(FsEngine::new(dir.path()), &CacheSettings::default(), mode);
        let dispatched = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&dispatched);
        let host = ControllerHost::with_renderer(renderer, mode, move |_| UserController {
            dispatched: Arc::clone(&counter),
        })
        .unwrap();

        Self {
            _dir: dir,
            host,
            dispatched,
        }
    }

    fn request(&self, ctx: &RequestContext) -> Response {
        self.host.handle(ctx).into_response(ctx)
    }

    fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }
}

fn ctx(pairs: &[(&str, &str)]) -> RequestContext {
    pairs
        .iter()
        .fold(RequestContext::builder().target("/users"), |b, (k, v)| b.param(*k, *v))
        .build()
}

fn body(response: &Response) -> &str {
    std::str::from_utf8(response.payload()).unwrap()
}

#[test]
fn fall_through_renders_the_main_template() {
    let site = Site::new(Mode::Production);
    let response = site.request(&ctx(&[("service", "save-user"), ("name", "Ann")]));

    assert_eq!(response.status(), StatusCode::Ok);
    assert_eq!(response.headers().get("content-type"), Some("text/html; charset=utf-8"));
    assert_eq!(body(&response), "<title>Users</title>Saved Ann");
    assert_eq!(site.dispatched(), 1);
}

#[test]
fn structured_result_is_sent_as_json() {
    let site = Site::new(Mode::Production);
    let response = site.request(&ctx(&[("service", "get-user"), ("id", "7")]));

    assert_eq!(response.status(), StatusCode::Ok);
    assert_eq!(response.headers().get("content-type"), Some("application/json"));
    assert_eq!(body(&response), r#"{"id":7,"name":"Ann"}"#);
}

#[test]
fn unknown_service_is_404() {
    let site = Site::new(Mode::Production);
    let response = site.request(&ctx(&[("service", "bogus-op")]));

    assert_eq!(response.status(), StatusCode::NotFound);
    assert_eq!(response.headers().get("content-type"), Some("text/plain; charset=utf-8"));
    assert_eq!(body(&response), "Unknown service!");
    assert_eq!(site.dispatched(), 0);
}

#[test]
fn cache_hit_bypasses_dispatch() {
    let site = Site::new(Mode::Production);
    let request = ctx(&[("service", "save-user"), ("name", "Ann")]);

    let first = site.request(&request);
    site.dispatched.store(0, Ordering::SeqCst);
    let second = site.request(&request);

    assert_eq!(site.dispatched(), 0);
    assert_eq!(body(&first), body(&second));
}

#[test]
fn development_mode_never_serves_from_cache() {
    let site = Site::new(Mode::Development);
    let request = ctx(&[("service", "save-user"), ("name", "Ann")]);

    site.request(&request);
    site.request(&request);
    assert_eq!(site.dispatched(), 2);
}

#[test]
fn validation_failures() {
    let site = Site::new(Mode::Production);

    let response = site.request(&ctx(&[("service", "create-item")]));
    assert_eq!(response.status(), StatusCode::NotAcceptable);
    assert_eq!(response.headers().get("content-type"), Some("application/json"));
    assert_eq!(body(&response), r#"{"title":"is required"}"#);

    let response = site.request(&ctx(&[("service", "create-item"), ("title", "dup")]));
    assert_eq!(response.status(), StatusCode::Conflict);
    assert_eq!(body(&response), "item exists");

    let response = site.request(&ctx(&[("service", "create-item"), ("title", "ok")]));
    assert_eq!(response.status(), StatusCode::Ok);
    assert!(response.payload().is_empty());
    assert_eq!(response.headers().get("content-type"), None);
}

#[test]
fn coercion_failure_is_an_unexpected_failure() {
    let site = Site::new(Mode::Production);
    let response = site.request(&ctx(&[("service", "get-user"), ("id", "abc")]));
    assert_eq!(response.status(), StatusCode::InternalServerError);
    assert!(!body(&response).contains("abc"));
    assert_eq!(site.dispatched(), 0);

    let site = Site::new(Mode::Development);
    let response = site.request(&ctx(&[("service", "get-user"), ("id", "abc")]));
    assert_eq!(response.status(), StatusCode::InternalServerError);
    assert!(body(&response).contains("Coercion"));
}

#[test]
fn redirects_downgrade_for_fetch_clients() {
    let site = Site::new(Mode::Production);

    let response = site.request(&ctx(&[("service", "go-home")]));
    assert_eq!(response.status(), StatusCode::Found);
    assert_eq!(response.headers().get("location"), Some("/"));

    let fetch = RequestContext::builder()
        .param("service", "go-home")
        .fetch(true)
        .build();
    let response = site.request(&fetch);
    assert_eq!(response.status(), StatusCode::NoContent);
    assert_eq!(response.headers().get("location"), Some("/"));
}

#[test]
fn late_base_template_change_is_emulated() {
    let site = Site::new(Mode::Production);
    let response = site.request(&ctx(&[("service", "print")]));
    assert_eq!(body(&response), "<title>Users</title>printable");
}

#[test]
fn json_request_body_reaches_the_service() {
    let site = Site::new(Mode::Production);
    let json = r#"{"service":"get-user","id":7}"#;
    let raw = format!(
        "POST /users HTTP/1.1\r\nHost: x\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{json}",
        json.len()
    );
    let (mut request, _) = Request::parse(raw.as_bytes()).unwrap();
    request.truncate_body(json.len());
    let ctx = RequestContext::from_request(&request, &Config::default());

    let response = site.request(&ctx);
    assert_eq!(body(&response), r#"{"id":7,"name":"Ann"}"#);
}

#[test]
fn template_dirs_follow_the_controller_name() {
    let site = Site::new(Mode::Production);
    assert_eq!(site.host.template_dirs().as_slice(), ["user/", ""]);
    assert_eq!(site.host.services().len(), 5);
}
