//! The fixed request lifecycle: CheckCache → Dispatch → Render.

use tracing::{debug, error};

use super::{Controller, Page, Reply};
use crate::context::RequestContext;
use crate::http::StatusCode;
use crate::service::{DispatchResult, ServiceRegistry, dispatch};

/// Runs one request against a set-up controller instance.
///
/// A fresh cached base page wins outright: no service runs and nothing is
/// assigned. Otherwise a named service runs first; unless it falls through, its
/// reply ends the request. Finally the render hook runs and the base template
/// is rendered and stored in the page cache.
pub fn serve<C: Controller>(
    controller: &mut C,
    page: &mut Page,
    services: &ServiceRegistry<C>,
    ctx: &RequestContext,
) -> Reply {
    let cache_id = page.request_cache_id(ctx);

    if let Some(body) = page.renderer().lookup(page.base_template(), &cache_id) {
        debug!(template = page.base_template(), %cache_id, "serving cached page");
        return Reply::page(&*body, page.content_type());
    }

    match dispatch(services, controller, page, ctx) {
        DispatchResult::Handled(reply) => reply,
        DispatchResult::NoService | DispatchResult::FallThrough => {
            render(controller, page, ctx, &cache_id)
        }
    }
}

fn render<C: Controller>(
    controller: &mut C,
    page: &mut Page,
    ctx: &RequestContext,
    cache_id: &str,
) -> Reply {
    if let Err(err) = controller.render(page, ctx) {
        return err.into_reply(page.mode());
    }

    match page.display(cache_id) {
        Ok(body) => Reply::page(body, page.content_type()),
        Err(err) => {
            error!(template = page.base_template(), error = %err, "page render failed");
            if page.mode().is_development() {
                Reply::text(StatusCode::InternalServerError, format!("{err:#?}"))
            } else {
                Reply::empty()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::Value;

    use crate::binder::{BoundArgs, MethodSignature};
    use crate::cache::CacheIdentity;
    use crate::config::{CacheSettings, Mode};
    use crate::service::ServiceError;
    use crate::template::{RenderError, Renderer, TemplateDirs, TemplateEngine, TemplateVars};

    #[derive(Default)]
    struct Frame {
        renders: AtomicUsize,
    }

    impl TemplateEngine for Frame {
        fn exists(&self, template: &str) -> bool {
            template == "frame.tpl"
        }

        fn render(&self, template: &str, vars: &TemplateVars) -> Result<String, RenderError> {
            if !self.exists(template) {
                return Err(RenderError::Engine {
                    template: template.to_owned(),
                    message: "no such template".to_owned(),
                });
            }
            self.renders.fetch_add(1, Ordering::SeqCst);
            let who = vars.get("who").and_then(Value::as_str).unwrap_or("nobody");
            Ok(format!("hello {who}"))
        }
    }

    #[derive(Default)]
    struct Greeter {
        dispatched: usize,
    }

    impl Controller for Greeter {}

    fn services() -> ServiceRegistry<Greeter> {
        let mut services = ServiceRegistry::new();
        services
            .register("greetService", MethodSignature::new(), |g: &mut Greeter, page: &mut Page, _: &BoundArgs| {
                g.dispatched += 1;
                page.assign("who", "service");
                Ok::<_, ServiceError>(true)
            })
            .unwrap();
        services
    }

    fn page(renderer: &Renderer, base: &str, mode: Mode) -> Page {
        let mut page = Page::new(
            renderer.clone(),
            Arc::new(TemplateDirs::from_lineage(["Greeter"])),
            CacheIdentity::new("Greeter"),
            mode,
        );
        page.set_base_template(base);
        page.start();
        page
    }

    fn run(renderer: &Renderer, ctx: &RequestContext, base: &str, mode: Mode) -> (Reply, Greeter) {
        let mut greeter = Greeter::default();
        let mut page = page(renderer, base, mode);
        let reply = serve(&mut greeter, &mut page, &services(), ctx);
        (reply, greeter)
    }

    fn renderer(engine: Arc<Frame>, mode: Mode) -> Renderer {
        Renderer::from_shared(engine, &CacheSettings::default(), mode)
    }

    fn greet() -> RequestContext {
        RequestContext::builder().param("service", "greet").build()
    }

    #[test]
    fn fall_through_renders_the_frame() {
        let r = renderer(Arc::new(Frame::default()), Mode::Production);
        let (reply, greeter) = run(&r, &greet(), "frame", Mode::Production);
        assert_eq!(greeter.dispatched, 1);
        assert_eq!(reply, Reply::page("hello service", "text/html; charset=utf-8"));
    }

    #[test]
    fn cache_hit_skips_dispatch() {
        let engine = Arc::new(Frame::default());
        let r = renderer(engine.clone(), Mode::Production);

        run(&r, &greet(), "frame", Mode::Production);
        let (reply, greeter) = run(&r, &greet(), "frame", Mode::Production);

        assert_eq!(greeter.dispatched, 0);
        assert_eq!(engine.renders.load(Ordering::SeqCst), 1);
        assert_eq!(reply, Reply::page("hello service", "text/html; charset=utf-8"));
    }

    #[test]
    fn different_parameters_miss_the_cache() {
        let r = renderer(Arc::new(Frame::default()), Mode::Production);
        run(&r, &greet(), "frame", Mode::Production);

        let other = RequestContext::builder().param("page", "2").build();
        let (reply, greeter) = run(&r, &other, "frame", Mode::Production);
        assert_eq!(greeter.dispatched, 0);
        assert_eq!(reply, Reply::page("hello nobody", "text/html; charset=utf-8"));
    }

    #[test]
    fn render_failure_by_mode() {
        let r = renderer(Arc::new(Frame::default()), Mode::Production);
        let (reply, _) = run(&r, &RequestContext::default(), "missing", Mode::Production);
        assert_eq!(reply, Reply::empty());

        let r = renderer(Arc::new(Frame::default()), Mode::Development);
        let (reply, _) = run(&r, &RequestContext::default(), "missing", Mode::Development);
        match reply {
            Reply::Text { status, body } => {
                assert_eq!(status, StatusCode::InternalServerError);
                assert!(body.contains("missing.tpl"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn render_hook_errors_are_classified() {
        struct Strict;
        impl Controller for Strict {
            fn render(&mut self, _page: &mut Page, _ctx: &RequestContext) -> Result<(), ServiceError> {
                Err(ServiceError::invalid("nope"))
            }
        }

        let r = renderer(Arc::new(Frame::default()), Mode::Production);
        let mut page = page(&r, "frame", Mode::Production);
        let reply = serve(&mut Strict, &mut page, &ServiceRegistry::new(), &RequestContext::default());
        assert_eq!(reply, Reply::text(StatusCode::NotAcceptable, "nope"));
    }
}
