//! Action dispatch.
//!
//! Runs the resolved route: a controller action wrapped in its
//! interceptors, or a static file. [`guarded`] is the panic boundary the
//! engine puts around middleware and dispatch, so a fault in user code
//! becomes a [`HandlerFault`] instead of unwinding into the serving loop.

use std::panic::{self, AssertUnwindSafe};

use http::StatusCode;
use tracing::{trace, warn};

use crate::context::Context;
use crate::controller::ControllerRegistry;
use crate::error::{HandlerFault, Stage};
use crate::reply::ContentType;
use crate::request::Request;
use crate::router::{ActionRef, StaticTarget, Target};
use crate::static_files::{FileOutcome, FileServer};

/// Runs `f`, converting a panic into a [`HandlerFault`].
pub(crate) fn guarded<R>(
    stage: Stage,
    ctx: &mut Context,
    f: impl FnOnce(&mut Context) -> R,
) -> Result<R, HandlerFault> {
    panic::catch_unwind(AssertUnwindSafe(|| f(ctx)))
        .map_err(|payload| HandlerFault::from_panic(stage, payload.as_ref()))
}

/// Invokes the handler for the context's resolved route.
pub(crate) fn dispatch(ctx: &mut Context, registry: &ControllerRegistry, files: &dyn FileServer) {
    let Some(target) = ctx.route.as_ref().map(|r| r.target.clone()) else {
        warn!(path = ctx.req.path(), "dispatch without a resolved route");
        ctx.reply().error(StatusCode::NOT_FOUND);
        return;
    };
    match target {
        Target::Action(action) => invoke_action(ctx, registry, &action),
        Target::Static(target) => serve_static(ctx, files, &target),
    }
}

fn invoke_action(ctx: &mut Context, registry: &ControllerRegistry, action: &ActionRef) {
    let Some(chain) = registry.lookup(&action.controller, &action.action) else {
        warn!(controller = %action.controller, action = %action.action, "route targets an unregistered action");
        ctx.reply().error(StatusCode::NOT_FOUND);
        return;
    };

    for (step, handler) in chain.steps() {
        if ctx.is_aborted() {
            trace!(?step, "aborted; skipping remaining steps");
            break;
        }
        trace!(?step, controller = %action.controller, action = %action.action, "invoking");
        handler.call(ctx);
    }
}

fn serve_static(ctx: &mut Context, files: &dyn FileServer, target: &StaticTarget) {
    // Static bodies go out as-is.
    ctx.reply().disable_gzip();
    match files.serve(target, &ctx.req) {
        FileOutcome::File { content_type, body } => {
            ctx.reply().raw(&content_type, body);
        }
        FileOutcome::Listing(body) => {
            ctx.reply().bytes(ContentType::Html, body);
        }
        FileOutcome::RedirectToDirectory => {
            let location = directory_location(&ctx.req);
            ctx.reply().redirect(&location);
        }
        FileOutcome::NotFound => {
            ctx.reply().error(StatusCode::NOT_FOUND);
        }
        FileOutcome::ListingNotAllowed => {
            ctx.reply().status(StatusCode::FORBIDDEN).text("403 Directory listing not allowed");
        }
    }
}

/// The request URL with a trailing slash appended to its path, keeping the
/// scheme, host and query string.
fn directory_location(req: &Request) -> String {
    let uri = req.uri();
    let mut location = match (uri.scheme_str(), uri.authority()) {
        (Some(scheme), Some(authority)) => format!("{scheme}://{authority}"),
        _ => match req.header("host") {
            Some(host) => {
                let scheme = req.header("x-forwarded-proto").unwrap_or("http");
                format!("{scheme}://{host}")
            }
            None => String::new(),
        },
    };
    location.push_str(uri.path());
    location.push('/');
    if let Some(query) = uri.query() {
        location.push('?');
        location.push_str(query);
    }
    location
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;

    use super::*;
    use crate::controller::Controller;
    use crate::router::{RouteMatch, Target};
    use crate::static_files::DirServer;

    fn ctx_for(uri: &str, controller: &str, action: &str) -> Context {
        let (parts, ()) = http::Request::builder().uri(uri).body(()).unwrap().into_parts();
        let mut ctx = Context::new();
        ctx.req.populate(parts, Bytes::new());
        ctx.route = Some(RouteMatch {
            target: Target::Action(ActionRef { controller: controller.into(), action: action.into() }),
            params: Default::default(),
        });
        ctx
    }

    fn recording_registry(log: &Arc<Mutex<Vec<&'static str>>>, abort_in: Option<&'static str>) -> ControllerRegistry {
        let mut registry = ControllerRegistry::new();
        let mut controller = Controller::new("Site");
        for name in ["Before", "BeforeGetInvolved", "GetInvolved", "AfterGetInvolved", "After"] {
            let log = Arc::clone(log);
            controller = controller.method(name, move |ctx: &mut Context| {
                log.lock().unwrap().push(name);
                if abort_in == Some(name) {
                    ctx.abort();
                }
            });
        }
        registry.add(controller);
        registry
    }

    #[test]
    fn interceptors_run_in_declared_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = recording_registry(&log, None);
        let mut ctx = ctx_for("/get-involved.html", "Site", "GetInvolved");
        dispatch(&mut ctx, &registry, &DirServer);
        assert_eq!(
            *log.lock().unwrap(),
            ["Before", "BeforeGetInvolved", "GetInvolved", "AfterGetInvolved", "After"]
        );
    }

    #[test]
    fn abort_skips_remaining_steps() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = recording_registry(&log, Some("BeforeGetInvolved"));
        let mut ctx = ctx_for("/get-involved.html", "Site", "GetInvolved");
        dispatch(&mut ctx, &registry, &DirServer);
        assert_eq!(*log.lock().unwrap(), ["Before", "BeforeGetInvolved"]);
    }

    #[test]
    fn unregistered_action_is_not_found() {
        let registry = ControllerRegistry::new();
        let mut ctx = ctx_for("/x", "Site", "Nope");
        dispatch(&mut ctx, &registry, &DirServer);
        assert_eq!(ctx.reply.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn guarded_converts_panics() {
        let mut ctx = Context::new();
        let fault = guarded(Stage::Dispatch, &mut ctx, |_| -> () { panic!("panic flow testing") }).unwrap_err();
        assert_eq!(fault.stage, Stage::Dispatch);
        assert_eq!(fault.message, "panic flow testing");

        assert_eq!(guarded(Stage::Dispatch, &mut ctx, |_| 7).unwrap(), 7);
    }

    #[test]
    fn directory_location_keeps_origin_and_query() {
        let ctx = ctx_for("http://localhost:8080/testdata?sort=name", "", "");
        assert_eq!(directory_location(&ctx.req), "http://localhost:8080/testdata/?sort=name");

        let (parts, ()) = http::Request::builder()
            .uri("/testdata")
            .header("host", "example.com")
            .body(())
            .unwrap()
            .into_parts();
        let mut req = Request::new();
        req.populate(parts, Bytes::new());
        assert_eq!(directory_location(&req), "http://example.com/testdata/");
    }
}
