//! Route resolution stage.

use std::sync::Arc;

use http::header::ALLOW;
use http::{HeaderValue, Method, StatusCode};
use tracing::debug;

use super::{Middleware, Next, params};
use crate::context::Context;
use crate::router::{Resolution, Router};

/// Resolves the route, or answers 404 / 405 and aborts.
///
/// `OPTIONS` requests to a path served under other methods get `200 OK`
/// with the `Allow` header instead of a 405.
pub struct RoutingStage {
    router: Arc<dyn Router>,
}

impl RoutingStage {
    pub fn new(router: Arc<dyn Router>) -> Self {
        Self { router }
    }
}

impl Middleware for RoutingStage {
    fn handle(&self, ctx: &mut Context, next: Next<'_>) {
        match self.router.resolve(&ctx.req.method, ctx.req.path()) {
            Resolution::Matched(route) => {
                if !route.params.is_empty() {
                    ctx.req.params.path.extend(route.params.iter().map(|(k, v)| (k.clone(), v.clone())));
                    params::publish(ctx);
                }
                ctx.route = Some(route);
                next.proceed(ctx);
            }
            Resolution::NotFound => {
                debug!(path = ctx.req.path(), "route not found");
                ctx.reply().error(StatusCode::NOT_FOUND);
                ctx.abort();
            }
            Resolution::MethodNotAllowed { allowed } => {
                let allow = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
                if ctx.req.method == Method::OPTIONS {
                    ctx.reply().status(StatusCode::OK);
                } else {
                    debug!(method = %ctx.req.method, path = ctx.req.path(), allow = %allow, "method not allowed");
                    ctx.reply().error(StatusCode::METHOD_NOT_ALLOWED);
                }
                if let Ok(v) = HeaderValue::try_from(allow) {
                    ctx.reply.headers.insert(ALLOW, v);
                }
                ctx.abort();
            }
        }
    }
}
