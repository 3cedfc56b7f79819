//! The per-request context threaded through middleware and dispatch.

use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::error;

use crate::pool::Reset;
use crate::reply::Reply;
use crate::request::Request;
use crate::router::RouteMatch;
use crate::session::Session;
use crate::view::ViewArgs;

/// Mutable state for one in-flight request.
///
/// Checked out of the engine's pool at the start of a request, reset and
/// returned at the end. No context outlives its request.
pub struct Context {
    pub(crate) req: Request,
    pub(crate) reply: Reply,
    pub(crate) route: Option<RouteMatch>,
    pub(crate) view_args: ViewArgs,
    pub(crate) request_id: Option<String>,
    pub(crate) aborted: bool,
    pub(crate) started: Instant,
}

impl Context {
    pub(crate) fn new() -> Self {
        Self {
            req: Request::new(),
            reply: Reply::new(),
            route: None,
            view_args: ViewArgs::new(),
            request_id: None,
            aborted: false,
            started: Instant::now(),
        }
    }

    pub fn req(&self) -> &Request { &self.req }
    pub fn req_mut(&mut self) -> &mut Request { &mut self.req }

    pub fn reply(&mut self) -> &mut Reply { &mut self.reply }

    /// The route resolved for this request, once the routing stage ran.
    pub fn route(&self) -> Option<&RouteMatch> { self.route.as_ref() }

    /// The request id, when request-id propagation is enabled.
    pub fn request_id(&self) -> Option<&str> { self.request_id.as_deref() }

    /// Stops the remaining middleware, interceptors and the action. The
    /// response is still finalized.
    pub fn abort(&mut self) { self.aborted = true; }
    pub fn is_aborted(&self) -> bool { self.aborted }

    /// The request's session, created on first use.
    pub fn session(&mut self) -> &mut Session {
        self.req.session.get_or_insert_with(Session::new)
    }

    pub fn add_view_arg(&mut self, key: impl Into<String>, value: impl Serialize) -> &mut Self {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(v) => {
                self.view_args.insert(key, v);
            }
            Err(e) => error!(key = %key, "view argument serialization failed: {e}"),
        }
        self
    }

    pub fn view_arg(&self, key: &str) -> Option<&Value> { self.view_args.get(key) }
    pub fn view_args(&self) -> &ViewArgs { &self.view_args }
}

impl Reset for Context {
    fn reset(&mut self) {
        self.req.reset();
        self.reply.clear();
        self.route = None;
        self.view_args.clear();
        self.request_id = None;
        self.aborted = false;
    }
}
