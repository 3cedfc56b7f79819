//! Middleware layer.
//!
//! Middleware intercepts every request before dispatch and is the right
//! place for cross-cutting concerns: request-id injection, parameter
//! decoding, route resolution, authentication-header inspection.
//!
//! # The chain cursor
//!
//! Each stage receives the context and a [`Next`] cursor over the remaining
//! stages. Calling [`Next::proceed`] runs the rest of the chain and reports
//! whether it reached the end without aborting, i.e. whether the action will
//! be dispatched. `proceed` takes `self`, so a stage can continue at most
//! once; a stage that returns without calling it short-circuits the chain,
//! and the engine skips dispatch.
//!
//! ```rust,ignore
//! fn require_token(ctx: &mut Context, next: Next<'_>) {
//!     if ctx.req().header("authorization").is_none() {
//!         ctx.reply().error(StatusCode::UNAUTHORIZED);
//!         return; // chain stops, no dispatch
//!     }
//!     next.proceed(ctx);
//! }
//! ```
//!
//! Built-in stages, in order: [`RequestIdStage`], [`ParamsStage`],
//! [`RoutingStage`]. User middleware follows in registration order.

use std::sync::Arc;

use crate::context::Context;

mod params;
mod request_id;
mod routing;

pub use params::ParamsStage;
pub use request_id::RequestIdStage;
pub use routing::RoutingStage;

/// A request-processing stage.
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, ctx: &mut Context, next: Next<'_>);
}

/// A type-erased stage shared across concurrent requests.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// Cursor over the stages that have not run yet.
pub struct Next<'a> {
    rest: &'a [BoxedMiddleware],
    completed: &'a mut bool,
}

impl<'a> Next<'a> {
    /// Runs the whole of `stages`. Returns `true` when every stage continued
    /// and nothing aborted.
    pub(crate) fn run(stages: &[BoxedMiddleware], ctx: &mut Context) -> bool {
        let mut completed = false;
        Next { rest: stages, completed: &mut completed }.proceed(ctx)
    }

    /// Runs the remaining stages.
    pub fn proceed(self, ctx: &mut Context) -> bool {
        if ctx.is_aborted() {
            return false;
        }
        match self.rest.split_first() {
            Some((stage, rest)) => {
                stage.handle(ctx, Next { rest, completed: &mut *self.completed });
            }
            None => *self.completed = true,
        }
        *self.completed && !ctx.is_aborted()
    }
}

/// Wraps a function as middleware.
pub fn from_fn<F>(f: F) -> FromFn<F>
where
    F: Fn(&mut Context, Next<'_>) + Send + Sync + 'static,
{
    FromFn(f)
}

/// Middleware built by [`from_fn`].
pub struct FromFn<F>(F);

impl<F> Middleware for FromFn<F>
where
    F: Fn(&mut Context, Next<'_>) + Send + Sync + 'static,
{
    fn handle(&self, ctx: &mut Context, next: Next<'_>) {
        (self.0)(ctx, next)
    }
}
