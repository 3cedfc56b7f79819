//! Handler trait and type erasure.
//!
//! # How actions and interceptors are stored
//!
//! A controller registers methods of *different* closure and fn-item types,
//! and the registry must hold them in one map. Rust collections can only
//! hold one concrete type, so every method is erased behind
//! `dyn ErasedHandler` once, at registration time:
//!
//! ```text
//! fn get_involved(ctx: &mut Context) { … }        ← user writes this
//!        ↓ Controller::new("Site").method("GetInvolved", get_involved)
//! get_involved.into_boxed_handler()               ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(get_involved))               ← heap-allocated wrapper
//!        ↓  stored as BoxedHandler = Arc<dyn ErasedHandler>
//! handler.call(ctx)  at request time              ← one vtable dispatch
//! ```
//!
//! There is no per-request lookup by reflection: the dispatcher resolves a
//! name to a `BoxedHandler` through a hash map and makes one virtual call.

use std::sync::Arc;

use crate::context::Context;
use crate::reply::IntoReply;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, ctx: &mut Context);
}

/// A type-erased action or interceptor shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Implemented for every valid action and interceptor.
///
/// You never implement this yourself. It is automatically satisfied for any
/// function or closure with the signature:
///
/// ```text
/// fn name(ctx: &mut Context) -> impl IntoReply
/// ```
///
/// Closures need their argument annotated (`|ctx: &mut Context| …`) so the
/// compiler infers a signature that works for every borrow of the context.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, R> private::Sealed for F
where
    F: Fn(&mut Context) -> R + Send + Sync + 'static,
    R: IntoReply,
{
}

impl<F, R> Handler for F
where
    F: Fn(&mut Context) -> R + Send + Sync + 'static,
    R: IntoReply,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Newtype bridging a concrete handler `F` to [`ErasedHandler`].
struct FnHandler<F>(F);

impl<F, R> ErasedHandler for FnHandler<F>
where
    F: Fn(&mut Context) -> R + Send + Sync,
    R: IntoReply,
{
    fn call(&self, ctx: &mut Context) {
        let out = (self.0)(ctx);
        out.into_reply(&mut ctx.reply);
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;

    fn teapot(_ctx: &mut Context) -> StatusCode {
        StatusCode::IM_A_TEAPOT
    }

    #[test]
    fn fn_items_and_closures_erase_to_the_same_type() {
        let handlers: Vec<BoxedHandler> = vec![
            teapot.into_boxed_handler(),
            (|ctx: &mut Context| {
                ctx.reply().header("x-seen", "1");
            })
            .into_boxed_handler(),
        ];

        let mut ctx = Context::new();
        for h in &handlers {
            h.call(&mut ctx);
        }
        assert_eq!(ctx.reply.status_code(), StatusCode::IM_A_TEAPOT);
        assert_eq!(ctx.reply.headers()["x-seen"], "1");
    }
}
