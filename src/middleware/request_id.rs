//! Request-id assignment.

use http::{HeaderName, HeaderValue};
use tracing::trace;

use super::{Middleware, Next};
use crate::context::Context;

/// Reuses the client's request id or generates one.
///
/// The id is written back onto the request headers so downstream handlers
/// see it either way; the finalizer echoes it on the response.
pub struct RequestIdStage {
    header: HeaderName,
}

impl RequestIdStage {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

impl Middleware for RequestIdStage {
    fn handle(&self, ctx: &mut Context, next: Next<'_>) {
        let existing = ctx.req.headers
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_owned);

        let id = match existing {
            Some(id) => id,
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                trace!(request_id = %id, "generated request id");
                if let Ok(v) = HeaderValue::try_from(id.as_str()) {
                    ctx.req.headers.insert(self.header.clone(), v);
                }
                id
            }
        };
        ctx.request_id = Some(id);
        next.proceed(ctx);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;
    use crate::middleware::BoxedMiddleware;

    fn run(headers: &[(&str, &str)]) -> Context {
        let mut builder = http::Request::builder().uri("/");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        let (parts, ()) = builder.body(()).unwrap().into_parts();
        let mut ctx = Context::new();
        ctx.req.populate(parts, Bytes::new());

        let stages: Vec<BoxedMiddleware> =
            vec![Arc::new(RequestIdStage::new(HeaderName::from_static("x-test-request-id")))];
        assert!(Next::run(&stages, &mut ctx));
        ctx
    }

    #[test]
    fn keeps_client_supplied_id() {
        let ctx = run(&[("X-Test-Request-Id", "D9391509-595B-4B92-BED7-F6A9BE0DFCF2")]);
        assert_eq!(ctx.request_id(), Some("D9391509-595B-4B92-BED7-F6A9BE0DFCF2"));
    }

    #[test]
    fn generates_and_sets_missing_id() {
        let ctx = run(&[]);
        let id = ctx.request_id().unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
        assert_eq!(ctx.req().header("x-test-request-id"), Some(id));
    }
}
