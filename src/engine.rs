//! The request-processing engine.
//!
//! [`Engine::handle`] is the synchronous per-request entry: acquire pooled
//! state, run the middleware chain, dispatch, finalize, release. Nothing
//! between acquire and release awaits, so every acquired context is
//! returned before `handle` does, panics in user code included.
//! [`Engine::serve`] is the async wrapper: it reads the request body, then
//! runs `handle` on the blocking pool.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body::Body;
use http_body_util::{BodyExt, Full, Limited};
use http::header::{CONTENT_TYPE, SERVER};
use http::{HeaderValue, StatusCode};
use tracing::{debug, error, info_span, warn};

use crate::config::{EngineConfig, Settings};
use crate::context::Context;
use crate::controller::{Controller, ControllerRegistry};
use crate::dispatch::{dispatch, guarded};
use crate::error::{Error, Stage};
use crate::finalize::{Finalizer, SERVER_NAME, recover};
use crate::middleware::{BoxedMiddleware, Middleware, Next, ParamsStage, RequestIdStage, RoutingStage};
use crate::pool::{Pool, PoolStats};
use crate::reply::ContentType;
use crate::request::Request;
use crate::router::{RouteTable, Router};
use crate::session::SessionManager;
use crate::static_files::{DirServer, FileServer};
use crate::view::ViewRenderer;

/// Snapshot of the engine's three pools.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EnginePoolStats {
    pub context: PoolStats,
    pub request: PoolStats,
    pub buffer: PoolStats,
}

/// Owns settings, collaborators, the middleware chain and the pools.
/// Immutable after [`EngineBuilder::build`] apart from pool contents.
pub struct Engine {
    settings: Settings,
    registry: ControllerRegistry,
    files: Arc<dyn FileServer>,
    sessions: Option<Arc<dyn SessionManager>>,
    views: Option<Arc<dyn ViewRenderer>>,
    middlewares: Vec<BoxedMiddleware>,
    ctx_pool: Pool<Context>,
    req_pool: Pool<Request>,
    buf_pool: Pool<Vec<u8>>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn pool_stats(&self) -> EnginePoolStats {
        EnginePoolStats {
            context: self.ctx_pool.stats(),
            request: self.req_pool.stats(),
            buffer: self.buf_pool.stats(),
        }
    }

    /// Reads the body (up to `request.max_body_size`) and handles the request.
    /// A body that cannot be read is logged and treated as empty.
    ///
    /// Actions, file serving and multipart spilling are synchronous, so
    /// `handle` runs on tokio's blocking pool rather than on a runtime worker.
    pub async fn serve<B>(self: Arc<Self>, req: http::Request<B>) -> http::Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = req.into_parts();
        let body = match Limited::new(body, self.settings.max_body_size).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(path = parts.uri.path(), "unable to read request body: {e}");
                Bytes::new()
            }
        };
        match tokio::task::spawn_blocking(move || self.handle(parts, body)).await {
            Ok(response) => response,
            Err(e) => {
                error!("request task failed: {e}");
                internal_error()
            }
        }
    }

    /// Handles one request whose body has already been read.
    pub fn handle(&self, parts: http::request::Parts, body: Bytes) -> http::Response<Full<Bytes>> {
        let mut ctx = self.ctx_pool.acquire();
        let mut req = self.req_pool.acquire();
        req.populate(parts, body);
        ctx.req = req;
        ctx.started = Instant::now();

        let span = info_span!(
            "request",
            method = %ctx.req.method,
            path = ctx.req.path(),
            request_id = tracing::field::Empty,
        );
        let _entered = span.enter();

        let prepared = guarded(Stage::Middleware, &mut ctx, |ctx| {
            if let Some(manager) = self.sessions.as_deref().filter(|m| m.is_stateful()) {
                ctx.req.session = manager.load(&ctx.req);
            }
            Next::run(&self.middlewares, ctx)
        });
        let completed = match prepared {
            Ok(completed) => completed,
            Err(fault) => {
                recover(&mut ctx, &fault);
                false
            }
        };
        if let Some(id) = ctx.request_id.as_deref() {
            span.record("request_id", id);
        }

        if completed {
            let outcome = guarded(Stage::Dispatch, &mut ctx, |ctx| {
                dispatch(ctx, &self.registry, self.files.as_ref());
            });
            if let Err(fault) = outcome {
                recover(&mut ctx, &fault);
            }
        } else {
            debug!("middleware chain stopped; skipping dispatch");
        }

        let response = Finalizer {
            settings: &self.settings,
            views: self.views.as_deref(),
            sessions: self.sessions.as_deref(),
            buffers: &self.buf_pool,
        }
        .finalize(&mut ctx);

        self.req_pool.release(std::mem::take(&mut ctx.req));
        self.ctx_pool.release(ctx);
        response
    }
}

/// The bare 500 for a request whose handling task died outside every guard.
fn internal_error() -> http::Response<Full<Bytes>> {
    let mut response = http::Response::new(Full::new(Bytes::from_static(b"500 Internal Server Error")));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    let headers = response.headers_mut();
    headers.insert(SERVER, HeaderValue::from_static(SERVER_NAME));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(ContentType::Text.as_str()));
    response
}

/// Collects collaborators and middleware, then validates the configuration.
pub struct EngineBuilder {
    config: EngineConfig,
    router: Option<Arc<dyn Router>>,
    registry: ControllerRegistry,
    middlewares: Vec<BoxedMiddleware>,
    files: Arc<dyn FileServer>,
    sessions: Option<Arc<dyn SessionManager>>,
    views: Option<Arc<dyn ViewRenderer>>,
}

impl EngineBuilder {
    fn new(config: EngineConfig) -> Self {
        Self {
            config,
            router: None,
            registry: ControllerRegistry::new(),
            middlewares: Vec::new(),
            files: Arc::new(DirServer),
            sessions: None,
            views: None,
        }
    }

    /// The route table. Defaults to an empty [`RouteTable`].
    pub fn router(mut self, router: impl Router) -> Self {
        self.router = Some(Arc::new(router));
        self
    }

    pub fn controller(mut self, controller: Controller) -> Self {
        self.registry.add(controller);
        self
    }

    /// Replaces the whole registry, e.g. one filled through
    /// [`ControllerRegistry::register`].
    pub fn registry(mut self, registry: ControllerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Appends user middleware; it runs after the built-in stages, in the
    /// order added.
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Defaults to [`DirServer`].
    pub fn file_server(mut self, files: impl FileServer) -> Self {
        self.files = Arc::new(files);
        self
    }

    pub fn session_manager(mut self, sessions: impl SessionManager) -> Self {
        self.sessions = Some(Arc::new(sessions));
        self
    }

    pub fn view_renderer(mut self, views: impl ViewRenderer) -> Self {
        self.views = Some(Arc::new(views));
        self
    }

    pub fn build(self) -> Result<Engine, Error> {
        let settings = Settings::from_config(&self.config)?;
        let router = self.router.unwrap_or_else(|| Arc::new(RouteTable::new()));

        let mut middlewares: Vec<BoxedMiddleware> = Vec::with_capacity(self.middlewares.len() + 3);
        if settings.request_id_enabled {
            middlewares.push(Arc::new(RequestIdStage::new(settings.request_id_header.clone())));
        }
        middlewares.push(Arc::new(ParamsStage::new(settings.multipart_enabled, settings.multipart_max_memory)));
        middlewares.push(Arc::new(RoutingStage::new(router)));
        middlewares.extend(self.middlewares);

        let max_idle = settings.pool_max_idle;
        Ok(Engine {
            registry: self.registry,
            files: self.files,
            sessions: self.sessions,
            views: self.views,
            middlewares,
            ctx_pool: Pool::new(Context::new, max_idle),
            req_pool: Pool::new(Request::new, max_idle),
            buf_pool: Pool::new(Vec::new, max_idle),
            settings,
        })
    }
}
