//! # keel
//!
//! A request-processing engine for server-side applications on hyper.
//!
//! A request flows through one fixed pipeline:
//!
//! 1. a pooled [`Context`] is checked out and filled from the transport request
//! 2. the middleware chain runs: request id, parameter decoding, routing, then
//!    user [`Middleware`] in registration order; any stage may stop it
//! 3. the resolved action runs inside its `Before`/`After` interceptors, or a
//!    static file is served
//! 4. the response is finalized: views rendered, gzip applied when
//!    negotiated, `Server` and request-id headers stamped
//! 5. everything goes back to its pool
//!
//! A panic anywhere in user code becomes a `500 Internal Server Error`; the
//! serving loop never sees it.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use keel::{Context, Controller, Engine, EngineConfig, RouteTable, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), keel::Error> {
//!     let routes = RouteTable::new()
//!         .get("/", "Site", "Index")
//!         .get("/users/{id}", "User", "Show");
//!
//!     let engine = Engine::builder(EngineConfig::default())
//!         .router(routes)
//!         .controller(Controller::new("Site").method("Index", |_: &mut Context| "welcome"))
//!         .controller(Controller::new("User").method("Show", show_user))
//!         .build()?;
//!
//!     Server::bind("0.0.0.0:8080").serve(engine).await
//! }
//!
//! fn show_user(ctx: &mut Context) {
//!     let id = ctx.req().path_value("id").unwrap_or_default().to_owned();
//!     ctx.reply().json(&serde_json::json!({ "id": id }));
//! }
//! ```

mod config;
mod context;
mod controller;
mod dispatch;
mod engine;
mod error;
mod finalize;
mod handler;
mod pool;
mod reply;
mod request;
mod router;
mod server;
mod session;
mod static_files;
mod view;

pub mod middleware;

pub use config::{EngineConfig, Settings};
pub use context::Context;
pub use controller::{ActionChain, ActionEntry, Controller, ControllerEntry, ControllerRegistry, MethodInfo, ParameterInfo, Step};
pub use engine::{Engine, EngineBuilder, EnginePoolStats};
pub use error::{Error, HandlerFault, Stage};
pub use finalize::{ResponseWriter, SERVER_NAME};
pub use handler::Handler;
pub use middleware::{Middleware, Next, from_fn};
pub use pool::{Pool, PoolStats, Reset};
pub use reply::{ContentType, IntoReply, Reply};
pub use request::{FormFile, Params, Request, accepts_gzip};
pub use router::{ActionRef, DirOptions, Resolution, RouteMatch, RouteTable, Router, StaticTarget, Target};
pub use server::Server;
pub use session::{MemorySessionManager, Session, SessionManager};
pub use static_files::{DirServer, FileOutcome, FileServer};
pub use view::{ViewArgs, ViewRenderer};
