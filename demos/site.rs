//! A small site on keel: actions with interceptors, a JSON endpoint,
//! sessions and a static directory.
//!
//! Run with:
//!   RUST_LOG=keel=debug cargo run --example site
//!
//! Try:
//!   curl -i --compressed http://localhost:8080/get-involved.html
//!   curl -i http://localhost:8080/credits
//!   curl -i -X POST http://localhost:8080/credits
//!   curl -i -X POST -d name=alice http://localhost:8080/login
//!   curl -i http://localhost:8080/public/

use keel::{
    Context, Controller, DirOptions, Engine, EngineConfig, MemorySessionManager, Next, RouteTable,
    Server, from_fn,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), keel::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::var("KEEL_CONFIG") {
        Ok(path) => EngineConfig::from_file(path)?,
        Err(_) => EngineConfig::default(),
    };

    let routes = RouteTable::new()
        .get("/get-involved.html", "Site", "GetInvolved")
        .get("/credits", "Site", "Credits")
        .post("/login", "Site", "Login")
        .get("/whoami", "Site", "Whoami")
        .static_dir("/public", "demos", DirOptions { list: true, index: None });

    let site = Controller::new("Site")
        .method("Before", |ctx: &mut Context| info!(path = ctx.req().path(), "entering Site"))
        .method("GetInvolved", |ctx: &mut Context| {
            ctx.reply().text("GetInvolved action");
        })
        .method("Credits", credits)
        .method("BeforeLogin", |ctx: &mut Context| {
            if ctx.req().form_value("name").is_none() {
                ctx.reply().status(http::StatusCode::BAD_REQUEST).text("name is required");
                ctx.abort();
            }
        })
        .method("Login", login)
        .method("Whoami", |ctx: &mut Context| -> String {
            ctx.req()
                .session()
                .and_then(|s| s.get_str("user"))
                .unwrap_or("anonymous")
                .to_owned()
        });

    let engine = Engine::builder(config)
        .router(routes)
        .controller(site)
        .middleware(from_fn(|ctx: &mut Context, next: Next<'_>| {
            ctx.reply().header("X-Powered-By", "keel");
            next.proceed(ctx);
        }))
        .session_manager(MemorySessionManager::new("keel_session"))
        .build()?;

    Server::bind("0.0.0.0:8080").serve(engine).await
}

fn credits(ctx: &mut Context) {
    ctx.reply()
        .header("X-Custom-Header", "custom value")
        .json(&serde_json::json!({ "message": "This is credits page", "code": 1000001 }));
}

fn login(ctx: &mut Context) {
    let name = ctx.req().form_value("name").unwrap_or_default().to_owned();
    ctx.session().set("user", name.as_str());
    ctx.reply().text(format!("welcome, {name}"));
}
