//! Route resolution.
//!
//! The engine consumes routing through the [`Router`] trait: give it a
//! method and a path, get back a handler reference with path parameters, a
//! not-found, or a method-not-allowed with the permitted methods.
//! [`RouteTable`] is the bundled implementation: one radix tree per HTTP
//! method for controller actions (O(path-length) lookup via [`matchit`]),
//! plus prefix-mounted static directories and single files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use http::Method;
use matchit::Router as MatchitRouter;

use crate::error::Error;

/// Resolves requests to handlers.
pub trait Router: Send + Sync + 'static {
    fn resolve(&self, method: &Method, path: &str) -> Resolution;
}

/// The outcome of routing one request.
#[derive(Clone, Debug)]
pub enum Resolution {
    Matched(RouteMatch),
    NotFound,
    /// The path exists under other methods. `allowed` is what the `Allow`
    /// header will carry, in order.
    MethodNotAllowed { allowed: Vec<Method> },
}

/// A resolved route.
#[derive(Clone, Debug)]
pub struct RouteMatch {
    pub target: Target,
    pub params: HashMap<String, String>,
}

#[derive(Clone, Debug)]
pub enum Target {
    Action(ActionRef),
    Static(StaticTarget),
}

/// A controller method, by registered names.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ActionRef {
    pub controller: Arc<str>,
    pub action: Arc<str>,
}

/// A filesystem path resolved from a static mount.
#[derive(Clone, Debug)]
pub struct StaticTarget {
    pub path: PathBuf,
    pub options: DirOptions,
}

/// How a mounted directory answers directory requests.
#[derive(Clone, Debug, Default)]
pub struct DirOptions {
    /// Render a listing for directories without an index file.
    pub list: bool,
    /// File served for a directory request, e.g. `index.html`.
    pub index: Option<String>,
}

enum Mount {
    Dir { prefix: String, dir: PathBuf, options: DirOptions },
    File { path: String, file: PathBuf },
}

/// The bundled route table.
///
/// Build it once at startup and hand it to
/// [`EngineBuilder::router`](crate::EngineBuilder::router). Each registration
/// returns `self` so calls chain naturally.
pub struct RouteTable {
    routes: HashMap<Method, MatchitRouter<ActionRef>>,
    mounts: Vec<Mount>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self { routes: HashMap::new(), mounts: Vec::new() }
    }

    /// Binds `method` + `path` to `controller`'s `action`.
    ///
    /// Path parameters use `{name}` syntax and are read with
    /// [`Request::path_value`](crate::Request::path_value):
    ///
    /// ```rust,ignore
    /// RouteTable::new()
    ///     .get("/users/{id}",       "User", "Show")
    ///     .route(Method::DELETE, "/users/{id}", "User", "Delete");
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if the pattern is invalid or conflicts with an existing route.
    /// Use [`try_route`](Self::try_route) to handle that as an error.
    pub fn route(self, method: Method, path: &str, controller: &str, action: &str) -> Self {
        self.try_route(method, path, controller, action)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    pub fn try_route(
        mut self,
        method: Method,
        path: &str,
        controller: &str,
        action: &str,
    ) -> Result<Self, Error> {
        let target = ActionRef { controller: controller.into(), action: action.into() };
        self.routes
            .entry(method)
            .or_default()
            .insert(path, target)
            .map_err(|e| Error::InvalidRoute { path: path.to_owned(), reason: e.to_string() })?;
        Ok(self)
    }

    pub fn get(self, path: &str, controller: &str, action: &str) -> Self {
        self.route(Method::GET, path, controller, action)
    }

    pub fn post(self, path: &str, controller: &str, action: &str) -> Self {
        self.route(Method::POST, path, controller, action)
    }

    /// Serves `dir` under the URL `prefix` for GET and HEAD.
    pub fn static_dir(mut self, prefix: &str, dir: impl Into<PathBuf>, options: DirOptions) -> Self {
        let prefix = prefix.trim_end_matches('/').to_owned();
        self.mounts.push(Mount::Dir { prefix, dir: dir.into(), options });
        self
    }

    /// Serves a single `file` at the URL `path` for GET and HEAD.
    pub fn static_file(mut self, path: &str, file: impl Into<PathBuf>) -> Self {
        self.mounts.push(Mount::File { path: path.to_owned(), file: file.into() });
        self
    }

    fn resolve_static(&self, path: &str) -> Option<Result<StaticTarget, ()>> {
        self.mounts.iter().find_map(|mount| match mount {
            Mount::File { path: p, file } if p == path => Some(Ok(StaticTarget {
                path: file.clone(),
                options: DirOptions::default(),
            })),
            Mount::File { .. } => None,
            Mount::Dir { prefix, dir, options } => {
                let rest = path.strip_prefix(prefix.as_str())?;
                if !rest.is_empty() && !rest.starts_with('/') {
                    return None;
                }
                Some(join_safely(dir, rest).map(|path| StaticTarget { path, options: options.clone() }))
            }
        })
    }
}

impl Default for RouteTable {
    fn default() -> Self { Self::new() }
}

impl Router for RouteTable {
    fn resolve(&self, method: &Method, path: &str) -> Resolution {
        if let Some(matched) = self.routes.get(method).and_then(|tree| tree.at(path).ok()) {
            let params = matched.params.iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            return Resolution::Matched(RouteMatch {
                target: Target::Action(matched.value.clone()),
                params,
            });
        }

        let mut allowed: Vec<Method> = self.routes.iter()
            .filter(|(_, tree)| tree.at(path).is_ok())
            .map(|(m, _)| m.clone())
            .collect();

        match self.resolve_static(path) {
            Some(Ok(target)) if *method == Method::GET || *method == Method::HEAD => {
                return Resolution::Matched(RouteMatch { target: Target::Static(target), params: HashMap::new() });
            }
            Some(Ok(_)) => allowed.extend([Method::GET, Method::HEAD]),
            Some(Err(())) => return Resolution::NotFound,
            None => {}
        }

        if allowed.is_empty() {
            return Resolution::NotFound;
        }
        allowed.push(Method::OPTIONS);
        allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        allowed.dedup();
        Resolution::MethodNotAllowed { allowed }
    }
}

/// Joins a URL remainder onto `dir`, rejecting parent-directory escapes.
fn join_safely(dir: &Path, rest: &str) -> Result<PathBuf, ()> {
    let mut path = dir.to_path_buf();
    for segment in rest.split('/').filter(|s| !s.is_empty() && *s != ".") {
        let decoded = urlencoding::decode(segment).map_err(|_| ())?;
        if decoded == ".." || decoded.contains(['/', '\\', '\0']) {
            return Err(());
        }
        path.push(decoded.as_ref());
    }
    Ok(path)
}
