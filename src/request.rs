//! The decoded request wrapper.
//!
//! [`Request`] normalizes the transport-level request (method, URL, headers,
//! body) into the fields handlers actually use: the content-type essence,
//! whether gzip is acceptable, and the merged [`Params`] from the path, the
//! query string and the body. Instances are pooled; see [`crate::pool`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use http::header::{ACCEPT_ENCODING, CONTENT_TYPE};
use http::{HeaderMap, Method, Uri};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::TempPath;
use tracing::error;

use crate::pool::Reset;
use crate::session::Session;

/// An incoming HTTP request as seen by middleware and handlers.
pub struct Request {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) headers: HeaderMap,
    pub(crate) content_type: String,
    pub(crate) accept_gzip: bool,
    pub(crate) params: Params,
    pub(crate) payload: Option<String>,
    pub(crate) body: Bytes,
    pub(crate) session: Option<Session>,
    pub(crate) temp_files: Vec<TempPath>,
}

impl Request {
    pub(crate) fn new() -> Self {
        Self {
            method: Method::GET,
            uri: Uri::default(),
            headers: HeaderMap::new(),
            content_type: String::new(),
            accept_gzip: false,
            params: Params::default(),
            payload: None,
            body: Bytes::new(),
            session: None,
            temp_files: Vec::new(),
        }
    }

    /// Fills a clean wrapper from the transport-level request parts.
    pub(crate) fn populate(&mut self, parts: http::request::Parts, body: Bytes) {
        self.method = parts.method;
        self.uri = parts.uri;
        self.headers = parts.headers;
        self.body = body;

        self.content_type.clear();
        if let Some(ct) = self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
            let essence = ct.split(';').next().unwrap_or_default().trim();
            self.content_type.push_str(&essence.to_ascii_lowercase());
        }
        self.accept_gzip = self
            .headers
            .get(ACCEPT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .is_some_and(accepts_gzip);

        if let Some(query) = self.uri.query() {
            for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
                self.params.query.entry(k.into_owned()).or_default().push(v.into_owned());
            }
        }
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Case-insensitive header lookup. Non-UTF-8 values are treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Lowercased media type without parameters, e.g. `application/json`.
    pub fn content_type(&self) -> &str { &self.content_type }

    /// Whether the client's `Accept-Encoding` admits gzip.
    pub fn is_gzip_accepted(&self) -> bool { self.accept_gzip }

    pub fn params(&self) -> &Params { &self.params }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.path_value("id")` on `/users/42` returns `Some("42")`.
    pub fn path_value(&self, key: &str) -> Option<&str> { self.params.path_value(key) }
    pub fn query_value(&self, key: &str) -> Option<&str> { self.params.query_value(key) }
    pub fn form_value(&self, key: &str) -> Option<&str> { self.params.form_value(key) }
    pub fn file(&self, key: &str) -> Option<&FormFile> { self.params.file(key) }

    /// Raw JSON or XML body captured by the params stage.
    pub fn payload(&self) -> Option<&str> { self.payload.as_deref() }

    /// Deserializes the captured JSON payload.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(self.payload.as_deref().unwrap_or_default())
    }

    pub fn session(&self) -> Option<&Session> { self.session.as_ref() }

    /// Removes multipart temp files. Failures are logged and otherwise ignored.
    pub(crate) fn remove_temp_files(&mut self) {
        for path in self.temp_files.drain(..) {
            let spilled = path.to_path_buf();
            if let Err(e) = path.close() {
                error!(path = %spilled.display(), "multipart temp file clean up failed: {e}");
            }
        }
    }
}

impl Default for Request {
    fn default() -> Self { Self::new() }
}

impl Reset for Request {
    fn reset(&mut self) {
        self.remove_temp_files();
        self.method = Method::GET;
        self.uri = Uri::default();
        self.headers.clear();
        self.content_type.clear();
        self.accept_gzip = false;
        self.params.clear();
        self.payload = None;
        self.body = Bytes::new();
        self.session = None;
    }
}

/// Request parameters from every source.
///
/// Serialized (without files) as the `RequestParams` view argument.
#[derive(Debug, Default, Serialize)]
pub struct Params {
    pub path: HashMap<String, String>,
    pub query: HashMap<String, Vec<String>>,
    pub form: HashMap<String, Vec<String>>,
    #[serde(skip)]
    pub files: HashMap<String, Vec<FormFile>>,
}

impl Params {
    pub fn path_value(&self, key: &str) -> Option<&str> {
        self.path.get(key).map(String::as_str)
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        first(&self.query, key)
    }

    pub fn form_value(&self, key: &str) -> Option<&str> {
        first(&self.form, key)
    }

    pub fn file(&self, key: &str) -> Option<&FormFile> {
        self.files.get(key).and_then(|v| v.first())
    }

    fn clear(&mut self) {
        self.path.clear();
        self.query.clear();
        self.form.clear();
        self.files.clear();
    }
}

fn first<'a>(map: &'a HashMap<String, Vec<String>>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(|v| v.first()).map(String::as_str)
}

/// An uploaded multipart file part.
#[derive(Debug)]
pub struct FormFile {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub size: usize,
    pub(crate) data: FileData,
}

#[derive(Debug)]
pub(crate) enum FileData {
    Memory(Bytes),
    /// Spilled to disk; the owning [`TempPath`] lives in `Request::temp_files`.
    Disk(PathBuf),
}

impl FormFile {
    /// Path of the temp file for parts spilled to disk.
    pub fn disk_path(&self) -> Option<&Path> {
        match &self.data {
            FileData::Disk(p) => Some(p),
            FileData::Memory(_) => None,
        }
    }

    pub fn contents(&self) -> std::io::Result<Bytes> {
        match &self.data {
            FileData::Memory(b) => Ok(b.clone()),
            FileData::Disk(p) => std::fs::read(p).map(Bytes::from),
        }
    }
}

/// Reports whether an `Accept-Encoding` value admits gzip (`q=0` refuses it).
pub fn accepts_gzip(accept_encoding: &str) -> bool {
    accept_encoding.split(',').any(|item| {
        let mut parts = item.split(';');
        let coding = parts.next().unwrap_or_default().trim();
        if !coding.eq_ignore_ascii_case("gzip") {
            return false;
        }
        parts
            .filter_map(|p| p.trim().strip_prefix("q="))
            .all(|q| q.trim().parse::<f32>().map(|q| q > 0.0).unwrap_or(false))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str, headers: &[(&str, &str)]) -> Request {
        let mut builder = http::Request::builder().method("POST").uri(uri);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        let (parts, ()) = builder.body(()).unwrap().into_parts();
        let mut req = Request::new();
        req.populate(parts, Bytes::from_static(b"{}"));
        req
    }

    #[test]
    fn gzip_negotiation() {
        assert!(accepts_gzip("gzip, deflate, sdch, br"));
        assert!(accepts_gzip("br;q=1.0, GZIP;q=0.5"));
        assert!(!accepts_gzip("deflate, br"));
        assert!(!accepts_gzip("gzip;q=0"));
        assert!(!accepts_gzip("x-gzip"));
    }

    #[test]
    fn populate_normalizes_fields() {
        let req = request(
            "http://localhost:8080/search?q=rust&tag=a&tag=b",
            &[
                ("content-type", "Application/JSON; charset=utf-8"),
                ("accept-encoding", "gzip"),
            ],
        );
        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.path(), "/search");
        assert_eq!(req.content_type(), "application/json");
        assert!(req.is_gzip_accepted());
        assert_eq!(req.query_value("q"), Some("rust"));
        assert_eq!(req.params().query["tag"], vec!["a", "b"]);
        assert_eq!(req.header("Accept-Encoding"), Some("gzip"));
        assert_eq!(req.body(), b"{}");
    }

    #[test]
    fn reset_returns_to_zero_state() {
        let mut req = request("/a?x=1", &[("accept-encoding", "gzip")]);
        req.params.path.insert("id".into(), "7".into());
        req.payload = Some("{}".into());
        req.reset();

        assert_eq!(req.method(), Method::GET);
        assert_eq!(req.path(), "/");
        assert!(req.headers().is_empty());
        assert!(!req.is_gzip_accepted());
        assert!(req.params().query.is_empty());
        assert!(req.params().path.is_empty());
        assert!(req.payload().is_none());
        assert!(req.body().is_empty());
    }

    #[test]
    fn reset_removes_spilled_files() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();
        let mut req = Request::new();
        req.temp_files.push(file.into_temp_path());
        assert!(path.exists());

        req.reset();
        assert!(!path.exists());
        assert!(req.temp_files.is_empty());
    }
}
