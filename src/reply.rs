//! The handler-facing response builder and the [`IntoReply`] conversion trait.
//!
//! Handlers never write to the transport. They describe the response on the
//! context's [`Reply`]; the finalizer turns that into bytes once dispatch is
//! over, applying compression and the standard headers.

use http::header::{CONTENT_TYPE, LOCATION};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::Serialize;
use tracing::{error, warn};

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`Reply::bytes`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Csv,          // text/csv
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv         => "text/csv",
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
        }
    }
}

// ── Reply ─────────────────────────────────────────────────────────────────────

/// What the finalizer will write.
#[derive(Debug, Default, PartialEq)]
pub(crate) enum ReplyBody {
    #[default]
    Empty,
    Bytes(Vec<u8>),
    /// Rendered by the view renderer with the context's view arguments.
    View(String),
}

/// An outgoing response under construction.
///
/// Every setter returns `&mut Self` so calls chain off [`Context::reply`]:
///
/// ```rust,ignore
/// ctx.reply()
///     .header("X-Custom-Header", "custom value")
///     .disable_gzip()
///     .json(&serde_json::json!({ "code": 1000001 }));
/// ```
///
/// [`Context::reply`]: crate::Context::reply
#[derive(Debug)]
pub struct Reply {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: ReplyBody,
    pub(crate) gzip: bool,
}

impl Reply {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: ReplyBody::Empty,
            gzip: true,
        }
    }

    pub fn status(&mut self, code: StatusCode) -> &mut Self {
        self.status = code;
        self
    }

    /// Sets a header, replacing any previous value. Invalid names or values
    /// are logged and dropped.
    pub fn header(&mut self, name: &str, value: &str) -> &mut Self {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(n), Ok(v)) => {
                self.headers.insert(n, v);
            }
            _ => warn!(header = name, "dropping invalid response header"),
        }
        self
    }

    /// Adds a header value without replacing existing ones.
    pub fn append_header(&mut self, name: HeaderName, value: HeaderValue) -> &mut Self {
        self.headers.append(name, value);
        self
    }

    /// `text/plain; charset=utf-8`.
    pub fn text(&mut self, body: impl Into<String>) -> &mut Self {
        self.body_raw(ContentType::Text.as_str(), body.into().into_bytes())
    }

    /// `application/json`. A serialization failure becomes a 500.
    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> &mut Self {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.body_raw(ContentType::Json.as_str(), bytes),
            Err(e) => {
                error!("reply json serialization failed: {e}");
                self.error(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// Renders `template` with the view arguments at finalize time.
    pub fn html(&mut self, template: impl Into<String>) -> &mut Self {
        self.set_content_type(ContentType::Html.as_str());
        self.body = ReplyBody::View(template.into());
        self
    }

    /// A typed body. Use this for XML, CSV, binary and pre-rendered HTML.
    pub fn bytes(&mut self, content_type: ContentType, body: Vec<u8>) -> &mut Self {
        self.body_raw(content_type.as_str(), body)
    }

    /// A body with an arbitrary content type, e.g. one guessed from a file
    /// extension. An invalid value falls back to `application/octet-stream`.
    pub fn raw(&mut self, content_type: &str, body: Vec<u8>) -> &mut Self {
        let value = HeaderValue::try_from(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(ContentType::OctetStream.as_str()));
        self.headers.insert(CONTENT_TYPE, value);
        self.body = ReplyBody::Bytes(body);
        self
    }

    /// `302 Found` to `location`.
    pub fn redirect(&mut self, location: &str) -> &mut Self {
        self.status = StatusCode::FOUND;
        self.body = ReplyBody::Empty;
        match HeaderValue::try_from(location) {
            Ok(v) => {
                self.headers.insert(LOCATION, v);
            }
            Err(_) => warn!(location, "dropping invalid redirect location"),
        }
        self
    }

    /// Writes this response uncompressed even if the client accepts gzip.
    pub fn disable_gzip(&mut self) -> &mut Self {
        self.gzip = false;
        self
    }

    /// The standard `"<code> <reason>"` plain-text body for `code`.
    pub fn error(&mut self, code: StatusCode) -> &mut Self {
        self.status = code;
        let body = format!("{} {}", code.as_u16(), code.canonical_reason().unwrap_or_default());
        self.text(body)
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn is_gzip_disabled(&self) -> bool { !self.gzip }

    pub(crate) fn clear(&mut self) {
        self.status = StatusCode::OK;
        self.headers.clear();
        self.body = ReplyBody::Empty;
        self.gzip = true;
    }

    fn body_raw(&mut self, content_type: &'static str, body: Vec<u8>) -> &mut Self {
        self.set_content_type(content_type);
        self.body = ReplyBody::Bytes(body);
        self
    }

    fn set_content_type(&mut self, content_type: &'static str) {
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
}

impl Default for Reply {
    fn default() -> Self { Self::new() }
}

// ── IntoReply ─────────────────────────────────────────────────────────────────

/// Conversion of a handler's return value into the context's [`Reply`].
///
/// Handlers that write through `ctx.reply()` return `()`. Implement this on
/// your own types to return them directly:
///
/// ```rust,ignore
/// struct Json<T: Serialize>(T);
///
/// impl<T: Serialize> IntoReply for Json<T> {
///     fn into_reply(self, reply: &mut Reply) {
///         reply.json(&self.0);
///     }
/// }
/// ```
pub trait IntoReply {
    fn into_reply(self, reply: &mut Reply);
}

impl IntoReply for () {
    fn into_reply(self, _reply: &mut Reply) {}
}

impl IntoReply for Reply {
    fn into_reply(self, reply: &mut Reply) { *reply = self; }
}

impl IntoReply for &'static str {
    fn into_reply(self, reply: &mut Reply) { reply.text(self); }
}

impl IntoReply for String {
    fn into_reply(self, reply: &mut Reply) { reply.text(self); }
}

/// Return a [`StatusCode`] directly from a handler: `return StatusCode::NOT_FOUND`
impl IntoReply for StatusCode {
    fn into_reply(self, reply: &mut Reply) { reply.error(self); }
}

impl<T: IntoReply, E: IntoReply> IntoReply for Result<T, E> {
    fn into_reply(self, reply: &mut Reply) {
        match self {
            Ok(v) => v.into_reply(reply),
            Err(e) => e.into_reply(reply),
        }
    }
}
