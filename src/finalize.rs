//! Response finalization.
//!
//! Runs once per request after dispatch, whether dispatch succeeded, was
//! skipped by an abort, or panicked. It renders pending views, decides on
//! gzip, stamps the standard headers and encodes the body through a
//! [`ResponseWriter`] backed by a pooled buffer.

use std::io::{self, Write};

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use http::header::{CONTENT_ENCODING, SERVER, SET_COOKIE, VARY};
use http::{HeaderValue, Method, StatusCode};
use http_body_util::Full;
use tracing::{debug, error};

use crate::config::Settings;
use crate::context::Context;
use crate::dispatch::guarded;
use crate::error::{HandlerFault, Stage};
use crate::pool::Pool;
use crate::reply::ReplyBody;
use crate::session::SessionManager;
use crate::view::ViewRenderer;

/// Value of the `Server` header on every response.
pub const SERVER_NAME: &str = "keel-server";

enum Sink {
    Plain(Vec<u8>),
    Gzip(GzEncoder<Vec<u8>>),
}

/// The body sink: plain or gzip-wrapped, counting bytes written into it.
pub struct ResponseWriter {
    sink: Sink,
    written: usize,
}

impl ResponseWriter {
    pub fn plain(buf: Vec<u8>) -> Self {
        Self { sink: Sink::Plain(buf), written: 0 }
    }

    pub fn gzip(buf: Vec<u8>, level: u32) -> Self {
        Self { sink: Sink::Gzip(GzEncoder::new(buf, Compression::new(level))), written: 0 }
    }

    pub fn is_gzip(&self) -> bool {
        matches!(self.sink, Sink::Gzip(_))
    }

    /// Bytes written by the handler side, before compression.
    pub fn bytes_written(&self) -> usize {
        self.written
    }

    /// Flushes and closes the encoder, returning the encoded bytes.
    pub fn finish(self) -> io::Result<Vec<u8>> {
        match self.sink {
            Sink::Plain(buf) => Ok(buf),
            Sink::Gzip(encoder) => encoder.finish(),
        }
    }
}

impl Write for ResponseWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let n = match &mut self.sink {
            Sink::Plain(buf) => buf.write(data)?,
            Sink::Gzip(encoder) => encoder.write(data)?,
        };
        self.written += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.sink {
            Sink::Plain(_) => Ok(()),
            Sink::Gzip(encoder) => encoder.flush(),
        }
    }
}

/// Replaces whatever the handler produced with the generic 500.
pub(crate) fn recover(ctx: &mut Context, fault: &HandlerFault) {
    error!(stage = %fault.stage, panic = %fault.message, "recovered from handler panic");
    ctx.reply.clear();
    ctx.reply.error(StatusCode::INTERNAL_SERVER_ERROR);
}

/// Shapes the final response. Borrows what it needs from the engine.
pub(crate) struct Finalizer<'e> {
    pub settings: &'e Settings,
    pub views: Option<&'e dyn ViewRenderer>,
    pub sessions: Option<&'e dyn SessionManager>,
    pub buffers: &'e Pool<Vec<u8>>,
}

impl Finalizer<'_> {
    pub fn finalize(&self, ctx: &mut Context) -> http::Response<Full<Bytes>> {
        if let Err(fault) = guarded(Stage::Render, ctx, |ctx| self.save_session(ctx)) {
            recover(ctx, &fault);
        }
        let body = self.render_body(ctx);

        let headers = &mut ctx.reply.headers;
        headers.insert(SERVER, HeaderValue::from_static(SERVER_NAME));
        if self.settings.request_id_enabled {
            if let Some(id) = ctx.request_id.as_deref().and_then(|id| HeaderValue::try_from(id).ok()) {
                headers.insert(self.settings.request_id_header.clone(), id);
            }
        }

        let compress = self.should_gzip(ctx, &body);
        let buf = self.buffers.acquire();
        let mut writer = if compress {
            ctx.reply.headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            ctx.reply.headers.append(VARY, HeaderValue::from_static("Accept-Encoding"));
            ResponseWriter::gzip(buf, self.settings.gzip_level)
        } else {
            ResponseWriter::plain(buf)
        };

        let written = writer.write_all(&body);
        let (gzip, raw_len) = (writer.is_gzip(), writer.bytes_written());
        let encoded = match (written, writer.finish()) {
            (Ok(()), Ok(buf)) => {
                let bytes = Bytes::copy_from_slice(&buf);
                self.buffers.release(buf);
                bytes
            }
            (Err(e), Ok(buf)) => {
                self.buffers.release(buf);
                self.fall_back_to_plain(ctx, &e, body)
            }
            (_, Err(e)) => {
                // The encoder kept the buffer; return a fresh one in its place.
                self.buffers.release(Vec::new());
                self.fall_back_to_plain(ctx, &e, body)
            }
        };

        let status = ctx.reply.status;
        debug!(
            status = status.as_u16(),
            bytes = raw_len,
            sent = encoded.len(),
            gzip,
            elapsed_us = ctx.started.elapsed().as_micros() as u64,
            "request finished"
        );

        let payload = if ctx.req.method == Method::HEAD { Bytes::new() } else { encoded };
        let mut response = http::Response::new(Full::new(payload));
        *response.status_mut() = status;
        *response.headers_mut() = std::mem::take(&mut ctx.reply.headers);
        response
    }

    fn fall_back_to_plain(&self, ctx: &mut Context, e: &io::Error, body: Vec<u8>) -> Bytes {
        error!("unable to encode response body: {e}");
        ctx.reply.headers.remove(CONTENT_ENCODING);
        Bytes::from(body)
    }

    fn should_gzip(&self, ctx: &Context, body: &[u8]) -> bool {
        self.settings.gzip_enabled
            && ctx.req.accept_gzip
            && ctx.reply.gzip
            && !body.is_empty()
            && ctx.req.method != Method::HEAD
            && !matches!(ctx.reply.status, StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED)
    }

    fn render_body(&self, ctx: &mut Context) -> Vec<u8> {
        match std::mem::take(&mut ctx.reply.body) {
            ReplyBody::Empty => Vec::new(),
            ReplyBody::Bytes(body) => body,
            ReplyBody::View(template) => match self.render_view(ctx, &template) {
                Some(body) => body,
                None => {
                    ctx.reply.clear();
                    ctx.reply.error(StatusCode::INTERNAL_SERVER_ERROR);
                    match std::mem::take(&mut ctx.reply.body) {
                        ReplyBody::Bytes(body) => body,
                        _ => Vec::new(),
                    }
                }
            },
        }
    }

    fn render_view(&self, ctx: &mut Context, template: &str) -> Option<Vec<u8>> {
        let Some(views) = self.views else {
            error!(template, "no view renderer configured");
            return None;
        };
        match guarded(Stage::Render, ctx, |ctx| views.render(template, &ctx.view_args)) {
            Ok(Ok(body)) => Some(body),
            Ok(Err(e)) => {
                error!(template, "view rendering failed: {e}");
                None
            }
            Err(fault) => {
                error!(template, panic = %fault.message, "view renderer panicked");
                None
            }
        }
    }

    fn save_session(&self, ctx: &mut Context) {
        let Some(manager) = self.sessions.filter(|m| m.is_stateful()) else {
            return;
        };
        let Some(session) = ctx.req.session.as_ref().filter(|s| s.is_modified()) else {
            return;
        };
        if let Some(cookie) = manager.save(session) {
            ctx.reply.headers.append(SET_COOKIE, cookie);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::GzDecoder;

    use super::*;

    #[test]
    fn gzip_writer_round_trips_and_counts_input() {
        let mut w = ResponseWriter::gzip(Vec::new(), 5);
        w.write_all(b"GetInvolved action").unwrap();
        assert!(w.is_gzip());
        assert_eq!(w.bytes_written(), 18);

        let encoded = w.finish().unwrap();
        let mut decoded = String::new();
        GzDecoder::new(&encoded[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, "GetInvolved action");
    }

    #[test]
    fn plain_writer_passes_bytes_through() {
        let mut w = ResponseWriter::plain(Vec::with_capacity(64));
        w.write_all(b"abc").unwrap();
        assert!(!w.is_gzip());
        assert_eq!(w.finish().unwrap(), b"abc");
    }

    #[test]
    fn recover_replaces_the_reply() {
        let mut ctx = Context::new();
        ctx.reply().header("x-partial", "1").text("half written");
        recover(&mut ctx, &HandlerFault { stage: Stage::Dispatch, message: "boom".into() });
        assert_eq!(ctx.reply.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(ctx.reply.headers().get("x-partial").is_none());
        assert_eq!(ctx.reply.body, ReplyBody::Bytes(b"500 Internal Server Error".to_vec()));
    }
}
