//! Request parameter decoding.
//!
//! Body parameters are only read for non-GET requests, dispatching on the
//! content type:
//!
//! - `application/json`, `application/xml`, `text/xml`: raw payload string
//! - `application/x-www-form-urlencoded`: form values
//! - `multipart/form-data`: form values and files, when multipart is enabled
//!
//! A decoding failure is logged and leaves the parameters empty or partial;
//! it never aborts the request.

use std::io::Write;

use bytes::Bytes;
use http::Method;
use http::header::CONTENT_TYPE;
use tracing::{debug, error, warn};

use super::{Middleware, Next};
use crate::context::Context;
use crate::request::{FileData, FormFile, Request};

/// View argument key under which the parsed parameters are published.
pub const REQUEST_PARAMS: &str = "RequestParams";

pub struct ParamsStage {
    multipart_enabled: bool,
    max_memory: usize,
}

impl ParamsStage {
    pub fn new(multipart_enabled: bool, max_memory: usize) -> Self {
        Self { multipart_enabled, max_memory }
    }

    fn parse_body(&self, req: &mut Request) {
        debug!(content_type = %req.content_type, "request content type");
        match req.content_type.as_str() {
            "application/json" | "application/xml" | "text/xml" => {
                match String::from_utf8(req.body.to_vec()) {
                    Ok(payload) => req.payload = Some(payload),
                    Err(e) => error!("unable to read request body for '{}': {e}", req.content_type),
                }
            }
            "application/x-www-form-urlencoded" => {
                for (k, v) in url::form_urlencoded::parse(&req.body) {
                    req.params.form.entry(k.into_owned()).or_default().push(v.into_owned());
                }
            }
            "multipart/form-data" if self.multipart_enabled => self.parse_multipart(req),
            "multipart/form-data" => warn!("multipart processing is disabled"),
            _ => {}
        }
    }

    fn parse_multipart(&self, req: &mut Request) {
        let boundary = match req.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(multer::parse_boundary)
        {
            Some(Ok(b)) => b,
            Some(Err(e)) => {
                error!("unable to parse multipart form: {e}");
                return;
            }
            None => return,
        };

        let body = req.body.clone();
        let stream = futures::stream::once(async move { Ok::<Bytes, std::io::Error>(body) });
        let mut multipart = multer::Multipart::new(stream, boundary);

        // The body is already buffered, so every poll is immediately ready.
        let mut parts = Vec::new();
        let outcome = futures::executor::block_on(async {
            while let Some(field) = multipart.next_field().await? {
                let name = field.name().unwrap_or_default().to_owned();
                let file_name = field.file_name().map(str::to_owned);
                let content_type = field.content_type().map(ToString::to_string);
                let data = field.bytes().await?;
                parts.push((name, file_name, content_type, data));
            }
            Ok::<(), multer::Error>(())
        });
        if let Err(e) = outcome {
            error!("unable to parse multipart form: {e}");
        }

        for (name, file_name, content_type, data) in parts {
            // Only a filename makes a part a file; some clients label text
            // fields with a content type too.
            if file_name.is_none() {
                let value = String::from_utf8_lossy(&data).into_owned();
                req.params.form.entry(name).or_default().push(value);
                continue;
            }
            let size = data.len();
            let data = if size > self.max_memory {
                match spill(&data) {
                    Ok(temp) => {
                        let path = temp.to_path_buf();
                        req.temp_files.push(temp);
                        FileData::Disk(path)
                    }
                    Err(e) => {
                        error!(field = %name, "unable to spill multipart file: {e}");
                        continue;
                    }
                }
            } else {
                FileData::Memory(data)
            };
            req.params.files.entry(name).or_default().push(FormFile { file_name, content_type, size, data });
        }
    }
}

fn spill(data: &[u8]) -> std::io::Result<tempfile::TempPath> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(data)?;
    file.flush()?;
    Ok(file.into_temp_path())
}

/// Publishes the current parameters as the `RequestParams` view argument.
pub(crate) fn publish(ctx: &mut Context) {
    match serde_json::to_value(&ctx.req.params) {
        Ok(v) => {
            ctx.view_args.insert(REQUEST_PARAMS.to_owned(), v);
        }
        Err(e) => error!("unable to publish request params: {e}"),
    }
}

impl Middleware for ParamsStage {
    fn handle(&self, ctx: &mut Context, next: Next<'_>) {
        if ctx.req.method != Method::GET {
            self.parse_body(&mut ctx.req);
        }
        publish(ctx);
        next.proceed(ctx);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::middleware::BoxedMiddleware;

    fn run(stage: ParamsStage, method: &str, content_type: &str, body: &'static [u8]) -> Context {
        let (parts, ()) = http::Request::builder()
            .method(method)
            .uri("/submit?page=2")
            .header("content-type", content_type)
            .body(())
            .unwrap()
            .into_parts();
        let mut ctx = Context::new();
        ctx.req.populate(parts, Bytes::from_static(body));
        let stages: Vec<BoxedMiddleware> = vec![Arc::new(stage)];
        assert!(Next::run(&stages, &mut ctx), "decoding must never abort");
        ctx
    }

    #[test]
    fn form_bodies_become_form_params() {
        let ctx = run(
            ParamsStage::new(true, 1024),
            "POST",
            "application/x-www-form-urlencoded",
            b"name=alice&lang=rust&lang=go",
        );
        assert_eq!(ctx.req().form_value("name"), Some("alice"));
        assert_eq!(ctx.req().params().form["lang"], ["rust", "go"]);

        let published = ctx.view_arg(REQUEST_PARAMS).unwrap();
        assert_eq!(published["form"]["name"], serde_json::json!(["alice"]));
        assert_eq!(published["query"]["page"], serde_json::json!(["2"]));
    }

    #[test]
    fn json_bodies_are_captured_as_payload() {
        #[derive(serde::Deserialize)]
        struct Login {
            user: String,
        }
        let ctx = run(ParamsStage::new(true, 1024), "PUT", "application/json; charset=utf-8", br#"{"user":"bob"}"#);
        assert_eq!(ctx.req().payload(), Some(r#"{"user":"bob"}"#));
        assert_eq!(ctx.req().json::<Login>().unwrap().user, "bob");
    }

    #[test]
    fn get_requests_skip_the_body() {
        let ctx = run(ParamsStage::new(true, 1024), "GET", "application/x-www-form-urlencoded", b"name=alice");
        assert!(ctx.req().params().form.is_empty());
        assert_eq!(ctx.req().query_value("page"), Some("2"));
    }

    #[test]
    fn invalid_utf8_payload_is_logged_and_skipped() {
        let ctx = run(ParamsStage::new(true, 1024), "POST", "application/json", b"\xff\xfe");
        assert!(ctx.req().payload().is_none());
    }

    const MULTIPART: &[u8] = b"--XBOUNDARY\r\n\
Content-Disposition: form-data; name=\"title\"\r\n\
\r\n\
hello\r\n\
--XBOUNDARY\r\n\
Content-Disposition: form-data; name=\"upload\"; filename=\"notes.txt\"\r\n\
Content-Type: text/plain\r\n\
\r\n\
0123456789\r\n\
--XBOUNDARY--\r\n";

    #[test]
    fn multipart_fields_and_small_files_stay_in_memory() {
        let ctx = run(ParamsStage::new(true, 1024), "POST", "multipart/form-data; boundary=XBOUNDARY", MULTIPART);
        assert_eq!(ctx.req().form_value("title"), Some("hello"));
        let file = ctx.req().file("upload").unwrap();
        assert_eq!(file.file_name.as_deref(), Some("notes.txt"));
        assert_eq!(file.size, 10);
        assert!(file.disk_path().is_none());
        assert_eq!(&file.contents().unwrap()[..], b"0123456789");
    }

    #[test]
    fn large_multipart_files_spill_to_disk_and_are_removed_on_reset() {
        use crate::pool::Reset;

        let mut ctx = run(ParamsStage::new(true, 4), "POST", "multipart/form-data; boundary=XBOUNDARY", MULTIPART);
        let path = ctx.req().file("upload").unwrap().disk_path().unwrap().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"0123456789");

        ctx.reset();
        assert!(!path.exists());
    }

    #[test]
    fn typed_text_parts_without_filename_are_form_values() {
        const TYPED: &[u8] = b"--XBOUNDARY\r\n\
Content-Disposition: form-data; name=\"title\"\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
hello\r\n\
--XBOUNDARY--\r\n";

        let ctx = run(ParamsStage::new(true, 1024), "POST", "multipart/form-data; boundary=XBOUNDARY", TYPED);
        assert_eq!(ctx.req().form_value("title"), Some("hello"));
        assert!(ctx.req().file("title").is_none());
    }

    #[test]
    fn disabled_multipart_is_ignored() {
        let ctx = run(ParamsStage::new(false, 1024), "POST", "multipart/form-data; boundary=XBOUNDARY", MULTIPART);
        assert!(ctx.req().params().form.is_empty());
        assert!(ctx.req().params().files.is_empty());
    }

    #[test]
    fn malformed_multipart_keeps_going() {
        let ctx = run(ParamsStage::new(true, 1024), "POST", "multipart/form-data; boundary=XBOUNDARY", b"garbage");
        assert!(ctx.req().params().files.is_empty());
    }
}
