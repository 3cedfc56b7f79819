//! Static file collaborator contract and the bundled directory server.

use std::fmt::Write as _;
use std::io;

use tracing::error;

use crate::request::Request;
use crate::router::StaticTarget;

/// What a static route produced.
#[derive(Debug, PartialEq)]
pub enum FileOutcome {
    File { content_type: String, body: Vec<u8> },
    /// An HTML directory listing.
    Listing(Vec<u8>),
    /// A directory was requested without its trailing slash.
    RedirectToDirectory,
    NotFound,
    /// A directory with neither an index file nor listing enabled.
    ListingNotAllowed,
}

/// Serves resolved filesystem paths.
pub trait FileServer: Send + Sync + 'static {
    fn serve(&self, target: &StaticTarget, req: &Request) -> FileOutcome;
}

/// Serves files and directories straight from the local filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirServer;

impl DirServer {
    fn read_file(path: &std::path::Path) -> FileOutcome {
        match std::fs::read(path) {
            Ok(body) => FileOutcome::File {
                content_type: mime_guess::from_path(path).first_or_octet_stream().to_string(),
                body,
            },
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    error!(path = %path.display(), "unable to read static file: {e}");
                }
                FileOutcome::NotFound
            }
        }
    }
}

impl FileServer for DirServer {
    fn serve(&self, target: &StaticTarget, req: &Request) -> FileOutcome {
        let meta = match std::fs::metadata(&target.path) {
            Ok(m) => m,
            Err(_) => return FileOutcome::NotFound,
        };
        if !meta.is_dir() {
            return Self::read_file(&target.path);
        }
        if !req.path().ends_with('/') {
            return FileOutcome::RedirectToDirectory;
        }
        if let Some(index) = &target.options.index {
            let index_path = target.path.join(index);
            if index_path.is_file() {
                return Self::read_file(&index_path);
            }
        }
        if !target.options.list {
            return FileOutcome::ListingNotAllowed;
        }
        match render_listing(&target.path, req.path()) {
            Ok(body) => FileOutcome::Listing(body),
            Err(e) => {
                error!(path = %target.path.display(), "unable to list directory: {e}");
                FileOutcome::NotFound
            }
        }
    }
}

fn render_listing(dir: &std::path::Path, url_path: &str) -> io::Result<Vec<u8>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_dir() {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();

    let title = escape_html(url_path);
    let mut html = String::new();
    let _ = write!(
        html,
        "<html>\n<head><title>Listing of {title}</title></head>\n<body>\n<h1>Listing of {title}</h1><hr>\n<pre><a href=\"../\">../</a>\n"
    );
    for name in &names {
        let href = urlencoding::encode(name).replace("%2F", "/");
        let _ = writeln!(html, "<a href=\"{href}\">{}</a>", escape_html(name));
    }
    html.push_str("</pre><hr>\n</body>\n</html>\n");
    Ok(html.into_bytes())
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::router::DirOptions;

    fn request(path: &str) -> Request {
        let (parts, ()) = http::Request::builder().uri(path).body(()).unwrap().into_parts();
        let mut req = Request::new();
        req.populate(parts, Bytes::new());
        req
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("config")).unwrap();
        std::fs::write(dir.path().join("app.css"), "body{}").unwrap();
        std::fs::write(dir.path().join("a&b.txt"), "x").unwrap();
        dir
    }

    fn target(dir: &tempfile::TempDir, rel: &str, options: DirOptions) -> StaticTarget {
        StaticTarget { path: dir.path().join(rel), options }
    }

    #[test]
    fn files_carry_guessed_content_type() {
        let dir = fixture();
        let out = DirServer.serve(&target(&dir, "app.css", DirOptions::default()), &request("/s/app.css"));
        assert_eq!(out, FileOutcome::File { content_type: "text/css".into(), body: b"body{}".to_vec() });
    }

    #[test]
    fn missing_files_are_not_found() {
        let dir = fixture();
        let out = DirServer.serve(&target(&dir, "logo.png", DirOptions::default()), &request("/s/logo.png"));
        assert_eq!(out, FileOutcome::NotFound);
    }

    #[test]
    fn directory_without_slash_redirects() {
        let dir = fixture();
        let out = DirServer.serve(&target(&dir, "", DirOptions::default()), &request("/s"));
        assert_eq!(out, FileOutcome::RedirectToDirectory);
    }

    #[test]
    fn listing_names_every_child() {
        let dir = fixture();
        let options = DirOptions { list: true, index: None };
        let FileOutcome::Listing(body) = DirServer.serve(&target(&dir, "", options), &request("/s/")) else {
            panic!("expected listing");
        };
        let body = String::from_utf8(body).unwrap();
        assert!(body.contains("Listing of /s/"));
        assert!(body.contains("<a href=\"config/\">config/</a>"));
        assert!(body.contains("app.css"));
        assert!(body.contains("a&amp;b.txt"));
    }

    #[test]
    fn index_file_wins_over_listing() {
        let dir = fixture();
        std::fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        let options = DirOptions { list: true, index: Some("index.html".into()) };
        let out = DirServer.serve(&target(&dir, "", options), &request("/s/"));
        assert_eq!(
            out,
            FileOutcome::File { content_type: "text/html".into(), body: b"<h1>home</h1>".to_vec() }
        );
    }

    #[test]
    fn listing_can_be_disabled() {
        let dir = fixture();
        let out = DirServer.serve(&target(&dir, "", DirOptions::default()), &request("/s/"));
        assert_eq!(out, FileOutcome::ListingNotAllowed);
    }
}
