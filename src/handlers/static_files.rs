//! Static files below a document root

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::handlers::{HandlerAction, RequestHandler};
use crate::http::{http_date, Request, Response, StatusCode};
use crate::server::ClientInfo;

/// Serves regular files contained in a document root
///
/// The request path is resolved against the root and canonicalized; anything
/// that escapes the root, does not exist or is not a regular file is `404`.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = fs::canonicalize(root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical path of the file served for `request_path`
    pub fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let relative = request_path.trim_start_matches('/');
        let path = fs::canonicalize(self.root.join(relative)).ok()?;
        if !path.starts_with(&self.root) {
            return None;
        }
        let metadata = fs::metadata(&path).ok()?;
        metadata.is_file().then_some(path)
    }
}

/// Content type derived from the file extension
pub fn mime_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html",
        Some("js") => "text/javascript",
        Some("css") => "text/css",
        Some("jpg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

impl RequestHandler for StaticFiles {
    fn handle(&self, request: &Request, client: &ClientInfo, response: &mut Response) -> HandlerAction {
        let Some(path) = self.resolve(&request.path) else {
            tracing::debug!(peer = %client.peer_addr, path = %request.path, "No such page");
            response.status = StatusCode::NotFound;
            return HandlerAction::Close;
        };

        let read = fs::metadata(&path).and_then(|meta| Ok((meta, fs::read(&path)?)));
        match read {
            Ok((meta, data)) => {
                tracing::info!(peer = %client.peer_addr, file = %path.display(), "Serving page");
                if let Ok(modified) = meta.modified() {
                    response.header("Last-Modified", http_date(modified));
                }
                response
                    .header("Content-Length", data.len().to_string())
                    .header("Content-Type", mime_type(&path))
                    .body(&data);
            }
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "Failed to read page");
                response.status = StatusCode::NotFound;
            }
        }
        HandlerAction::Close
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ClientInfo {
        ClientInfo::new(1, "127.0.0.1:5000".parse().unwrap(), "127.0.0.1:8080".parse().unwrap())
    }

    fn get(handler: &StaticFiles, path: &str) -> Response {
        let line = format!("GET {} HTTP/1.0\r\n\r\n", path);
        let req = Request::parse(line.as_bytes()).unwrap();
        let mut response = Response::new();
        assert_eq!(handler.handle(&req, &client(), &mut response), HandlerAction::Close);
        response
    }

    fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
        response
            .headers()
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_mime_types() {
        assert_eq!(mime_type(Path::new("index.html")), "text/html");
        assert_eq!(mime_type(Path::new("app.js")), "text/javascript");
        assert_eq!(mime_type(Path::new("style.css")), "text/css");
        assert_eq!(mime_type(Path::new("snap.jpg")), "image/jpeg");
        assert_eq!(mime_type(Path::new("snap.jpeg")), "application/octet-stream");
        assert_eq!(mime_type(Path::new("README")), "application/octet-stream");
    }

    #[test]
    fn test_serves_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<html></html>").unwrap();
        let pages = StaticFiles::new(dir.path()).unwrap();

        let response = get(&pages, "/index.html");
        assert_eq!(response.status, StatusCode::Ok);
        assert_eq!(response.body_bytes(), b"<html></html>");
        assert_eq!(header(&response, "Content-Type"), Some("text/html"));
        assert_eq!(header(&response, "Content-Length"), Some("13"));
        assert!(header(&response, "Last-Modified").unwrap().ends_with("GMT"));
    }

    #[test]
    fn test_nested_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("js")).unwrap();
        fs::write(dir.path().join("js/app.js"), "x()").unwrap();
        let pages = StaticFiles::new(dir.path()).unwrap();

        let response = get(&pages, "/js/app.js");
        assert_eq!(response.status, StatusCode::Ok);
        assert_eq!(header(&response, "Content-Type"), Some("text/javascript"));
    }

    #[test]
    fn test_missing_and_directories_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let pages = StaticFiles::new(dir.path()).unwrap();

        assert_eq!(get(&pages, "/nope.html").status, StatusCode::NotFound);
        assert_eq!(get(&pages, "/sub").status, StatusCode::NotFound);
        assert_eq!(get(&pages, "/").status, StatusCode::NotFound);
    }

    #[test]
    fn test_escape_outside_root() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("www");
        fs::create_dir(&root).unwrap();
        fs::write(outer.path().join("secret.txt"), "s").unwrap();
        let pages = StaticFiles::new(&root).unwrap();

        assert!(pages.resolve("/../secret.txt").is_none());
        assert_eq!(get(&pages, "/../secret.txt").status, StatusCode::NotFound);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_outside_root() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("www");
        fs::create_dir(&root).unwrap();
        fs::write(outer.path().join("secret.txt"), "s").unwrap();
        std::os::unix::fs::symlink(outer.path().join("secret.txt"), root.join("link.txt")).unwrap();
        let pages = StaticFiles::new(&root).unwrap();

        assert!(pages.resolve("/link.txt").is_none());
    }

    #[test]
    fn test_missing_root() {
        assert!(StaticFiles::new("/definitely/not/here").is_err());
    }
}
