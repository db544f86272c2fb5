//! Static asset fallback for unmatched GET requests.
//!
//! # Responsibilities
//! - Resolve a URL path under the configured static root
//! - Compute a content hash ETag and answer conditional GETs with 304
//! - Derive the content type from the file extension
//!
//! # Design Decisions
//! - Paths with `..` segments are never resolved
//! - Directory-style URLs (trailing `/`) get the default document

use std::path::PathBuf;

use axum::{
    body::Body,
    http::{header, StatusCode},
    response::Response,
};
use sha2::{Digest, Sha256};

/// A file loaded for serving.
#[derive(Debug, Clone, PartialEq)]
pub struct EtagFile {
    pub etag: String,
    pub content: Vec<u8>,
}

impl EtagFile {
    fn new(content: Vec<u8>) -> Self {
        let etag = hex::encode(Sha256::digest(&content));
        Self { etag, content }
    }

    /// Whether an `If-None-Match` value refers to this file.
    pub fn matches(&self, if_none_match: Option<&str>) -> bool {
        if_none_match.is_some_and(|v| {
            v.split(',')
                .map(|tag| tag.trim().trim_start_matches("W/").trim_matches('"'))
                .any(|tag| tag == self.etag || tag == "*")
        })
    }
}

/// Content type by extension.
pub fn content_type(path: &str) -> &'static str {
    if path.ends_with('/') || path.ends_with(".html") || path.ends_with(".htm") {
        "text/html"
    } else if path.ends_with(".css") {
        "text/css"
    } else if path.ends_with(".js") {
        "text/javascript"
    } else {
        "application/octet-stream"
    }
}

/// Serves files from a directory.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    default_document: String,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>, default_document: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            default_document: default_document.into(),
        }
    }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let mut relative = path.trim_start_matches('/').to_string();
        if path.ends_with('/') || relative.is_empty() {
            relative.push_str(&self.default_document);
        }
        if relative.split('/').any(|s| s == ".." || s == ".") {
            return None;
        }
        Some(self.root.join(relative))
    }

    /// Load the file behind a URL path.
    pub async fn load(&self, path: &str) -> Option<EtagFile> {
        let file = self.resolve(path)?;
        let meta = tokio::fs::metadata(&file).await.ok()?;
        if !meta.is_file() {
            return None;
        }
        match tokio::fs::read(&file).await {
            Ok(content) => Some(EtagFile::new(content)),
            Err(e) => {
                tracing::warn!(path = %file.display(), error = %e, "Unable to read static file");
                None
            }
        }
    }

    /// Build the response for `path`, or `None` when there is no such file.
    pub async fn serve(&self, path: &str, if_none_match: Option<&str>) -> Option<Response> {
        let file = self.load(path).await?;
        let content_type = if path.ends_with('/') || path.is_empty() {
            content_type("/")
        } else {
            content_type(path)
        };

        let builder = Response::builder().header(header::CONTENT_TYPE, content_type);
        let response = if file.matches(if_none_match) {
            builder
                .status(StatusCode::NOT_MODIFIED)
                .header(header::CONTENT_LENGTH, "0")
                .body(Body::empty())
        } else {
            builder
                .status(StatusCode::OK)
                .header(header::ETAG, format!("\"{}\"", file.etag))
                .body(Body::from(file.content))
        };
        response.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type() {
        assert_eq!(content_type("/"), "text/html");
        assert_eq!(content_type("/a/index.htm"), "text/html");
        assert_eq!(content_type("/a/site.css"), "text/css");
        assert_eq!(content_type("/a/app.js"), "text/javascript");
        assert_eq!(content_type("/a/logo.png"), "application/octet-stream");
    }

    #[test]
    fn test_etag_matching() {
        let file = EtagFile::new(b"hello".to_vec());
        assert_eq!(file.etag.len(), 64);
        assert!(file.matches(Some(file.etag.as_str())));
        assert!(file.matches(Some(format!("\"{}\"", file.etag).as_str())));
        assert!(!file.matches(Some("other")));
        assert!(!file.matches(None));
    }

    #[tokio::test]
    async fn serves_index_and_conditional_get() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();
        let files = StaticFiles::new(dir.path(), "index.html");

        let response = files.serve("/", None).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");
        let etag = response.headers()[header::ETAG].to_str().unwrap().to_string();
        assert!(etag.starts_with('"') && etag.ends_with('"'));
        assert_eq!(etag.len(), 66);

        let response = files.serve("/index.html", Some(etag.as_str())).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

        assert!(files.serve("/missing.html", None).await.is_none());
        assert!(files.serve("/../etc/passwd", None).await.is_none());
    }
}
