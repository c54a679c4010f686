//! Report template assembly.
//!
//! Templates live under a configured views root as an HTML file carrying a
//! literal style-slot marker plus a sibling CSS file. Assembly inlines the
//! stylesheet into the marker and returns the combined document; data
//! interpolation is the caller's templating engine's job.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tokio::fs;

/// Literal slot replaced by the stylesheet during assembly.
pub const STYLE_SLOT_MARKER: &str = "/***PDF_STYLE***/";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("invalid template path")]
    InvalidPath,
    #[error("template `{path}` could not be read")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Filesystem-backed template store rooted at the configured views directory.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    views_root: PathBuf,
}

impl TemplateStore {
    pub fn new(views_root: PathBuf) -> Self {
        Self { views_root }
    }

    /// Read the HTML template and its stylesheet, inlining the stylesheet at
    /// the style-slot marker.
    pub async fn assemble(&self, html_path: &str, css_path: &str) -> Result<String, TemplateError> {
        let html = self.read(html_path).await?;
        let css = self.read(css_path).await?;
        Ok(html.replace(STYLE_SLOT_MARKER, &css))
    }

    async fn read(&self, relative: &str) -> Result<String, TemplateError> {
        let absolute = self.resolve(relative)?;
        fs::read_to_string(&absolute)
            .await
            .map_err(|source| TemplateError::Read {
                path: relative.to_string(),
                source,
            })
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, TemplateError> {
        let path = Path::new(relative);
        if path.is_absolute()
            || path
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(TemplateError::InvalidPath);
        }

        Ok(self.views_root.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(files: &[(&str, &str)]) -> (tempfile::TempDir, TemplateStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        for (name, contents) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("mkdir");
            }
            std::fs::write(path, contents).expect("write fixture");
        }
        let store = TemplateStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    #[tokio::test]
    async fn assembles_css_into_marker() {
        let (_dir, store) = store_with(&[
            (
                "report/template.html",
                "<html><style>/***PDF_STYLE***/</style><body>r</body></html>",
            ),
            ("report/template.css", "body { color: red; }"),
        ]);

        let html = store
            .assemble("report/template.html", "report/template.css")
            .await
            .expect("assemble");
        assert!(html.contains("<style>body { color: red; }</style>"));
        assert!(!html.contains(STYLE_SLOT_MARKER));
    }

    #[tokio::test]
    async fn missing_template_is_a_read_error() {
        let (_dir, store) = store_with(&[]);
        let err = store
            .assemble("missing.html", "missing.css")
            .await
            .expect_err("must fail");
        assert!(matches!(err, TemplateError::Read { .. }));
    }

    #[tokio::test]
    async fn parent_traversal_is_rejected() {
        let (_dir, store) = store_with(&[]);
        let err = store
            .assemble("../outside.html", "style.css")
            .await
            .expect_err("must fail");
        assert!(matches!(err, TemplateError::InvalidPath));
    }

    #[tokio::test]
    async fn absolute_path_is_rejected() {
        let (_dir, store) = store_with(&[]);
        let err = store
            .assemble("/etc/passwd", "style.css")
            .await
            .expect_err("must fail");
        assert!(matches!(err, TemplateError::InvalidPath));
    }
}
