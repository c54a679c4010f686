//! Asset reference rewriting for documents handed to the remote renderer.
//!
//! Rendered HTML arrives with resource references relative to the page that
//! produced it. The browser session loads documents from a synthetic URL with
//! no relationship to that origin, so every `src`/`href` attribute and the
//! escaped stylesheet file marker must be rebased onto an absolute host
//! before the renderer sees them.

use lol_html::{RewriteStrSettings, element, rewrite_str};
use thiserror::Error;

/// Escaped `url()` prefix emitted by the upstream stylesheet pipeline for
/// file-service references. Fixed caller contract, matched literally.
const CSS_FILE_MARKER: &str = "url(&quot;/v1/file";

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("html rewrite failed: {0}")]
    Html(#[from] lol_html::errors::RewritingError),
}

/// Prefix every non-`data:` `src`/`href` attribute value with `host/`, and
/// rebase the escaped stylesheet file marker onto the same host.
///
/// This is a blind prefix by contract: callers are expected to send relative
/// references, and values that already look absolute are rebased all the
/// same rather than detected.
pub fn rewrite_asset_references(html: &str, host: &str) -> Result<String, RewriteError> {
    let rewritten = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("[src]", |el| {
                    if let Some(src) = el.get_attribute("src")
                        && !src.starts_with("data:")
                    {
                        el.set_attribute("src", &format!("{host}/{src}"))?;
                    }
                    Ok(())
                }),
                element!("[href]", |el| {
                    if let Some(href) = el.get_attribute("href")
                        && !href.starts_with("data:")
                    {
                        el.set_attribute("href", &format!("{host}/{href}"))?;
                    }
                    Ok(())
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )?;

    Ok(rewritten.replace(CSS_FILE_MARKER, &format!("url(&quot;{host}/v1/file")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "http://assets.internal:4000";

    #[test]
    fn relative_src_and_href_are_prefixed() {
        let html = r#"<img src="v1/file/logo.png"><a href="reports/1">r</a>"#;
        let out = rewrite_asset_references(html, HOST).expect("rewrite");
        assert!(out.contains(r#"src="http://assets.internal:4000/v1/file/logo.png""#));
        assert!(out.contains(r#"href="http://assets.internal:4000/reports/1""#));
    }

    #[test]
    fn data_uris_are_untouched() {
        let html = r#"<img src="data:image/png;base64,iVBORw0KGgo="><link href="data:text/css;base64,Zm9v">"#;
        let out = rewrite_asset_references(html, HOST).expect("rewrite");
        assert!(out.contains(r#"src="data:image/png;base64,iVBORw0KGgo=""#));
        assert!(out.contains(r#"href="data:text/css;base64,Zm9v""#));
    }

    #[test]
    fn absolute_urls_are_still_prefixed() {
        // Blind prefix per the caller contract, not a relative-URL detector.
        let html = r#"<img src="http://elsewhere/pic.png">"#;
        let out = rewrite_asset_references(html, HOST).expect("rewrite");
        assert!(out.contains(r#"src="http://assets.internal:4000/http://elsewhere/pic.png""#));
    }

    #[test]
    fn css_file_marker_is_rebased() {
        let html = r#"<div style="background: url(&quot;/v1/file/bg.png&quot;)"></div>"#;
        let out = rewrite_asset_references(html, HOST).expect("rewrite");
        assert!(out.contains(r#"url(&quot;http://assets.internal:4000/v1/file/bg.png&quot;)"#));
    }

    #[test]
    fn marker_in_style_text_is_rebased() {
        let html = "<style>.hero { background: url(&quot;/v1/file/a.png&quot;); }</style>";
        let out = rewrite_asset_references(html, HOST).expect("rewrite");
        assert!(out.contains("url(&quot;http://assets.internal:4000/v1/file/a.png&quot;)"));
    }

    #[test]
    fn plain_text_is_unchanged() {
        let html = "<p>no references here</p>";
        let out = rewrite_asset_references(html, HOST).expect("rewrite");
        assert_eq!(out, html);
    }
}
