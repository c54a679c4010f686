//! Request pipeline: log-capacity pre-check, geometry normalization,
//! reference rewriting, sequential rendering, and final merge.

use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::application::merge::{self, MergeError};
use crate::application::rewrite::{self, RewriteError};
use crate::domain::geometry::{GeometryError, MarginSpec, PageGeometry};
use crate::infra::logs;

/// The rendering capability: HTML string in, PDF bytes out.
///
/// The production implementation drives a shared browser session and
/// serializes calls internally; the pipeline only requires that each call
/// yields the PDF for exactly the HTML it was given.
#[async_trait]
pub trait HtmlRenderer: Send + Sync {
    async fn render(&self, html: String, geometry: &PageGeometry) -> Result<Vec<u8>, RenderError>;

    fn health(&self) -> SessionHealth;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionHealth {
    Ready,
    Degraded { consecutive_failures: u32 },
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("render session unavailable after {failures} consecutive launch failures")]
    Unavailable { failures: u32 },
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("pdf capture failed: {0}")]
    Capture(String),
    #[error("render timed out after {0:?}")]
    Timeout(Duration),
    #[error("render worker stopped: {0}")]
    Worker(String),
}

/// Wire shape of a render request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequestBody {
    pub html_contents: Vec<String>,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub scale: Option<f64>,
    #[serde(default)]
    pub margin: Option<MarginSpec>,
    #[serde(default)]
    pub host: Option<String>,
}

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("invalid render request: {0}")]
    Validation(String),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Rewrite(#[from] RewriteError),
    #[error("document {index} failed to render")]
    Render {
        index: usize,
        #[source]
        source: RenderError,
    },
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error("merge timed out after {0:?}")]
    MergeTimeout(Duration),
    #[error("merge worker stopped: {0}")]
    MergeWorker(String),
}

/// Upper bound on the merge phase. Merging is local CPU work; anything past
/// this indicates a pathological input set.
const MERGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Merge off the async runtime, bounded by [`MERGE_TIMEOUT`].
async fn merge_with_timeout(documents: Vec<Vec<u8>>) -> Result<Vec<u8>, PdfError> {
    let worker = tokio::task::spawn_blocking(move || merge::merge_documents(&documents));
    match tokio::time::timeout(MERGE_TIMEOUT, worker).await {
        Ok(Ok(result)) => Ok(result?),
        Ok(Err(join_error)) => Err(PdfError::MergeWorker(join_error.to_string())),
        Err(_elapsed) => Err(PdfError::MergeTimeout(MERGE_TIMEOUT)),
    }
}

/// Retention policy for the rolling log directory, enforced per request.
#[derive(Debug, Clone)]
pub struct LogRetention {
    pub directory: PathBuf,
    pub ceiling_bytes: u64,
}

/// Orchestrates one render request end to end.
pub struct PdfService {
    renderer: Arc<dyn HtmlRenderer>,
    retention: LogRetention,
    default_host: String,
}

impl PdfService {
    pub fn new(
        renderer: Arc<dyn HtmlRenderer>,
        retention: LogRetention,
        default_host: String,
    ) -> Self {
        Self {
            renderer,
            retention,
            default_host,
        }
    }

    pub fn renderer_health(&self) -> SessionHealth {
        self.renderer.health()
    }

    /// Render every document sequentially and merge the results.
    ///
    /// Documents are rendered in input order through the shared session and
    /// merged in the same order; any render or merge failure aborts the
    /// request with no partial output.
    pub async fn generate(&self, request: RenderRequestBody) -> Result<Bytes, PdfError> {
        self.enforce_log_ceiling().await;

        if request.html_contents.is_empty() {
            return Err(PdfError::Validation(
                "htmlContents must contain at least one document".to_string(),
            ));
        }

        let geometry =
            PageGeometry::resolve(request.width, request.height, request.scale, request.margin)?;
        let host = self.resolve_host(request.host)?;

        let started = Instant::now();
        let mut documents = Vec::with_capacity(request.html_contents.len());
        for (index, html) in request.html_contents.iter().enumerate() {
            let rewritten = rewrite::rewrite_asset_references(html, &host)?;
            let buffer = self
                .renderer
                .render(rewritten, &geometry)
                .await
                .map_err(|source| {
                    metrics::counter!("stampa_render_failure_total").increment(1);
                    PdfError::Render { index, source }
                })?;
            documents.push(buffer);
        }

        let document_count = documents.len();
        let merged = merge_with_timeout(documents).await?;

        metrics::counter!("stampa_render_total").increment(1);
        metrics::histogram!("stampa_render_ms").record(started.elapsed().as_millis() as f64);
        info!(
            target = "stampa::pipeline",
            documents = document_count,
            bytes = merged.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rendered merged document"
        );

        Ok(Bytes::from(merged))
    }

    /// A caller-supplied host must at least parse as a URL; blank or absent
    /// hosts fall back to the configured loopback default. The value is used
    /// verbatim as a prefix, never normalized.
    fn resolve_host(&self, host: Option<String>) -> Result<String, PdfError> {
        let Some(candidate) = host
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
        else {
            return Ok(self.default_host.clone());
        };

        url::Url::parse(&candidate)
            .map_err(|err| PdfError::Validation(format!("invalid host `{candidate}`: {err}")))?;
        Ok(candidate)
    }

    /// Best-effort log eviction; failures are logged and never fail the request.
    async fn enforce_log_ceiling(&self) {
        match logs::check_and_reclaim(&self.retention.directory, self.retention.ceiling_bytes).await
        {
            Ok(report) if report.deleted_files > 0 => {
                metrics::counter!("stampa_log_reclaimed_bytes_total")
                    .increment(report.reclaimed_bytes);
                info!(
                    target = "stampa::pipeline",
                    total_bytes = report.total_bytes,
                    deleted_files = report.deleted_files,
                    reclaimed_bytes = report.reclaimed_bytes,
                    "log directory trimmed"
                );
            }
            Ok(_) => {}
            Err(err) => {
                warn!(
                    target = "stampa::pipeline",
                    directory = %self.retention.directory.display(),
                    error = %err,
                    "log capacity check failed"
                );
            }
        }
    }
}
