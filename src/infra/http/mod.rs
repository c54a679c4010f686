mod middleware;

pub use middleware::RequestContext;

use std::io::ErrorKind;
use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header::CONTENT_TYPE},
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use crate::application::{
    error::{ErrorReport, HttpError},
    pipeline::{PdfError, PdfService, RenderError, RenderRequestBody, SessionHealth},
    templates::{TemplateError, TemplateStore},
};

use middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub pdf: Arc<PdfService>,
    pub templates: Arc<TemplateStore>,
}

pub fn build_router(state: HttpState, max_request_bytes: usize) -> Router {
    Router::new()
        .route("/v1/pdf", post(render_pdf))
        .route("/v1/pdf/template", get(assemble_template))
        .route("/_health", get(health))
        .layer(DefaultBodyLimit::max(max_request_bytes))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

async fn render_pdf(
    State(state): State<HttpState>,
    axum::Json(body): axum::Json<RenderRequestBody>,
) -> Response {
    const SOURCE: &str = "infra::http::render_pdf";

    match state.pdf.generate(body).await {
        Ok(bytes) => pdf_response(bytes),
        Err(err) => pdf_error_to_http(SOURCE, err).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct TemplateQuery {
    html: String,
    css: String,
}

async fn assemble_template(
    State(state): State<HttpState>,
    Query(query): Query<TemplateQuery>,
) -> Response {
    const SOURCE: &str = "infra::http::assemble_template";

    match state.templates.assemble(&query.html, &query.css).await {
        Ok(html) => {
            let mut headers = HeaderMap::new();
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            );
            (StatusCode::OK, headers, html).into_response()
        }
        Err(TemplateError::InvalidPath) => HttpError::new(
            SOURCE,
            StatusCode::NOT_FOUND,
            "Template not found",
            "template path escapes the views root",
        )
        .into_response(),
        Err(TemplateError::Read { ref source, .. })
            if source.kind() == ErrorKind::NotFound =>
        {
            HttpError::new(
                SOURCE,
                StatusCode::NOT_FOUND,
                "Template not found",
                "the requested template is not available",
            )
            .into_response()
        }
        Err(err) => HttpError::from_error(
            SOURCE,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to read template",
            &err,
        )
        .into_response(),
    }
}

async fn health(State(state): State<HttpState>) -> Response {
    match state.pdf.renderer_health() {
        SessionHealth::Ready => StatusCode::NO_CONTENT.into_response(),
        SessionHealth::Degraded {
            consecutive_failures,
        } => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_message(
                "infra::http::health",
                StatusCode::SERVICE_UNAVAILABLE,
                format!("render session degraded after {consecutive_failures} launch failures"),
            )
            .attach(&mut response);
            response
        }
    }
}

fn pdf_response(bytes: Bytes) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/pdf"));
    (StatusCode::OK, headers, bytes).into_response()
}

/// Map a pipeline error to a consistent HTTP error response.
pub fn pdf_error_to_http(source: &'static str, error: PdfError) -> HttpError {
    match &error {
        PdfError::Validation(_) | PdfError::Geometry(_) => HttpError::from_error(
            source,
            StatusCode::BAD_REQUEST,
            "Invalid render request",
            &error,
        ),
        PdfError::Rewrite(_) => HttpError::from_error(
            source,
            StatusCode::BAD_REQUEST,
            "Invalid document markup",
            &error,
        ),
        PdfError::Render {
            source: RenderError::Unavailable { .. },
            ..
        } => HttpError::from_error(
            source,
            StatusCode::SERVICE_UNAVAILABLE,
            "Render session unavailable",
            &error,
        ),
        PdfError::Render { .. } => HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Rendering failed",
            &error,
        ),
        PdfError::Merge(_) | PdfError::MergeTimeout(_) | PdfError::MergeWorker(_) => {
            HttpError::from_error(
                source,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Document merge failed",
                &error,
            )
        }
    }
}
