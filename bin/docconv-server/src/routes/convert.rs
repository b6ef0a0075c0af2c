//! Conversion routes: `POST /convert/{route}`.
//!
//! The multipart `file` field is streamed straight into a freshly allocated
//! job directory. The converted file is streamed back, and the job
//! directory is removed once the response body is finished (or dropped).

use std::sync::Arc;

use axum::body::Body;
use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::{Multipart, Path, State};
use axum::http::{StatusCode, header};
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use docconv_core::api::{JobArtifacts, download_name, stream_output, validate_filter_hint};
use docconv_core::{ConversionError, ConversionRequest, ConversionRoute, UploadedFile};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use utoipa::{OpenApi, ToSchema};

use crate::error::ServerError;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(convert), components(schemas(ConvertUpload)))]
pub struct ConvertApi;

/// Multipart form accepted by the conversion routes.
#[allow(dead_code)]
#[derive(ToSchema)]
pub struct ConvertUpload {
    /// The document to convert.
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
    /// Optional import filter override, e.g. `writer_pdf_import`.
    filter: Option<String>,
}

/// Register conversion routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/convert/{route}", post(convert))
}

/// Convert an uploaded document.
///
/// `route` is one of `pptx-to-pdf`, `pdf-to-pptx`, `docx-to-pdf`,
/// `pdf-to-docx`. On success the body is the converted file.
#[utoipa::path(
    post,
    path = "/convert/{route}",
    tag = "convert",
    params(("route" = String, Path, description = "pptx-to-pdf | pdf-to-pptx | docx-to-pdf | pdf-to-docx")),
    request_body(content = ConvertUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Converted file as an attachment"),
        (status = 400, description = "No file uploaded or invalid filter"),
        (status = 404, description = "Unknown conversion"),
        (status = 413, description = "File too large"),
        (status = 500, description = "Conversion failed or output missing"),
        (status = 504, description = "Conversion timed out"),
    )
)]
pub async fn convert(
    State(state): State<Arc<AppState>>,
    Path(route): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ServerError> {
    let route: ConversionRoute = route
        .parse()
        .map_err(|_| ServerError::NotFound(format!("unknown conversion '{route}'")))?;

    let Ok(mut multipart) = multipart else {
        debug!(%route, "request is not multipart");
        return Err(ConversionError::NoFileProvided.into());
    };

    let limit = state.config.max_upload_bytes;
    let mut received: Option<(JobArtifacts, UploadedFile)> = None;
    let mut filter_hint: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file")
                if received.is_none() && field.file_name().is_some_and(|n| !n.is_empty()) =>
            {
                received = Some(receive_upload(&state, field, limit).await?);
            }
            Some("filter") => {
                let text = field.text().await.map_err(|e| multipart_error(e, limit))?;
                let text = text.trim();
                if !text.is_empty() {
                    validate_filter_hint(text)?;
                    filter_hint = Some(text.to_owned());
                }
            }
            _ => {}
        }
    }

    let Some((artifacts, upload)) = received else {
        return Err(ConversionError::NoFileProvided.into());
    };

    info!(
        job_id = %artifacts.id(),
        %route,
        original_name = %upload.original_name,
        mime_type = %upload.mime_type,
        size_bytes = upload.size_bytes,
        "upload received"
    );

    let request = ConversionRequest::for_route(route, Some(upload)).with_filter_hint(filter_hint);
    // On error `artifacts` drops here and the job directory goes with it.
    let output = state
        .runtime
        .convert(&request, artifacts.output_dir())
        .await?;

    let file_name = request
        .download_name()
        .unwrap_or_else(|| download_name("", output.format));
    let body = stream_output(&output, artifacts).await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, output.format.mime_type())
        .header(header::CONTENT_LENGTH, output.size_bytes)
        .header(header::CONTENT_DISPOSITION, content_disposition(&file_name))
        .body(Body::from_stream(body))
        .map_err(|e| ServerError::Internal(format!("failed to build download response: {e}")))
}

/// Write one multipart file field to a new job directory, enforcing `limit`.
async fn receive_upload(
    state: &AppState,
    mut field: Field<'_>,
    limit: u64,
) -> Result<(JobArtifacts, UploadedFile), ServerError> {
    let original_name = field.file_name().unwrap_or("upload").to_owned();
    let mime_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_owned();

    let artifacts = state.runtime.store().allocate(&original_name).await?;
    let mut out = tokio::fs::File::create(artifacts.input_path())
        .await
        .map_err(|e| ConversionError::io("creating upload file", e))?;

    let mut size_bytes: u64 = 0;
    while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, limit))? {
        size_bytes = size_bytes.saturating_add(chunk.len() as u64);
        if size_bytes > limit {
            info!(job_id = %artifacts.id(), limit_bytes = limit, "upload exceeds size limit");
            return Err(ConversionError::PayloadTooLarge { limit_bytes: limit }.into());
        }
        out.write_all(&chunk)
            .await
            .map_err(|e| ConversionError::io("writing upload file", e))?;
    }
    out.flush()
        .await
        .map_err(|e| ConversionError::io("flushing upload file", e))?;

    let upload = UploadedFile {
        original_name,
        mime_type,
        size_bytes,
        path: artifacts.input_path().to_path_buf(),
    };
    Ok((artifacts, upload))
}

/// The body-limit layer surfaces as a multipart error with status 413.
fn multipart_error(e: MultipartError, limit: u64) -> ServerError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ConversionError::PayloadTooLarge { limit_bytes: limit }.into()
    } else {
        ServerError::BadRequest(format!("invalid multipart body: {}", e.body_text()))
    }
}

/// `attachment` with an ASCII fallback name plus an RFC 5987 `filename*`.
fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '_' })
        .collect();

    if fallback == file_name {
        return format!("attachment; filename=\"{file_name}\"");
    }

    let mut encoded = String::with_capacity(file_name.len() * 3);
    for byte in file_name.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}

// ── Tests ──────────────────────────────────────────────────────────────────────
