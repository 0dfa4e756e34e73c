//! ImgBB image hosting route.

use crate::api::handlers::AppState;
use crate::api::models::{ImgbbUploadResponse, UrlResponse};
use crate::api::upstream::{
    decode_json, invoke, require_credential, shape_error, Provider, UpstreamAuth, UpstreamBody,
    UpstreamCall,
};
use crate::api::validation::{multipart_body, read_form, require_image, FilePart};
use crate::core::{AppError, Result};
use axum::extract::{multipart::MultipartRejection, Multipart, State};
use axum::Json;
use reqwest::multipart::{Form, Part};
use std::sync::Arc;

/// POST /api/imgbb/upload
///
/// Accepts a multipart form with an `image` file and returns the hosted URL.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<UrlResponse>> {
    let mut multipart = multipart_body(multipart)?;
    let form = read_form(&mut multipart, state.config.max_upload_bytes).await?;
    let image = form.require_file("image", "Missing image file")?;
    require_image(image, "image")?;
    let key = require_credential(state.config.imgbb.api_key.as_ref(), Provider::Imgbb)?;

    tracing::debug!(
        bytes = image.len(),
        content_type = image.content_type.as_deref().unwrap_or_default(),
        "Uploading image to ImgBB"
    );

    let body = Form::new().part("image", file_part(image, "image.png")?);
    let response = invoke(
        &state.http_client,
        UpstreamCall {
            provider: Provider::Imgbb,
            url: format!("{}/upload", state.config.imgbb.api_base.trim_end_matches('/')),
            auth: UpstreamAuth::FormField { name: "key", key },
            body: UpstreamBody::Multipart(body),
            accept: None,
            timeout: Some(state.request_timeout()),
            failure_message: "Failed to upload image",
        },
    )
    .await?;

    let uploaded: ImgbbUploadResponse = decode_json(response, Provider::Imgbb).await?;
    if uploaded.data.url.is_empty() {
        return Err(shape_error(Provider::Imgbb, "empty data.url"));
    }

    Ok(Json(UrlResponse {
        url: uploaded.data.url,
    }))
}

/// Re-encode an inbound file part for an outbound multipart form.
pub(crate) fn file_part(file: &FilePart, fallback_name: &str) -> Result<Part> {
    let part = Part::bytes(file.bytes.to_vec()).file_name(file.upload_name(fallback_name));
    match file.content_type.as_deref() {
        Some(mime) => part
            .mime_str(mime)
            .map_err(|e| AppError::bad_request(format!("Invalid content type {}: {}", mime, e))),
        None => Ok(part),
    }
}
