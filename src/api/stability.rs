//! Stability AI image generation route.
//!
//! Text-to-image by default; image-to-image when the client opts in with
//! `useControlImage=true` and sends a `controlImage` file. The binary image
//! returned by the upstream is handed back as a base64 data URL.

use crate::api::handlers::AppState;
use crate::api::imgbb::file_part;
use crate::api::models::ImageDataUrlResponse;
use crate::api::upstream::{
    invoke, read_body, require_credential, shape_error, Provider, UpstreamAuth, UpstreamBody,
    UpstreamCall,
};
use crate::api::validation::{multipart_body, read_form, require_image, FormFields};
use crate::core::config::StabilityConfig;
use crate::core::Result;
use axum::extract::{multipart::MultipartRejection, Multipart, State};
use axum::Json;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::multipart::Form;
use std::sync::Arc;

const DEFAULT_IMAGE_MIME: &str = "image/png";

/// POST /api/stability/generate
pub async fn generate(
    State(state): State<Arc<AppState>>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<ImageDataUrlResponse>> {
    let mut multipart = multipart_body(multipart)?;
    let fields = read_form(&mut multipart, state.config.max_upload_bytes).await?;
    let body = build_generation_form(&fields, &state.config.stability)?;
    let key = require_credential(state.config.stability.api_key.as_ref(), Provider::Stability)?;

    let response = invoke(
        &state.http_client,
        UpstreamCall {
            provider: Provider::Stability,
            url: format!(
                "{}/generate/sd3",
                state.config.stability.api_base.trim_end_matches('/')
            ),
            auth: UpstreamAuth::Bearer(key),
            body: UpstreamBody::Multipart(body),
            accept: Some("image/*"),
            timeout: Some(state.request_timeout()),
            failure_message: "Failed to generate image",
        },
    )
    .await?;

    let mime = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string());
    if !mime.to_ascii_lowercase().starts_with("image/") {
        return Err(shape_error(
            Provider::Stability,
            format!("expected an image, got {}", mime),
        ));
    }

    let image = read_body(response, Provider::Stability).await?;
    if image.is_empty() {
        return Err(shape_error(Provider::Stability, "empty image body"));
    }

    Ok(Json(ImageDataUrlResponse {
        image_data_url: to_data_url(&mime, &image),
    }))
}

/// Validate the inbound form and translate it into the upstream form.
fn build_generation_form(fields: &FormFields, config: &StabilityConfig) -> Result<Form> {
    let prompt = fields.require_text("prompt", "Missing prompt")?;
    let height = fields
        .optional_dimension("height")?
        .unwrap_or(config.default_height);
    let width = fields
        .optional_dimension("width")?
        .unwrap_or(config.default_width);

    let form = Form::new()
        .text("prompt", prompt.trim().to_string())
        .text("height", height.to_string())
        .text("width", width.to_string());

    let control_image = if fields.flag("useControlImage") {
        fields.file("controlImage")
    } else {
        None
    };

    match control_image {
        Some(image) => {
            require_image(image, "controlImage")?;
            tracing::debug!(bytes = image.len(), "Generating image from control image");
            Ok(form
                .text("mode", "image-to-image")
                .part("image", file_part(image, "control.png")?)
                .text("model", config.model.clone())
                .text("output_format", "png")
                .text("strength", config.image_strength.to_string()))
        }
        None => Ok(form
            .text("negative_prompt", "")
            .text("model", config.model.clone())),
    }
}

fn to_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}
