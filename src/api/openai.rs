//! OpenAI chat completion routes.
//!
//! Two streaming chat routes that differ only in the system instruction they
//! prepend, one buffered completion route and one vision route that
//! describes an image.

use crate::api::handlers::AppState;
use crate::api::models::{
    ChatCompletionRequest, ChatCompletionResponse, ContentResponse, DescriptionResponse,
};
use crate::api::streaming::{relay_response, spawn_relay, RelayOptions};
use crate::api::upstream::{
    decode_json, invoke, require_credential, shape_error, upstream_timeout, Provider,
    UpstreamAuth, UpstreamBody, UpstreamCall,
};
use crate::api::validation::{json_body, require_array, require_string};
use crate::core::logging::get_request_id;
use crate::core::Result;
use axum::{
    extract::{rejection::JsonRejection, State},
    response::Response,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Instruction for the sketch analysis chat.
pub const SKETCH_ANALYSIS_PROMPT: &str = "You are an assistant helping a user with the text-to-image task. The user will upload a hand-sketched image. You are supposed to generate the following contents. Put a line break between each kind of contents:\n1, The detailed description of the uploaded image. Put it between labels <description> and </description>.\n2, Your feelings about the sketch. You should adjust it based on the following user feedback. You are encouraged to provide detailed and artistic feelings. Put it between labels <feeling> and </feeling>.\n3, Three or more suggestions about how to write the text-to-image prompt. Put each suggestion between labels <suggestion> and </suggestion>.\n4, The recommended prompt for Stable Diffusion based on the sketch and user feedback. Put it between labels <prompt> and </prompt>.";

/// Instruction for the prompt refinement chat.
pub const PROMPT_REFINEMENT_PROMPT: &str = "You are the assistant who help the user refine their descriptions about the image they want to generate and give suggestions for proper prompt. Give at least three suggestion (or more if necessary) and put each of them between labels <suggestion> and </suggestion>. Put the suggested prompt between label <prompt> and </prompt>.";

/// Instruction for the image description call.
pub const IMAGE_DESCRIPTION_PROMPT: &str = concat!(
    "You are the assistant to describe the user input image. Please respond the following information:\n",
    "1, A detailed description of the uploaded image. Put it between labels <description> and </description>.\n",
    "2, Bullet points about all objects and corresponding descriptions in the image. Keep each bullet point short. ",
    "Each point contains a different piece of information about the whole image from other points. ",
    "Put each bullet point between labels <bullet> and </bullet>.",
);

const MESSAGES_ERROR: &str = "Missing or invalid messages";

/// POST /api/openai/chat
pub async fn sketch_chat(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Response> {
    stream_chat(&state, payload, SKETCH_ANALYSIS_PROMPT).await
}

/// POST /api/chat
pub async fn prompt_chat(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Response> {
    stream_chat(&state, payload, PROMPT_REFINEMENT_PROMPT).await
}

async fn stream_chat(
    state: &AppState,
    payload: std::result::Result<Json<Value>, JsonRejection>,
    system_prompt: &str,
) -> Result<Response> {
    let payload = json_body(payload)?;
    let messages = require_array(&payload, "messages", MESSAGES_ERROR)?;
    let key = require_credential(state.config.openai.api_key.as_ref(), Provider::OpenAi)?;

    let mut request =
        ChatCompletionRequest::new(&state.config.openai.model, with_system_prompt(system_prompt, messages));
    request.stream = Some(true);

    // The call itself has no total timeout, so bound the wait for headers here
    let idle_timeout = Duration::from_secs(state.config.stream_idle_timeout_secs);
    let call = invoke(
        &state.http_client,
        UpstreamCall {
            provider: Provider::OpenAi,
            url: chat_completions_url(state),
            auth: UpstreamAuth::Bearer(key),
            body: UpstreamBody::json(&request)?,
            accept: Some("text/event-stream"),
            timeout: None,
            failure_message: "Failed to stream chat from OpenAI",
        },
    );
    let response = tokio::time::timeout(idle_timeout, call)
        .await
        .map_err(|_| upstream_timeout(Provider::OpenAi, idle_timeout))??;

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !content_type.starts_with("text/event-stream") {
        return Err(shape_error(
            Provider::OpenAi,
            format!("expected an event stream, got content type '{}'", content_type),
        ));
    }

    let mut options = RelayOptions::new(Provider::OpenAi);
    options.idle_timeout = Some(idle_timeout);
    options.request_id = get_request_id();

    let relay = spawn_relay(response.bytes_stream(), options);
    Ok(relay_response(relay.fragments, state.config.chat_stream_format))
}

/// POST /api/openai/completion
pub async fn completion(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<ContentResponse>> {
    let payload = json_body(payload)?;
    let messages = require_array(&payload, "messages", MESSAGES_ERROR)?;
    let key = require_credential(state.config.openai.api_key.as_ref(), Provider::OpenAi)?;

    let request = ChatCompletionRequest::new(&state.config.openai.model, messages);
    let response = invoke(
        &state.http_client,
        UpstreamCall {
            provider: Provider::OpenAi,
            url: chat_completions_url(&state),
            auth: UpstreamAuth::Bearer(key),
            body: UpstreamBody::json(&request)?,
            accept: None,
            timeout: Some(state.request_timeout()),
            failure_message: "Failed to fetch completion from OpenAI",
        },
    )
    .await?;

    let content = first_message_content(response).await?;
    Ok(Json(ContentResponse { content }))
}

/// POST /api/openai/describe
pub async fn describe(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<DescriptionResponse>> {
    let payload = json_body(payload)?;
    let image_data_url = require_string(&payload, "imageDataUrl", "Missing imageDataUrl")?;
    let key = require_credential(state.config.openai.api_key.as_ref(), Provider::OpenAi)?;

    let messages = vec![
        json!({ "role": "system", "content": IMAGE_DESCRIPTION_PROMPT }),
        json!({
            "role": "user",
            "content": [{
                "type": "image_url",
                "image_url": { "url": image_data_url }
            }]
        }),
    ];
    let mut request = ChatCompletionRequest::new(&state.config.openai.model, messages);
    request.temperature = Some(0.7);
    request.max_tokens = Some(200);
    request.n = Some(1);

    let response = invoke(
        &state.http_client,
        UpstreamCall {
            provider: Provider::OpenAi,
            url: chat_completions_url(&state),
            auth: UpstreamAuth::Bearer(key),
            body: UpstreamBody::json(&request)?,
            accept: None,
            timeout: Some(state.request_timeout()),
            failure_message: "Failed to fetch description from OpenAI",
        },
    )
    .await?;

    let description = first_message_content(response).await?.trim().to_string();
    Ok(Json(DescriptionResponse { description }))
}

fn chat_completions_url(state: &AppState) -> String {
    format!(
        "{}/chat/completions",
        state.config.openai.api_base.trim_end_matches('/')
    )
}

fn with_system_prompt(system_prompt: &str, messages: Vec<Value>) -> Vec<Value> {
    let mut all = Vec::with_capacity(messages.len() + 1);
    all.push(json!({ "role": "system", "content": system_prompt }));
    all.extend(messages);
    all
}

async fn first_message_content(response: reqwest::Response) -> Result<String> {
    let completion: ChatCompletionResponse = decode_json(response, Provider::OpenAi).await?;
    completion
        .first_content()
        .ok_or_else(|| shape_error(Provider::OpenAi, "missing choices[0].message.content"))
}
