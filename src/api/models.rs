//! Request and response models.
//!
//! Outward success envelopes are one struct per integration so each response
//! carries exactly one success field. Upstream payloads are decoded through
//! the typed structs below; anything that fails to decode is a shape error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Outward envelopes
// ============================================================================

/// `{ "content": ... }` from the non-streaming completion route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentResponse {
    pub content: String,
}

/// `{ "description": ... }` from the image description route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DescriptionResponse {
    pub description: String,
}

/// `{ "url": ... }` from the image hosting route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UrlResponse {
    pub url: String,
}

/// `{ "imageDataUrl": ... }` from the image generation route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageDataUrlResponse {
    pub image_data_url: String,
}

// ============================================================================
// OpenAI chat completions
// ============================================================================

/// Outbound chat completion request body.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
}

impl ChatCompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Value>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: None,
            temperature: None,
            max_tokens: None,
            n: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionResponse {
    /// Content of the first choice, if the upstream produced one.
    pub fn first_content(self) -> Option<String> {
        self.choices.into_iter().next()?.message.content
    }
}

/// One `chat.completion.chunk` event of a streamed completion.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: Delta,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
}

// ============================================================================
// ImgBB
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ImgbbUploadResponse {
    pub data: ImgbbImage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImgbbImage {
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_image_data_url_response_is_camel_case() {
        let body = serde_json::to_value(ImageDataUrlResponse {
            image_data_url: "data:image/png;base64,AA==".to_string(),
        })
        .unwrap();
        assert_eq!(body, json!({"imageDataUrl": "data:image/png;base64,AA=="}));
    }

    #[test]
    fn test_chat_request_skips_unset_options() {
        let request = ChatCompletionRequest::new("gpt-4o-mini", vec![json!({"role": "user", "content": "hi"})]);
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "gpt-4o-mini",
                "messages": [{"role": "user", "content": "hi"}]
            })
        );
    }

    #[test]
    fn test_first_content() {
        let response: ChatCompletionResponse = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": "Hello"}}]
        }))
        .unwrap();
        assert_eq!(response.first_content(), Some("Hello".to_string()));

        let empty: ChatCompletionResponse =
            serde_json::from_value(json!({"choices": []})).unwrap();
        assert_eq!(empty.first_content(), None);
    }

    #[test]
    fn test_imgbb_missing_url_fails_to_decode() {
        let result = serde_json::from_value::<ImgbbUploadResponse>(json!({"data": {}}));
        assert!(result.is_err());
    }

    #[test]
    fn test_stream_chunk_tolerates_role_only_delta() {
        let chunk: StreamChunk = serde_json::from_value(json!({
            "choices": [{"index": 0, "delta": {"role": "assistant"}, "finish_reason": null}]
        }))
        .unwrap();
        assert!(chunk.choices[0].delta.content.is_none());
    }
}
