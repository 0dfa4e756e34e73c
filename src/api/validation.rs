//! Inbound request validation.
//!
//! Everything here runs before any upstream I/O. A failed check is always an
//! [`AppError::BadRequest`], which the routes surface as a 400.

use crate::core::{AppError, Result};
use axum::extract::multipart::{Field, Multipart, MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::Json;
use bytes::{Bytes, BytesMut};
use serde_json::Value;
use std::collections::HashMap;

const MIB: usize = 1024 * 1024;

/// Unwrap a JSON body, turning extractor rejections into 400s with our envelope.
pub fn json_body(payload: std::result::Result<Json<Value>, JsonRejection>) -> Result<Value> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::bad_request(format!("Invalid JSON body: {}", rejection.body_text())))
}

/// Unwrap a multipart extractor, turning rejections into 400s.
pub fn multipart_body(
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Multipart> {
    multipart.map_err(|rejection| {
        AppError::bad_request(format!("Invalid multipart form data: {}", rejection.body_text()))
    })
}

/// A required JSON string field, present and non-blank.
pub fn require_string(payload: &Value, field: &str, message: &str) -> Result<String> {
    match payload.get(field).and_then(Value::as_str) {
        Some(value) if !value.trim().is_empty() => Ok(value.to_string()),
        _ => Err(AppError::bad_request(message)),
    }
}

/// A required JSON array field.
pub fn require_array(payload: &Value, field: &str, message: &str) -> Result<Vec<Value>> {
    match payload.get(field) {
        Some(Value::Array(items)) => Ok(items.clone()),
        _ => Err(AppError::bad_request(message)),
    }
}

/// One uploaded file part.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl FilePart {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// File name to forward upstream.
    pub fn upload_name(&self, fallback: &str) -> String {
        self.file_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(fallback)
            .to_string()
    }
}

/// Text fields and file parts collected from a multipart form.
#[derive(Debug, Default)]
pub struct FormFields {
    texts: HashMap<String, String>,
    files: HashMap<String, FilePart>,
}

impl FormFields {
    /// Text value of a field, if present.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.texts.get(name).map(String::as_str)
    }

    /// A required, non-blank text field.
    pub fn require_text(&self, name: &str, message: &str) -> Result<String> {
        match self.text(name) {
            Some(value) if !value.trim().is_empty() => Ok(value.to_string()),
            _ => Err(AppError::bad_request(message)),
        }
    }

    /// An optional positive integer field; blank counts as absent.
    pub fn optional_dimension(&self, name: &str) -> Result<Option<u32>> {
        match self.text(name).map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => match raw.parse::<u32>() {
                Ok(value) if value > 0 => Ok(Some(value)),
                _ => Err(AppError::bad_request(format!(
                    "Invalid {}: expected a positive integer",
                    name
                ))),
            },
        }
    }

    /// A non-empty file part, if one was sent.
    pub fn file(&self, name: &str) -> Option<&FilePart> {
        self.files.get(name).filter(|part| !part.is_empty())
    }

    /// A required file part.
    pub fn require_file(&self, name: &str, message: &str) -> Result<&FilePart> {
        match self.files.get(name) {
            None => Err(AppError::bad_request(message)),
            Some(part) if part.is_empty() => Err(AppError::bad_request(format!(
                "Uploaded {} file is empty",
                name
            ))),
            Some(part) => Ok(part),
        }
    }

    /// Text field used as a flag; only the literal `"true"` enables it.
    pub fn flag(&self, name: &str) -> bool {
        self.text(name) == Some("true")
    }
}

/// Reject anything whose declared MIME type is not `image/*`.
pub fn require_image(part: &FilePart, field: &str) -> Result<()> {
    match part.content_type.as_deref() {
        Some(content_type) if content_type.to_ascii_lowercase().starts_with("image/") => Ok(()),
        Some(content_type) => Err(AppError::bad_request(format!(
            "Invalid file type for {}: expected image/*, got {}",
            field, content_type
        ))),
        None => Err(AppError::bad_request(format!(
            "Invalid file type for {}: expected image/*",
            field
        ))),
    }
}

/// Drain a multipart form.
///
/// Fields sent with a file name or a non-text content type are collected as files and
/// read chunk by chunk; the read stops with a 400 as soon as a file grows past
/// `max_file_bytes`, so oversize uploads are never fully buffered.
pub async fn read_form(multipart: &mut Multipart, max_file_bytes: usize) -> Result<FormFields> {
    let mut form = FormFields::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if is_file_part(field.file_name(), field.content_type()) {
            let part = read_file_part(field, &name, max_file_bytes).await?;
            form.files.insert(name, part);
        } else {
            let value = field.text().await.map_err(multipart_error)?;
            form.texts.insert(name, value);
        }
    }

    Ok(form)
}

/// Browsers may label plain fields `text/plain`; those stay text fields.
fn is_file_part(file_name: Option<&str>, content_type: Option<&str>) -> bool {
    file_name.is_some() || content_type.is_some_and(|ct| !ct.starts_with("text/"))
}

async fn read_file_part(mut field: Field<'_>, name: &str, max_file_bytes: usize) -> Result<FilePart> {
    let file_name = field.file_name().map(str::to_string);
    let content_type = field.content_type().map(str::to_string);

    let mut buffer = BytesMut::new();
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        if buffer.len() + chunk.len() > max_file_bytes {
            return Err(AppError::bad_request(format!(
                "File {} exceeds the maximum upload size of {}",
                name,
                describe_limit(max_file_bytes)
            )));
        }
        buffer.extend_from_slice(&chunk);
    }

    Ok(FilePart {
        file_name,
        content_type,
        bytes: buffer.freeze(),
    })
}

fn multipart_error(err: MultipartError) -> AppError {
    AppError::bad_request(format!("Invalid multipart form data: {}", err.body_text()))
}

fn describe_limit(bytes: usize) -> String {
    if bytes >= MIB && bytes % MIB == 0 {
        format!("{} MiB", bytes / MIB)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn form(texts: &[(&str, &str)], files: Vec<(&str, FilePart)>) -> FormFields {
        FormFields {
            texts: texts
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            files: files
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }

    fn png(bytes: &'static [u8]) -> FilePart {
        FilePart {
            file_name: Some("sketch.png".to_string()),
            content_type: Some("image/png".to_string()),
            bytes: Bytes::from_static(bytes),
        }
    }

    #[test]
    fn test_require_string() {
        let payload = json!({"imageDataUrl": "data:image/png;base64,AA==", "blank": "  ", "num": 3});
        assert!(require_string(&payload, "imageDataUrl", "Missing imageDataUrl").is_ok());

        for field in ["blank", "num", "absent"] {
            let err = require_string(&payload, field, "Missing imageDataUrl").unwrap_err();
            assert!(matches!(err, AppError::BadRequest(ref m) if m == "Missing imageDataUrl"));
        }
    }

    #[test]
    fn test_require_array() {
        let payload = json!({"messages": [{"role": "user", "content": "hi"}], "text": "hi"});
        assert_eq!(
            require_array(&payload, "messages", "Missing or invalid messages")
                .unwrap()
                .len(),
            1
        );
        assert!(require_array(&payload, "text", "Missing or invalid messages").is_err());
        assert!(require_array(&json!({}), "messages", "Missing or invalid messages").is_err());
        assert!(require_array(&json!({"messages": null}), "messages", "x").is_err());
    }

    #[test]
    fn test_require_image_checks_mime_prefix() {
        assert!(require_image(&png(b"\x89PNG"), "image").is_ok());

        let mut pdf = png(b"%PDF");
        pdf.content_type = Some("application/pdf".to_string());
        let err = require_image(&pdf, "image").unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("application/pdf"));

        pdf.content_type = None;
        assert!(require_image(&pdf, "image").is_err());
    }

    #[test]
    fn test_require_file() {
        let fields = form(&[("image", "not a file")], vec![("controlImage", png(b""))]);
        assert!(matches!(
            fields.require_file("image", "Missing image file"),
            Err(AppError::BadRequest(ref m)) if m == "Missing image file"
        ));
        assert!(fields.require_file("controlImage", "Missing").is_err());
        assert!(fields.file("controlImage").is_none());
    }

    #[test]
    fn test_optional_dimension() {
        let fields = form(&[("height", "768"), ("width", ""), ("depth", "-3")], vec![]);
        assert_eq!(fields.optional_dimension("height").unwrap(), Some(768));
        assert_eq!(fields.optional_dimension("width").unwrap(), None);
        assert_eq!(fields.optional_dimension("missing").unwrap(), None);
        assert!(fields.optional_dimension("depth").is_err());
    }

    #[test]
    fn test_flag_is_literal_true() {
        let fields = form(&[("a", "true"), ("b", "TRUE"), ("c", "1")], vec![]);
        assert!(fields.flag("a"));
        assert!(!fields.flag("b"));
        assert!(!fields.flag("c"));
        assert!(!fields.flag("d"));
    }

    #[test]
    fn test_describe_limit() {
        assert_eq!(describe_limit(32 * MIB), "32 MiB");
        assert_eq!(describe_limit(1000), "1000 bytes");
    }

    #[test]
    fn test_upload_name_fallback() {
        let mut part = png(b"x");
        assert_eq!(part.upload_name("image.png"), "sketch.png");
        part.file_name = Some(String::new());
        assert_eq!(part.upload_name("image.png"), "image.png");
    }

    #[test]
    fn test_text_content_type_stays_a_text_field() {
        assert!(!is_file_part(None, None));
        assert!(!is_file_part(None, Some("text/plain")));
        assert!(!is_file_part(None, Some("text/plain; charset=utf-8")));
        assert!(is_file_part(None, Some("image/png")));
        assert!(is_file_part(None, Some("application/octet-stream")));
        assert!(is_file_part(Some("notes.txt"), Some("text/plain")));
    }
}
