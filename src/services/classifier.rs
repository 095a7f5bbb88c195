//! Turns a task payload into a model request and the model's reply into a
//! [`ClassificationResult`].
//!
//! The dietary rules themselves live in the system instructions and are
//! applied by the model. This adapter only normalizes the image input and
//! recovers structured output from free-form text.

use base64::Engine;
use std::sync::Arc;

use crate::models::classification::ClassificationResult;
use crate::models::task::{ImageReference, TaskPayload};
use crate::services::vision::{MessagePart, ModelRequest, NormalizedImage, VisionModel};

/// Media type assumed for base64 input without a data-URL prefix.
pub const DEFAULT_MEDIA_TYPE: &str = "image/jpeg";

const USER_INSTRUCTION: &str = "Analyze the food in this image. Identify the dish and its likely \
ingredients, then decide compliance with each dietary standard in your instructions. \
Reply with a single JSON object only.";

pub struct ClassificationAdapter {
    model: Arc<dyn VisionModel>,
    system_prompt: Arc<str>,
}

impl ClassificationAdapter {
    pub fn new(model: Arc<dyn VisionModel>, system_prompt: Arc<str>) -> Self {
        Self {
            model,
            system_prompt,
        }
    }

    /// Build the single user turn: instruction, image, then optional hints.
    pub fn build_request(&self, payload: &TaskPayload) -> Result<ModelRequest, AdapterError> {
        let mut parts = vec![
            MessagePart::Text(USER_INSTRUCTION.to_string()),
            MessagePart::Image(normalize_image(&payload.image)?),
        ];
        if let Some(hints) = hint_text(payload) {
            parts.push(MessagePart::Text(hints));
        }

        Ok(ModelRequest {
            system: Arc::clone(&self.system_prompt),
            parts,
        })
    }

    pub async fn classify(&self, payload: &TaskPayload) -> Result<ClassificationResult, AdapterError> {
        let request = self.build_request(payload)?;

        let start = std::time::Instant::now();
        let raw = self.model.complete(&request).await?;
        tracing::debug!(
            model_duration_ms = start.elapsed().as_millis() as u64,
            reply_len = raw.len(),
            "Model replied"
        );

        parse_model_output(&raw)
    }
}

fn hint_text(payload: &TaskPayload) -> Option<String> {
    let mut lines = Vec::new();
    if let Some(name) = payload.food_name.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        lines.push(format!("Food name: {name}"));
    }
    if let Some(list) = payload.ingredients.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        lines.push(format!("Ingredients: {list}"));
    }
    (!lines.is_empty()).then(|| lines.join("\n"))
}

pub fn normalize_image(image: &ImageReference) -> Result<NormalizedImage, AdapterError> {
    match image {
        ImageReference::Bytes { data, media_type } => Ok(NormalizedImage::Inline {
            media_type: media_type.clone(),
            data: data.clone(),
        }),
        ImageReference::Url { url } => Ok(NormalizedImage::Url(url.clone())),
        ImageReference::Base64 { data } => {
            let (media_type, data) = decode_base64_image(data)?;
            Ok(NormalizedImage::Inline { media_type, data })
        }
    }
}

/// Decode base64 image text, honouring an optional `data:<media>;base64,` prefix.
pub fn decode_base64_image(input: &str) -> Result<(String, Vec<u8>), AdapterError> {
    let input = input.trim();

    let (media_type, encoded) = match input.strip_prefix("data:") {
        Some(rest) => {
            let (header, encoded) = rest
                .split_once(',')
                .ok_or_else(|| AdapterError::InvalidImage("data URL has no ',' separator".to_string()))?;
            let mut params = header.split(';');
            let media_type = params.next().unwrap_or_default().trim();
            if !params.any(|p| p.trim().eq_ignore_ascii_case("base64")) {
                return Err(AdapterError::InvalidImage(
                    "data URL is not base64 encoded".to_string(),
                ));
            }
            let media_type = if media_type.is_empty() {
                DEFAULT_MEDIA_TYPE
            } else {
                media_type
            };
            (media_type.to_string(), encoded)
        }
        None => (DEFAULT_MEDIA_TYPE.to_string(), input),
    };

    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let data = base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| AdapterError::InvalidImage(format!("invalid base64 image data: {e}")))?;
    if data.is_empty() {
        return Err(AdapterError::InvalidImage("empty image data".to_string()));
    }
    Ok((media_type, data))
}

/// Remove a surrounding Markdown code fence (with optional language tag).
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Outermost `{...}` span, for replies with prose around the JSON.
fn outer_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

pub fn parse_model_output(raw: &str) -> Result<ClassificationResult, AdapterError> {
    let malformed = |reason: String| AdapterError::MalformedOutput {
        reason,
        raw: raw.to_string(),
    };

    let cleaned = strip_code_fences(raw);
    let parsed = serde_json::from_str::<ClassificationResult>(cleaned).or_else(|first| {
        match outer_object(cleaned) {
            Some(object) if object != cleaned => serde_json::from_str(object).map_err(|_| first),
            _ => Err(first),
        }
    });

    parsed.map_err(|e| malformed(e.to_string()))
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    #[error("Model call failed: {0}")]
    CallFailed(String),

    #[error("Malformed model output ({reason}); raw output: {raw}")]
    MalformedOutput { reason: String, raw: String },

    #[error("Invalid image: {0}")]
    InvalidImage(String),
}

impl AdapterError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AdapterError::CallFailed(_) | AdapterError::MalformedOutput { .. } => true,
            AdapterError::InvalidImage(_) => false,
        }
    }
}
