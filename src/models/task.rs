use serde::{Deserialize, Serialize};

/// Where the food image for a task comes from.
///
/// Exactly one variant is stored per task. When a client supplies several
/// sources the gateway keeps the first of bytes, URL, base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageReference {
    /// Uploaded file contents.
    Bytes {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
        media_type: String,
    },
    /// Publicly reachable image URL, passed through to the model.
    Url { url: String },
    /// Base64 text, optionally carrying a `data:<media>;base64,` prefix.
    Base64 { data: String },
}

impl ImageReference {
    pub fn kind(&self) -> &'static str {
        match self {
            ImageReference::Bytes { .. } => "bytes",
            ImageReference::Url { .. } => "url",
            ImageReference::Base64 { .. } => "base64",
        }
    }
}

/// Payload persisted with every job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub image: ImageReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub food_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingredients: Option<String>,
}

impl TaskPayload {
    pub fn new(image: ImageReference) -> Self {
        Self {
            image,
            food_name: None,
            ingredients: None,
        }
    }

    pub fn with_food_name(mut self, food_name: impl Into<String>) -> Self {
        self.food_name = Some(food_name.into());
        self
    }

    pub fn with_ingredients(mut self, ingredients: impl Into<String>) -> Self {
        self.ingredients = Some(ingredients.into());
        self
    }
}

/// Raw bytes travel through the broker as standard base64 text.
mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
