use serde::{Deserialize, Serialize};

/// --- OPENAI-COMPATIBLE CHAT SCHEMA ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiRequest {
    pub model: String,
    pub messages: Vec<OpenAiMessage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum OpenAiMessage {
    System { content: String },
    User { content: OpenAiContent },
    Assistant { content: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpenAiContent {
    String(String),
    Parts(Vec<OpenAiContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpenAiContentPart {
    Text { text: String },
    ImageUrl { image_url: OpenAiImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiImageUrl {
    pub url: String,
}

/// Non-streaming completion body.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiCompletion {
    #[serde(default)]
    pub choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiChoice {
    pub message: OpenAiResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl OpenAiCompletion {
    pub fn first_text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
    }
}

/// --- STREAMING CHUNKS ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChoice {
    pub delta: StreamDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ProviderError {
    pub error: ProviderErrorDetails,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ProviderErrorDetails {
    pub message: String,
    #[serde(default)]
    pub code: Option<serde_json::Value>,
}

#[derive(Debug)]
pub enum LineEvent {
    Chunk(StreamChunk),
    Error(ProviderError),
    Unknown(String),
}

pub fn parse_stream_line(data: &str) -> LineEvent {
    // Error first: it is the more specific shape (requires an "error" key)
    if let Ok(err) = serde_json::from_str::<ProviderError>(data) {
        return LineEvent::Error(err);
    }
    if let Ok(chunk) = serde_json::from_str::<StreamChunk>(data) {
        if !chunk.choices.is_empty() {
            return LineEvent::Chunk(chunk);
        }
    }
    LineEvent::Unknown(data.to_string())
}

/// --- IMAGE GENERATION ---

#[derive(Debug, Clone, Serialize)]
pub struct ImageGenerationRequest {
    pub model: String,
    pub prompt: String,
    pub n: u32,
    pub size: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageGenerationResponse {
    #[serde(default)]
    pub data: Vec<GeneratedImage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedImage {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub b64_json: Option<String>,
    #[serde(default)]
    pub revised_prompt: Option<String>,
}

impl GeneratedImage {
    /// A displayable URL: the hosted URL, or an inline PNG data URL.
    pub fn display_url(&self) -> Option<String> {
        match (&self.url, &self.b64_json) {
            (Some(url), _) if !url.is_empty() => Some(url.clone()),
            (_, Some(b64)) if !b64.is_empty() => Some(format!("data:image/png;base64,{}", b64)),
            _ => None,
        }
    }
}
