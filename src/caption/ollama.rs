//! Ollama-backed captioner.
//!
//! Requires the `ollama` feature. Both steps use the `/api/chat` endpoint:
//!
//! ```text
//! image bytes ─base64─▶ vision model ─▶ description
//! description ─▶ caption model (JSON schema format) ─▶ {"captions": [7 strings]}
//! ```
//!
//! The caption request constrains the model with a JSON schema, but the
//! returned count is still re-checked by
//! [`validate_captions`](super::validate_captions) downstream.

use std::path::Path;
use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};
use ureq::Agent;

use super::{is_image_path, Captioner, CAPTIONS_PER_IMAGE};
use crate::error::{PixseekError, Result};

const VISION_SYSTEM_PROMPT: &str = "\
You are an expert visual analyst producing detailed, accurate descriptions of images \
for a search index.\n\n\
1. Detailed summary: describe everything visible as a list of points: objects, people, \
scenes, activities, colors, positions and relationships. Use at least 100 words.\n\
2. Text extraction: if text appears in the image, add a section exactly as \
`Text: // extracted text here //`. If there is no text, write `Text: // none //`.\n\
3. Factual tone: describe only what is visually identifiable. Do not invent.\n\
4. The output is used for visual search, so favour concrete, distinguishing detail.";

const VISION_USER_PROMPT: &str = "Describe the given image in full detail";

const CAPTION_SYSTEM_PROMPT: &str = "\
You generate seven semantically distinct captions for a vector search database from a \
detailed image description. The captions cover different levels of generality:\n\
1. Broad concept: a short, high-level caption of the main idea or scene.\n\
2. Broad activity: a short caption of the primary action or context.\n\
3. Specific entity: the key subject with identifying traits, at least 50 words.\n\
4. Spatial layout: positions, arrangement and physical relationships in the scene.\n\
5. Integrated summary: one fluent sentence combining subject, action and context, \
at least 50 words.\n\
6. A very short phrase a user would likely search for.\n\
7. Another, different very short phrase a user would likely search for.\n\
Return the seven captions without numbering.";

/// Upper bound for a single model round-trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct CaptionList {
    captions: Vec<String>,
}

/// Captioner backed by a local Ollama server.
pub struct OllamaCaptioner {
    agent: Agent,
    chat_url: String,
    vision_model: String,
    caption_model: String,
}

impl std::fmt::Debug for OllamaCaptioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaCaptioner")
            .field("chat_url", &self.chat_url)
            .field("vision_model", &self.vision_model)
            .field("caption_model", &self.caption_model)
            .finish_non_exhaustive()
    }
}

impl OllamaCaptioner {
    /// Creates a captioner for the server at `url`.
    pub fn new(url: &str, vision_model: &str, caption_model: &str) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build()
            .into();

        Self {
            agent,
            chat_url: format!("{}/api/chat", url.trim_end_matches('/')),
            vision_model: vision_model.to_string(),
            caption_model: caption_model.to_string(),
        }
    }

    fn chat(&self, request: &ChatRequest<'_>) -> std::result::Result<String, String> {
        let mut response = self
            .agent
            .post(&self.chat_url)
            .send_json(request)
            .map_err(|e| format!("request to {} failed: {e}", self.chat_url))?;

        let parsed: ChatResponse = response
            .body_mut()
            .read_json()
            .map_err(|e| format!("unreadable response from {}: {e}", self.chat_url))?;

        Ok(parsed.message.content)
    }
}

/// JSON schema pinning the caption response to exactly seven strings.
fn caption_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "captions": {
                "type": "array",
                "items": { "type": "string" },
                "minItems": CAPTIONS_PER_IMAGE,
                "maxItems": CAPTIONS_PER_IMAGE
            }
        },
        "required": ["captions"]
    })
}

impl Captioner for OllamaCaptioner {
    #[instrument(skip(self), fields(image = %image.display()))]
    fn describe(&self, image: &Path) -> Result<String> {
        if !is_image_path(image) {
            return Err(PixseekError::analysis(image, "not an image file"));
        }

        let bytes = std::fs::read(image)
            .map_err(|e| PixseekError::analysis(image, format!("cannot read file: {e}")))?;
        if bytes.is_empty() {
            return Err(PixseekError::analysis(image, "file is empty"));
        }

        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        let request = ChatRequest {
            model: &self.vision_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: VISION_SYSTEM_PROMPT,
                    images: Vec::new(),
                },
                ChatMessage {
                    role: "user",
                    content: VISION_USER_PROMPT,
                    images: vec![encoded],
                },
            ],
            stream: false,
            format: None,
        };

        let description = self
            .chat(&request)
            .map_err(|reason| PixseekError::analysis(image, reason))?;

        if description.trim().is_empty() {
            return Err(PixseekError::analysis(image, "model returned an empty description"));
        }

        debug!(chars = description.len(), "Image described");
        Ok(description)
    }

    #[instrument(skip(self, description), fields(chars = description.len()))]
    fn caption(&self, description: &str) -> Result<Vec<String>> {
        let user = format!("Here is the description of the image:\n{description}");
        let request = ChatRequest {
            model: &self.caption_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: CAPTION_SYSTEM_PROMPT,
                    images: Vec::new(),
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                    images: Vec::new(),
                },
            ],
            stream: false,
            format: Some(caption_schema()),
        };

        let content = self
            .chat(&request)
            .map_err(PixseekError::structured_output)?;

        let list: CaptionList = serde_json::from_str(&content).map_err(|e| {
            PixseekError::structured_output(format!("caption response is not a caption list: {e}"))
        })?;

        Ok(list.captions)
    }
}
