//! Request/response domain types
//!
//! `Content`/`Part` mirror the API's wire shape (camelCase JSON) and are
//! reused verbatim in requests and responses. The remaining types are
//! call-site conveniences that never cross the wire directly.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

pub const ROLE_USER: &str = "user";
pub const ROLE_MODEL: &str = "model";

/// Binary payload embedded in a part (base64 on the wire).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

/// One piece of a content turn: text, inline bytes, or both absent
/// (the API emits parts we do not model; they deserialize empty).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    /// Image bytes as an inline part.
    pub fn image(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: mime_type.into(),
                data: BASE64.encode(bytes),
            }),
        }
    }
}

/// One conversational turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: ROLE_USER.to_owned(),
            parts,
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::user(vec![Part::text(text)])
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self {
            role: ROLE_MODEL.to_owned(),
            parts: vec![Part::text(text)],
        }
    }
}

/// Per-call generation options.
#[derive(Debug, Clone, Default)]
pub struct GenerateConfig {
    /// System prompt prepended server-side, outside the turn history.
    pub system_instruction: Option<String>,
    /// Ask for image output alongside text (image-capable models only).
    pub image_output: bool,
}

/// Final result of a single-shot call.
#[derive(Debug, Clone, Default)]
pub struct GenerateOutput {
    /// Concatenated text parts of the first candidate.
    pub text: String,
    /// Decoded bytes of the first inline-data part, if any.
    pub image: Option<Vec<u8>>,
}

/// One incremental piece of a streamed reply.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub text: String,
}
