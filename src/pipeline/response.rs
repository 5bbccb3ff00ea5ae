use serde::Deserialize;
use serde_json::Value;

use crate::pipeline::error::JobError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseInlineData {
    #[serde(default, rename = "mimeType")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsePart {
    #[serde(default, rename = "inlineData")]
    pub inline_data: Option<ResponseInlineData>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<ResponseContent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateContentChunk {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

/// The streaming endpoint answers with an array of chunks, the unary one
/// with a bare object. Both are accepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum GenerationResponse {
    Stream(Vec<GenerateContentChunk>),
    Single(GenerateContentChunk),
}

impl GenerationResponse {
    pub fn from_value(value: &Value) -> Result<Self, JobError> {
        Self::deserialize(value).map_err(|e| {
            JobError::NoImageData(format!("unrecognized response shape: {e}"))
        })
    }

    pub fn primary(&self) -> Option<&GenerateContentChunk> {
        match self {
            Self::Stream(chunks) => chunks.first(),
            Self::Single(chunk) => Some(chunk),
        }
    }

    pub fn image_data(&self) -> Result<&str, JobError> {
        let chunk = self
            .primary()
            .ok_or_else(|| JobError::NoImageData(String::from("empty response stream")))?;
        let candidate = chunk
            .candidates
            .first()
            .ok_or_else(|| JobError::NoImageData(String::from("no candidates in response")))?;
        let parts = candidate
            .content
            .as_ref()
            .map(|c| c.parts.as_slice())
            .unwrap_or_default();
        if parts.is_empty() {
            return Err(JobError::NoImageData(String::from(
                "candidate has no content parts",
            )));
        }
        let inline = parts
            .iter()
            .find_map(|part| part.inline_data.as_ref())
            .ok_or_else(|| {
                JobError::NoImageData(String::from("no image data found in response parts"))
            })?;
        inline
            .data
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| JobError::NoImageData(String::from("inline image data is empty")))
    }
}

pub fn extract_image_data(response: &Value) -> Result<String, JobError> {
    GenerationResponse::from_value(response)?
        .image_data()
        .map(str::to_string)
}
