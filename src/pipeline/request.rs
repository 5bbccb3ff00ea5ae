use std::fmt;
use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::Serialize;
use tracing::warn;

use crate::pipeline::error::JobError;
use crate::pipeline::persist::detect_format;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageSize {
    Px512,
    #[default]
    OneK,
    TwoK,
}

impl ImageSize {
    pub const ALL: [Self; 3] = [Self::Px512, Self::OneK, Self::TwoK];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Px512 => "512",
            Self::OneK => "1K",
            Self::TwoK => "2K",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL.into_iter().find(|size| size.as_str() == raw)
    }

    /// Invalid values are never sent upstream; they fall back to the default.
    pub fn parse_or_default(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_else(|| {
            warn!(
                requested = raw,
                fallback = Self::default().as_str(),
                "invalid image size, using default"
            );
            Self::default()
        })
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    pub data: String,
    pub mime_type: String,
}

impl ReferenceImage {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: BASE64_STANDARD.encode(bytes),
            mime_type: detect_format(bytes).mime_type().to_string(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, JobError> {
        if !path.is_file() {
            return Err(JobError::InputNotFound {
                path: path.to_path_buf(),
            });
        }
        let bytes = fs::read(path).map_err(|e| JobError::InputUnreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Self::from_bytes(bytes.as_slice()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RequestPart {
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Text {
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestContent {
    pub role: String,
    pub parts: Vec<RequestPart>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageConfig {
    pub image_size: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub image_config: ImageConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub contents: Vec<RequestContent>,
    pub generation_config: GenerationConfig,
}

impl GenerationRequest {
    pub fn parts(&self) -> &[RequestPart] {
        self.contents
            .first()
            .map(|c| c.parts.as_slice())
            .unwrap_or_default()
    }
}

/// Reference images go first, in input order, followed by the single text
/// part.
pub fn build_generation_request(
    prompt: &str,
    size: ImageSize,
    input_images: &[ReferenceImage],
) -> GenerationRequest {
    let mut parts = input_images
        .iter()
        .map(|image| RequestPart::InlineData {
            inline_data: InlineData {
                mime_type: image.mime_type.clone(),
                data: image.data.clone(),
            },
        })
        .collect::<Vec<_>>();
    parts.push(RequestPart::Text {
        text: prompt.to_string(),
    });

    GenerationRequest {
        contents: vec![RequestContent {
            role: String::from("user"),
            parts,
        }],
        generation_config: GenerationConfig {
            response_modalities: vec![String::from("IMAGE"), String::from("TEXT")],
            image_config: ImageConfig {
                image_size: size.as_str().to_string(),
            },
        },
    }
}

pub fn load_reference_images<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<ReferenceImage>, JobError> {
    paths
        .iter()
        .map(|path| ReferenceImage::load(path.as_ref()))
        .collect()
}
