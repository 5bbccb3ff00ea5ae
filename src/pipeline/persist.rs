use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, warn};

use crate::pipeline::error::JobError;

pub const UNIQUE_ID_LENGTH: usize = 4;
const UNIQUE_ID_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const GIF87A_MAGIC: &[u8] = b"GIF87a";
const GIF89A_MAGIC: &[u8] = b"GIF89a";
const RIFF_MAGIC: &[u8] = b"RIFF";
const WEBP_MAGIC: &[u8] = b"WEBP";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SniffedFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl SniffedFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Webp => "webp",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
        }
    }
}

/// Identifies the image format from its leading bytes. Unknown payloads are
/// treated as JPEG, which is what the generation API falls back to.
pub fn detect_format(bytes: &[u8]) -> SniffedFormat {
    if bytes.starts_with(JPEG_MAGIC) {
        return SniffedFormat::Jpeg;
    }
    if bytes.starts_with(PNG_MAGIC) {
        return SniffedFormat::Png;
    }
    if bytes.starts_with(GIF87A_MAGIC) || bytes.starts_with(GIF89A_MAGIC) {
        return SniffedFormat::Gif;
    }
    if bytes.starts_with(RIFF_MAGIC) && bytes.get(8..12) == Some(WEBP_MAGIC) {
        return SniffedFormat::Webp;
    }
    SniffedFormat::Jpeg
}

pub fn generate_unique_id() -> String {
    let mut rng = rand::rng();
    (0..UNIQUE_ID_LENGTH)
        .map(|_| char::from(UNIQUE_ID_CHARS[rng.random_range(0..UNIQUE_ID_CHARS.len())]))
        .collect()
}

/// `home.jpg` -> `home_a3xz.jpg`. The suffix is not checked against files
/// already on disk.
pub fn apply_unique_naming(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|v| v.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{}.{}", generate_unique_id(), ext.to_string_lossy()),
        None => format!("{stem}_{}", generate_unique_id()),
    };
    path.with_file_name(name)
}

fn normalized_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|v| v.to_str())
        .map(str::to_ascii_lowercase)
        .map(|ext| if ext == "jpeg" { String::from("jpg") } else { ext })
}

/// Replaces the extension when it disagrees with the sniffed format.
/// Returns the path to use and whether it changed.
pub fn correct_extension(path: &Path, format: SniffedFormat) -> (PathBuf, bool) {
    let current = normalized_extension(path);
    if current.as_deref() == Some(format.extension()) {
        return (path.to_path_buf(), false);
    }
    if current.is_some() {
        warn!(
            path = %path.display(),
            detected = format.extension(),
            "changed extension to match image data"
        );
    }
    (path.with_extension(format.extension()), true)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedImage {
    pub path: PathBuf,
    pub format: SniffedFormat,
    pub size_bytes: u64,
}

pub fn persist_image(
    image_b64: &str,
    desired_path: &Path,
    apply_unique_suffix: bool,
) -> Result<PersistedImage, JobError> {
    let bytes = BASE64_STANDARD
        .decode(image_b64.trim().as_bytes())
        .map_err(|e| JobError::Decode(format!("image base64 decode failed: {e}")))?;
    if bytes.is_empty() {
        return Err(JobError::Decode(String::from("decoded image payload is empty")));
    }
    let format = detect_format(bytes.as_slice());

    let named = if apply_unique_suffix {
        apply_unique_naming(desired_path)
    } else {
        desired_path.to_path_buf()
    };
    let (final_path, _) = correct_extension(named.as_path(), format);

    if let Some(parent) = final_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| JobError::write_failure(parent, e))?;
    }
    fs::write(final_path.as_path(), bytes.as_slice())
        .map_err(|e| JobError::write_failure(final_path.as_path(), e))?;
    debug!(
        path = %final_path.display(),
        format = format.extension(),
        bytes = bytes.len(),
        "persisted generated image"
    );

    Ok(PersistedImage {
        path: final_path,
        format,
        size_bytes: bytes.len() as u64,
    })
}

pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} TB")
}
