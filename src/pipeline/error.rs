use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    PresetNotFound,
    InputNotFound,
    Transport,
    Remote,
    NoImageData,
    Decode,
    WriteFailure,
    PostProcess,
    Internal,
}

impl JobErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PresetNotFound => "preset_not_found",
            Self::InputNotFound => "input_not_found",
            Self::Transport => "transport",
            Self::Remote => "remote",
            Self::NoImageData => "no_image_data",
            Self::Decode => "decode",
            Self::WriteFailure => "write_failure",
            Self::PostProcess => "post_process",
            Self::Internal => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("preset '{name}' not found (searched: {})", searched.join(", "))]
    PresetNotFound { name: String, searched: Vec<String> },
    #[error("input image not found: {}", path.display())]
    InputNotFound { path: PathBuf },
    #[error("failed to read input image '{}': {message}", path.display())]
    InputUnreadable { path: PathBuf, message: String },
    #[error("failed to reach generation API: {0}")]
    Transport(String),
    #[error("generation API returned HTTP {status}: {body}")]
    Remote { status: u16, body: String },
    #[error("no image data in response: {0}")]
    NoImageData(String),
    #[error("image decode failed: {0}")]
    Decode(String),
    #[error("failed to write '{}': {message}", path.display())]
    WriteFailure { path: PathBuf, message: String },
    #[error("post-process tool failed ({program}) with exit code {status_code}: {stderr}")]
    ToolFailed {
        program: String,
        status_code: i32,
        stderr: String,
    },
    #[error("post-process failed: {0}")]
    PostProcess(String),
    #[error("worker panicked: {0}")]
    WorkerPanic(String),
}

impl JobError {
    pub fn kind(&self) -> JobErrorKind {
        match self {
            Self::PresetNotFound { .. } => JobErrorKind::PresetNotFound,
            Self::InputNotFound { .. } | Self::InputUnreadable { .. } => {
                JobErrorKind::InputNotFound
            }
            Self::Transport(_) => JobErrorKind::Transport,
            Self::Remote { .. } => JobErrorKind::Remote,
            Self::NoImageData(_) => JobErrorKind::NoImageData,
            Self::Decode(_) => JobErrorKind::Decode,
            Self::WriteFailure { .. } => JobErrorKind::WriteFailure,
            Self::ToolFailed { .. } | Self::PostProcess(_) => JobErrorKind::PostProcess,
            Self::WorkerPanic(_) => JobErrorKind::Internal,
        }
    }

    pub(crate) fn write_failure(path: impl Into<PathBuf>, error: impl ToString) -> Self {
        Self::WriteFailure {
            path: path.into(),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreadable_input_is_reported_as_missing_input() {
        let err = JobError::InputUnreadable {
            path: PathBuf::from("ref.png"),
            message: String::from("permission denied"),
        };
        assert_eq!(err.kind(), JobErrorKind::InputNotFound);
        assert!(err.to_string().contains("ref.png"));
    }

    #[test]
    fn preset_not_found_lists_searched_dirs() {
        let err = JobError::PresetNotFound {
            name: String::from("brand"),
            searched: vec![String::from("presets"), String::from("/opt/presets")],
        };
        assert_eq!(
            err.to_string(),
            "preset 'brand' not found (searched: presets, /opt/presets)"
        );
        assert_eq!(err.kind().as_str(), "preset_not_found");
    }

    #[test]
    fn remote_error_keeps_body_for_diagnostics() {
        let err = JobError::Remote {
            status: 429,
            body: String::from("{\"error\":\"quota\"}"),
        };
        assert_eq!(err.kind(), JobErrorKind::Remote);
        assert!(err.to_string().contains("quota"));
    }
}
