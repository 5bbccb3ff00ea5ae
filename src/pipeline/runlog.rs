use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::pipeline::scheduler::BatchReport;

#[derive(Debug, Error)]
pub enum RunLogError {
    #[error("failed to create report parent directory '{path}': {message}")]
    CreateParent { path: String, message: String },
    #[error("failed to serialize report JSON: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to write report '{path}': {message}")]
    WriteFile { path: String, message: String },
}

pub fn write_pretty_json_with_newline<T>(path: &Path, value: &T) -> Result<(), RunLogError>
where
    T: Serialize,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|error| RunLogError::CreateParent {
            path: parent.display().to_string(),
            message: error.to_string(),
        })?;
    }

    let mut bytes = serde_json::to_vec_pretty(value).map_err(RunLogError::Serialize)?;
    bytes.push(b'\n');
    fs::write(path, bytes).map_err(|error| RunLogError::WriteFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    Ok(())
}

pub fn write_batch_report(path: &Path, report: &BatchReport) -> Result<(), RunLogError> {
    write_pretty_json_with_newline(path, report)
}

/// `runs/batch_20260101T120000Z.json` style path under `dir`.
pub fn default_report_path(dir: &Path) -> PathBuf {
    dir.join(format!("batch_{}.json", report_stamp_now()))
}

/// A directory (existing, or written with a trailing separator) gets a
/// timestamped report name inside it; anything else is used as the file.
pub fn resolve_report_path(requested: &Path) -> PathBuf {
    let trailing_separator = requested
        .as_os_str()
        .to_string_lossy()
        .ends_with(std::path::MAIN_SEPARATOR);
    if requested.is_dir() || trailing_separator {
        default_report_path(requested)
    } else {
        requested.to_path_buf()
    }
}

fn report_stamp_now() -> String {
    Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::job::{Job, JobResult};
    use crate::worker::JobState;
    use serde_json::Value;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_file_path() -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        std::env::temp_dir()
            .join(format!("imagen_runlog_test_{stamp}"))
            .join("runs/report.json")
    }

    #[test]
    fn writes_report_as_pretty_json_with_trailing_newline() {
        let path = temp_file_path();
        let mut result = JobResult::pending(0, &Job::new("a cat", "cat.png"));
        result.advance(JobState::Running);
        let report = BatchReport {
            started_at: String::from("2026-01-01T12:00:00Z"),
            preset: Some(String::from("creative")),
            image_size: String::from("1K"),
            workers: 1,
            total: 1,
            succeeded: 0,
            failed: 1,
            elapsed_seconds: 0.5,
            results: vec![result],
        };
        write_batch_report(path.as_path(), &report).expect("report should write");

        let raw = fs::read_to_string(path.as_path()).expect("report should be readable");
        assert!(raw.ends_with('\n'));
        let parsed: Value = serde_json::from_str(raw.as_str()).expect("valid json");
        assert_eq!(parsed["preset"], "creative");
        assert_eq!(parsed["results"][0]["status"], "running");
        assert_eq!(parsed["failed"], 1);

        let _ = fs::remove_dir_all(
            path.parent()
                .and_then(Path::parent)
                .unwrap_or_else(|| Path::new("/tmp")),
        );
    }

    #[test]
    fn default_report_path_is_timestamped_json() {
        let path = default_report_path(Path::new("runs"));
        let name = path
            .file_name()
            .and_then(|v| v.to_str())
            .expect("file name");
        assert!(name.starts_with("batch_"));
        assert!(name.ends_with("Z.json"));
        assert_eq!(path.parent(), Some(Path::new("runs")));
    }

    #[test]
    fn report_directory_gets_timestamped_file() {
        let dir = temp_file_path()
            .parent()
            .map(Path::to_path_buf)
            .expect("runs dir");
        fs::create_dir_all(dir.as_path()).expect("runs dir should exist");

        let resolved = resolve_report_path(dir.as_path());
        assert_eq!(resolved.parent(), Some(dir.as_path()));
        assert!(resolved
            .file_name()
            .and_then(|v| v.to_str())
            .map(|v| v.starts_with("batch_"))
            .unwrap_or(false));

        let file = dir.join("report.json");
        assert_eq!(resolve_report_path(file.as_path()), file);
        let pending_dir = PathBuf::from(format!("reports{}", std::path::MAIN_SEPARATOR));
        assert_eq!(
            resolve_report_path(pending_dir.as_path()).parent(),
            Some(Path::new("reports"))
        );

        let _ = fs::remove_dir_all(dir.parent().unwrap_or_else(|| Path::new("/tmp")));
    }
}
