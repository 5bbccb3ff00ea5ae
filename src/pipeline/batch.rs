use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

use crate::pipeline::job::Job;

#[derive(Debug, Error)]
pub enum BatchSpecError {
    #[error("batch file not found: {0}")]
    NotFound(String),
    #[error("failed to read batch file '{path}': {message}")]
    Read { path: String, message: String },
    #[error("failed to parse batch file '{path}': {message}")]
    Parse { path: String, message: String },
    #[error("invalid batch file '{path}': {message}")]
    Invalid { path: String, message: String },
    #[error("missing output path for prompt: {0}")]
    MissingOutput(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchSpec {
    pub preset: Option<String>,
    pub jobs: Vec<Job>,
}

pub fn is_batch_file_arg(args: &[String]) -> bool {
    args.len() == 1 && args[0].ends_with(".json")
}

pub fn load_batch_file(path: &Path) -> Result<BatchSpec, BatchSpecError> {
    if !path.is_file() {
        return Err(BatchSpecError::NotFound(path.display().to_string()));
    }
    let raw = fs::read_to_string(path).map_err(|e| BatchSpecError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_batch_spec(raw.as_str(), path.display().to_string().as_str())
}

pub fn parse_batch_spec(raw: &str, source: &str) -> Result<BatchSpec, BatchSpecError> {
    let parsed: Value = serde_json::from_str(raw).map_err(|e| BatchSpecError::Parse {
        path: source.to_string(),
        message: e.to_string(),
    })?;
    let invalid = |message: String| BatchSpecError::Invalid {
        path: source.to_string(),
        message,
    };

    let root = parsed
        .as_object()
        .ok_or_else(|| invalid(String::from("top-level value must be an object")))?;
    let preset = match root.get("preset") {
        None | Some(Value::Null) => None,
        Some(Value::String(v)) if v.trim().is_empty() => None,
        Some(Value::String(v)) => Some(v.trim().to_string()),
        Some(_) => return Err(invalid(String::from("'preset' must be a string"))),
    };
    let entries = match root.get("jobs") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(_) => return Err(invalid(String::from("'jobs' must be an array"))),
    };

    let mut jobs = Vec::with_capacity(entries.len());
    for (idx, entry) in entries.iter().enumerate() {
        let obj = entry
            .as_object()
            .ok_or_else(|| invalid(format!("jobs[{idx}] must be an object")))?;
        let prompt = obj
            .get("prompt")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid(format!("jobs[{idx}].prompt must be a string")))?;
        let output = obj
            .get("output")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| invalid(format!("jobs[{idx}].output must be a non-empty string")))?;
        // `input` takes precedence over `inputs`; either may be a string or a list.
        let inputs = match obj.get("input").or_else(|| obj.get("inputs")) {
            None | Some(Value::Null) => Vec::new(),
            Some(value) => parse_input_paths(value)
                .ok_or_else(|| invalid(format!("jobs[{idx}].input must be a string or list of strings")))?,
        };
        jobs.push(Job::new(prompt, output).with_inputs(inputs));
    }

    Ok(BatchSpec { preset, jobs })
}

fn parse_input_paths(value: &Value) -> Option<Vec<PathBuf>> {
    match value {
        Value::String(v) => Some(vec![PathBuf::from(v)]),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(PathBuf::from))
            .collect(),
        _ => None,
    }
}

/// Reads `prompt output prompt output ...` pairs.
pub fn parse_cli_jobs(args: &[String]) -> Result<Vec<Job>, BatchSpecError> {
    args.chunks(2)
        .map(|pair| {
            let prompt = pair[0].as_str();
            pair.get(1)
                .map(|output| Job::new(prompt, output.as_str()))
                .ok_or_else(|| BatchSpecError::MissingOutput(prompt.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_jobs_with_single_and_multiple_inputs() {
        let spec = parse_batch_spec(
            r#"{
                "preset": "mobile-ui,brand",
                "jobs": [
                    {"prompt": "home screen", "output": "home.jpg"},
                    {"prompt": "profile", "output": "profile.jpg", "input": "ref.jpg"},
                    {"prompt": "combo", "output": "combo.png", "inputs": ["a.png", "b.png"]}
                ]
            }"#,
            "jobs.json",
        )
        .expect("spec should parse");

        assert_eq!(spec.preset.as_deref(), Some("mobile-ui,brand"));
        assert_eq!(
            spec.jobs,
            vec![
                Job::new("home screen", "home.jpg"),
                Job::new("profile", "profile.jpg").with_inputs(vec![PathBuf::from("ref.jpg")]),
                Job::new("combo", "combo.png")
                    .with_inputs(vec![PathBuf::from("a.png"), PathBuf::from("b.png")]),
            ]
        );
    }

    #[test]
    fn input_wins_over_inputs() {
        let spec = parse_batch_spec(
            r#"{"jobs": [{"prompt": "p", "output": "o.png", "input": ["x.png"], "inputs": ["y.png"]}]}"#,
            "jobs.json",
        )
        .expect("spec should parse");
        assert_eq!(spec.jobs[0].inputs, vec![PathBuf::from("x.png")]);
        assert_eq!(spec.preset, None);
    }

    #[test]
    fn rejects_malformed_entries() {
        for raw in [
            r#"[]"#,
            r#"{"jobs": {}}"#,
            r#"{"jobs": [{"output": "o.png"}]}"#,
            r#"{"jobs": [{"prompt": "p", "output": "  "}]}"#,
            r#"{"jobs": [{"prompt": "p", "output": "o.png", "input": 3}]}"#,
            r#"{"preset": 1, "jobs": []}"#,
        ] {
            let err = parse_batch_spec(raw, "jobs.json").expect_err("should be invalid");
            assert!(matches!(err, BatchSpecError::Invalid { .. }), "{raw}: {err}");
        }
        assert!(matches!(
            parse_batch_spec("{not json", "jobs.json"),
            Err(BatchSpecError::Parse { .. })
        ));
    }

    #[test]
    fn cli_pairs_become_jobs() {
        let args = ["a cat", "cat.png", "a dog", "dog.jpg"]
            .map(String::from)
            .to_vec();
        let jobs = parse_cli_jobs(args.as_slice()).expect("pairs");
        assert_eq!(
            jobs,
            vec![Job::new("a cat", "cat.png"), Job::new("a dog", "dog.jpg")]
        );
    }

    #[test]
    fn trailing_prompt_without_output_is_an_error() {
        let args = ["a cat", "cat.png", "lonely"].map(String::from).to_vec();
        let err = parse_cli_jobs(args.as_slice()).expect_err("odd count");
        assert_eq!(err.to_string(), "missing output path for prompt: lonely");
    }

    #[test]
    fn detects_single_json_argument() {
        assert!(is_batch_file_arg(&[String::from("jobs.json")]));
        assert!(!is_batch_file_arg(&[String::from("jobs.json"), String::from("x")]));
    }
}
