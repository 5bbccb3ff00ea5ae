use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::pipeline::client::{ClientConfig, DEFAULT_API_BASE_URL, DEFAULT_MODEL_ID, DEFAULT_TIMEOUT_SECS};
use crate::pipeline::postprocess::bg_remove::{DEFAULT_REMBG_MODEL, DEFAULT_WHITE_THRESHOLD};
use crate::pipeline::request::ImageSize;
use crate::worker::DEFAULT_MAX_WORKERS;

pub const SETTINGS_TOML_REL_PATH: &str = "config/imagen.settings.toml";
pub const SETTINGS_JSON_REL_PATH: &str = "config/imagen.settings.json";

const ENV_API_KEY: &str = "GEMINI_API_KEY";
const ENV_MODEL: &str = "GEMINI_MODEL";
const ENV_IMAGE_SIZE: &str = "IMAGE_SIZE";
const ENV_PRESETS_DIR: &str = "IMAGEN_PRESETS_DIR";
const ENV_WORKERS: &str = "IMAGEN_WORKERS";
const ENV_TIMEOUT_SECS: &str = "IMAGEN_TIMEOUT_SECS";
const ENV_API_BASE_URL: &str = "IMAGEN_API_BASE_URL";
const ENV_PYTHON_BIN: &str = "IMAGEN_PYTHON_BIN";
const ENV_REMBG_MODEL: &str = "IMAGEN_REMBG_MODEL";
const ENV_WHITE_THRESHOLD: &str = "IMAGEN_WHITE_THRESHOLD";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SettingsOverlay {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub image_size: Option<String>,
    pub presets_dir: Option<String>,
    pub workers: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub api_base_url: Option<String>,
    pub python_bin: Option<String>,
    pub rembg_model: Option<String>,
    pub white_threshold: Option<u8>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("failed to read settings '{path}': {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse settings JSON '{path}': {message}")]
    ParseJson { path: String, message: String },
    #[error("failed to parse settings TOML '{path}': {message}")]
    ParseToml { path: String, message: String },
    #[error("settings root must be an object")]
    RootMustBeObject,
    #[error("settings field '{field}' has invalid type")]
    InvalidFieldType { field: String },
    #[error("invalid value '{value}' for {field}")]
    InvalidValue { field: String, value: String },
    #[error("GEMINI_API_KEY is not set (environment, .env or settings file)")]
    MissingApiKey,
}

#[derive(Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub image_size: ImageSize,
    pub presets_dir: Option<PathBuf>,
    pub workers: usize,
    pub timeout: Duration,
    pub api_base_url: String,
    pub python_bin: String,
    pub rembg_model: String,
    pub white_threshold: u8,
}

impl std::fmt::Debug for PipelineSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("image_size", &self.image_size)
            .field("presets_dir", &self.presets_dir)
            .field("workers", &self.workers)
            .field("timeout", &self.timeout)
            .field("api_base_url", &self.api_base_url)
            .field("python_bin", &self.python_bin)
            .field("rembg_model", &self.rembg_model)
            .field("white_threshold", &self.white_threshold)
            .finish()
    }
}

impl PipelineSettings {
    pub fn from_overlay(overlay: &SettingsOverlay) -> Self {
        Self {
            api_key: overlay.api_key.clone().filter(|v| !v.trim().is_empty()),
            model: overlay
                .model
                .clone()
                .unwrap_or_else(|| String::from(DEFAULT_MODEL_ID)),
            image_size: overlay
                .image_size
                .as_deref()
                .map(ImageSize::parse_or_default)
                .unwrap_or_default(),
            presets_dir: overlay.presets_dir.as_deref().map(PathBuf::from),
            workers: overlay.workers.unwrap_or(DEFAULT_MAX_WORKERS).max(1),
            timeout: Duration::from_secs(overlay.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            api_base_url: overlay
                .api_base_url
                .clone()
                .unwrap_or_else(|| String::from(DEFAULT_API_BASE_URL)),
            python_bin: overlay
                .python_bin
                .clone()
                .unwrap_or_else(|| String::from("python3")),
            rembg_model: overlay
                .rembg_model
                .clone()
                .unwrap_or_else(|| String::from(DEFAULT_REMBG_MODEL)),
            white_threshold: overlay.white_threshold.unwrap_or(DEFAULT_WHITE_THRESHOLD),
        }
    }

    pub fn client_config(&self) -> Result<ClientConfig, SettingsError> {
        let api_key = self.api_key.clone().ok_or(SettingsError::MissingApiKey)?;
        let mut config = ClientConfig::new(api_key);
        config.model_id = self.model.clone();
        config.api_base_url = self.api_base_url.clone();
        config.timeout = self.timeout;
        Ok(config)
    }
}

/// Loads every layer under `root` plus the process environment and merges
/// them below `cli`. `config_path` replaces the default settings file.
pub fn load_pipeline_settings(
    root: &Path,
    config_path: Option<&str>,
    cli: &SettingsOverlay,
) -> Result<PipelineSettings, SettingsError> {
    let file = load_settings_file(root, config_path)?;
    let dotenv_vars = load_dotenv_map(root).map_err(|error| SettingsError::ReadFile {
        path: root.join(".env").display().to_string(),
        message: error.to_string(),
    })?;
    let dotenv = overlay_from_vars(|key| dotenv_vars.get(key).cloned())?;
    let env = overlay_from_vars(|key| std::env::var(key).ok())?;
    let merged = merge_settings_overlays(&[cli, &env, &dotenv, &file]);
    Ok(PipelineSettings::from_overlay(&merged))
}

pub fn load_settings_file(
    root: &Path,
    explicit_path: Option<&str>,
) -> Result<SettingsOverlay, SettingsError> {
    if let Some(path) = explicit_path
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .map(|p| if p.is_absolute() { p } else { root.join(p) })
    {
        if !path.is_file() {
            return Err(SettingsError::ReadFile {
                path: path.display().to_string(),
                message: String::from("settings file not found"),
            });
        }
        return load_optional_overlay_by_extension(path.as_path());
    }

    let toml_path = root.join(SETTINGS_TOML_REL_PATH);
    if toml_path.exists() {
        return load_optional_overlay_from_toml_path(toml_path.as_path());
    }
    load_optional_overlay_from_json_path(root.join(SETTINGS_JSON_REL_PATH).as_path())
}

/// Earlier layers win field by field.
pub fn merge_settings_overlays(layers: &[&SettingsOverlay]) -> SettingsOverlay {
    fn pick<T: Clone>(
        layers: &[&SettingsOverlay],
        field: impl Fn(&SettingsOverlay) -> &Option<T>,
    ) -> Option<T> {
        layers.iter().find_map(|layer| field(layer).clone())
    }

    SettingsOverlay {
        api_key: pick(layers, |l| &l.api_key),
        model: pick(layers, |l| &l.model),
        image_size: pick(layers, |l| &l.image_size),
        presets_dir: pick(layers, |l| &l.presets_dir),
        workers: pick(layers, |l| &l.workers),
        timeout_secs: pick(layers, |l| &l.timeout_secs),
        api_base_url: pick(layers, |l| &l.api_base_url),
        python_bin: pick(layers, |l| &l.python_bin),
        rembg_model: pick(layers, |l| &l.rembg_model),
        white_threshold: pick(layers, |l| &l.white_threshold),
    }
}

pub fn overlay_from_vars<F>(lookup: F) -> Result<SettingsOverlay, SettingsError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| {
        lookup(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    Ok(SettingsOverlay {
        api_key: get(ENV_API_KEY),
        model: get(ENV_MODEL),
        image_size: get(ENV_IMAGE_SIZE),
        presets_dir: get(ENV_PRESETS_DIR),
        workers: get(ENV_WORKERS)
            .map(|v| parse_number(v.as_str(), ENV_WORKERS))
            .transpose()?,
        timeout_secs: get(ENV_TIMEOUT_SECS)
            .map(|v| parse_number(v.as_str(), ENV_TIMEOUT_SECS))
            .transpose()?,
        api_base_url: get(ENV_API_BASE_URL),
        python_bin: get(ENV_PYTHON_BIN),
        rembg_model: get(ENV_REMBG_MODEL),
        white_threshold: get(ENV_WHITE_THRESHOLD)
            .map(|v| parse_number(v.as_str(), ENV_WHITE_THRESHOLD))
            .transpose()?,
    })
}

pub fn parse_number<T: std::str::FromStr>(raw: &str, field: &str) -> Result<T, SettingsError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| SettingsError::InvalidValue {
            field: field.to_string(),
            value: raw.to_string(),
        })
}

pub fn parse_settings_overlay_json(value: &Value) -> Result<SettingsOverlay, SettingsError> {
    let root = value.as_object().ok_or(SettingsError::RootMustBeObject)?;
    let section = root
        .get("imagen")
        .unwrap_or(value)
        .as_object()
        .ok_or(SettingsError::RootMustBeObject)?;

    let mut out = SettingsOverlay::default();
    if let Some(v) = section.get("api_key") {
        out.api_key = Some(parse_string(v, "api_key")?);
    }
    if let Some(v) = section.get("model") {
        out.model = Some(parse_string(v, "model")?);
    }
    if let Some(v) = section.get("image_size") {
        out.image_size = Some(parse_string(v, "image_size")?);
    }
    if let Some(v) = section.get("presets_dir") {
        out.presets_dir = Some(parse_string(v, "presets_dir")?);
    }
    if let Some(v) = section.get("workers") {
        out.workers = Some(parse_unsigned(v, "workers")? as usize);
    }
    if let Some(v) = section.get("timeout_secs") {
        out.timeout_secs = Some(parse_unsigned(v, "timeout_secs")?);
    }
    if let Some(v) = section.get("api_base_url") {
        out.api_base_url = Some(parse_string(v, "api_base_url")?);
    }
    if let Some(v) = section.get("python_bin") {
        out.python_bin = Some(parse_string(v, "python_bin")?);
    }
    if let Some(v) = section.get("rembg_model") {
        out.rembg_model = Some(parse_string(v, "rembg_model")?);
    }
    if let Some(v) = section.get("white_threshold") {
        let raw = parse_unsigned(v, "white_threshold")?;
        out.white_threshold =
            Some(u8::try_from(raw).map_err(|_| SettingsError::InvalidValue {
                field: String::from("white_threshold"),
                value: raw.to_string(),
            })?);
    }
    Ok(out)
}

pub fn load_dotenv_map(root: &Path) -> Result<HashMap<String, String>, std::io::Error> {
    let path = root.join(".env");
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    let raw = fs::read_to_string(path)?;
    Ok(parse_dotenv_content(raw.as_str()))
}

pub fn parse_dotenv_content(raw: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in raw.lines() {
        let mut value = line.trim();
        if value.is_empty() || value.starts_with('#') {
            continue;
        }
        if let Some(rest) = value.strip_prefix("export ") {
            value = rest.trim_start();
        }
        let Some((key_raw, value_raw)) = value.split_once('=') else {
            continue;
        };
        let key = key_raw.trim();
        if key.is_empty() {
            continue;
        }
        let raw_value = value_raw.trim();
        let quoted = raw_value.len() >= 2
            && ((raw_value.starts_with('"') && raw_value.ends_with('"'))
                || (raw_value.starts_with('\'') && raw_value.ends_with('\'')));
        let parsed = if quoted {
            &raw_value[1..raw_value.len() - 1]
        } else {
            raw_value
                .split_once(" #")
                .map(|(before, _)| before.trim_end())
                .unwrap_or(raw_value)
        };
        out.insert(key.to_string(), parsed.to_string());
    }
    out
}

fn load_optional_overlay_by_extension(path: &Path) -> Result<SettingsOverlay, SettingsError> {
    match path
        .extension()
        .and_then(|v| v.to_str())
        .map(|v| v.to_ascii_lowercase())
    {
        Some(ext) if ext == "toml" => load_optional_overlay_from_toml_path(path),
        _ => load_optional_overlay_from_json_path(path),
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, SettingsError> {
    if !path.exists() {
        return Ok(None);
    }
    fs::read_to_string(path)
        .map(Some)
        .map_err(|error| SettingsError::ReadFile {
            path: path.display().to_string(),
            message: error.to_string(),
        })
}

fn load_optional_overlay_from_json_path(path: &Path) -> Result<SettingsOverlay, SettingsError> {
    let Some(raw) = read_optional(path)? else {
        return Ok(SettingsOverlay::default());
    };
    let parsed =
        serde_json::from_str::<Value>(raw.as_str()).map_err(|error| SettingsError::ParseJson {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
    parse_settings_overlay_json(&parsed)
}

fn load_optional_overlay_from_toml_path(path: &Path) -> Result<SettingsOverlay, SettingsError> {
    let Some(raw) = read_optional(path)? else {
        return Ok(SettingsOverlay::default());
    };
    let parse_err = |message: String| SettingsError::ParseToml {
        path: path.display().to_string(),
        message,
    };
    let parsed =
        toml::from_str::<toml::Value>(raw.as_str()).map_err(|error| parse_err(error.to_string()))?;
    let json_value = serde_json::to_value(parsed).map_err(|error| parse_err(error.to_string()))?;
    parse_settings_overlay_json(&json_value)
}

fn parse_string(value: &Value, field: &str) -> Result<String, SettingsError> {
    value
        .as_str()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| SettingsError::InvalidFieldType {
            field: field.to_string(),
        })
}

fn parse_unsigned(value: &Value, field: &str) -> Result<u64, SettingsError> {
    value
        .as_u64()
        .ok_or_else(|| SettingsError::InvalidFieldType {
            field: field.to_string(),
        })
}
