//! Generate node configuration loading and validation.
//!
//! Reads `ollama-generate.yaml` and resolves environment variables. The file
//! describes one generate node: where Ollama lives, which model to run, how
//! to format the prompt and which parameters to send.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};

use super::errors::InferenceError;
use super::prompt::PromptFormat;
use super::types::{GenerationParameters, ParameterValue};

/// Config file name searched for by [`find_config_path`].
pub const CONFIG_FILE_NAME: &str = "ollama-generate.yaml";

/// Env var holding an explicit config file path.
pub const CONFIG_PATH_ENV: &str = "OLLAMA_GENERATE_CONFIG";

/// Where Ollama listens unless told otherwise.
pub const DEFAULT_HOST: &str = "http://localhost:11434";

/// `num_predict` sent when the config leaves it out.
pub const DEFAULT_NUM_PREDICT: i64 = 1024;

// ─── Public Types ────────────────────────────────────────────────────────────

/// A raw key/value parameter override, as typed into a form.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AdditionalParameter {
    pub key: String,
    #[serde(deserialize_with = "scalar_to_string")]
    pub value: String,
}

/// Accept `value: 512` as readily as `value: "512"`.
fn scalar_to_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Int(i64),
        Float(f64),
        Bool(bool),
    }

    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Text(s) => s,
        Scalar::Int(i) => i.to_string(),
        Scalar::Float(f) => f.to_string(),
        Scalar::Bool(b) => b.to_string(),
    })
}

/// Settings for one generate node (mirrors `ollama-generate.yaml`).
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub model: String,
    /// `"auto"`, `""` (raw) or `"llama2"`. Checked when the prompt is built.
    #[serde(default = "default_prompt_format")]
    pub prompt_format: String,
    /// Ask the service for JSON output (`format: "json"`).
    #[serde(default)]
    pub json_mode: bool,
    /// Include statistics and the effective parameters in the outputs.
    #[serde(default)]
    pub advanced_outputs: bool,
    /// Total request timeout. Unset means the stream may run as long as the
    /// model keeps generating.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    /// Named sampling/runtime parameters.
    #[serde(default)]
    pub parameters: GenerationParameters,
    /// Single stop sequence; empty means none.
    #[serde(default)]
    pub stop: String,
    /// Extra `options` keys. Numeric values are sent as numbers.
    #[serde(default)]
    pub additional_parameters: Vec<AdditionalParameter>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_prompt_format() -> String {
    PromptFormat::Auto.as_str().to_string()
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            model: String::new(),
            prompt_format: default_prompt_format(),
            json_mode: false,
            advanced_outputs: false,
            request_timeout_secs: None,
            parameters: GenerationParameters::default(),
            stop: String::new(),
            additional_parameters: Vec::new(),
        }
    }
}

impl GenerateConfig {
    /// Check the only two hard requirements: a host and a model.
    ///
    /// Parameter ranges are left to the service.
    pub fn validate(&self) -> Result<(), InferenceError> {
        if self.host.trim().is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "no host set".into(),
            });
        }
        if self.model.is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "no model set".into(),
            });
        }
        Ok(())
    }

    /// Parsed prompt format.
    pub fn prompt_format(&self) -> Result<PromptFormat, InferenceError> {
        self.prompt_format.parse()
    }

    /// Build the parameter set: named fields, stop sequence and extra keys.
    pub fn parameters(&self) -> GenerationParameters {
        let mut params = self.parameters.clone();

        if params.num_predict.is_none() {
            params.num_predict = Some(DEFAULT_NUM_PREDICT);
        }
        if params.stop.is_none() && !self.stop.is_empty() {
            params.stop = Some(vec![self.stop.clone()]);
        }
        params.additional.extend(
            self.additional_parameters
                .iter()
                .map(|p| (p.key.clone(), ParameterValue::from_raw(&p.value))),
        );

        params
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// Uses `OLLAMA_GENERATE_CONFIG` if it names an existing file, otherwise
/// searches upward from `start` for `ollama-generate.yaml`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, InferenceError> {
    // 1. Check env var
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let candidate = PathBuf::from(expand_tilde(&path));
        if candidate.is_file() {
            return Ok(candidate);
        }
        tracing::warn!(
            path = %candidate.display(),
            "{} does not name a file, searching",
            CONFIG_PATH_ENV
        );
    }

    // 2. Walk upward from `start`
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(InferenceError::ConfigError {
        reason: format!("could not find {CONFIG_FILE_NAME}"),
    })
}

/// Load and parse a config file.
///
/// Performs environment-variable interpolation on `${VAR_NAME}` and
/// `${VAR_NAME:-default}` before parsing.
pub fn load_config(path: &Path) -> Result<GenerateConfig, InferenceError> {
    let raw = std::fs::read_to_string(path).map_err(|e| InferenceError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    parse_config(&raw)
}

/// Parse config text (after env interpolation).
pub fn parse_config(raw: &str) -> Result<GenerateConfig, InferenceError> {
    let interpolated = interpolate_env_vars(raw);

    serde_yaml::from_str(&interpolated).map_err(|e| InferenceError::ConfigError {
        reason: format!("failed to parse config: {e}"),
    })
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve `VAR` or `VAR:-default`. Unset without a default becomes empty.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((var_name, default)) => {
            std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
        }
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
