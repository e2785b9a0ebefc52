//! Shared types for the generate client.
//!
//! Chat messages as the caller hands them in, the parameter bag sent as
//! `options`, the `/api/generate` request body and the decoded stream chunks.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};

// ─── Chat Messages ───────────────────────────────────────────────────────────

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Function results. Only the plain formats can render these.
    Function,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Function => "function",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One piece of a message: text or an image.
///
/// Deserializes from a bare string (text) or a `type`-tagged object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessagePart {
    Text { text: String },
    /// Image referenced by URL.
    Url { url: String },
    /// Inline image payload (base64 `data`).
    Image { media_type: String, data: String },
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        MessagePart::Text { text: text.into() }
    }
}

impl<'de> Deserialize<'de> for MessagePart {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(tag = "type", rename_all = "lowercase")]
        enum Tagged {
            Text { text: String },
            Url { url: String },
            Image { media_type: String, data: String },
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bare(String),
            Tagged(Tagged),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Bare(text) | Repr::Tagged(Tagged::Text { text }) => MessagePart::Text { text },
            Repr::Tagged(Tagged::Url { url }) => MessagePart::Url { url },
            Repr::Tagged(Tagged::Image { media_type, data }) => {
                MessagePart::Image { media_type, data }
            }
        })
    }
}

impl From<&str> for MessagePart {
    fn from(text: &str) -> Self {
        MessagePart::text(text)
    }
}

impl From<String> for MessagePart {
    fn from(text: String) -> Self {
        MessagePart::Text { text }
    }
}

/// Message body: a single part or an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Single(MessagePart),
    Parts(Vec<MessagePart>),
}

impl MessageContent {
    /// The parts in order, regardless of shape.
    pub fn parts(&self) -> &[MessagePart] {
        match self {
            MessageContent::Single(part) => std::slice::from_ref(part),
            MessageContent::Parts(parts) => parts,
        }
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Single(text.into())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Single(text.into())
    }
}

impl From<MessagePart> for MessageContent {
    fn from(part: MessagePart) -> Self {
        MessageContent::Single(part)
    }
}

impl From<Vec<MessagePart>> for MessageContent {
    fn from(parts: Vec<MessagePart>) -> Self {
        MessageContent::Parts(parts)
    }
}

/// A single turn in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

// ─── Parameters ──────────────────────────────────────────────────────────────

/// A value in the `options` bag: number or string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Number(Number),
    Text(String),
}

impl ParameterValue {
    /// Parse a raw key/value override.
    ///
    /// Numeric text is sent as a number (integer when the text is integral),
    /// blank text counts as `0`, anything else is sent verbatim as a string.
    pub fn from_raw(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return ParameterValue::Number(Number::from(0));
        }
        if let Ok(int) = trimmed.parse::<i64>() {
            return ParameterValue::Number(Number::from(int));
        }
        match trimmed.parse::<f64>() {
            Ok(float) if float.is_finite() => Number::from_f64(float)
                .map(ParameterValue::Number)
                .unwrap_or_else(|| ParameterValue::Text(raw.to_string())),
            _ => ParameterValue::Text(raw.to_string()),
        }
    }
}

impl From<ParameterValue> for Value {
    fn from(value: ParameterValue) -> Self {
        match value {
            ParameterValue::Number(n) => Value::Number(n),
            ParameterValue::Text(s) => Value::String(s),
        }
    }
}

/// Sampling and runtime parameters sent as `options`.
///
/// Unset fields are left out of the bag so the service applies its own
/// defaults. Ranges are not checked here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    #[serde(default)]
    pub mirostat: Option<i64>,
    #[serde(default)]
    pub mirostat_eta: Option<f64>,
    #[serde(default)]
    pub mirostat_tau: Option<f64>,
    #[serde(default)]
    pub num_ctx: Option<i64>,
    #[serde(default)]
    pub num_gqa: Option<i64>,
    #[serde(default)]
    pub num_gpu: Option<i64>,
    #[serde(default)]
    pub num_thread: Option<i64>,
    #[serde(default)]
    pub repeat_last_n: Option<i64>,
    #[serde(default)]
    pub repeat_penalty: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub stop: Option<Vec<String>>,
    #[serde(default)]
    pub tfs_z: Option<f64>,
    #[serde(default)]
    pub num_predict: Option<i64>,
    #[serde(default)]
    pub top_k: Option<i64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    /// Extra keys merged in after the named fields; they win on collision.
    #[serde(default)]
    pub additional: Vec<(String, ParameterValue)>,
}

impl GenerationParameters {
    /// Take every named field set in `overrides`, keeping ours otherwise.
    ///
    /// `additional` is left untouched: callers decide whether extra keys are
    /// replaced or extended.
    pub fn overlay(self, overrides: &GenerationParameters) -> Self {
        Self {
            mirostat: overrides.mirostat.or(self.mirostat),
            mirostat_eta: overrides.mirostat_eta.or(self.mirostat_eta),
            mirostat_tau: overrides.mirostat_tau.or(self.mirostat_tau),
            num_ctx: overrides.num_ctx.or(self.num_ctx),
            num_gqa: overrides.num_gqa.or(self.num_gqa),
            num_gpu: overrides.num_gpu.or(self.num_gpu),
            num_thread: overrides.num_thread.or(self.num_thread),
            repeat_last_n: overrides.repeat_last_n.or(self.repeat_last_n),
            repeat_penalty: overrides.repeat_penalty.or(self.repeat_penalty),
            temperature: overrides.temperature.or(self.temperature),
            seed: overrides.seed.or(self.seed),
            stop: overrides.stop.clone().or(self.stop),
            tfs_z: overrides.tfs_z.or(self.tfs_z),
            num_predict: overrides.num_predict.or(self.num_predict),
            top_k: overrides.top_k.or(self.top_k),
            top_p: overrides.top_p.or(self.top_p),
            additional: self.additional,
        }
    }

    /// Build the `options` bag in wire key order, then apply `additional`.
    pub fn to_options(&self) -> Map<String, Value> {
        let mut options = Map::new();
        put(&mut options, "mirostat", self.mirostat);
        put(&mut options, "mirostat_eta", self.mirostat_eta);
        put(&mut options, "mirostat_tau", self.mirostat_tau);
        put(&mut options, "num_ctx", self.num_ctx);
        put(&mut options, "num_gqa", self.num_gqa);
        put(&mut options, "num_gpu", self.num_gpu);
        put(&mut options, "num_thread", self.num_thread);
        put(&mut options, "repeat_last_n", self.repeat_last_n);
        put(&mut options, "repeat_penalty", self.repeat_penalty);
        put(&mut options, "temperature", self.temperature);
        put(&mut options, "seed", self.seed);
        put(&mut options, "stop", self.stop.clone());
        put(&mut options, "tfs_z", self.tfs_z);
        put(&mut options, "num_predict", self.num_predict);
        put(&mut options, "top_k", self.top_k);
        put(&mut options, "top_p", self.top_p);

        for (key, value) in &self.additional {
            options.insert(key.clone(), value.clone().into());
        }

        options
    }
}

fn put<T: Into<Value>>(options: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value {
        options.insert(key.to_string(), value.into());
    }
}

// ─── Request ─────────────────────────────────────────────────────────────────

/// Request body for `POST /api/generate`.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    /// `false` only when the service applies the model's own template.
    pub raw: bool,
    pub stream: bool,
    pub options: Map<String, Value>,
    /// `"json"` in JSON mode, absent otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

// ─── Response ────────────────────────────────────────────────────────────────

/// Statistics carried by the terminal chunk. Durations are nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalStats {
    #[serde(default)]
    pub total_duration: u64,
    #[serde(default)]
    pub load_duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_duration: Option<u64>,
    #[serde(default)]
    pub prompt_eval_count: u64,
    #[serde(default)]
    pub prompt_eval_duration: u64,
    #[serde(default)]
    pub eval_count: u64,
    #[serde(default)]
    pub eval_duration: u64,
}

impl FinalStats {
    /// Generated tokens per second. A zero duration yields `inf` or `NaN`.
    pub fn tokens_per_second(&self) -> f64 {
        self.eval_count as f64 / (self.eval_duration as f64 / 1e9)
    }
}

/// One decoded line of the streaming response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// In-progress text fragment (`done: false`).
    Partial { text: String },
    /// Terminal chunk (`done: true`).
    Final(FinalStats),
}

/// What a fully decoded stream produced.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOutcome {
    /// Concatenated fragments, leading whitespace stripped from the first one.
    pub text: String,
    pub stats: FinalStats,
}

// ─── Tests ───────────────────────────────────────────────────────────────────
