//! Request assembly and output shaping for the generate node.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::inference::config::GenerateConfig;
use crate::inference::errors::InferenceError;
use crate::inference::prompt::format_with;
use crate::inference::types::{
    ChatMessage, FinalStats, GenerateRequest, GenerationParameters, ParameterValue,
};
use crate::inference::OllamaClient;

// ─── Inputs / Outputs ────────────────────────────────────────────────────────

/// Per-request values. Anything set here takes precedence over the config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateInputs {
    /// Prepended as a `system` message when non-empty.
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Model override.
    #[serde(default)]
    pub model: Option<String>,
    /// Named parameter overrides, `stop` included. `additional` is ignored
    /// here; see `additional_parameters`.
    #[serde(default)]
    pub parameters: GenerationParameters,
    /// Replaces the configured extra keys wholesale when set.
    #[serde(default)]
    pub additional_parameters: Option<Vec<(String, ParameterValue)>>,
}

/// Everything the node produces for one successful request.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateOutputs {
    /// The reply text.
    pub output: String,
    /// The full prompt, with formatting, that was sent.
    pub prompt: String,
    /// Messages sent, including the injected system prompt.
    pub messages_sent: Vec<ChatMessage>,
    /// `messages_sent` plus the reply as an assistant message.
    pub all_messages: Vec<ChatMessage>,
    /// Present only when `advanced_outputs` is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advanced: Option<AdvancedOutputs>,
}

/// Execution details from the terminal chunk, plus the parameters sent.
#[derive(Debug, Clone, Serialize)]
pub struct AdvancedOutputs {
    pub total_duration: u64,
    pub load_duration: u64,
    pub sample_count: u64,
    pub sample_duration: u64,
    pub prompt_eval_count: u64,
    pub prompt_eval_duration: u64,
    pub eval_count: u64,
    pub eval_duration: u64,
    pub tokens_per_second: f64,
    pub parameters: Map<String, Value>,
}

impl AdvancedOutputs {
    fn new(stats: &FinalStats, parameters: Map<String, Value>) -> Self {
        Self {
            total_duration: stats.total_duration,
            load_duration: stats.load_duration,
            sample_count: stats.sample_count.unwrap_or(0),
            sample_duration: stats.sample_duration.unwrap_or(0),
            prompt_eval_count: stats.prompt_eval_count,
            prompt_eval_duration: stats.prompt_eval_duration,
            eval_count: stats.eval_count,
            eval_duration: stats.eval_duration,
            tokens_per_second: stats.tokens_per_second(),
            parameters,
        }
    }
}

/// A request ready to send, with the message list it was built from.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub messages_sent: Vec<ChatMessage>,
    pub request: GenerateRequest,
}

// ─── GenerateNode ────────────────────────────────────────────────────────────

/// A configured generate node bound to one Ollama host.
pub struct GenerateNode {
    config: GenerateConfig,
    client: OllamaClient,
}

impl GenerateNode {
    /// Build the node. Fails on a blank host; the model is checked per
    /// request since inputs may supply it.
    pub fn new(config: GenerateConfig) -> Result<Self, InferenceError> {
        let client = OllamaClient::from_config(&config)?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &GenerateConfig {
        &self.config
    }

    pub fn client(&self) -> &OllamaClient {
        &self.client
    }

    /// Resolve model, messages, prompt and parameters into a request body.
    pub fn prepare(&self, inputs: &GenerateInputs) -> Result<PreparedRequest, InferenceError> {
        let model = inputs.model.as_deref().unwrap_or(&self.config.model);
        if model.is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "no model set".into(),
            });
        }

        let mut messages_sent = Vec::with_capacity(inputs.messages.len() + 1);
        if let Some(system_prompt) = inputs.system_prompt.as_deref().filter(|s| !s.is_empty()) {
            messages_sent.push(ChatMessage::system(system_prompt));
        }
        messages_sent.extend(inputs.messages.iter().cloned());

        let format = self.config.prompt_format()?;
        let prompt = format_with(&messages_sent, format)?;

        let mut parameters = self.config.parameters().overlay(&inputs.parameters);
        if let Some(additional) = &inputs.additional_parameters {
            parameters.additional = additional.clone();
        }

        let request = GenerateRequest {
            model: model.to_string(),
            prompt,
            raw: format.is_raw(),
            stream: true,
            options: parameters.to_options(),
            format: self.config.json_mode.then(|| "json".to_string()),
        };

        Ok(PreparedRequest {
            messages_sent,
            request,
        })
    }

    /// Run one generate request.
    ///
    /// `on_partial` receives the reply text so far while the response
    /// streams in. Any failure fails the whole request.
    pub async fn process<F>(
        &self,
        inputs: GenerateInputs,
        on_partial: F,
    ) -> Result<GenerateOutputs, InferenceError>
    where
        F: FnMut(&str),
    {
        let PreparedRequest {
            messages_sent,
            request,
        } = self.prepare(&inputs)?;

        tracing::debug!(
            model = %request.model,
            message_count = messages_sent.len(),
            prompt_format = %self.config.prompt_format,
            "prepared generate request"
        );

        let outcome = self.client.generate(&request, on_partial).await?;

        let mut all_messages = messages_sent.clone();
        all_messages.push(ChatMessage::assistant(outcome.text.clone()));

        let advanced = self
            .config
            .advanced_outputs
            .then(|| AdvancedOutputs::new(&outcome.stats, request.options.clone()));

        Ok(GenerateOutputs {
            output: outcome.text,
            prompt: request.prompt,
            messages_sent,
            all_messages,
            advanced,
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
