//! Inference — Ollama `/api/generate` client for local LLM text generation.
//!
//! This module handles everything between a list of chat messages and a
//! finished reply:
//! - Prompt formatting (auto, raw, Llama 2 instruct)
//! - Request building (parameter bag, raw flag, JSON mode)
//! - NDJSON stream decoding with incremental partial output
//! - Node configuration loading from `ollama-generate.yaml`
//!
//! One request is one sequential read loop. Nothing is retried and no state
//! survives between requests.

pub mod client;
pub mod config;
pub mod errors;
pub mod prompt;
pub mod streaming;
pub mod types;

// Re-exports for convenience
pub use client::OllamaClient;
pub use config::{find_config_path, load_config, GenerateConfig};
pub use errors::InferenceError;
pub use prompt::{format_chat_messages, PromptFormat};
pub use streaming::{decode_generate_stream, NdjsonDecoder};
pub use types::{
    ChatMessage, FinalStats, GenerateOutcome, GenerateRequest, GenerationParameters,
    MessageContent, MessagePart, ParameterValue, Role, StreamChunk,
};
