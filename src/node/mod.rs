//! Generate node — the one operation a host graph runtime calls.
//!
//! Takes the caller's messages and per-request overrides, formats the prompt,
//! streams the reply from Ollama and returns the structured outputs: reply
//! text, the prompt that was sent, the message lists and (optionally)
//! statistics plus the effective parameters.

pub mod generate;

pub use generate::{AdvancedOutputs, GenerateInputs, GenerateNode, GenerateOutputs, PreparedRequest};
