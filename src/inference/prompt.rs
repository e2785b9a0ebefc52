//! Prompt formatting for `/api/generate`.
//!
//! The generate endpoint takes one prompt string, so chat messages are
//! flattened here. `auto` leaves templating to the service (the request is
//! sent with `raw: false`); raw (`""`) and `llama2` produce the final prompt
//! text client-side.

use std::str::FromStr;

use super::errors::InferenceError;
use super::types::{ChatMessage, MessageContent, MessagePart, Role};

/// How chat messages become a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptFormat {
    /// Plain join; the service applies the model template.
    #[default]
    Auto,
    /// Plain join, sent untouched.
    Raw,
    /// Llama 2 instruct template (`<s>[INST] … [/INST]`).
    Llama2,
}

impl PromptFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptFormat::Auto => "auto",
            PromptFormat::Raw => "",
            PromptFormat::Llama2 => "llama2",
        }
    }

    /// Value of the request's `raw` flag.
    pub fn is_raw(&self) -> bool {
        !matches!(self, PromptFormat::Auto)
    }
}

impl FromStr for PromptFormat {
    type Err = InferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(PromptFormat::Auto),
            "" => Ok(PromptFormat::Raw),
            "llama2" => Ok(PromptFormat::Llama2),
            other => Err(InferenceError::UnsupportedFormat {
                format: other.to_string(),
            }),
        }
    }
}

/// Format `messages` for the mode named by `mode` (`"auto"`, `""` or `"llama2"`).
pub fn format_chat_messages(messages: &[ChatMessage], mode: &str) -> Result<String, InferenceError> {
    format_with(messages, mode.parse()?)
}

/// Format `messages` for an already parsed [`PromptFormat`].
pub fn format_with(messages: &[ChatMessage], format: PromptFormat) -> Result<String, InferenceError> {
    match format {
        PromptFormat::Auto | PromptFormat::Raw => Ok(messages
            .iter()
            .map(|message| format_chat_message(message, format))
            .collect::<Vec<_>>()
            .join("\n")),
        PromptFormat::Llama2 => format_llama2_instruct(messages),
    }
}

/// Render one message's content for `format`.
///
/// Under `llama2` the system prompt is wrapped in `<<SYS>>` markers; the
/// trailing newline plus the two-newline separator give three newlines before
/// whatever follows.
pub fn format_chat_message(message: &ChatMessage, format: PromptFormat) -> String {
    match format {
        PromptFormat::Auto | PromptFormat::Raw => chat_message_to_string(&message.content),
        PromptFormat::Llama2 => match message.role {
            Role::User | Role::Assistant => chat_message_to_string(&message.content),
            Role::System => format!(
                "<<SYS>>\n{}\n<</SYS>>\n",
                chat_message_to_string(&message.content)
            ),
            Role::Function => String::new(),
        },
    }
}

/// Apply the Llama 2 instruct template.
///
/// The result always leaves a turn open for the model: either an instruction
/// closed by `[/INST] ` inside an unterminated `<s>`, or a fresh `<s>`.
pub fn format_llama2_instruct(messages: &[ChatMessage]) -> Result<String, InferenceError> {
    let mut in_turn = false;
    let mut in_instruction = false;
    let mut prompt = String::new();

    for message in messages {
        if !in_turn {
            prompt.push_str("<s>");
            in_turn = true;
        }

        match message.role {
            Role::System | Role::User => {
                if in_instruction {
                    prompt.push_str("\n\n");
                } else {
                    prompt.push_str("[INST] ");
                    in_instruction = true;
                }
                prompt.push_str(&format_chat_message(message, PromptFormat::Llama2));
            }
            Role::Assistant => {
                if in_instruction {
                    prompt.push_str(" [/INST] ");
                    in_instruction = false;
                }
                prompt.push_str(&format_chat_message(message, PromptFormat::Llama2));
                prompt.push_str(" </s>");
                in_turn = false;
            }
            Role::Function => {
                return Err(InferenceError::UnsupportedMessageType {
                    role: message.role.to_string(),
                });
            }
        }
    }

    if in_instruction {
        prompt.push_str("[/INST] ");
    }

    if !in_turn {
        prompt.push_str("<s>");
    }

    Ok(prompt)
}

/// Flatten message content to text. Parts are separated by a blank line.
pub fn chat_message_to_string(content: &MessageContent) -> String {
    content
        .parts()
        .iter()
        .map(|part| match part {
            MessagePart::Text { text } => text.clone(),
            MessagePart::Url { url } => format!("(Image at {url})"),
            MessagePart::Image { .. } => "(Embedded Image)".to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ─── Tests ───────────────────────────────────────────────────────────────────
