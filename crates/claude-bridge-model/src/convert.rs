// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Message transcoding: Anthropic messages → ChatML prompt + image sidecar.
//!
//! The backend consumes a single ChatML-style prompt string; images cannot be
//! inlined and travel as a positional sidecar instead.  Rendering preserves
//! message order exactly and never merges adjacent turns.

use thiserror::Error;

use crate::types::{
    ChatMessage, ContentBlock, ImageAttachment, ImageSource, MessageContent, Role, ToolDescriptor,
    ToolResultContent,
};

const IM_START: &str = "<|im_start|>";
const IM_END: &str = "<|im_end|>";

/// Hard cap on user-supplied system text.  The tool catalogue appended after
/// it is never truncated.
const SYSTEM_TEXT_CAP: usize = 1000;

/// Words-to-tokens fudge factor for the usage estimate.
const TOKENS_PER_WORD: f64 = 1.3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConvertError {
    #[error("messages must not be empty")]
    EmptyMessages,
}

/// The rendered prompt plus the images extracted from it, in reading order.
#[derive(Debug, Clone)]
pub struct ConvertedPrompt {
    pub prompt: String,
    pub images: Vec<ImageAttachment>,
}

/// Render a Messages-API conversation into a single ChatML prompt.
///
/// Shape:
///
/// ```text
/// <|im_start|>system
/// {system text + tool catalogue}
/// <|im_end|>
/// <|im_start|>{role}
/// {message body}
/// <|im_end|>
/// ...
/// <|im_start|>assistant
/// ```
///
/// A user turn that carries a `tool_result` block is rendered under the
/// `observation` role.  Image blocks contribute nothing to the prompt text;
/// their payloads are appended to the sidecar in the order they appear.
pub fn convert_messages(
    messages: &[ChatMessage],
    system: Option<&str>,
    tools: Option<&[ToolDescriptor]>,
) -> Result<ConvertedPrompt, ConvertError> {
    if messages.is_empty() {
        return Err(ConvertError::EmptyMessages);
    }

    let mut prompt = String::new();
    let mut images = Vec::new();

    if let Some(block) = render_system_block(system, tools) {
        push_turn(&mut prompt, "system", &block);
    }

    for message in messages {
        let body = render_content(&message.content, &mut images);
        push_turn(&mut prompt, effective_role(message), &body);
    }

    prompt.push_str(IM_START);
    prompt.push_str("assistant\n");

    Ok(ConvertedPrompt { prompt, images })
}

/// Word-count proxy for `usage.input_tokens`.
///
/// Deliberately not a tokenizer: the value is observable in responses, so it
/// must stay the stable whitespace-lexeme count with a flat 1.3 multiplier.
pub fn estimate_input_tokens(text: &str) -> u32 {
    let words = text.split_whitespace().count();
    (words as f64 * TOKENS_PER_WORD).ceil() as u32
}

/// The text the estimator runs over: each turn's role and rendered body,
/// without ChatML markers or the trailing assistant opener.
pub fn estimator_text(messages: &[ChatMessage], system: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(system) = system {
        out.push_str(system);
        out.push('\n');
    }
    let mut scratch = Vec::new();
    for (i, message) in messages.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(effective_role(message));
        out.push('\n');
        out.push_str(&render_content(&message.content, &mut scratch));
    }
    out
}

// ─── Rendering internals ──────────────────────────────────────────────────────

fn push_turn(prompt: &mut String, role: &str, body: &str) {
    prompt.push_str(IM_START);
    prompt.push_str(role);
    prompt.push('\n');
    prompt.push_str(body);
    prompt.push('\n');
    prompt.push_str(IM_END);
    prompt.push('\n');
}

/// `user` turns carrying a tool result become `observation` turns.
fn effective_role(message: &ChatMessage) -> &'static str {
    match message.role {
        Role::Assistant => "assistant",
        Role::User => {
            let has_tool_result = matches!(&message.content, MessageContent::Blocks(blocks)
                if blocks.iter().any(|b| matches!(b, ContentBlock::ToolResult { .. })));
            if has_tool_result {
                "observation"
            } else {
                "user"
            }
        }
    }
}

fn render_content(content: &MessageContent, images: &mut Vec<ImageAttachment>) -> String {
    match content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Blocks(blocks) => {
            let mut parts = Vec::new();
            for block in blocks {
                if let Some(part) = render_block(block, images) {
                    parts.push(part);
                }
            }
            parts.join("\n")
        }
    }
}

/// Render one block; `None` means the block contributes no prompt text
/// (images and unknown block types).
fn render_block(block: &ContentBlock, images: &mut Vec<ImageAttachment>) -> Option<String> {
    match block {
        ContentBlock::Text { text } => Some(text.clone()),
        ContentBlock::Image { source } => {
            let ImageSource::Base64 { media_type, data } = source;
            images.push(ImageAttachment {
                data: data.clone(),
                format: image_format(media_type),
            });
            None
        }
        ContentBlock::ToolUse { name, input, .. } => {
            Some(serde_json::json!({ "name": name, "arguments": input }).to_string())
        }
        ContentBlock::ToolResult { content, .. } => Some(match content {
            ToolResultContent::Text(text) => text.clone(),
            ToolResultContent::Blocks(blocks) => {
                let mut parts = Vec::new();
                for inner in blocks {
                    if let Some(part) = render_block(inner, images) {
                        parts.push(part);
                    }
                }
                parts.join("\n")
            }
        }),
        ContentBlock::Unknown => None,
    }
}

/// `image/png` → `png`.  A malformed media type is passed through whole
/// rather than dropped.
fn image_format(media_type: &str) -> String {
    media_type
        .split_once('/')
        .map(|(_, subtype)| subtype.to_string())
        .unwrap_or_else(|| media_type.to_string())
}

fn render_system_block(
    system: Option<&str>,
    tools: Option<&[ToolDescriptor]>,
) -> Option<String> {
    let tools = tools.unwrap_or_default();
    if system.is_none() && tools.is_empty() {
        return None;
    }

    let mut out = String::new();
    if let Some(system) = system {
        // The cap applies to user text only; the catalogue below is exempt.
        out.extend(system.chars().take(SYSTEM_TEXT_CAP));
    }
    if !tools.is_empty() {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&render_tool_catalogue(tools));
    }
    Some(out)
}

/// The `# Tools` section: one line per tool plus a single format example.
/// Placed after the user's system text so the call-format instructions sit
/// closest to the conversation.
fn render_tool_catalogue(tools: &[ToolDescriptor]) -> String {
    let mut out = String::from("# Tools\n\n");
    for tool in tools {
        let required = tool.required_params().join(", ");
        out.push_str(&format!("- {}: {} [{}]\n", tool.name, tool.description, required));
    }
    out.push_str(
        "\nTo call a tool, reply with a block in exactly this form:\n\
         <tool_call>tool_name<arg_key>param</arg_key><arg_value>value</arg_value></tool_call>\n\
         IMPORTANT: emit the markers verbatim, one <arg_key> immediately followed by its \
         <arg_value>, and nothing else inside the block.",
    );
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
