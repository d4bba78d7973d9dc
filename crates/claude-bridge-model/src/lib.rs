// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod convert;
mod parser;
mod types;

pub use convert::{convert_messages, estimate_input_tokens, estimator_text, ConvertError, ConvertedPrompt};
pub use parser::ToolCallParser;
pub use types::*;
