// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Streaming tool-call parser.
//!
//! The backend emits a single text stream in which tool invocations are
//! framed as
//!
//! ```text
//! <tool_call>NAME<arg_key>K</arg_key><arg_value>V</arg_value>...</tool_call>
//! ```
//!
//! Chunk boundaries are arbitrary — a marker, a name, or a value can be split
//! anywhere — so the parser is a character-level state machine rather than a
//! regex pass.  Each state buffers at most one partially matched marker; a
//! buffer that stops matching every candidate marker is replayed through the
//! machine as literal input, so a lone `<` in prose can never stall the
//! stream.
//!
//! The parser never fails on malformed markup.  Whatever is still open when
//! [`ToolCallParser::flush`] is called is emitted as one literal text event.

use std::collections::VecDeque;

use serde_json::Value;

use crate::types::ParserEvent;

const TOOL_CALL_OPEN: &str = "<tool_call>";
const TOOL_CALL_CLOSE: &str = "</tool_call>";
const ARG_KEY_OPEN: &str = "<arg_key>";
const ARG_KEY_CLOSE: &str = "</arg_key>";
const ARG_VALUE_OPEN: &str = "<arg_value>";
const ARG_VALUE_CLOSE: &str = "</arg_value>";

/// Where the machine currently is in the marker grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Region {
    /// Plain output text.
    #[default]
    Text,
    /// Between `<tool_call>` and the first `<`.
    ToolName,
    /// Inside a call, after the name or a completed key/value pair.
    ToolBody,
    /// Between `<arg_key>` and `</arg_key>`.
    ArgKey,
    /// Between `</arg_key>` and `<arg_value>`.
    AwaitValue,
    /// Between `<arg_value>` and `</arg_value>`.
    ArgValue,
}

impl Region {
    /// Marker literals that may legally start with the buffered `<` here.
    fn candidates(self) -> &'static [&'static str] {
        match self {
            Region::Text => &[TOOL_CALL_OPEN],
            Region::ToolName | Region::ToolBody => &[ARG_KEY_OPEN, TOOL_CALL_CLOSE],
            Region::ArgKey => &[ARG_KEY_CLOSE],
            Region::AwaitValue => &[ARG_VALUE_OPEN],
            Region::ArgValue => &[ARG_VALUE_CLOSE],
        }
    }
}

/// Incremental parser over an arbitrarily chunked token stream.
///
/// Feed chunks with [`feed`](Self::feed); call [`flush`](Self::flush) once the
/// stream ends.  The emitted event sequence is independent of how the input
/// was partitioned into chunks.
#[derive(Debug, Default)]
pub struct ToolCallParser {
    region: Region,
    /// Partially matched marker, bounded by the longest marker literal.
    marker: String,
    /// Pending literal text (Text region only).
    text: String,
    /// Raw tool name, trimmed only when the call event is emitted.
    name: String,
    /// Completed key/value pairs of the open call, in arrival order.
    pairs: Vec<(String, String)>,
    key: String,
    value: String,
    /// Key whose `</arg_key>` has closed but whose value has not started.
    awaiting_key: Option<String>,
}

impl ToolCallParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one chunk and return the events it completed.
    ///
    /// Text is held back until a `<tool_call>` marker completes or the stream
    /// is flushed, which is what makes the event sequence chunking-invariant.
    pub fn feed(&mut self, chunk: &str) -> Vec<ParserEvent> {
        let mut events = Vec::new();
        let mut queue: VecDeque<char> = chunk.chars().collect();
        while let Some(c) = queue.pop_front() {
            self.step(c, &mut events, &mut queue);
        }
        events
    }

    /// Emit whatever is still buffered as a single literal text event and
    /// return to the initial state.
    pub fn flush(&mut self) -> Vec<ParserEvent> {
        let mut leftover = std::mem::take(&mut self.text);
        match self.region {
            Region::Text => leftover.push_str(&self.marker),
            _ => leftover.push_str(&self.reconstruct_open_call()),
        }
        self.reset();
        if leftover.is_empty() {
            Vec::new()
        } else {
            vec![ParserEvent::Text { text: leftover }]
        }
    }

    /// Drop all buffered state unconditionally.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn step(&mut self, c: char, events: &mut Vec<ParserEvent>, queue: &mut VecDeque<char>) {
        let region = self.region;

        if !self.marker.is_empty() || c == '<' {
            self.marker.push(c);
            let candidates = region.candidates();

            if let Some(done) = candidates.iter().find(|m| **m == self.marker) {
                let done = *done;
                self.marker.clear();
                self.complete_marker(done, events);
                return;
            }
            if candidates.iter().any(|m| m.starts_with(self.marker.as_str())) {
                return;
            }

            // No marker can match any more.  The first buffered character is
            // literal; the rest is replayed because it may itself open a
            // marker (e.g. "<<tool_call>").
            let pending: Vec<char> = self.marker.drain(..).collect();
            self.push_literal(region, pending[0]);
            for &p in pending[1..].iter().rev() {
                queue.push_front(p);
            }
            return;
        }

        self.push_literal(region, c);
    }

    /// Route one literal character into the buffer the region owns.
    fn push_literal(&mut self, region: Region, c: char) {
        match region {
            Region::Text => self.text.push(c),
            Region::ToolName => self.name.push(c),
            Region::ArgKey => self.key.push(c),
            Region::ArgValue => self.value.push(c),
            // Stray characters between markers carry no meaning.
            Region::ToolBody | Region::AwaitValue => {}
        }
    }

    fn complete_marker(&mut self, marker: &str, events: &mut Vec<ParserEvent>) {
        match marker {
            TOOL_CALL_OPEN => {
                if !self.text.is_empty() {
                    events.push(ParserEvent::Text { text: std::mem::take(&mut self.text) });
                }
                self.name.clear();
                self.pairs.clear();
                self.awaiting_key = None;
                self.region = Region::ToolName;
            }
            ARG_KEY_OPEN => {
                self.key.clear();
                self.region = Region::ArgKey;
            }
            ARG_KEY_CLOSE => {
                self.awaiting_key = Some(std::mem::take(&mut self.key));
                self.region = Region::AwaitValue;
            }
            ARG_VALUE_OPEN => {
                self.value.clear();
                self.region = Region::ArgValue;
            }
            ARG_VALUE_CLOSE => {
                let key = self.awaiting_key.take().unwrap_or_default();
                self.pairs.push((key, std::mem::take(&mut self.value)));
                self.region = Region::ToolBody;
            }
            TOOL_CALL_CLOSE => {
                let mut arguments = serde_json::Map::new();
                for (k, v) in self.pairs.drain(..) {
                    // Last write wins on duplicate keys.
                    arguments.insert(k, coerce_arg_value(&v));
                }
                events.push(ParserEvent::ToolCall {
                    name: self.name.trim().to_string(),
                    arguments,
                });
                self.name.clear();
                self.region = Region::Text;
            }
            _ => unreachable!("unknown marker literal"),
        }
    }

    /// Rebuild the canonical text of a call that never closed, so `flush`
    /// can account for every consumed character.
    fn reconstruct_open_call(&self) -> String {
        let mut out = String::from(TOOL_CALL_OPEN);
        out.push_str(&self.name);
        for (k, v) in &self.pairs {
            out.push_str(ARG_KEY_OPEN);
            out.push_str(k);
            out.push_str(ARG_KEY_CLOSE);
            out.push_str(ARG_VALUE_OPEN);
            out.push_str(v);
            out.push_str(ARG_VALUE_CLOSE);
        }
        match self.region {
            Region::ArgKey => {
                out.push_str(ARG_KEY_OPEN);
                out.push_str(&self.key);
            }
            Region::AwaitValue => {
                out.push_str(ARG_KEY_OPEN);
                out.push_str(self.awaiting_key.as_deref().unwrap_or_default());
                out.push_str(ARG_KEY_CLOSE);
            }
            Region::ArgValue => {
                out.push_str(ARG_KEY_OPEN);
                out.push_str(self.awaiting_key.as_deref().unwrap_or_default());
                out.push_str(ARG_KEY_CLOSE);
                out.push_str(ARG_VALUE_OPEN);
                out.push_str(&self.value);
            }
            Region::Text | Region::ToolName | Region::ToolBody => {}
        }
        out.push_str(&self.marker);
        out
    }
}

/// Coerce an argument lexeme: numeric literal → number, `true`/`false` →
/// boolean, everything else stays a string.
fn coerce_arg_value(lexeme: &str) -> Value {
    match lexeme {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if is_numeric_literal(lexeme) {
        if let Ok(i) = lexeme.parse::<i64>() {
            return Value::from(i);
        }
        if let Ok(f) = lexeme.parse::<f64>() {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return Value::Number(n);
            }
        }
    }
    Value::String(lexeme.to_string())
}

/// An optional minus sign, then digits with at most one interior dot.
fn is_numeric_literal(s: &str) -> bool {
    let body = s.strip_prefix('-').unwrap_or(s);
    if body.is_empty() {
        return false;
    }
    let mut parts = body.split('.');
    let int_part = parts.next().unwrap_or_default();
    let frac_part = parts.next();
    if parts.next().is_some() {
        return false;
    }
    let all_digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
    all_digits(int_part) && frac_part.map_or(true, all_digits)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
