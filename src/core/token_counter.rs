//! Incremental token counter for one provider call.
//!
//! Text, reasoning and tool-call arguments are counted per category while the
//! model is still streaming. The running total of a category always equals
//! tokenizing the full concatenation of everything fed to it, no matter how the
//! input was fragmented.
//!
//! Each fragment is only scanned, not tokenized: the BPE pre-tokenizers we use
//! never merge across a line break that is followed by a non-whitespace
//! character, so everything before the last such boundary is tokenized once,
//! committed and dropped from the buffer. The remaining tail is tokenized when
//! a total is read.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::tokenizer::Tokenizer;

/// Per-category token totals for one turn. `total` is the exact sum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBreakdown {
    pub text: usize,
    pub reasoning: usize,
    pub tool_calls: usize,
    pub total: usize,
}

/// Byte offset of the last position where the buffer can be split without
/// changing its tokenization, if any.
pub(crate) fn stable_split_point(text: &str) -> Option<usize> {
    stable_split_point_from(text, 1)
}

/// Like [`stable_split_point`], but only positions at or after `from` are
/// considered.
fn stable_split_point_from(text: &str, from: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    (from.max(1)..bytes.len()).rev().find(|&i| {
        matches!(bytes[i - 1], b'\n' | b'\r')
            && text[i..].chars().next().is_some_and(|c| !c.is_whitespace())
    })
}

/// Committed token count plus the not yet tokenized tail.
///
/// Invariant: the tail never contains a stable split point, so a push only
/// has to scan the appended bytes (and the boundary before them). The tail is
/// tokenized when a total is read, never per fragment.
#[derive(Debug, Default, Clone)]
struct CategoryCounter {
    committed_tokens: usize,
    tail: String,
}

impl CategoryCounter {
    fn push(&mut self, tokenizer: &Tokenizer, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        let appended_at = self.tail.len();
        self.tail.push_str(fragment);
        if let Some(split) = stable_split_point_from(&self.tail, appended_at) {
            self.committed_tokens += tokenizer.count(&self.tail[..split]);
            self.tail.drain(..split);
        }
    }

    fn total(&self, tokenizer: &Tokenizer) -> usize {
        self.committed_tokens + tokenizer.count(&self.tail)
    }
}

/// Latest name and arguments seen for one tool call.
#[derive(Debug, Default, Clone)]
struct ToolCallText {
    name: String,
    arguments: String,
}

/// Category-tagged incremental token counter.
#[derive(Debug, Clone)]
pub struct TokenCounter {
    tokenizer: Tokenizer,
    text: CategoryCounter,
    reasoning: CategoryCounter,
    /// Tool call id -> name and arguments so far, tokenized on read
    tool_calls: HashMap<String, ToolCallText>,
}

impl TokenCounter {
    pub fn new(tokenizer: Tokenizer) -> Self {
        Self {
            tokenizer,
            text: CategoryCounter::default(),
            reasoning: CategoryCounter::default(),
            tool_calls: HashMap::new(),
        }
    }

    /// Count a newly streamed text fragment.
    pub fn add_text(&mut self, fragment: &str) {
        self.text.push(&self.tokenizer, fragment);
    }

    /// Count a newly streamed reasoning fragment.
    pub fn add_reasoning(&mut self, fragment: &str) {
        self.reasoning.push(&self.tokenizer, fragment);
    }

    /// Record the arguments seen so far for a tool call.
    ///
    /// Replaces any earlier contribution of the same id, so repeated deltas for
    /// one call never double-count.
    pub fn add_tool_call(&mut self, id: &str, name: &str, args_so_far: &str) {
        let call = self.tool_calls.entry(id.to_string()).or_default();
        if call.name != name {
            call.name.clear();
            call.name.push_str(name);
        }
        match args_so_far.strip_prefix(call.arguments.as_str()) {
            Some(suffix) => call.arguments.push_str(suffix),
            None => {
                call.arguments.clear();
                call.arguments.push_str(args_so_far);
            }
        }
    }

    pub fn text_tokens(&self) -> usize {
        self.text.total(&self.tokenizer)
    }

    pub fn reasoning_tokens(&self) -> usize {
        self.reasoning.total(&self.tokenizer)
    }

    pub fn tool_call_tokens(&self) -> usize {
        self.tool_calls
            .values()
            .map(|call| self.tokenizer.count(&call.name) + self.tokenizer.count(&call.arguments))
            .sum()
    }

    /// Exact sum of all categories.
    pub fn get_total_tokens(&self) -> usize {
        self.text_tokens() + self.reasoning_tokens() + self.tool_call_tokens()
    }

    pub fn breakdown(&self) -> TokenBreakdown {
        let text = self.text_tokens();
        let reasoning = self.reasoning_tokens();
        let tool_calls = self.tool_call_tokens();
        TokenBreakdown {
            text,
            reasoning,
            tool_calls,
            total: text + reasoning + tool_calls,
        }
    }

    /// Forget everything counted so far (new attempt).
    pub fn reset(&mut self) {
        self.text = CategoryCounter::default();
        self.reasoning = CategoryCounter::default();
        self.tool_calls.clear();
    }
}
