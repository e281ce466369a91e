//! Assistant content blocks produced for one turn.
//!
//! The engine owns the only mutable [`ContentBlocks`] buffer; listeners and the
//! host see read-only snapshots. At most one block is partial at any time and
//! it is always the last one.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool invocation as displayed and later executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    /// Parsed arguments (live best-effort view while partial)
    pub params: Value,
    pub partial: bool,
    /// Set when the final arguments were not valid JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

impl ToolUseBlock {
    pub fn streaming(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            params: Value::Object(Default::default()),
            partial: true,
            parse_error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantContentBlock {
    Text { content: String, partial: bool },
    ToolUse(ToolUseBlock),
}

impl AssistantContentBlock {
    pub fn is_partial(&self) -> bool {
        match self {
            AssistantContentBlock::Text { partial, .. } => *partial,
            AssistantContentBlock::ToolUse(tool) => tool.partial,
        }
    }

    fn seal(&mut self) {
        match self {
            AssistantContentBlock::Text { partial, .. } => *partial = false,
            AssistantContentBlock::ToolUse(tool) => tool.partial = false,
        }
    }
}

/// Append-only, ordered block sequence for one API call attempt.
#[derive(Debug, Clone, Default)]
pub struct ContentBlocks {
    blocks: Vec<AssistantContentBlock>,
}

impl ContentBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the trailing partial text block, or start a new one.
    pub fn append_text(&mut self, fragment: &str) {
        if let Some(AssistantContentBlock::Text { content, partial: true }) = self.blocks.last_mut() {
            content.push_str(fragment);
            return;
        }
        self.blocks.push(AssistantContentBlock::Text {
            content: fragment.to_string(),
            partial: true,
        });
    }

    /// Seal the trailing block if it is a partial text block.
    pub fn seal_trailing_text(&mut self) -> bool {
        match self.blocks.last_mut() {
            Some(block) if matches!(block, AssistantContentBlock::Text { partial: true, .. }) => {
                block.seal();
                true
            }
            _ => false,
        }
    }

    /// Seal the trailing block whatever its kind.
    pub fn seal_last(&mut self) -> bool {
        match self.blocks.last_mut() {
            Some(block) if block.is_partial() => {
                block.seal();
                true
            }
            _ => false,
        }
    }

    /// Append a tool-use block, sealing any trailing partial text first.
    /// Returns the block position.
    pub fn push_tool_use(&mut self, tool: ToolUseBlock) -> usize {
        self.seal_trailing_text();
        self.blocks.push(AssistantContentBlock::ToolUse(tool));
        self.blocks.len() - 1
    }

    pub fn tool_use_mut(&mut self, position: usize) -> Option<&mut ToolUseBlock> {
        match self.blocks.get_mut(position) {
            Some(AssistantContentBlock::ToolUse(tool)) => Some(tool),
            _ => None,
        }
    }

    pub fn as_slice(&self) -> &[AssistantContentBlock] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn has_tool_uses(&self) -> bool {
        self.blocks
            .iter()
            .any(|b| matches!(b, AssistantContentBlock::ToolUse(_)))
    }

    pub fn into_vec(self) -> Vec<AssistantContentBlock> {
        self.blocks
    }
}
