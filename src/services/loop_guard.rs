//! Dead-loop detection for streamed model output.
//!
//! [`LoopGuard`] is fed the cumulative text of one turn as it grows. Detection
//! only runs when the text crosses one of the configured length checkpoints,
//! and each checkpoint is evaluated at most once per guard instance. Three
//! checks run in order until one fires:
//!
//! 1. a short sequence repeated back-to-back at the very end of the output
//! 2. sentence/clause blocks forming a repeating period
//! 3. list lines repeating once their enumerators are stripped
//!
//! The consumed checkpoints are not cleared automatically; call
//! [`LoopGuard::reset`] before reusing a guard for another call.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::config::LoopGuardConfig;

/// Sentence and clause terminators across scripts.
static BLOCK_BOUNDARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[.!?;:\n。！？；：…]+").expect("block boundary regex is valid")
});

/// Leading enumerator of an ordered list line (`1.`, `12)`, `3、`).
static LIST_ENUMERATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d+[.)、]\s*").expect("enumerator regex is valid"));

/// Repetition pattern found by the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopKind {
    ShortSequence,
    ParagraphRepetition,
    OrderedListRepetition,
}

impl LoopKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ShortSequence => "short_sequence",
            Self::ParagraphRepetition => "paragraph_repetition",
            Self::OrderedListRepetition => "ordered_list_repetition",
        }
    }

    /// Human-readable name used in the user-facing notice.
    pub const fn description(self) -> &'static str {
        match self {
            Self::ShortSequence => "the same short sequence keeps repeating",
            Self::ParagraphRepetition => "the same sentences keep repeating",
            Self::OrderedListRepetition => "the same list items keep repeating under new numbers",
        }
    }
}

impl std::fmt::Display for LoopKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A positive detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopDetection {
    pub kind: LoopKind,
    pub details: String,
}

/// Checkpoint-driven repetition detector. One instance per call.
#[derive(Debug, Clone)]
pub struct LoopGuard {
    config: LoopGuardConfig,
    /// Number of leading checkpoints already evaluated
    consumed: usize,
    /// Length cache for append-only input: (bytes, chars)
    measured: (usize, usize),
}

impl LoopGuard {
    pub fn new(config: LoopGuardConfig) -> Self {
        Self {
            config,
            consumed: 0,
            measured: (0, 0),
        }
    }

    pub fn config(&self) -> &LoopGuardConfig {
        &self.config
    }

    /// Forget consumed checkpoints.
    pub fn reset(&mut self) {
        self.consumed = 0;
        self.measured = (0, 0);
    }

    /// Run detection if `text` crossed a checkpoint not evaluated yet.
    pub fn detect(&mut self, text: &str) -> Option<LoopDetection> {
        let next = *self.config.checkpoints.get(self.consumed)?;
        // A char is at least one byte, so the byte length bounds the char count.
        if text.len() < next {
            return None;
        }
        let length = self.char_len(text);
        let crossed = self.config.checkpoints[self.consumed..]
            .iter()
            .take_while(|&&checkpoint| checkpoint <= length)
            .count();
        if crossed == 0 {
            return None;
        }
        self.consumed += crossed;
        tracing::trace!(length, consumed = self.consumed, "Loop guard checkpoint");

        self.detect_short_sequence(text)
            .or_else(|| self.detect_paragraph_repetition(text))
            .or_else(|| self.detect_ordered_list_repetition(text))
    }

    fn char_len(&mut self, text: &str) -> usize {
        let (bytes, chars) = self.measured;
        let length = if bytes > 0 && text.len() >= bytes && text.is_char_boundary(bytes) {
            chars + text[bytes..].chars().count()
        } else {
            text.chars().count()
        };
        self.measured = (text.len(), length);
        length
    }

    fn detect_short_sequence(&self, text: &str) -> Option<LoopDetection> {
        let window: Vec<char> = trailing_window(text, self.config.short_sequence_window)
            .chars()
            .collect();
        let min_repeats = self.config.min_repeats.max(2);
        let max_unit = window.len() / min_repeats;

        for unit_len in 2..=max_unit {
            let unit = &window[window.len() - unit_len..];
            if is_degenerate_unit(unit) {
                continue;
            }
            let repeats = window
                .rchunks_exact(unit_len)
                .take_while(|chunk| *chunk == unit)
                .count();
            if repeats >= min_repeats {
                let unit: String = unit.iter().collect();
                return Some(LoopDetection {
                    kind: LoopKind::ShortSequence,
                    details: format!("{:?} repeated {} times at the end of the output", unit, repeats),
                });
            }
        }
        None
    }

    fn detect_paragraph_repetition(&self, text: &str) -> Option<LoopDetection> {
        let window = trailing_window(text, self.config.paragraph_window);
        let blocks: Vec<&str> = BLOCK_BOUNDARY
            .split(window)
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .collect();
        let (period, run) = self.find_period(interior(&blocks))?;
        Some(LoopDetection {
            kind: LoopKind::ParagraphRepetition,
            details: format!("{} sentence(s) repeating across {} blocks", period, run),
        })
    }

    fn detect_ordered_list_repetition(&self, text: &str) -> Option<LoopDetection> {
        let window = trailing_window(text, self.config.paragraph_window);
        let lines: Vec<String> = window
            .lines()
            .filter(|line| LIST_ENUMERATOR.is_match(line))
            .map(|line| LIST_ENUMERATOR.replace(line, "").trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();
        let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
        let (period, run) = self.find_period(interior(&lines))?;
        Some(LoopDetection {
            kind: LoopKind::OrderedListRepetition,
            details: format!("{} list item(s) repeating across {} numbered lines", period, run),
        })
    }

    /// Smallest period whose tail-anchored run covers at least two periods and
    /// the minimum number of elements. Returns `(period, run_length)`.
    fn find_period(&self, blocks: &[&str]) -> Option<(usize, usize)> {
        let min_elements = self.config.min_periodic_elements.max(2);
        if blocks.len() < min_elements {
            return None;
        }
        for period in 1..=self.config.max_period_length.min(blocks.len() / 2) {
            let matched = (period..blocks.len())
                .rev()
                .take_while(|&i| blocks[i] == blocks[i - period])
                .count();
            let run = matched + period;
            if matched >= period && run >= min_elements {
                return Some((period, run));
            }
        }
        None
    }
}

impl Default for LoopGuard {
    fn default() -> Self {
        Self::new(LoopGuardConfig::default())
    }
}

/// Last `max_chars` characters of `text`.
fn trailing_window(text: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    match text.char_indices().rev().nth(max_chars - 1) {
        Some((start, _)) => &text[start..],
        None => text,
    }
}

/// Drop the first and last block: the window may cut into the first one and
/// the last one may still be growing.
fn interior<'a, 'b>(blocks: &'a [&'b str]) -> &'a [&'b str] {
    if blocks.len() <= 2 {
        return &[];
    }
    &blocks[1..blocks.len() - 1]
}

/// Units made of one repeated character (or only whitespace) never count.
fn is_degenerate_unit(unit: &[char]) -> bool {
    unit.iter().all(|c| c.is_whitespace()) || unit.iter().all(|&c| c == unit[0])
}
