//! Tokenizer handle used by the token ledger.
//!
//! The handle is created once by the composition root and passed by reference
//! (it is cheap to clone) into every [`TokenCounter`](crate::core::TokenCounter).
//! Dropping the last clone releases the encoder; tests can create their own.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;
use tracing::debug;

use crate::core::error::{EngineError, Result};

/// BPE encodings supported by the ledger.
///
/// Both pre-tokenize so that a line break followed by a non-whitespace
/// character is always a piece boundary, which the incremental counter relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    #[default]
    Cl100kBase,
    O200kBase,
}

impl Encoding {
    pub const fn as_str(self) -> &'static str {
        match self {
            Encoding::Cl100kBase => "cl100k_base",
            Encoding::O200kBase => "o200k_base",
        }
    }

    /// Select the encoding for a model name.
    ///
    /// Newer OpenAI families use o200k; everything else (including Claude,
    /// whose tokenizer is not public) is approximated with cl100k.
    pub fn for_model(model: &str) -> Self {
        let model = model.to_lowercase();
        let o200k_prefixes = ["gpt-4o", "gpt-4.1", "gpt-5", "o1", "o3", "o4"];
        if o200k_prefixes.iter().any(|p| model.starts_with(p)) {
            Encoding::O200kBase
        } else {
            Encoding::Cl100kBase
        }
    }
}

/// Shared, immutable tokenizer handle.
#[derive(Clone)]
pub struct Tokenizer {
    encoding: Encoding,
    bpe: Arc<CoreBPE>,
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer")
            .field("encoding", &self.encoding)
            .finish()
    }
}

impl Tokenizer {
    /// Load the BPE ranks for `encoding`.
    pub fn new(encoding: Encoding) -> Result<Self> {
        debug!(encoding = encoding.as_str(), "Loading tokenizer");
        let bpe = match encoding {
            Encoding::Cl100kBase => tiktoken_rs::cl100k_base(),
            Encoding::O200kBase => tiktoken_rs::o200k_base(),
        }
        .map_err(|e| EngineError::Tokenizer(e.to_string()))?;
        Ok(Self {
            encoding,
            bpe: Arc::new(bpe),
        })
    }

    /// Load the tokenizer that best matches `model`.
    pub fn for_model(model: &str) -> Result<Self> {
        Self::new(Encoding::for_model(model))
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Count tokens in text
    pub fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_with_special_tokens(text).len()
    }
}
