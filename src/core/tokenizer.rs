//! Token counting
//!
//! The converters only need "how many tokens is this text". The BPE encoder
//! behind [`TiktokenCounter`] is expensive to build, so it is constructed on
//! first use, at most once, and then shared read-only.

use std::sync::OnceLock;
use tiktoken_rs::CoreBPE;
use tracing::{debug, warn};

/// Counts tokens in a piece of text
///
/// Implementations are deterministic for identical input and never fail.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// BPE vocabulary used for counting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenEncoding {
    Cl100kBase,
    O200kBase,
}

impl TokenEncoding {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cl100k_base" | "cl100k" => Some(TokenEncoding::Cl100kBase),
            "o200k_base" | "o200k" => Some(TokenEncoding::O200kBase),
            _ => None,
        }
    }

    fn build(self) -> Result<CoreBPE, String> {
        let built = match self {
            TokenEncoding::Cl100kBase => tiktoken_rs::cl100k_base(),
            TokenEncoding::O200kBase => tiktoken_rs::o200k_base(),
        };
        built.map_err(|e| e.to_string())
    }
}

/// Rough fallback: one token per four characters, rounded up
pub fn approximate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Counter backed by a lazily built tiktoken encoder
pub struct TiktokenCounter {
    encoding: TokenEncoding,
    // `None` once construction has been attempted and failed
    bpe: OnceLock<Option<CoreBPE>>,
}

impl TiktokenCounter {
    pub fn new(encoding: TokenEncoding) -> Self {
        Self {
            encoding,
            bpe: OnceLock::new(),
        }
    }

    fn encoder(&self) -> Option<&CoreBPE> {
        self.bpe
            .get_or_init(|| match self.encoding.build() {
                Ok(bpe) => {
                    debug!("Built {:?} token encoder", self.encoding);
                    Some(bpe)
                }
                Err(e) => {
                    warn!(
                        "Failed to build {:?} token encoder, falling back to estimates: {}",
                        self.encoding, e
                    );
                    None
                }
            })
            .as_ref()
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        match self.encoder() {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => approximate_tokens(text),
        }
    }
}
