use once_cell::sync::Lazy;
use regex::Regex;

/// Padding token id; real vocab ids start above it.
pub const PAD_TOKEN: u32 = 0;

static WORD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-z0-9]+(?:'[a-z]+)?|[^\sa-z0-9]").unwrap());

/// Minimal deterministic prompt tokenizer. Splits on a CLIP-like word
/// pattern and folds each piece into a stable id; good enough to make the
/// development text encoder prompt-sensitive without shipping a vocabulary.
pub struct PromptTokenizer {
    vocab_size: u32,
}

impl PromptTokenizer {
    pub fn new(vocab_size: u32) -> Self {
        Self { vocab_size }
    }

    pub fn encode(&self, text: &str, max_length: usize) -> Vec<u32> {
        let lowered = text.to_ascii_lowercase();
        let mut ids: Vec<u32> = WORD_PATTERN
            .find_iter(&lowered)
            .map(|m| self.token_id(m.as_str()))
            .take(max_length)
            .collect();
        ids.resize(max_length, PAD_TOKEN);
        ids
    }

    fn token_id(&self, piece: &str) -> u32 {
        let mut h: u32 = 2166136261;
        for b in piece.bytes() {
            h ^= b as u32;
            h = h.wrapping_mul(16777619);
        }
        // keep 0 reserved for padding
        1 + h % (self.vocab_size - 1)
    }
}
