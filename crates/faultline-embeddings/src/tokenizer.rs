//! Tokenization abstraction

/// Error type for tokenization operations
#[derive(Debug, thiserror::Error)]
pub enum TokenizerError {
    #[error("Failed to tokenize text: {0}")]
    TokenizationFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Result type for tokenizer operations
pub type TokenizerResult<T> = Result<T, TokenizerError>;

/// Maps text to numeric token ids
pub trait Tokenizer: Send + Sync {
    /// Tokenize a single text string into token IDs
    fn encode(&self, text: &str) -> TokenizerResult<Vec<u32>>;

    /// Tokenize multiple text strings
    fn encode_batch(&self, texts: &[&str]) -> TokenizerResult<Vec<Vec<u32>>> {
        texts.iter().map(|text| self.encode(text)).collect()
    }

    fn vocab_size(&self) -> usize;

    fn name(&self) -> &str;
}

/// Hash-based tokenizer.
///
/// Words are split on anything that is not alphanumeric or `_`, lower-cased and
/// hashed (FNV-1a) into `vocab_size` buckets, so ids are stable across processes.
pub struct HashTokenizer {
    vocab_size: usize,
    name: String,
}

impl HashTokenizer {
    pub fn new(vocab_size: usize) -> Self {
        Self {
            vocab_size,
            name: format!("HashTokenizer(vocab_size={})", vocab_size),
        }
    }

    pub fn try_new(vocab_size: usize) -> TokenizerResult<Self> {
        if vocab_size == 0 {
            return Err(TokenizerError::InvalidConfiguration(
                "vocab_size must be greater than zero".to_string(),
            ));
        }
        Ok(Self::new(vocab_size))
    }

    fn hash_word(&self, word: &str) -> u32 {
        const FNV_OFFSET: u64 = 0xcbf29ce484222325;
        const FNV_PRIME: u64 = 0x100000001b3;

        let mut hash = FNV_OFFSET;
        for byte in word.to_lowercase().bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        (hash % self.vocab_size as u64) as u32
    }
}

impl Default for HashTokenizer {
    fn default() -> Self {
        Self::new(10000)
    }
}

impl Tokenizer for HashTokenizer {
    fn encode(&self, text: &str) -> TokenizerResult<Vec<u32>> {
        if self.vocab_size == 0 {
            return Err(TokenizerError::TokenizationFailed(
                "tokenizer has an empty vocabulary".to_string(),
            ));
        }
        let tokens = text
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|word| !word.is_empty())
            .map(|word| self.hash_word(word))
            .collect();
        Ok(tokens)
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn name(&self) -> &str {
        &self.name
    }
}
