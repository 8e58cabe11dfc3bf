//! # Faultline Embeddings
//!
//! Tokenization and fixed-size bag-of-token vectors used to find error groups
//! that read alike even when their fingerprints differ.
//!
//! ```rust
//! use faultline_embeddings::{cosine_similarity, Embedding, HashTokenizer, Tokenizer};
//!
//! let tokenizer = HashTokenizer::new(10000);
//! let a = Embedding::from_tokens(&tokenizer.encode("x is not defined").unwrap(), 384);
//! let b = Embedding::from_tokens(&tokenizer.encode("y is not defined").unwrap(), 384);
//! assert!(cosine_similarity(&a, &b) > 0.5);
//! ```

pub mod embedding;
pub mod tokenizer;

pub use embedding::{cosine_similarity, Embedding, DEFAULT_EMBEDDING_SIZE};
pub use tokenizer::{HashTokenizer, Tokenizer, TokenizerError, TokenizerResult};
