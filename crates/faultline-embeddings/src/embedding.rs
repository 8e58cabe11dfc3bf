use serde::{Deserialize, Serialize};

/// Dimension used for error group vectors
pub const DEFAULT_EMBEDDING_SIZE: usize = 384;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Embedding(pub Vec<f32>);

impl Embedding {
    /// Token frequency vector, normalized to sum to 1
    pub fn from_tokens(tokens: &[u32], embedding_size: usize) -> Self {
        let size = embedding_size.max(1);
        let mut embedding = vec![0.0; size];

        for &token in tokens {
            embedding[(token as usize) % size] += 1.0;
        }

        let sum: f32 = embedding.iter().sum();
        if sum > 0.0 {
            for val in &mut embedding {
                *val /= sum;
            }
        }

        Embedding(embedding)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|v| *v == 0.0)
    }
}

/// Cosine similarity in `[0, 1]` for non-negative vectors; 0 when either is empty
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> f32 {
    if a.0.len() != b.0.len() {
        return 0.0;
    }
    let dot: f32 = a.0.iter().zip(&b.0).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.0.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.0.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tokens_normalizes() {
        let embedding = Embedding::from_tokens(&[1, 1, 2, 5], 4);
        assert_eq!(embedding.0.len(), 4);
        let sum: f32 = embedding.0.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        // 1, 1 and 5 all land in bucket 1
        assert!((embedding.0[1] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_empty_tokens_give_zero_vector() {
        let embedding = Embedding::from_tokens(&[], 8);
        assert!(embedding.is_zero());
        assert_eq!(cosine_similarity(&embedding, &embedding), 0.0);
    }

    #[test]
    fn test_cosine_similarity_bounds() {
        let a = Embedding::from_tokens(&[1, 2, 3], 16);
        let b = Embedding::from_tokens(&[7, 8, 9], 16);
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(
            cosine_similarity(&a, &Embedding::from_tokens(&[1], 8)),
            0.0
        );
    }
}
