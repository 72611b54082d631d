//! The embedding capability consumed by the index.
//!
//! The model itself lives outside this crate. `HashEmbedder` is a
//! deterministic feature-hashing stand-in so the CLI, tests and benches run
//! without a model server.

use rayon::prelude::*;
use sha2::{Digest, Sha256};

use crate::config::Number;
use crate::error::Result;
use crate::vector_ops::normalize_vector;

pub trait EmbeddingProvider: Send + Sync {
    /// Identifier reported by `stats()`.
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<Number>>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<Number>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

pub struct HashEmbedder {
    model_id: String,
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(model_id: impl Into<String>, dimension: usize) -> Self {
        Self {
            model_id: model_id.into(),
            dimension,
        }
    }

    fn bucket(&self, token: &str) -> (usize, Number) {
        let digest = Sha256::digest(token.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(head) % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (bucket, sign)
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<Number>> {
        let mut vector = vec![0.0; self.dimension];
        if self.dimension == 0 {
            return Ok(vector);
        }

        text.split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .for_each(|token| {
                let (bucket, sign) = self.bucket(&token.to_lowercase());
                vector[bucket] += sign;
            });

        normalize_vector(&mut vector);
        Ok(vector)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<Number>>> {
        texts.par_iter().map(|text| self.embed(text)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_and_fixed_dimension() {
        let embedder = HashEmbedder::new("hash-bow-v1", 64);
        let a = embedder.embed("Apply discount code SAVE15").unwrap();
        let b = embedder.embed("apply DISCOUNT code save15").unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
    }

    #[test]
    fn blank_text_is_zero_vector() {
        let embedder = HashEmbedder::new("hash-bow-v1", 16);
        assert_eq!(embedder.embed("   \n").unwrap(), vec![0.0; 16]);
    }

    #[test]
    fn batch_matches_single() {
        let embedder = HashEmbedder::new("hash-bow-v1", 32);
        let texts = ["shipping costs", "express delivery", ""];
        let batch = embedder.embed_batch(&texts).unwrap();
        for (text, vector) in texts.iter().zip(&batch) {
            assert_eq!(&embedder.embed(text).unwrap(), vector);
        }
    }
}
