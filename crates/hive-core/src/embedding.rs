//! Embedding function owned by the coordinator.
//!
//! Implementations vary (hash-seeded for tests, model-backed in production)
//! but must be deterministic for identical inputs and emit a fixed
//! dimension.

use std::sync::Arc;

use sha2::{Digest, Sha256};

/// Cheap-clone handle around a deterministic text embedding function
#[derive(Clone)]
pub struct Embedder {
    dimension: usize,
    f: Arc<dyn Fn(&str) -> Vec<f32> + Send + Sync>,
}

impl Embedder {
    pub fn new(
        dimension: usize,
        f: impl Fn(&str) -> Vec<f32> + Send + Sync + 'static,
    ) -> Self {
        Self {
            dimension,
            f: Arc::new(f),
        }
    }

    /// Hash-seeded embedder with a fixed dimension, suitable for tests and
    /// offline use. Identical input always yields the identical embedding.
    pub fn deterministic(dimension: usize) -> Self {
        Self::new(dimension, move |text| {
            (0..dimension)
                .map(|index| {
                    let mut hasher = Sha256::new();
                    hasher.update(text.as_bytes());
                    hasher.update((index as u64).to_le_bytes());
                    let digest = hasher.finalize();
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(&digest[..8]);
                    // Map the leading 64 bits onto [-1, 1]
                    (u64::from_le_bytes(bytes) as f64 / u64::MAX as f64 * 2.0 - 1.0) as f32
                })
                .collect()
        })
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        (self.f)(text)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

impl Default for Embedder {
    fn default() -> Self {
        Self::deterministic(5)
    }
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("dimension", &self.dimension)
            .finish()
    }
}

/// Cosine similarity between two embeddings; zero when either norm is zero
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Euclidean (L2) distance between two embeddings
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_embedder_is_stable() {
        let embedder = Embedder::deterministic(5);
        let a = embedder.embed("hello");
        let b = embedder.embed("hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 5);
        assert_ne!(a, embedder.embed("world"));
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn euclidean_basics() {
        assert_eq!(euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]), 5.0);
        assert_eq!(euclidean_distance(&[1.0], &[1.0]), 0.0);
    }
}
