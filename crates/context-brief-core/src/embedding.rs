//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, plus pure helpers for vector serialization, similarity,
//! and the deterministic pseudo-embedding used when no provider answers.
//!
//! Concrete providers (OpenAI, Ollama, hash) live in the `context-brief`
//! app crate.

use sha2::{Digest, Sha256};

use crate::models::Provenance;

/// Trait for embedding providers.
///
/// Implementations are created by the application and passed to code
/// that needs embedding metadata.
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Returns the provenance tag recorded on vectors this provider emits.
    fn provenance(&self) -> Provenance {
        Provenance::Real
    }
}

/// Derive a unit-length pseudo-embedding from the SHA-256 of `text`.
///
/// The same `(text, dims)` always yields the same vector, so identical
/// texts stay mutually retrievable while a real provider is down. The
/// vector carries no semantic signal beyond exact-text equality.
///
/// ```rust
/// use context_brief_core::embedding::{hash_embedding, cosine_similarity};
///
/// let a = hash_embedding("quarterly outlook", 64);
/// assert_eq!(a.len(), 64);
/// assert_eq!(a, hash_embedding("quarterly outlook", 64));
/// assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-5);
/// ```
pub fn hash_embedding(text: &str, dims: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(dims);
    let mut block: u32 = 0;
    while out.len() < dims {
        let mut hasher = Sha256::new();
        hasher.update(block.to_le_bytes());
        hasher.update(text.as_bytes());
        for byte in hasher.finalize() {
            if out.len() == dims {
                break;
            }
            out.push(f32::from(byte) / 127.5 - 1.0);
        }
        block += 1;
    }

    let norm = out.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in &mut out {
            *x /= norm;
        }
    }
    out
}

/// Encode a float vector as little-endian `f32` bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors,
/// vectors of different lengths, or zero-norm vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(d, na, nb), (x, y)| {
            (d + x * y, na + x * x, nb + y * y)
        });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical_and_opposite() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        let neg: Vec<f32> = v.iter().map(|x| -x).collect();
        assert!((cosine_similarity(&v, &neg) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_hash_embedding_deterministic_and_normalized() {
        let a = hash_embedding("banking risk", 384);
        let b = hash_embedding("banking risk", 384);
        assert_eq!(a, b);
        assert_eq!(a.len(), 384);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_hash_embedding_differs_by_text() {
        let a = hash_embedding("alpha", 32);
        let b = hash_embedding("beta", 32);
        assert_ne!(a, b);
        assert!(cosine_similarity(&a, &b) < 0.99);
    }

    #[test]
    fn test_hash_embedding_zero_dims() {
        assert!(hash_embedding("anything", 0).is_empty());
    }
}
