//! Embedding blob encoding.
//!
//! Blobs are raw little-endian `f32` values with no header. The byte length
//! alone identifies the dimension, so any length other than
//! `dimension * 4` is treated as corruption instead of being truncated.
//! Decoded values must be finite: a NaN or infinite component would make
//! every distance computed against it NaN.

use lumen_core::{defaults, Error, Result};

/// Encode a vector as a little-endian `f32` blob.
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Reject vectors with NaN or infinite components.
pub fn ensure_finite(vector: &[f32]) -> Result<()> {
    match vector.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(Error::InvalidInput(format!(
            "Embedding component {} is not finite ({})",
            index, vector[index]
        ))),
        None => Ok(()),
    }
}

/// Decode a blob of exactly [`defaults::EMBEDDING_BYTE_LEN`] bytes.
pub fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>> {
    decode_embedding_with_dimension(blob, defaults::EMBEDDING_DIMENSION)
}

/// Decode a blob that must hold exactly `dimension` values.
pub fn decode_embedding_with_dimension(blob: &[u8], dimension: usize) -> Result<Vec<f32>> {
    let expected = dimension * 4;
    if blob.len() != expected {
        return Err(Error::CorruptEmbedding {
            expected,
            actual: blob.len(),
        });
    }
    let vector: Vec<f32> = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    ensure_finite(&vector)?;
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_little_endian() {
        let blob = encode_embedding(&[1.0]);
        assert_eq!(blob, 1.0f32.to_le_bytes().to_vec());
        assert_eq!(blob, vec![0x00, 0x00, 0x80, 0x3f]);
    }

    #[test]
    fn test_decode_full_dimension() {
        let vector: Vec<f32> = (0..defaults::EMBEDDING_DIMENSION)
            .map(|i| i as f32 * 0.5)
            .collect();
        let blob = encode_embedding(&vector);
        assert_eq!(blob.len(), defaults::EMBEDDING_BYTE_LEN);
        assert_eq!(decode_embedding(&blob).unwrap(), vector);
    }

    #[test]
    fn test_decode_rejects_short_blob() {
        let blob = vec![0u8; defaults::EMBEDDING_BYTE_LEN - 4];
        match decode_embedding(&blob) {
            Err(Error::CorruptEmbedding { expected, actual }) => {
                assert_eq!(expected, defaults::EMBEDDING_BYTE_LEN);
                assert_eq!(actual, defaults::EMBEDDING_BYTE_LEN - 4);
            }
            other => panic!("expected CorruptEmbedding, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_non_finite_values() {
        let blob = encode_embedding(&[0.5, f32::NAN, 1.0]);
        match decode_embedding_with_dimension(&blob, 3) {
            Err(Error::InvalidInput(msg)) => assert!(msg.contains("component 1")),
            other => panic!("expected InvalidInput, got {:?}", other),
        }

        let blob = encode_embedding(&[f32::INFINITY, 0.0]);
        assert!(matches!(
            decode_embedding_with_dimension(&blob, 2),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_ensure_finite() {
        assert!(ensure_finite(&[0.0, -1.5, f32::MAX]).is_ok());
        assert!(ensure_finite(&[]).is_ok());
        assert!(ensure_finite(&[1.0, f32::NEG_INFINITY]).is_err());
    }

    #[test]
    fn test_decode_rejects_long_blob() {
        let blob = vec![0u8; defaults::EMBEDDING_BYTE_LEN + 4];
        assert!(matches!(
            decode_embedding(&blob),
            Err(Error::CorruptEmbedding { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_unaligned_blob() {
        assert!(matches!(
            decode_embedding_with_dimension(&[0u8; 7], 2),
            Err(Error::CorruptEmbedding {
                expected: 8,
                actual: 7
            })
        ));
    }

    #[test]
    fn test_decode_empty_blob_is_corrupt() {
        assert!(decode_embedding(&[]).is_err());
    }
}
