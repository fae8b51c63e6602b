//! Credential value generation.
//!
//! Values are drawn from the operating system CSPRNG. If it cannot be read
//! the error is returned as-is; there is no fallback to a seeded generator.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::errors::{AppError, Result};

pub const ALPHABET: &[u8; 62] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Largest multiple of the alphabet size that fits in a byte. Bytes at or
/// above it are rejected so every symbol is equally likely.
const REJECT_AT: u8 = (256 - 256 % ALPHABET.len()) as u8;

pub trait ValueGenerator: Send + Sync {
    /// Produce a value of exactly `length` characters from [`ALPHABET`].
    fn generate(&self, length: usize) -> Result<String>;
}

/// [`ValueGenerator`] backed by `OsRng`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecureRandom;

impl ValueGenerator for SecureRandom {
    fn generate(&self, length: usize) -> Result<String> {
        if length == 0 {
            return Err(AppError::InvalidLength(length));
        }

        let mut out = String::with_capacity(length);
        // ~3% of bytes get rejected, so a little headroom avoids most refills
        let mut buf = vec![0u8; length + length / 16 + 8];
        while out.len() < length {
            OsRng.try_fill_bytes(&mut buf)?;
            for &b in &buf {
                if b >= REJECT_AT {
                    continue;
                }
                out.push(ALPHABET[(b as usize) % ALPHABET.len()] as char);
                if out.len() == length {
                    break;
                }
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_exact_length_and_alphabet() {
        for length in [1, 2, 16, 63, 64, 255, 1024] {
            let v = SecureRandom.generate(length).unwrap();
            assert_eq!(v.len(), length);
            assert!(v.bytes().all(|b| ALPHABET.contains(&b)), "bad char in {}", v);
        }
    }

    #[test]
    fn test_zero_length_rejected() {
        assert!(matches!(
            SecureRandom.generate(0),
            Err(AppError::InvalidLength(0))
        ));
    }

    #[test]
    fn test_no_collisions() {
        let values: HashSet<String> = (0..1000)
            .map(|_| SecureRandom.generate(32).unwrap())
            .collect();
        assert_eq!(values.len(), 1000);
    }

    #[test]
    fn test_reject_threshold() {
        assert_eq!(REJECT_AT, 248);
        assert_eq!(REJECT_AT as usize % ALPHABET.len(), 0);
    }

    #[test]
    fn test_all_symbols_reachable() {
        let v = SecureRandom.generate(20_000).unwrap();
        let seen: HashSet<u8> = v.bytes().collect();
        assert_eq!(seen.len(), ALPHABET.len());
    }
}
