//! Hashing and identifier utilities.
//!
//! Pure helpers shared by the fetch, resync, and reconciliation engines:
//! content hashing by algorithm name, SQL identifier validation, and
//! edit-similarity scoring for corrected text.

use anyhow::{bail, Result};
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Validate a SQL identifier (table or column name) against the strict
/// allow-pattern `[A-Za-z0-9_]+`. Identifiers pass this check before any
/// interpolation into a statement; data values always stay bound parameters.
pub fn sanitize_identifier(name: &str) -> Result<&str> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!("Invalid SQL identifier: '{}'", name);
    }
    Ok(name)
}

/// Hash `text` with the named algorithm and return the hex digest.
/// Supported algorithms: `sha256` (default for new tasks) and `sha1`.
pub fn calculate_hash(text: &str, method: &str) -> Result<String> {
    match method.to_ascii_lowercase().as_str() {
        "sha256" => {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            Ok(format!("{:x}", hasher.finalize()))
        }
        "sha1" => {
            let mut hasher = Sha1::new();
            hasher.update(text.as_bytes());
            Ok(format!("{:x}", hasher.finalize()))
        }
        other => bail!("Unsupported hash algorithm: {}", other),
    }
}

/// Normalized edit-similarity between two text versions, on a 0–100 scale
/// with two-decimal rounding. Identical inputs score 100; any single-character
/// edit scores lower.
pub fn similarity_score(original: &str, corrected: &str) -> f64 {
    let ratio = strsim::normalized_levenshtein(original, corrected);
    (ratio * 100.0 * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_accepts_plain_identifiers() {
        assert!(sanitize_identifier("articles").is_ok());
        assert!(sanitize_identifier("id_column_2").is_ok());
        assert!(sanitize_identifier("A1_b2").is_ok());
    }

    #[test]
    fn sanitize_rejects_injection_attempts() {
        assert!(sanitize_identifier("articles; DROP TABLE task").is_err());
        assert!(sanitize_identifier("id OR 1=1").is_err());
        assert!(sanitize_identifier("name`").is_err());
        assert!(sanitize_identifier("").is_err());
    }

    #[test]
    fn hash_sha256_known_value() {
        let h = calculate_hash("abc", "sha256").unwrap();
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hash_sha1_known_value() {
        let h = calculate_hash("abc", "sha1").unwrap();
        assert_eq!(h, "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn hash_method_is_case_insensitive() {
        assert_eq!(
            calculate_hash("x", "SHA256").unwrap(),
            calculate_hash("x", "sha256").unwrap()
        );
    }

    #[test]
    fn hash_unsupported_algorithm_errors() {
        assert!(calculate_hash("x", "crc32").is_err());
    }

    #[test]
    fn similarity_identical_is_100() {
        assert_eq!(similarity_score("bad text", "bad text"), 100.0);
        assert_eq!(similarity_score("", ""), 100.0);
    }

    #[test]
    fn similarity_single_edit_is_below_100() {
        let score = similarity_score("bad txt", "bad text");
        assert!(score < 100.0);
        assert!(score > 0.0);
    }

    #[test]
    fn similarity_is_deterministic() {
        let a = similarity_score("hello wrld", "hello world");
        let b = similarity_score("hello wrld", "hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn similarity_two_decimal_rounding() {
        let score = similarity_score("abc", "abd");
        assert_eq!(score, (score * 100.0).round() / 100.0);
    }
}
