//! Grouping keys for error events.
//!
//! A fingerprint is an ordered list of tokens; two events belong to the same
//! group when their tokens hash to the same value within a project.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const FINGERPRINT_DELIMITER: &str = "::";

/// Client fingerprint token that expands to the default fingerprint
pub const DEFAULT_FINGERPRINT_TOKEN: &str = "{{ default }}";

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b").unwrap()
});
static HEX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b0x[0-9a-f]+\b|\b[0-9a-f]{8,}\b").unwrap());
static QUOTED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#""[^"]*"|'[^']*'"#).unwrap());
static DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// SHA-256 over the tokens joined with `::`, as lowercase hex
pub fn fingerprint_hash<S: AsRef<str>>(tokens: &[S]) -> String {
    let joined = tokens
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(FINGERPRINT_DELIMITER);
    hex::encode(Sha256::digest(joined.as_bytes()))
}

/// Strips volatile substrings so messages group by symptom.
///
/// UUIDs and hex literals are replaced before digit runs so they are not split.
pub fn normalize_message(message: &str) -> String {
    let normalized = UUID_RE.replace_all(message, "<uuid>");
    let normalized = HEX_RE.replace_all(&normalized, |caps: &Captures| {
        if caps[0].bytes().all(|b| b.is_ascii_digit()) {
            "<num>".to_string()
        } else {
            "<hex>".to_string()
        }
    });
    let normalized = QUOTED_RE.replace_all(&normalized, "\"<str>\"");
    let normalized = DIGITS_RE.replace_all(&normalized, "<num>");
    WHITESPACE_RE
        .replace_all(&normalized, " ")
        .trim()
        .to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintStrategy {
    /// `[type, message]`
    #[default]
    Exact,
    /// `[type, normalize_message(message)]`
    Normalized,
}

impl fmt::Display for FingerprintStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FingerprintStrategy::Exact => f.write_str("exact"),
            FingerprintStrategy::Normalized => f.write_str("normalized"),
        }
    }
}

impl FromStr for FingerprintStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "exact" => Ok(FingerprintStrategy::Exact),
            "normalized" => Ok(FingerprintStrategy::Normalized),
            other => Err(format!(
                "unknown fingerprint strategy '{}', expected 'exact' or 'normalized'",
                other
            )),
        }
    }
}

pub fn default_fingerprint(
    error_type: &str,
    message: &str,
    strategy: FingerprintStrategy,
) -> Vec<String> {
    let message = match strategy {
        FingerprintStrategy::Exact => message.to_string(),
        FingerprintStrategy::Normalized => normalize_message(message),
    };
    vec![error_type.to_string(), message]
}

/// Uses the client's tokens when present, expanding `{{ default }}` in place
pub fn resolve_fingerprint(
    client: Option<&[String]>,
    error_type: &str,
    message: &str,
    strategy: FingerprintStrategy,
) -> Vec<String> {
    let client = match client {
        Some(tokens) if !tokens.is_empty() => tokens,
        _ => return default_fingerprint(error_type, message, strategy),
    };

    let mut tokens = Vec::with_capacity(client.len() + 1);
    for token in client {
        if token.trim() == DEFAULT_FINGERPRINT_TOKEN {
            tokens.extend(default_fingerprint(error_type, message, strategy));
        } else {
            tokens.push(token.clone());
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let tokens = ["TypeError", "x"];
        assert_eq!(fingerprint_hash(&tokens), fingerprint_hash(&tokens));
        assert_ne!(
            fingerprint_hash(&["TypeError", "x"]),
            fingerprint_hash(&["TypeError", "y"])
        );
        assert_eq!(fingerprint_hash(&tokens).len(), 64);
    }

    #[test]
    fn test_hash_uses_delimiter() {
        let expected = hex::encode(Sha256::digest(b"TypeError::x"));
        assert_eq!(fingerprint_hash(&["TypeError", "x"]), expected);
        // Token boundaries matter
        assert_ne!(fingerprint_hash(&["ab", "c"]), fingerprint_hash(&["a", "bc"]));
    }

    #[test]
    fn test_normalize_message() {
        assert_eq!(
            normalize_message(
                "User 550e8400-e29b-41d4-a716-446655440000 failed at 0x7fff5fbff8c8 after 3 retries: 'timeout'"
            ),
            "User <uuid> failed at <hex> after <num> retries: \"<str>\""
        );
        assert_eq!(
            normalize_message("Order   12345678\n not found"),
            "Order <num> not found"
        );
        assert_eq!(normalize_message("commit deadbeefcafe"), "commit <hex>");
    }

    #[test]
    fn test_normalized_messages_group_together() {
        let a = default_fingerprint("KeyError", "missing key 'user_1'", FingerprintStrategy::Normalized);
        let b = default_fingerprint("KeyError", "missing key 'user_2'", FingerprintStrategy::Normalized);
        assert_eq!(fingerprint_hash(&a), fingerprint_hash(&b));

        let a = default_fingerprint("KeyError", "missing key 'user_1'", FingerprintStrategy::Exact);
        let b = default_fingerprint("KeyError", "missing key 'user_2'", FingerprintStrategy::Exact);
        assert_ne!(fingerprint_hash(&a), fingerprint_hash(&b));
    }

    #[test]
    fn test_resolve_fingerprint() {
        let strategy = FingerprintStrategy::Exact;
        assert_eq!(
            resolve_fingerprint(None, "Error", "boom", strategy),
            vec!["Error", "boom"]
        );
        assert_eq!(
            resolve_fingerprint(Some(&[]), "Error", "boom", strategy),
            vec!["Error", "boom"]
        );

        let client = vec!["{{ default }}".to_string(), "checkout".to_string()];
        assert_eq!(
            resolve_fingerprint(Some(&client), "Error", "boom", strategy),
            vec!["Error", "boom", "checkout"]
        );

        let client = vec!["payment-gateway".to_string()];
        assert_eq!(
            resolve_fingerprint(Some(&client), "Error", "boom", strategy),
            vec!["payment-gateway"]
        );
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("Normalized".parse::<FingerprintStrategy>().unwrap(), FingerprintStrategy::Normalized);
        assert!("fuzzy".parse::<FingerprintStrategy>().is_err());
        assert_eq!(FingerprintStrategy::default().to_string(), "exact");
    }
}
