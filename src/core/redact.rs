//! Keeps credential material out of logs and error output.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

/// Patterns that detect secrets in string content.
static SECRET_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    let patterns: [(&str, &'static str); 5] = [
        // PEM private keys (full block, raw or JSON-escaped newlines)
        (
            r"-----BEGIN (?:RSA |EC )?PRIVATE KEY-----[\s\S]*?-----END (?:RSA |EC )?PRIVATE KEY-----(?:\\n)?",
            "[PEM_KEY_REDACTED]",
        ),
        // PEM header alone (in case value is truncated)
        (
            r"-----BEGIN (?:RSA |EC )?PRIVATE KEY-----",
            "[PEM_KEY_REDACTED]",
        ),
        // Google OAuth access tokens
        (r"ya29\.[0-9A-Za-z\-_\.]+", "[ACCESS_TOKEN_REDACTED]"),
        // Bearer tokens
        (r"(?i)bearer\s+[a-zA-Z0-9_\-\.]{20,}", "[BEARER_REDACTED]"),
        // private_key_id values inside key files
        (
            r#""private_key_id"\s*:\s*"[0-9a-f]+""#,
            r#""private_key_id":"[REDACTED]""#,
        ),
    ];
    patterns
        .into_iter()
        .filter_map(|(pattern, replacement)| match Regex::new(pattern) {
            Ok(re) => Some((re, replacement)),
            Err(e) => {
                tracing::error!(pattern, error = %e, "invalid redaction pattern");
                None
            }
        })
        .collect()
});

/// Redact secrets from a plain string value.
pub fn redact_string(input: &str) -> String {
    let mut result = input.to_string();
    for (pattern, replacement) in SECRET_PATTERNS.iter() {
        result = pattern.replace_all(&result, *replacement).to_string();
    }
    result
}

/// Short, stable identifier for a credential blob, safe to log.
pub fn credential_fingerprint(blob: &str) -> String {
    let digest = Sha256::digest(blob.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("sha256:{}", &hex[..12])
}
