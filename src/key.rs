use sha2::{Digest, Sha256};

/// Client-supplied idempotency key, trimmed and known non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Parses a raw header value. Blank or whitespace-only values count as
    /// absent, so every request without a usable key is treated as unique.
    pub fn from_header_value(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Normalizes the client key into a fixed-length storage key. Clients may
    /// send arbitrarily long or oddly shaped tokens; backends only ever see
    /// 64 hex characters.
    pub fn storage_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Masked form for logs, first and last four characters only.
    pub fn masked(&self) -> String {
        let s = &self.0;
        if s.len() <= 8 {
            return "*".repeat(s.len());
        }
        format!("{}{}{}", &s[..4], "*".repeat(s.len() - 8), &s[s.len() - 4..])
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
