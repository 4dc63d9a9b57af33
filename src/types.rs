//! Validated newtypes enforcing the catalogue's data-model invariants at
//! construction time rather than scattering checks across call sites.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A CID string, validated as a non-empty, reasonably short, printable
/// opaque identifier. The catalogue does not parse multibase/multicodec —
/// it treats CIDs as opaque strings, per the node RPC's own contract — but
/// still rejects anything that would be unsafe to embed in a path segment
/// or URL component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatedCid(String);

impl ValidatedCid {
    const MAX_LEN: usize = 256;

    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        ensure!(!raw.is_empty(), "CID must not be empty");
        ensure!(
            raw.len() <= Self::MAX_LEN,
            "CID exceeds max length of {} bytes: {} bytes",
            Self::MAX_LEN,
            raw.len()
        );
        ensure!(
            raw.chars().all(|c| c.is_ascii_graphic()),
            "CID contains non-printable or whitespace characters: {raw}"
        );
        ensure!(
            !raw.contains('/') && !raw.contains('\\'),
            "CID must not contain path separators: {raw}"
        );
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ValidatedCid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ValidatedCid {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

/// A search/index token: lowercase `[a-z0-9]+`, length in `[3, 64]`. Matches
/// the `cid_tokens` table invariant that rows shorter than 3 characters are
/// pruned on startup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatedToken(String);

impl ValidatedToken {
    const MIN_LEN: usize = 3;
    const MAX_LEN: usize = 64;

    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        ensure!(
            raw.len() >= Self::MIN_LEN,
            "token shorter than {} characters: {raw:?}",
            Self::MIN_LEN
        );
        ensure!(
            raw.len() <= Self::MAX_LEN,
            "token longer than {} characters: {raw:?}",
            Self::MAX_LEN
        );
        ensure!(
            raw.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()),
            "token must match [a-z0-9]+: {raw:?}"
        );
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValidatedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A deterministic tag string, e.g. `kind:image`, `mime:application/pdf`,
/// `size:small`. Tags are `namespace:value` pairs restricted to a safe
/// charset so they round-trip cleanly through JSON and query strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatedTag(String);

impl ValidatedTag {
    const MAX_LEN: usize = 128;

    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        ensure!(!raw.is_empty(), "tag must not be empty");
        ensure!(
            raw.len() <= Self::MAX_LEN,
            "tag exceeds max length of {} bytes: {raw:?}",
            Self::MAX_LEN
        );
        ensure!(
            raw.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '-' | '_' | '/' | '.' | '+')),
            "tag contains unsupported characters: {raw:?}"
        );
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValidatedTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A non-zero byte size, used for the size-bucket tag derivation and for
/// guarding against zero-length range fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NonZeroSize(u64);

impl NonZeroSize {
    pub fn new(value: u64) -> Result<Self> {
        ensure!(value > 0, "size must be non-zero");
        Ok(Self(value))
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    /// Size-bucket tag value per the synthesizer's deterministic buckets.
    pub fn bucket(&self) -> &'static str {
        match self.0 {
            0..=10_000 => "tiny",
            10_001..=1_000_000 => "small",
            1_000_001..=100_000_000 => "medium",
            _ => "large",
        }
    }
}

/// A monotonic millisecond timestamp. Rejects negative values so arithmetic
/// on `first_seen_ms`/`last_seen_ms` never underflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValidatedTimestamp(i64);

impl ValidatedTimestamp {
    pub fn from_millis(ms: i64) -> Result<Self> {
        ensure!(ms >= 0, "timestamp must be non-negative: {ms}");
        Ok(Self(ms))
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn elapsed_since_ms(&self, earlier: ValidatedTimestamp) -> i64 {
        self.0 - earlier.0
    }
}

/// A confidence score clamped to `[0.0, 1.0]`. Construction never fails;
/// out-of-range inputs (e.g. from an external classifier) are clamped rather
/// than rejected, since a misbehaving classifier shouldn't take down
/// detection for the whole CID.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Confidence(f64);

impl Confidence {
    pub fn clamped(value: f64) -> Self {
        if value.is_nan() {
            Self(0.0)
        } else {
            Self(value.clamp(0.0, 1.0))
        }
    }

    pub fn get(&self) -> f64 {
        self.0
    }

    pub fn meets(&self, threshold: f64) -> bool {
        self.0 >= threshold
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validated_cid_accepts_printable_opaque_strings() {
        assert!(ValidatedCid::new("bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi").is_ok());
        assert!(ValidatedCid::new("QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG").is_ok());
    }

    #[test]
    fn validated_cid_rejects_empty_and_unsafe() {
        assert!(ValidatedCid::new("").is_err());
        assert!(ValidatedCid::new("abc def").is_err());
        assert!(ValidatedCid::new("abc/def").is_err());
        assert!(ValidatedCid::new("a".repeat(300)).is_err());
    }

    #[test]
    fn validated_token_enforces_length_and_charset() {
        assert!(ValidatedToken::new("rust").is_ok());
        assert!(ValidatedToken::new("ab").is_err());
        assert!(ValidatedToken::new("Rust").is_err());
        assert!(ValidatedToken::new("rust lang").is_err());
        assert!(ValidatedToken::new("a".repeat(65)).is_err());
    }

    #[test]
    fn validated_tag_enforces_charset() {
        assert!(ValidatedTag::new("kind:image").is_ok());
        assert!(ValidatedTag::new("mime:application/pdf").is_ok());
        assert!(ValidatedTag::new("bad tag").is_err());
        assert!(ValidatedTag::new("").is_err());
    }

    #[test]
    fn non_zero_size_buckets() {
        assert_eq!(NonZeroSize::new(100).unwrap().bucket(), "tiny");
        assert_eq!(NonZeroSize::new(500_000).unwrap().bucket(), "small");
        assert_eq!(NonZeroSize::new(50_000_000).unwrap().bucket(), "medium");
        assert_eq!(NonZeroSize::new(200_000_000).unwrap().bucket(), "large");
        assert!(NonZeroSize::new(0).is_err());
    }

    #[test]
    fn validated_timestamp_rejects_negative() {
        assert!(ValidatedTimestamp::from_millis(-1).is_err());
        let a = ValidatedTimestamp::from_millis(1000).unwrap();
        let b = ValidatedTimestamp::from_millis(1500).unwrap();
        assert_eq!(b.elapsed_since_ms(a), 500);
    }

    #[test]
    fn confidence_clamps_out_of_range() {
        assert_eq!(Confidence::clamped(1.5).get(), 1.0);
        assert_eq!(Confidence::clamped(-0.5).get(), 0.0);
        assert_eq!(Confidence::clamped(f64::NAN).get(), 0.0);
        assert!(Confidence::clamped(0.95).meets(0.9));
    }
}
