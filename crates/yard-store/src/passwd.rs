//! # Bucket Passwords and Meta Files
//!
//! Named buckets carry a `.bucket_meta` object recording an access digest;
//! datasets inside them carry sidecar meta objects describing provenance.
//! Both formats are newline-delimited `key=value` text so they stay
//! readable in any store browser.
//!
//! ## Digest Scheme
//!
//! A protected bucket stores the SHA-256 hex digest of its password. An
//! unprotected bucket stores the literal marker [`OPEN_DIGEST`], which is
//! not valid hex and therefore can never collide with a real digest.
//! Digest comparison is constant-time.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::StoreError;

/// Digest marker for buckets that require no password.
pub const OPEN_DIGEST: &str = "open";

/// Key of the per-bucket meta object.
pub const BUCKET_META_KEY: &str = ".bucket_meta";

/// Digests an optional password. `None` and the empty string both mean
/// "no protection" and map to [`OPEN_DIGEST`].
pub fn digest_password(password: Option<&str>) -> String {
    match password {
        Some(secret) if !secret.is_empty() => {
            let digest = Sha256::digest(secret.as_bytes());
            digest.iter().map(|b| format!("{b:02x}")).collect()
        }
        _ => OPEN_DIGEST.to_string(),
    }
}

/// Compares a stored digest against an offered password in constant time.
pub fn verify_password(stored_digest: &str, offered: Option<&str>) -> bool {
    let offered_digest = digest_password(offered);
    bool::from(stored_digest.as_bytes().ct_eq(offered_digest.as_bytes()))
}

/// Replaces line breaks so a value cannot smuggle extra `key=value` lines.
fn sanitize_value(value: &str) -> String {
    value.replace(['\n', '\r'], " ")
}

// ── bucket meta ──────────────────────────────────────────────────────

/// Parsed contents of a `.bucket_meta` object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketMeta {
    password_digest: String,
    extra: BTreeMap<String, String>,
}

impl BucketMeta {
    /// Meta for an unprotected bucket.
    pub fn open() -> Self {
        Self {
            password_digest: OPEN_DIGEST.to_string(),
            extra: BTreeMap::new(),
        }
    }

    /// Meta recording the digest of `password`. `None` yields open meta.
    pub fn with_password(password: Option<&str>) -> Self {
        Self {
            password_digest: digest_password(password),
            extra: BTreeMap::new(),
        }
    }

    pub fn is_protected(&self) -> bool {
        self.password_digest != OPEN_DIGEST
    }

    pub fn password_digest(&self) -> &str {
        &self.password_digest
    }

    /// Checks `offered` against the stored digest in constant time.
    pub fn verify(&self, offered: Option<&str>) -> bool {
        verify_password(&self.password_digest, offered)
    }

    /// Serializes to the on-store text format. The `password` line comes
    /// first; unknown keys survive a parse/render round trip.
    pub fn render(&self) -> String {
        let mut out = format!("password={}\n", self.password_digest);
        for (key, value) in &self.extra {
            out.push_str(key);
            out.push('=');
            out.push_str(&sanitize_value(value));
            out.push('\n');
        }
        out
    }

    /// Parses the on-store text format.
    pub fn parse(text: &str) -> Result<Self, StoreError> {
        let mut password_digest = None;
        let mut extra = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                StoreError::InvalidMeta(format!("meta line without '=': {line:?}"))
            })?;
            if key == "password" {
                password_digest = Some(value.to_string());
            } else {
                extra.insert(key.to_string(), value.to_string());
            }
        }
        let password_digest = password_digest
            .ok_or_else(|| StoreError::InvalidMeta("meta is missing the password line".into()))?;
        if password_digest.is_empty() {
            return Err(StoreError::InvalidMeta("meta has an empty password digest".into()));
        }
        Ok(Self { password_digest, extra })
    }
}

// ── dataset meta ─────────────────────────────────────────────────────

/// Parsed contents of a dataset sidecar meta object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetMeta {
    pub description: String,
    pub bucket: String,
    pub protected: bool,
}

impl DatasetMeta {
    pub fn new(description: impl Into<String>, bucket: impl Into<String>, protected: bool) -> Self {
        Self {
            description: description.into(),
            bucket: bucket.into(),
            protected,
        }
    }

    /// Serializes to the on-store text format.
    pub fn render(&self) -> String {
        format!(
            "description={}\nbucket={}\nprotected={}\n",
            sanitize_value(&self.description),
            sanitize_value(&self.bucket),
            self.protected
        )
    }

    /// Parses the on-store text format.
    pub fn parse(text: &str) -> Result<Self, StoreError> {
        let mut description = None;
        let mut bucket = None;
        let mut protected = None;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                StoreError::InvalidMeta(format!("meta line without '=': {line:?}"))
            })?;
            match key {
                "description" => description = Some(value.to_string()),
                "bucket" => bucket = Some(value.to_string()),
                "protected" => {
                    protected = Some(value.parse::<bool>().map_err(|_| {
                        StoreError::InvalidMeta(format!("protected is not a bool: {value:?}"))
                    })?);
                }
                _ => {}
            }
        }
        Ok(Self {
            description: description
                .ok_or_else(|| StoreError::InvalidMeta("meta is missing description".into()))?,
            bucket: bucket
                .ok_or_else(|| StoreError::InvalidMeta("meta is missing bucket".into()))?,
            protected: protected
                .ok_or_else(|| StoreError::InvalidMeta("meta is missing protected".into()))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // SHA-256 of the literal string "password".
    const PASSWORD_DIGEST: &str =
        "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8";

    #[test]
    fn digest_of_known_password() {
        assert_eq!(digest_password(Some("password")), PASSWORD_DIGEST);
    }

    #[test]
    fn digest_of_none_and_empty_is_the_open_marker() {
        assert_eq!(digest_password(None), OPEN_DIGEST);
        assert_eq!(digest_password(Some("")), OPEN_DIGEST);
    }

    #[test]
    fn verify_accepts_matching_password() {
        assert!(verify_password(PASSWORD_DIGEST, Some("password")));
    }

    #[test]
    fn verify_rejects_wrong_and_absent_password() {
        assert!(!verify_password(PASSWORD_DIGEST, Some("p4ssword")));
        assert!(!verify_password(PASSWORD_DIGEST, None));
    }

    #[test]
    fn open_digest_matches_only_open_offers() {
        assert!(verify_password(OPEN_DIGEST, None));
        assert!(verify_password(OPEN_DIGEST, Some("")));
        assert!(!verify_password(OPEN_DIGEST, Some("anything")));
    }

    #[test]
    fn bucket_meta_protection_flag() {
        assert!(!BucketMeta::open().is_protected());
        assert!(BucketMeta::with_password(Some("s3cret")).is_protected());
        assert!(!BucketMeta::with_password(None).is_protected());
    }

    #[test]
    fn bucket_meta_render_parse_round_trip() {
        let meta = BucketMeta::with_password(Some("s3cret"));
        let parsed = BucketMeta::parse(&meta.render()).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn bucket_meta_preserves_unknown_keys() {
        let text = "password=open\nowner=lab-7\n";
        let meta = BucketMeta::parse(text).unwrap();
        assert_eq!(meta.render(), text);
    }

    #[test]
    fn bucket_meta_rejects_missing_password_line() {
        let err = BucketMeta::parse("owner=lab-7\n").unwrap_err();
        assert!(matches!(err, StoreError::InvalidMeta(_)));
    }

    #[test]
    fn bucket_meta_rejects_garbage_line() {
        let err = BucketMeta::parse("password=open\nnot a pair\n").unwrap_err();
        assert!(matches!(err, StoreError::InvalidMeta(_)));
    }

    #[test]
    fn dataset_meta_round_trip() {
        let meta = DatasetMeta::new("iris measurements", "open-datasets", true);
        let parsed = DatasetMeta::parse(&meta.render()).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn dataset_meta_rejects_bad_bool() {
        let err = DatasetMeta::parse("description=d\nbucket=b\nprotected=yes\n").unwrap_err();
        assert!(matches!(err, StoreError::InvalidMeta(_)));
    }

    #[test]
    fn dataset_meta_rejects_missing_fields() {
        assert!(DatasetMeta::parse("description=d\nbucket=b\n").is_err());
        assert!(DatasetMeta::parse("bucket=b\nprotected=false\n").is_err());
    }

    #[test]
    fn render_flattens_embedded_newlines() {
        let meta = DatasetMeta::new("line one\nline two", "b", false);
        let parsed = DatasetMeta::parse(&meta.render()).unwrap();
        assert_eq!(parsed.description, "line one line two");
    }

    proptest! {
        #[test]
        fn verify_round_trips_any_password(secret in "[a-zA-Z0-9!@#$%^&*]{1,40}") {
            let digest = digest_password(Some(&secret));
            prop_assert!(verify_password(&digest, Some(&secret)));
            prop_assert_eq!(digest.len(), 64);
        }

        #[test]
        fn digests_never_collide_with_the_open_marker(secret in "[a-zA-Z0-9]{1,40}") {
            prop_assert_ne!(digest_password(Some(&secret)), OPEN_DIGEST);
        }
    }
}
