//! # Store Errors
//!
//! One error type for the whole artifact layer. Variants are distinct
//! where callers behave differently: the API maps `NotFound` to 404,
//! `PermissionDenied` to 403, and transport-level failures to 5xx, while
//! the retention sweep treats per-object failures as skippable.

use thiserror::Error;

/// Error from the artifact-store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The object (or its bucket) does not exist.
    #[error("not found: {bucket}/{key}")]
    NotFound {
        /// Bucket that was addressed.
        bucket: String,
        /// Object key; empty when the bucket itself was missing.
        key: String,
    },

    /// The bucket is password-protected and the offered password did not
    /// match (or none was offered).
    #[error("access to bucket `{bucket}` denied")]
    PermissionDenied {
        /// The protected bucket.
        bucket: String,
    },

    /// A `.bucket_meta` or dataset sidecar could not be parsed.
    #[error("malformed bucket metadata: {0}")]
    InvalidMeta(String),

    /// The store responded, but the body was not what the protocol says.
    #[error("malformed store response: {0}")]
    InvalidResponse(String),

    /// HTTP transport failure (connect, timeout, TLS).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The store returned a status the client has no mapping for.
    #[error("unexpected status {status} from store: {context}")]
    UnexpectedStatus {
        /// HTTP status code.
        status: u16,
        /// What the client was doing.
        context: String,
    },

    /// Local filesystem failure while staging or materializing artifacts.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A multipart upload failed partway; the session was aborted.
    #[error("upload of `{key}` aborted: {cause}")]
    UploadAborted {
        /// Destination key of the failed upload.
        key: String,
        /// The failure that triggered the abort.
        #[source]
        cause: Box<StoreError>,
    },
}

impl StoreError {
    /// Shorthand constructor for [`StoreError::NotFound`].
    pub fn not_found(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Whether this error means "the thing is not there" (as opposed to
    /// a transport or protocol failure).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
