//! # HTTP Object Store
//!
//! Path-style client for an S3-compatible store fronted by plain HTTP
//! with bearer-token auth. No request signing: deployments front the
//! store with a gateway that accepts the token.
//!
//! ## Wire protocol
//!
//! | Operation | Request |
//! |---|---|
//! | bucket exists | `HEAD {endpoint}/{bucket}` |
//! | create bucket | `PUT {endpoint}/{bucket}` (409 = already there) |
//! | put / get / stat / delete | `PUT/GET/HEAD/DELETE {endpoint}/{bucket}/{key}` |
//! | list | `GET {endpoint}/{bucket}?list=1&prefix=` → JSON `[{key,size,last_modified}]` |
//! | open multipart | `POST {endpoint}/{bucket}/{key}?uploads=1` → JSON `{upload_id}` |
//! | upload part | `PUT {endpoint}/{bucket}/{key}?uploadId=&partNumber=` → `ETag` header |
//! | complete | `POST {endpoint}/{bucket}/{key}?uploadId=` with JSON `{parts}` |
//! | abort | `DELETE {endpoint}/{bucket}/{key}?uploadId=` |
//!
//! Idempotent reads (`GET`/`HEAD`/list) retry transient transport errors
//! with exponential backoff; mutations are sent once, and a failed
//! multipart is aborted by the uploader rather than replayed.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::object_store::{CompletedPart, ObjectMeta, ObjectStore, UploadId};
use crate::retry::retry_send;

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for a path-style object store.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    endpoint: String,
    bearer_token: Option<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct CreatedUpload {
    upload_id: String,
}

#[derive(Serialize)]
struct CompleteRequest<'a> {
    parts: &'a [CompletedPart],
}

impl HttpObjectStore {
    /// Build a client for the store at `endpoint`, attaching `Bearer`
    /// auth to every request when a token is given.
    pub fn new(
        endpoint: impl Into<String>,
        bearer_token: Option<String>,
    ) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            bearer_token: bearer_token.filter(|t| !t.is_empty()),
            client,
        })
    }

    fn bucket_url(&self, bucket: &str) -> String {
        format!("{}/{}", self.endpoint, bucket)
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint,
            bucket,
            key.trim_start_matches('/')
        )
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.bearer_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Map a non-success status onto the error taxonomy.
    fn fail(&self, status: StatusCode, bucket: &str, key: &str, context: &str) -> StoreError {
        match status {
            StatusCode::NOT_FOUND => StoreError::not_found(bucket, key),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::PermissionDenied {
                bucket: bucket.to_string(),
            },
            other => StoreError::UnexpectedStatus {
                status: other.as_u16(),
                context: context.to_string(),
            },
        }
    }

    fn check(
        &self,
        resp: &Response,
        bucket: &str,
        key: &str,
        context: &str,
    ) -> Result<(), StoreError> {
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(self.fail(status, bucket, key, context))
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        let resp = retry_send(|| self.authorize(self.client.head(self.bucket_url(bucket))).send())
            .await?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(self.fail(s, bucket, "", "bucket_exists")),
        }
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let resp = self
            .authorize(self.client.put(self.bucket_url(bucket)))
            .send()
            .await?;
        match resp.status() {
            s if s.is_success() => Ok(()),
            // Someone else created it first; that is the outcome we wanted.
            StatusCode::CONFLICT => Ok(()),
            s => Err(self.fail(s, bucket, "", "create_bucket")),
        }
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), StoreError> {
        let resp = self
            .authorize(self.client.put(self.object_url(bucket, key)).body(data))
            .send()
            .await?;
        self.check(&resp, bucket, key, "put_object")
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        let resp = retry_send(|| {
            self.authorize(self.client.get(self.object_url(bucket, key)))
                .send()
        })
        .await?;
        self.check(&resp, bucket, key, "get_object")?;
        Ok(resp.bytes().await?)
    }

    async fn stat_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectMeta>, StoreError> {
        let resp = retry_send(|| {
            self.authorize(self.client.head(self.object_url(bucket, key)))
                .send()
        })
        .await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let size = resp
                    .headers()
                    .get(reqwest::header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                // HEAD answers the existence question; listings carry the
                // authoritative timestamps. Stores that omit Last-Modified
                // here report the epoch.
                let last_modified = resp
                    .headers()
                    .get(reqwest::header::LAST_MODIFIED)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
                Ok(Some(ObjectMeta {
                    key: key.to_string(),
                    size,
                    last_modified,
                }))
            }
            s => Err(self.fail(s, bucket, key, "stat_object")),
        }
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectMeta>, StoreError> {
        let resp = retry_send(|| {
            self.authorize(
                self.client
                    .get(self.bucket_url(bucket))
                    .query(&[("list", "1"), ("prefix", prefix)]),
            )
            .send()
        })
        .await?;
        self.check(&resp, bucket, "", "list_objects")?;
        let body = resp.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| StoreError::InvalidResponse(format!("list of {bucket}: {e}")))
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let resp = self
            .authorize(self.client.delete(self.object_url(bucket, key)))
            .send()
            .await?;
        match resp.status() {
            s if s.is_success() => Ok(()),
            // Key already absent — removal is idempotent.
            StatusCode::NOT_FOUND => Ok(()),
            s => Err(self.fail(s, bucket, key, "remove_object")),
        }
    }

    async fn create_multipart(&self, bucket: &str, key: &str) -> Result<UploadId, StoreError> {
        let resp = self
            .authorize(
                self.client
                    .post(self.object_url(bucket, key))
                    .query(&[("uploads", "1")]),
            )
            .send()
            .await?;
        self.check(&resp, bucket, key, "create_multipart")?;
        let body = resp.text().await?;
        let created: CreatedUpload = serde_json::from_str(&body)
            .map_err(|e| StoreError::InvalidResponse(format!("create_multipart: {e}")))?;
        Ok(UploadId::new(created.upload_id))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &UploadId,
        part_number: u32,
        data: Bytes,
    ) -> Result<CompletedPart, StoreError> {
        let resp = self
            .authorize(
                self.client
                    .put(self.object_url(bucket, key))
                    .query(&[
                        ("uploadId", upload_id.as_str()),
                        ("partNumber", &part_number.to_string()),
                    ])
                    .body(data),
            )
            .send()
            .await?;
        self.check(&resp, bucket, key, "upload_part")?;
        let etag = resp
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim_matches('"').to_string())
            .ok_or_else(|| {
                StoreError::InvalidResponse(format!(
                    "missing ETag for part {part_number} of {bucket}/{key}"
                ))
            })?;
        Ok(CompletedPart { part_number, etag })
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &UploadId,
        parts: Vec<CompletedPart>,
    ) -> Result<(), StoreError> {
        let resp = self
            .authorize(
                self.client
                    .post(self.object_url(bucket, key))
                    .query(&[("uploadId", upload_id.as_str())])
                    .json(&CompleteRequest { parts: &parts }),
            )
            .send()
            .await?;
        self.check(&resp, bucket, key, "complete_multipart")
    }

    async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &UploadId,
    ) -> Result<(), StoreError> {
        let resp = self
            .authorize(
                self.client
                    .delete(self.object_url(bucket, key))
                    .query(&[("uploadId", upload_id.as_str())]),
            )
            .send()
            .await?;
        match resp.status() {
            s if s.is_success() => Ok(()),
            // Session already gone — aborting is idempotent.
            StatusCode::NOT_FOUND => Ok(()),
            s => Err(self.fail(s, bucket, key, "abort_multipart")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> HttpObjectStore {
        HttpObjectStore::new("http://store.local:9000/", Some("tok".into())).unwrap()
    }

    #[test]
    fn endpoint_trailing_slash_trimmed() {
        let s = store();
        assert_eq!(s.bucket_url("datasets"), "http://store.local:9000/datasets");
    }

    #[test]
    fn object_url_joins_and_trims_leading_slash() {
        let s = store();
        assert_eq!(
            s.object_url("datasets", "/iris/data.csv"),
            "http://store.local:9000/datasets/iris/data.csv"
        );
    }

    #[test]
    fn empty_token_treated_as_absent() {
        let s = HttpObjectStore::new("http://x", Some(String::new())).unwrap();
        assert!(s.bearer_token.is_none());
    }

    #[test]
    fn status_mapping() {
        let s = store();
        assert!(matches!(
            s.fail(StatusCode::NOT_FOUND, "b", "k", "ctx"),
            StoreError::NotFound { .. }
        ));
        assert!(matches!(
            s.fail(StatusCode::FORBIDDEN, "b", "k", "ctx"),
            StoreError::PermissionDenied { .. }
        ));
        assert!(matches!(
            s.fail(StatusCode::UNAUTHORIZED, "b", "k", "ctx"),
            StoreError::PermissionDenied { .. }
        ));
        assert!(matches!(
            s.fail(StatusCode::INTERNAL_SERVER_ERROR, "b", "k", "ctx"),
            StoreError::UnexpectedStatus { status: 500, .. }
        ));
    }
}
