//! # yard-store
//!
//! Artifact storage for training runs, built on an S3-style object store
//! spoken over plain HTTP.
//!
//! ## Layers
//!
//! - [`object_store`] — the store contract ([`ObjectStore`]) with an HTTP
//!   client ([`http_store`]) and an in-memory double ([`memory`]).
//! - [`upload`] — chunked uploads with multipart cleanup on failure.
//! - [`passwd`] / [`access`] — bucket password policy and the handle that
//!   proves a passed check.
//! - [`retention`] — bounded scratch storage, newest prefixes kept.
//! - [`archive`] — per-run routing of datasets and scripts.
//! - [`fetch`] — materializing stored datasets for a run.
//! - [`lock`] — advisory leases serializing maintenance sweeps.
//!
//! ## Crate Policy
//!
//! Every fallible operation returns [`StoreError`]; callers map its kinds
//! onto their own status codes. Nothing in this crate panics on store
//! responses, and plaintext passwords never leave [`passwd`].

pub mod access;
pub mod archive;
pub mod error;
pub mod fetch;
pub mod http_store;
pub mod lock;
pub mod memory;
pub mod object_store;
pub mod passwd;
pub mod retention;
pub mod upload;

mod retry;

pub use access::{AccessController, BucketHandle};
pub use archive::{ArchiveCoordinator, ArchiveOutcome, StoredArtifact};
pub use error::StoreError;
pub use fetch::fetch_dataset;
pub use http_store::HttpObjectStore;
pub use lock::{LeaseLocks, LockGuard, LockManager};
pub use memory::MemoryObjectStore;
pub use object_store::{CompletedPart, ObjectMeta, ObjectStore, UploadId};
pub use passwd::{digest_password, verify_password, BucketMeta, DatasetMeta};
pub use retention::RetentionManager;
pub use upload::{ChunkedUploader, UploadReport};
