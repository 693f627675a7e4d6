// src/storage/mod.rs — Object storage for recordings
//
// The API never proxies audio bytes: clients PUT to a presigned URL and the
// transcription job downloads through the same abstraction.

pub mod keys;
pub mod s3;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::infra::errors::DeskError;

pub use s3::S3Storage;

/// A signed request the client performs itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresignedRequest {
    pub url: String,
    pub method: String,
    /// Headers the client must send verbatim (they are part of the signature).
    pub headers: BTreeMap<String, String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMeta {
    pub size: u64,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    fn presign_upload(&self, key: &str, content_type: &str) -> Result<PresignedRequest, DeskError>;

    fn presign_download(&self, key: &str) -> Result<PresignedRequest, DeskError>;

    /// `None` when the object does not exist.
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, DeskError>;

    async fn download(&self, key: &str) -> Result<Vec<u8>, DeskError>;

    async fn delete(&self, key: &str) -> Result<(), DeskError>;
}
