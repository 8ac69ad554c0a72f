use base64::{engine::general_purpose::STANDARD, Engine as _};
use md5::{Digest, Md5};
use time::OffsetDateTime;

use crate::model::error::{StorageError, StorageResult};

/// A listing entry, the same shape whichever provider produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageObject {
    pub name: String,
    pub size: u64,
    pub last_modified: Option<OffsetDateTime>,
}

impl From<&aws_sdk_s3::types::Object> for StorageObject {
    fn from(obj: &aws_sdk_s3::types::Object) -> Self {
        let last_modified = obj.last_modified().and_then(|lm| {
            OffsetDateTime::from_unix_timestamp(lm.secs())
                .ok()
                .map(|t| t + time::Duration::nanoseconds(lm.subsec_nanos() as i64))
        });

        StorageObject {
            name: obj.key().unwrap_or("").to_string(),
            size: obj.size().unwrap_or(0).max(0) as u64,
            last_modified,
        }
    }
}

impl From<&google_cloud_storage::http::objects::Object> for StorageObject {
    fn from(obj: &google_cloud_storage::http::objects::Object) -> Self {
        StorageObject {
            name: obj.name.clone(),
            size: obj.size.max(0) as u64,
            last_modified: obj.updated,
        }
    }
}

/// Lowercase hex md5 of raw bytes.
pub fn md5_hex(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// GCS reports `md5Hash` as base64 of the digest bytes.
pub fn md5_hex_from_base64(encoded: &str) -> StorageResult<String> {
    let digest = STANDARD.decode(encoded.trim()).map_err(|err| {
        StorageError::provider(
            "InvalidDigest",
            format!("failed to decode md5 hash: {}, {}", encoded, err),
        )
    })?;

    Ok(hex::encode(digest))
}

/// An S3 ETag is the hex md5 only for single-part uploads; multipart ETags
/// carry a `-<parts>` suffix and yield `None`.
pub fn md5_hex_from_etag(etag: &str) -> Option<String> {
    let etag = etag.trim().trim_matches('"');
    if etag.len() == 32 && etag.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(etag.to_ascii_lowercase())
    } else {
        None
    }
}
