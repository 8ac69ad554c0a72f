use std::time::Duration;

use tracing::warn;
use url::Url;

use crate::{
    config::RemoveBucketPolicy,
    model::{
        error::{Resource, StorageError, StorageResult},
        http::HttpMethod,
        object::StorageObject,
    },
    util::path,
};

pub mod gcs;
#[cfg(test)]
pub mod mock;
pub mod s3;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Optional inputs to `get_presigned_url`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PresignOptions {
    /// Validity window of the URL. Not an operation timeout.
    pub expires: Option<Duration>,
    pub content_type: Option<String>,
    /// Host to put in the URL instead of the configured one.
    pub use_hostname: Option<String>,
    /// Forces `https` (`true`) or `http` (`false`).
    pub secure: Option<bool>,
}

impl PresignOptions {
    pub fn expires(mut self, expires: Duration) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn use_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.use_hostname = Some(hostname.into());
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = Some(secure);
        self
    }
}

/// The operations every storage backend offers.
///
/// Adapters start unconfigured; every operation but `configure` fails with
/// `StorageError::NotConfigured` until it has run. Every operation that
/// addresses an object checks the bucket first, and reads check the object,
/// so callers see `StorageError::NotFound` instead of whatever the provider
/// happens to return.
pub trait StorageClient: Send + Sync {
    /// Short provider name used in logs and errors.
    fn provider(&self) -> &'static str;

    /// Builds the client and freezes configuration. A second call is a no-op.
    fn configure(&mut self) -> StorageResult<()>;

    fn is_configured(&self) -> bool;

    fn bucket_exists(&self, bucket: &str) -> StorageResult<bool>;

    /// Fails with `AlreadyExists` rather than succeeding twice.
    fn make_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Empties the bucket, then deletes it. What happens when a member
    /// cannot be deleted is decided by the configured `RemoveBucketPolicy`.
    fn remove_bucket(&self, bucket: &str) -> StorageResult<()>;

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: Option<&str>,
    ) -> StorageResult<()>;

    fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>>;

    fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Re-checks the bucket on every call. Only a "no such key" answer is
    /// `false`; other provider failures are errors.
    fn object_exists(&self, bucket: &str, key: &str) -> StorageResult<bool>;

    fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> StorageResult<Vec<StorageObject>>;

    fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        destination_bucket: &str,
        destination_key: &str,
    ) -> StorageResult<()>;

    /// Replaces `destination` with the bytes of `sources`, in list order.
    /// `destination` and every source must already exist.
    fn concat_objects(&self, bucket: &str, destination: &str, sources: &[&str]) -> StorageResult<()>;

    /// Lowercase hex md5 of the object content.
    fn md5_checksum(&self, bucket: &str, key: &str) -> StorageResult<String>;

    fn get_presigned_url(
        &self,
        bucket: &str,
        key: &str,
        method: HttpMethod,
        options: &PresignOptions,
    ) -> StorageResult<String>;

    /// Copy then delete. Not atomic: if the delete never happens both
    /// objects are left behind.
    fn rename_object(&self, bucket: &str, key: &str, new_key: &str) -> StorageResult<()> {
        self.copy_object(bucket, key, bucket, new_key)?;
        self.delete_object(bucket, key)
    }

    fn require_bucket(&self, bucket: &str) -> StorageResult<()> {
        if !self.bucket_exists(bucket)? {
            return Err(StorageError::NotFound(Resource::bucket(bucket)));
        }

        Ok(())
    }

    fn require_absent_bucket(&self, bucket: &str) -> StorageResult<()> {
        if self.bucket_exists(bucket)? {
            return Err(StorageError::AlreadyExists(bucket.to_string()));
        }

        Ok(())
    }

    /// Bucket check included, through `object_exists`.
    fn require_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        if !self.object_exists(bucket, key)? {
            return Err(StorageError::NotFound(Resource::object(bucket, key)));
        }

        Ok(())
    }
}

/// `{scheme}://{host}/{bucket}/{key}` with every path segment percent-encoded
/// once, leaving only RFC 3986 unreserved characters literal. Slashes in `key` stay path separators.
pub(crate) fn object_url(secure: bool, host: &str, bucket: &str, key: &str) -> StorageResult<Url> {
    let scheme = if secure { "https" } else { "http" };
    let raw = format!(
        "{}://{}/{}/{}",
        scheme,
        host,
        path::encode_segment(bucket),
        path::encode_key(key)
    );

    Url::parse(&raw)
        .map_err(|err| StorageError::invalid(format!("invalid hostname {}: {}", host, err)))
}

/// Decides what the member failures collected while emptying `bucket` mean
/// for the bucket delete that follows. `Ok` means go ahead.
pub(crate) fn settle_member_removal(
    policy: RemoveBucketPolicy,
    bucket: &str,
    failures: Vec<(String, StorageError)>,
) -> StorageResult<()> {
    let Some((first_key, first_err)) = failures.first() else {
        return Ok(());
    };

    match policy {
        RemoveBucketPolicy::FailFast => {
            let code = match first_err {
                StorageError::Provider { code, .. } => code.clone(),
                _ => "RemoveBucket".to_string(),
            };

            Err(StorageError::Provider {
                code,
                message: format!(
                    "{} object(s) could not be removed from bucket {}; first failure on {}: {}",
                    failures.len(),
                    bucket,
                    first_key,
                    first_err
                ),
            })
        }
        RemoveBucketPolicy::BestEffort => {
            for (key, err) in &failures {
                warn!(bucket=bucket, key=key, error_message=%err, error_group="remove_bucket", "skipped object");
            }

            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presign_options_builder() {
        let options = PresignOptions::default()
            .expires(Duration::from_secs(60))
            .content_type("application/json")
            .use_hostname("h123")
            .secure(false);

        assert_eq!(options.expires, Some(Duration::from_secs(60)));
        assert_eq!(options.content_type.as_deref(), Some("application/json"));
        assert_eq!(options.use_hostname.as_deref(), Some("h123"));
        assert_eq!(options.secure, Some(false));
    }

    #[test]
    fn test_object_url() {
        let cases = vec![
            (true, "h123", "b", "k", "https://h123/b/k"),
            (false, "localhost:9000", "b", "dir/k", "http://localhost:9000/b/dir/k"),
            (true, "h123", "b", "new object", "https://h123/b/new%20object"),
            (true, "h123", "b", "a?b#c", "https://h123/b/a%3Fb%23c"),
            (true, "h123", "b", "report (1).pdf", "https://h123/b/report%20%281%29.pdf"),
            (true, "h123", "b", "a+b=c&d", "https://h123/b/a%2Bb%3Dc%26d"),
        ];

        for (secure, host, bucket, key, expected) in cases {
            let url = object_url(secure, host, bucket, key).unwrap();
            assert_eq!(url.as_str(), expected, "failed for case: {}", key);
        }

        assert!(matches!(
            object_url(true, "bad host", "b", "k"),
            Err(StorageError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_settle_member_removal() {
        let failures = || {
            vec![
                ("a".to_string(), StorageError::provider("AccessDenied", "nope")),
                ("b".to_string(), StorageError::provider("AccessDenied", "nope")),
            ]
        };

        assert!(settle_member_removal(RemoveBucketPolicy::FailFast, "bucket", Vec::new()).is_ok());
        assert!(settle_member_removal(RemoveBucketPolicy::BestEffort, "bucket", failures()).is_ok());

        match settle_member_removal(RemoveBucketPolicy::FailFast, "bucket", failures()) {
            Err(StorageError::Provider { code, message }) => {
                assert_eq!(code, "AccessDenied");
                assert!(message.starts_with("2 object(s) could not be removed from bucket bucket"), "{}", message);
                assert!(message.contains("first failure on a"), "{}", message);
            }
            other => panic!("expected provider error, got {:?}", other),
        }
    }
}
