use async_trait::async_trait;
use aws_sdk_s3::{
    config::{BehaviorVersion, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    operation::head_object::HeadObjectOutput,
    primitives::ByteStream,
    types::{
        BucketLocationConstraint, CreateBucketConfiguration, Delete, Object, ObjectIdentifier,
    },
};
use tokio::runtime::Runtime;

use crate::{
    config::{S3Config, DEFAULT_REGION},
    model::error::{StorageError, StorageResult},
    util,
};

/// One key `delete_objects` could not remove.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteFailure {
    pub key: String,
    pub code: String,
    pub message: String,
}

/// Provider primitives the S3 adapter is written against.
///
/// "Missing" answers come back as `false`/`None`; everything else the
/// provider refuses is a `StorageError::Provider`.
#[async_trait]
pub trait S3Api: Send + Sync + Sized {
    fn connect(config: &S3Config, runtime: &Runtime) -> StorageResult<Self>;

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool>;

    async fn create_bucket(&self, bucket: &str, region: &str) -> StorageResult<()>;

    async fn put_bucket_policy(&self, bucket: &str, policy: &str) -> StorageResult<()>;

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()>;

    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<Option<HeadObjectOutput>>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<()>;

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>>;

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()>;

    async fn delete_objects(
        &self,
        bucket: &str,
        keys: Vec<String>,
    ) -> StorageResult<Vec<DeleteFailure>>;

    async fn list_objects_v2(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        continuation_token: Option<String>,
    ) -> StorageResult<(Vec<Object>, Option<String>)>;

    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        destination_bucket: &str,
        destination_key: &str,
    ) -> StorageResult<()>;
}

/// Value of `x-amz-copy-source`, which S3 reads as a URL-encoded path.
pub(crate) fn copy_source(bucket: &str, key: &str) -> String {
    format!(
        "{}/{}",
        util::path::encode_segment(bucket),
        util::path::encode_key(key)
    )
}

fn sdk_error<E, R>(context: &str, err: SdkError<E, R>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug + 'static,
{
    let code = err.code().unwrap_or("Unknown").to_string();
    let message = match err.message() {
        Some(message) => format!("failed to {}: {}", context, message),
        None => format!("failed to {}: {}", context, DisplayErrorContext(&err)),
    };

    StorageError::Provider { code, message }
}

#[async_trait]
impl S3Api for aws_sdk_s3::Client {
    fn connect(config: &S3Config, runtime: &Runtime) -> StorageResult<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let Some(credentials) = &config.credentials {
            loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
                credentials.access_key.clone(),
                credentials.secret_key.clone(),
                credentials.session_token.clone(),
                None,
                "multicloud-storage",
            ));
        }

        let shared = util::poll::poll_until_ready(runtime, loader.load());

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .endpoint_url(endpoint.base_url(config.secure))
                .force_path_style(true);
        }

        Ok(aws_sdk_s3::Client::from_conf(builder.build()))
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        match self.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                if let Some(svc_err) = err.as_service_error() {
                    if svc_err.is_not_found() {
                        return Ok(false);
                    }
                }
                if err.code() == Some("NoSuchBucket") {
                    return Ok(false);
                }

                Err(sdk_error(&format!("head_bucket: {}", bucket), err))
            }
        }
    }

    async fn create_bucket(&self, bucket: &str, region: &str) -> StorageResult<()> {
        let mut req = self.create_bucket().bucket(bucket);

        if region != DEFAULT_REGION {
            req = req.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }

        req.send()
            .await
            .map_err(|err| sdk_error(&format!("create_bucket: {}", bucket), err))?;

        Ok(())
    }

    async fn put_bucket_policy(&self, bucket: &str, policy: &str) -> StorageResult<()> {
        self.put_bucket_policy()
            .bucket(bucket)
            .policy(policy)
            .send()
            .await
            .map_err(|err| sdk_error(&format!("put_bucket_policy: {}", bucket), err))?;

        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|err| sdk_error(&format!("delete_bucket: {}", bucket), err))?;

        Ok(())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<Option<HeadObjectOutput>> {
        match self.head_object().bucket(bucket).key(key).send().await {
            Ok(ho) => Ok(Some(ho)),
            Err(err) => {
                if let Some(svc_err) = err.as_service_error() {
                    if svc_err.is_not_found() {
                        return Ok(None);
                    }
                }
                if err.code() == Some("NoSuchKey") {
                    return Ok(None);
                }

                Err(sdk_error(&format!("head_object: {}", key), err))
            }
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<()> {
        self.put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| sdk_error(&format!("put_object at: {}", key), err))?;

        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        let o = self
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| sdk_error(&format!("get_object: {}", key), err))?;

        let bytes = o.body.collect().await.map_err(|err| {
            StorageError::provider(
                "ResponseBody",
                format!("failed to collect body: {}, {}", key, err),
            )
        })?;

        Ok(bytes.into_bytes().to_vec())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| sdk_error(&format!("delete_object: {}", key), err))?;

        Ok(())
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        keys: Vec<String>,
    ) -> StorageResult<Vec<DeleteFailure>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut identifiers = Vec::with_capacity(keys.len());
        for key in keys {
            let identifier = ObjectIdentifier::builder().key(key).build().map_err(|err| {
                StorageError::invalid(format!("failed to build object identifier: {}", err))
            })?;
            identifiers.push(identifier);
        }

        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(true)
            .build()
            .map_err(|err| {
                StorageError::invalid(format!("failed to build delete request: {}", err))
            })?;

        let out = self
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|err| sdk_error(&format!("delete_objects in: {}", bucket), err))?;

        Ok(out
            .errors()
            .iter()
            .map(|e| DeleteFailure {
                key: e.key().unwrap_or("").to_string(),
                code: e.code().unwrap_or("Unknown").to_string(),
                message: e.message().unwrap_or("").to_string(),
            })
            .collect())
    }

    async fn list_objects_v2(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        continuation_token: Option<String>,
    ) -> StorageResult<(Vec<Object>, Option<String>)> {
        let mut req = self.list_objects_v2().bucket(bucket);

        if let Some(prefix) = prefix {
            req = req.prefix(prefix);
        }
        if let Some(tok) = continuation_token {
            req = req.continuation_token(tok);
        }

        let lo = req.send().await.map_err(|err| {
            sdk_error(
                &format!("list_objects at: {}", prefix.unwrap_or("")),
                err,
            )
        })?;

        let token = lo.next_continuation_token().map(|tok| tok.to_string());
        Ok((lo.contents.unwrap_or_default(), token))
    }

    async fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        destination_bucket: &str,
        destination_key: &str,
    ) -> StorageResult<()> {
        self.copy_object()
            .copy_source(copy_source(source_bucket, source_key))
            .bucket(destination_bucket)
            .key(destination_key)
            .send()
            .await
            .map_err(|err| {
                sdk_error(
                    &format!("copy_object: {}/{}", source_bucket, source_key),
                    err,
                )
            })?;

        Ok(())
    }
}
