use tracing::{debug, error, span, Level};

use crate::{
    adapters::{gcs::GcsAdapter, s3::S3Adapter, PresignOptions, StorageClient},
    model::{
        error::{StorageError, StorageResult},
        http::HttpMethod,
        object::StorageObject,
    },
    util::object::Provider,
};

fn observe<T>(group: &'static str, result: StorageResult<T>) -> StorageResult<T> {
    if let Err(err) = &result {
        error!(error_message=%err, error_group=group);
    }

    result
}

/// One configured adapter behind the provider-neutral API.
///
/// Calls are forwarded unchanged. Each one runs inside a span and is logged
/// with its bucket and key names.
pub struct Storage {
    client: Box<dyn StorageClient>,
}

impl Storage {
    /// Configures `client` and takes ownership of it.
    pub fn new<C: StorageClient + 'static>(mut client: C) -> StorageResult<Self> {
        let span = span!(Level::DEBUG, "storage", context = "storage");
        let _e = span.enter();

        observe("configure", client.configure())?;
        debug!(provider = client.provider(), "storage ready");

        Ok(Storage {
            client: Box::new(client),
        })
    }

    /// The default adapter for `provider`, configured from the environment.
    pub fn connect(provider: Provider) -> StorageResult<Self> {
        match provider {
            Provider::AWS => Self::new(S3Adapter::new()),
            Provider::GCS => Self::new(GcsAdapter::new()),
        }
    }

    pub fn provider(&self) -> &'static str {
        self.client.provider()
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_configured()
    }

    pub fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        let span = span!(Level::DEBUG, "bucket_exists", context = "bucket_exists");
        let _e = span.enter();

        debug!(bucket = bucket);
        observe("bucket_exists", self.client.bucket_exists(bucket))
    }

    pub fn make_bucket(&self, bucket: &str) -> StorageResult<()> {
        let span = span!(Level::DEBUG, "make_bucket", context = "make_bucket");
        let _e = span.enter();

        debug!(bucket = bucket);
        observe("make_bucket", self.client.make_bucket(bucket))
    }

    pub fn remove_bucket(&self, bucket: &str) -> StorageResult<()> {
        let span = span!(Level::DEBUG, "remove_bucket", context = "remove_bucket");
        let _e = span.enter();

        debug!(bucket = bucket);
        observe("remove_bucket", self.client.remove_bucket(bucket))
    }

    pub fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: impl Into<Vec<u8>>,
        content_type: Option<&str>,
    ) -> StorageResult<()> {
        let span = span!(Level::DEBUG, "put_object", context = "put_object");
        let _e = span.enter();

        let data = data.into();
        debug!(bucket = bucket, key = key, size = data.len(), content_type = content_type);
        observe(
            "put_object",
            self.client.put_object(bucket, key, data, content_type),
        )
    }

    pub fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        let span = span!(Level::DEBUG, "get_object", context = "get_object");
        let _e = span.enter();

        debug!(bucket = bucket, key = key);
        observe("get_object", self.client.get_object(bucket, key))
    }

    pub fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let span = span!(Level::DEBUG, "delete_object", context = "delete_object");
        let _e = span.enter();

        debug!(bucket = bucket, key = key);
        observe("delete_object", self.client.delete_object(bucket, key))
    }

    pub fn object_exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        let span = span!(Level::DEBUG, "object_exists", context = "object_exists");
        let _e = span.enter();

        debug!(bucket = bucket, key = key);
        observe("object_exists", self.client.object_exists(bucket, key))
    }

    pub fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> StorageResult<Vec<StorageObject>> {
        let span = span!(Level::DEBUG, "list_objects", context = "list_objects");
        let _e = span.enter();

        debug!(bucket = bucket, prefix = prefix);
        observe("list_objects", self.client.list_objects(bucket, prefix))
    }

    pub fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        destination_bucket: &str,
        destination_key: &str,
    ) -> StorageResult<()> {
        let span = span!(Level::DEBUG, "copy_object", context = "copy_object");
        let _e = span.enter();

        debug!(
            source_bucket = source_bucket,
            source_key = source_key,
            destination_bucket = destination_bucket,
            destination_key = destination_key
        );
        observe(
            "copy_object",
            self.client
                .copy_object(source_bucket, source_key, destination_bucket, destination_key),
        )
    }

    /// Copy then delete; see `StorageClient::rename_object`.
    pub fn rename_object(&self, bucket: &str, key: &str, new_key: &str) -> StorageResult<()> {
        let span = span!(Level::DEBUG, "rename_object", context = "rename_object");
        let _e = span.enter();

        debug!(bucket = bucket, key = key, new_key = new_key);
        observe("rename_object", self.client.rename_object(bucket, key, new_key))
    }

    pub fn concat_objects(&self, bucket: &str, destination: &str, sources: &[&str]) -> StorageResult<()> {
        let span = span!(Level::DEBUG, "concat_objects", context = "concat_objects");
        let _e = span.enter();

        debug!(bucket = bucket, destination = destination, sources = ?sources);
        observe(
            "concat_objects",
            self.client.concat_objects(bucket, destination, sources),
        )
    }

    pub fn md5_checksum(&self, bucket: &str, key: &str) -> StorageResult<String> {
        let span = span!(Level::DEBUG, "md5_checksum", context = "md5_checksum");
        let _e = span.enter();

        debug!(bucket = bucket, key = key);
        observe("md5_checksum", self.client.md5_checksum(bucket, key))
    }

    /// `method` is an `HttpMethod` or any string naming one (`"get"`, `"PUT"`).
    pub fn get_presigned_url<M>(
        &self,
        bucket: &str,
        key: &str,
        method: M,
        options: &PresignOptions,
    ) -> StorageResult<String>
    where
        M: TryInto<HttpMethod>,
        StorageError: From<M::Error>,
    {
        let span = span!(Level::DEBUG, "get_presigned_url", context = "get_presigned_url");
        let _e = span.enter();

        let method = observe("get_presigned_url", method.try_into().map_err(StorageError::from))?;
        debug!(bucket = bucket, key = key, method = %method, options = ?options);
        observe(
            "get_presigned_url",
            self.client.get_presigned_url(bucket, key, method, options),
        )
    }
}
