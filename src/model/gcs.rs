use std::time::Duration;

use async_trait::async_trait;
use google_cloud_storage::{
    client::{Client, ClientConfig},
    http::{
        buckets::{
            delete::DeleteBucketRequest,
            get::GetBucketRequest,
            insert::{InsertBucketParam, InsertBucketRequest},
        },
        objects::{
            compose::{ComposeObjectRequest, ComposingTargets},
            delete::DeleteObjectRequest,
            download::Range,
            get::GetObjectRequest,
            list::ListObjectsRequest,
            rewrite::RewriteObjectRequest,
            upload::{Media, UploadObjectRequest, UploadType},
            Object, SourceObjects,
        },
    },
    http::storage_client::StorageClient,
    sign::{SignedURLMethod, SignedURLOptions, URLStyle},
};
use tokio::runtime::Runtime;

use crate::{
    config::GcsConfig,
    model::{
        error::{StorageError, StorageResult},
        http::HttpMethod,
    },
    util,
};

/// Where a rewrite stands after one provider call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RewriteProgress {
    pub bytes_rewritten: i64,
    pub object_size: i64,
    pub done: bool,
    pub rewrite_token: Option<String>,
}

/// Provider primitives the GCS adapter is written against.
///
/// HTTP 404 comes back as `false`/`None`; everything else the provider
/// refuses is a `StorageError::Provider`.
#[async_trait]
pub trait GcsApi: Send + Sync + Sized {
    fn connect(config: &GcsConfig, runtime: &Runtime) -> StorageResult<Self>;

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool>;

    async fn insert_bucket(&self, project: &str, bucket: &str) -> StorageResult<()>;

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()>;

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Option<Object>>;

    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<()>;

    async fn download_object(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>>;

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()>;

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        page_token: Option<String>,
    ) -> StorageResult<(Vec<Object>, Option<String>)>;

    async fn rewrite_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        destination_bucket: &str,
        destination_key: &str,
        rewrite_token: Option<String>,
    ) -> StorageResult<RewriteProgress>;

    async fn compose_object(
        &self,
        bucket: &str,
        destination: &str,
        sources: &[&str],
    ) -> StorageResult<()>;

    async fn signed_url(
        &self,
        bucket: &str,
        key: &str,
        method: HttpMethod,
        expires: Duration,
        content_type: Option<&str>,
        hostname: Option<&str>,
    ) -> StorageResult<String>;
}

fn http_error(context: &str, err: google_cloud_storage::http::Error) -> StorageError {
    match err {
        google_cloud_storage::http::Error::Response(resp) => StorageError::Provider {
            code: resp.code.to_string(),
            message: format!("failed to {}: {}", context, resp.message),
        },
        err => StorageError::provider("Transport", format!("failed to {}: {}", context, err)),
    }
}

fn is_not_found(err: &google_cloud_storage::http::Error) -> bool {
    matches!(err, google_cloud_storage::http::Error::Response(resp) if resp.code == 404)
}

fn signed_url_method(method: HttpMethod) -> SignedURLMethod {
    match method {
        HttpMethod::Get => SignedURLMethod::GET,
        HttpMethod::Head => SignedURLMethod::HEAD,
        HttpMethod::Put => SignedURLMethod::PUT,
        HttpMethod::Post => SignedURLMethod::POST,
        HttpMethod::Delete => SignedURLMethod::DELETE,
    }
}

#[async_trait]
impl GcsApi for Client {
    fn connect(config: &GcsConfig, runtime: &Runtime) -> StorageResult<Self> {
        let client_config = match &config.emulator_host {
            Some(endpoint) => {
                let mut client_config = ClientConfig::default().anonymous();
                client_config.storage_endpoint = endpoint.base_url(config.secure);
                client_config
            }
            None => util::poll::poll_until_ready(runtime, ClientConfig::default().with_auth())
                .map_err(|err| {
                    StorageError::Configuration(format!("failed to load gcs credentials: {}", err))
                })?,
        };

        let mut client_config = client_config;
        if config.project.is_some() {
            client_config.project_id = config.project.clone();
        }

        Ok(Client::new(client_config))
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        let req = GetBucketRequest {
            bucket: bucket.to_string(),
            ..Default::default()
        };

        match StorageClient::get_bucket(self, &req).await {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(http_error(&format!("get_bucket: {}", bucket), err)),
        }
    }

    async fn insert_bucket(&self, project: &str, bucket: &str) -> StorageResult<()> {
        let req = InsertBucketRequest {
            name: bucket.to_string(),
            param: InsertBucketParam {
                project: project.to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        StorageClient::insert_bucket(self, &req)
            .await
            .map_err(|err| http_error(&format!("insert_bucket: {}", bucket), err))?;

        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        let req = DeleteBucketRequest {
            bucket: bucket.to_string(),
            ..Default::default()
        };

        StorageClient::delete_bucket(self, &req)
            .await
            .map_err(|err| http_error(&format!("delete_bucket: {}", bucket), err))?;

        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Option<Object>> {
        let req = GetObjectRequest {
            bucket: bucket.to_string(),
            object: key.to_string(),
            ..Default::default()
        };

        match StorageClient::get_object(self, &req).await {
            Ok(obj) => Ok(Some(obj)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(http_error(&format!("get_object: {}", key), err)),
        }
    }

    async fn upload_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<()> {
        let req = UploadObjectRequest {
            bucket: bucket.to_string(),
            ..Default::default()
        };

        let mut media = Media::new(key.to_string());
        media.content_type = content_type.to_string().into();
        media.content_length = Some(body.len() as u64);

        StorageClient::upload_object(self, &req, body, &UploadType::Simple(media))
            .await
            .map_err(|err| http_error(&format!("put_object at: {}", key), err))?;

        Ok(())
    }

    async fn download_object(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        let req = GetObjectRequest {
            bucket: bucket.to_string(),
            object: key.to_string(),
            ..Default::default()
        };

        StorageClient::download_object(self, &req, &Range::default())
            .await
            .map_err(|err| http_error(&format!("download_object: {}", key), err))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let req = DeleteObjectRequest {
            bucket: bucket.to_string(),
            object: key.to_string(),
            ..Default::default()
        };

        StorageClient::delete_object(self, &req)
            .await
            .map_err(|err| http_error(&format!("delete_object: {}", key), err))
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        page_token: Option<String>,
    ) -> StorageResult<(Vec<Object>, Option<String>)> {
        let req = ListObjectsRequest {
            bucket: bucket.to_string(),
            prefix: prefix.map(str::to_string),
            page_token,
            ..Default::default()
        };

        let lo = StorageClient::list_objects(self, &req).await.map_err(|err| {
            http_error(
                &format!("list_objects at: {}", prefix.unwrap_or("")),
                err,
            )
        })?;

        Ok((lo.items.unwrap_or_default(), lo.next_page_token))
    }

    async fn rewrite_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        destination_bucket: &str,
        destination_key: &str,
        rewrite_token: Option<String>,
    ) -> StorageResult<RewriteProgress> {
        let req = RewriteObjectRequest {
            source_bucket: source_bucket.to_string(),
            source_object: source_key.to_string(),
            destination_bucket: destination_bucket.to_string(),
            destination_object: destination_key.to_string(),
            rewrite_token,
            ..Default::default()
        };

        let resp = StorageClient::rewrite_object(self, &req).await.map_err(|err| {
            http_error(
                &format!("rewrite_object: {}/{}", source_bucket, source_key),
                err,
            )
        })?;

        Ok(RewriteProgress {
            bytes_rewritten: resp.total_bytes_rewritten,
            object_size: resp.object_size,
            done: resp.done,
            rewrite_token: resp.rewrite_token,
        })
    }

    async fn compose_object(
        &self,
        bucket: &str,
        destination: &str,
        sources: &[&str],
    ) -> StorageResult<()> {
        let source_objects = sources
            .iter()
            .map(|name| SourceObjects {
                name: name.to_string(),
                ..Default::default()
            })
            .collect();

        let req = ComposeObjectRequest {
            bucket: bucket.to_string(),
            destination_object: destination.to_string(),
            composing_targets: ComposingTargets {
                source_objects,
                destination: None,
            },
            ..Default::default()
        };

        StorageClient::compose_object(self, &req)
            .await
            .map_err(|err| http_error(&format!("compose_object: {}", destination), err))?;

        Ok(())
    }

    async fn signed_url(
        &self,
        bucket: &str,
        key: &str,
        method: HttpMethod,
        expires: Duration,
        content_type: Option<&str>,
        hostname: Option<&str>,
    ) -> StorageResult<String> {
        let style = match hostname {
            Some(hostname) => URLStyle::BucketBoundHostname(hostname.to_string()),
            None => URLStyle::PathStyle,
        };

        let opts = SignedURLOptions {
            method: signed_url_method(method),
            expires,
            content_type: content_type.map(str::to_string),
            style,
            ..Default::default()
        };

        Client::signed_url(self, bucket, key, None, None, opts)
            .await
            .map_err(|err| StorageError::provider("SigningError", err.to_string()))
    }
}
