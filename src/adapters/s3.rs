use std::{future::Future, time::SystemTime};

use serde_json::json;
use tokio::runtime::Runtime;
use tracing::{debug, span, warn, Level};

use crate::{
    adapters::{self, PresignOptions, StorageClient, DEFAULT_CONTENT_TYPE},
    config::{RemoveBucketPolicy, S3Config, Settings, UrlMode},
    model::{
        error::{Resource, StorageError, StorageResult},
        http::HttpMethod,
        object::{self, StorageObject},
        s3::S3Api,
    },
    signer::{self, SigV4Signer, SigningRequest, UrlSigner},
    util,
};

const PROVIDER: &str = "s3";

/// Most keys one DeleteObjects request accepts.
const DELETE_BATCH: usize = 1000;

struct Configured<C> {
    client: C,
    config: S3Config,
    runtime: Runtime,
}

impl<C> Configured<C> {
    fn poll<Fut: Future>(&self, future: Fut) -> Fut::Output {
        util::poll::poll_until_ready(&self.runtime, future)
    }
}

/// Adapter for S3 and S3-compatible servers.
pub struct S3Adapter<C: S3Api = aws_sdk_s3::Client> {
    settings: Option<Settings>,
    signer: Box<dyn UrlSigner>,
    state: Option<Configured<C>>,
}

impl S3Adapter<aws_sdk_s3::Client> {
    pub fn new() -> Self {
        Self::unconfigured()
    }
}

impl Default for S3Adapter<aws_sdk_s3::Client> {
    fn default() -> Self {
        Self::new()
    }
}

fn public_read_write_policy(bucket: &str) -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Principal": {"AWS": ["*"]},
                "Action": ["s3:GetBucketLocation", "s3:ListBucket", "s3:ListBucketMultipartUploads"],
                "Resource": [format!("arn:aws:s3:::{}", bucket)],
            },
            {
                "Effect": "Allow",
                "Principal": {"AWS": ["*"]},
                "Action": [
                    "s3:GetObject",
                    "s3:PutObject",
                    "s3:DeleteObject",
                    "s3:AbortMultipartUpload",
                    "s3:ListMultipartUploadParts",
                ],
                "Resource": [format!("arn:aws:s3:::{}/*", bucket)],
            },
        ],
    })
    .to_string()
}

impl<C: S3Api> S3Adapter<C> {
    pub fn unconfigured() -> Self {
        S3Adapter {
            settings: None,
            signer: Box::new(SigV4Signer::new()),
            state: None,
        }
    }

    /// Settings `configure` reads instead of the environment.
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Replaces the SigV4 signer used for presigned URLs.
    pub fn with_signer(mut self, signer: impl UrlSigner + 'static) -> Self {
        self.signer = Box::new(signer);
        self
    }

    /// An adapter that is configured already, around a client built elsewhere.
    pub fn with_client(config: S3Config, client: C) -> StorageResult<Self> {
        Ok(S3Adapter {
            settings: None,
            signer: Box::new(SigV4Signer::new()),
            state: Some(Configured {
                client,
                config,
                runtime: util::poll::new_runtime()?,
            }),
        })
    }

    pub fn config(&self) -> StorageResult<&S3Config> {
        Ok(&self.state()?.config)
    }

    fn state(&self) -> StorageResult<&Configured<C>> {
        self.state
            .as_ref()
            .ok_or(StorageError::NotConfigured(PROVIDER))
    }

    fn list_keys(
        &self,
        state: &Configured<C>,
        bucket: &str,
        prefix: Option<&str>,
    ) -> StorageResult<Vec<aws_sdk_s3::types::Object>> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let (contents, next) =
                state.poll(state.client.list_objects_v2(bucket, prefix, continuation_token))?;
            objects.extend(contents);

            continuation_token = next;
            if continuation_token.is_none() {
                break;
            }
        }

        Ok(objects)
    }

    fn hostname(config: &S3Config, options: &PresignOptions) -> String {
        options
            .use_hostname
            .clone()
            .unwrap_or_else(|| config.default_host())
    }
}

impl<C: S3Api> StorageClient for S3Adapter<C> {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn configure(&mut self) -> StorageResult<()> {
        let span = span!(Level::DEBUG, "configure", context = PROVIDER);
        let _e = span.enter();

        if self.state.is_some() {
            debug!("already configured");
            return Ok(());
        }

        let settings = self.settings.clone().unwrap_or_else(Settings::from_env);
        let config = S3Config::from_settings(&settings)?;

        let runtime = util::poll::new_runtime()?;
        let client = C::connect(&config, &runtime)?;
        debug!(region=%config.region, endpoint=?config.endpoint, url_mode=?config.url_mode, "configured");

        self.state = Some(Configured {
            client,
            config,
            runtime,
        });

        Ok(())
    }

    fn is_configured(&self) -> bool {
        self.state.is_some()
    }

    fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        let state = self.state()?;
        state.poll(state.client.bucket_exists(bucket))
    }

    fn make_bucket(&self, bucket: &str) -> StorageResult<()> {
        let state = self.state()?;
        self.require_absent_bucket(bucket)?;

        state.poll(state.client.create_bucket(bucket, &state.config.region))?;

        if state.config.public_bucket_policy {
            debug!(bucket = bucket, "applying public read/write policy");
            let applied = state.poll(
                state
                    .client
                    .put_bucket_policy(bucket, &public_read_write_policy(bucket)),
            );

            // a bucket without its policy is not one we made
            if let Err(err) = applied {
                if let Err(rollback) = state.poll(state.client.delete_bucket(bucket)) {
                    warn!(
                        bucket = bucket,
                        error_message = %rollback,
                        "failed to roll back bucket after policy error"
                    );
                }
                return Err(err);
            }
        }

        Ok(())
    }

    fn remove_bucket(&self, bucket: &str) -> StorageResult<()> {
        let state = self.state()?;
        self.require_bucket(bucket)?;

        let policy = state.config.remove_bucket_policy;
        let keys: Vec<String> = self
            .list_keys(state, bucket, None)?
            .into_iter()
            .filter_map(|o| o.key)
            .collect();

        let mut failures = Vec::new();
        for batch in keys.chunks(DELETE_BATCH) {
            let failed = state.poll(state.client.delete_objects(bucket, batch.to_vec()))?;
            failures.extend(
                failed
                    .into_iter()
                    .map(|f| (f.key, StorageError::Provider { code: f.code, message: f.message })),
            );

            if policy == RemoveBucketPolicy::FailFast && !failures.is_empty() {
                break;
            }
        }
        adapters::settle_member_removal(policy, bucket, failures)?;

        state.poll(state.client.delete_bucket(bucket))
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: Option<&str>,
    ) -> StorageResult<()> {
        let state = self.state()?;
        self.require_bucket(bucket)?;

        state.poll(state.client.put_object(
            bucket,
            key,
            data,
            content_type.unwrap_or(DEFAULT_CONTENT_TYPE),
        ))
    }

    fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        let state = self.state()?;
        self.require_object(bucket, key)?;

        state.poll(state.client.get_object(bucket, key))
    }

    fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let state = self.state()?;
        self.require_object(bucket, key)?;

        state.poll(state.client.delete_object(bucket, key))
    }

    fn object_exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        let state = self.state()?;
        self.require_bucket(bucket)?;

        Ok(state.poll(state.client.head_object(bucket, key))?.is_some())
    }

    fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> StorageResult<Vec<StorageObject>> {
        let state = self.state()?;
        self.require_bucket(bucket)?;

        Ok(self
            .list_keys(state, bucket, prefix)?
            .iter()
            .map(StorageObject::from)
            .collect())
    }

    fn copy_object(
        &self,
        source_bucket: &str,
        source_key: &str,
        destination_bucket: &str,
        destination_key: &str,
    ) -> StorageResult<()> {
        let state = self.state()?;
        self.require_object(source_bucket, source_key)?;
        self.require_bucket(destination_bucket)?;

        debug!(
            "copying {}/{} to {}/{}",
            source_bucket, source_key, destination_bucket, destination_key
        );

        state.poll(state.client.copy_object(
            source_bucket,
            source_key,
            destination_bucket,
            destination_key,
        ))
    }

    fn concat_objects(&self, bucket: &str, destination: &str, sources: &[&str]) -> StorageResult<()> {
        let state = self.state()?;
        if sources.is_empty() {
            return Err(StorageError::invalid("concat_objects needs at least one source"));
        }

        self.require_bucket(bucket)?;
        let head = state
            .poll(state.client.head_object(bucket, destination))?
            .ok_or_else(|| StorageError::NotFound(Resource::object(bucket, destination)))?;
        for source in sources {
            self.require_object(bucket, source)?;
        }

        let mut data = Vec::new();
        for source in sources {
            data.extend(state.poll(state.client.get_object(bucket, source))?);
        }
        debug!(sources = sources.len(), size = data.len(), "writing concatenated object");

        let content_type = head.content_type().unwrap_or(DEFAULT_CONTENT_TYPE);
        state.poll(state.client.put_object(bucket, destination, data, content_type))
    }

    fn md5_checksum(&self, bucket: &str, key: &str) -> StorageResult<String> {
        let state = self.state()?;
        self.require_bucket(bucket)?;

        let head = state
            .poll(state.client.head_object(bucket, key))?
            .ok_or_else(|| StorageError::NotFound(Resource::object(bucket, key)))?;

        match head.e_tag().and_then(object::md5_hex_from_etag) {
            Some(md5) => Ok(md5),
            // multipart etags are not a content md5
            None => {
                let data = state.poll(state.client.get_object(bucket, key))?;
                Ok(object::md5_hex(&data))
            }
        }
    }

    fn get_presigned_url(
        &self,
        bucket: &str,
        key: &str,
        method: HttpMethod,
        options: &PresignOptions,
    ) -> StorageResult<String> {
        let state = self.state()?;
        self.require_bucket(bucket)?;

        let expires = options
            .expires
            .ok_or_else(|| StorageError::invalid("expires must be defined"))
            .and_then(signer::validate_expiry)?;

        if method.requires_existing_object() {
            self.require_object(bucket, key)?;
        }

        let config = &state.config;
        let secure = options.secure.unwrap_or(config.secure);
        let url = adapters::object_url(secure, &Self::hostname(config, options), bucket, key)?;

        match config.url_mode {
            UrlMode::Public => Ok(url.to_string()),
            UrlMode::Signed => {
                if options.content_type.is_some() {
                    debug!("content type is not part of the s3 signature");
                }

                self.signer.presign(&SigningRequest {
                    method,
                    url: &url,
                    region: &config.region,
                    credentials: config.credentials.as_ref(),
                    expires,
                    timestamp: SystemTime::now(),
                })
            }
        }
    }
}
