use std::future::Future;

use google_cloud_storage::{client::Client, http::objects::Object};
use tokio::runtime::Runtime;
use tracing::{debug, span, Level};

use crate::{
    adapters::{self, PresignOptions, StorageClient, DEFAULT_CONTENT_TYPE},
    config::{GcsConfig, RemoveBucketPolicy, Settings, UrlMode, GCS_PUBLIC_HOST},
    model::{
        error::{Resource, StorageError, StorageResult},
        gcs::GcsApi,
        http::HttpMethod,
        object::{self, StorageObject},
    },
    signer, util,
};

const PROVIDER: &str = "gcs";

/// Most sources a single compose request accepts.
pub const MAX_COMPOSE_SOURCES: usize = 32;

struct Configured<C> {
    client: C,
    config: GcsConfig,
    runtime: Runtime,
}

impl<C> Configured<C> {
    fn poll<Fut: Future>(&self, future: Fut) -> Fut::Output {
        util::poll::poll_until_ready(&self.runtime, future)
    }
}

/// Adapter for Google Cloud Storage and its emulators.
///
/// Against an emulator (`STORAGE_EMULATOR_HOST`) presigned URLs are plain
/// public URLs; otherwise they are V4-signed by the GCS client.
pub struct GcsAdapter<C: GcsApi = Client> {
    project: Option<String>,
    settings: Option<Settings>,
    state: Option<Configured<C>>,
}

impl GcsAdapter<Client> {
    pub fn new() -> Self {
        Self::unconfigured()
    }
}

impl Default for GcsAdapter<Client> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: GcsApi> GcsAdapter<C> {
    pub fn unconfigured() -> Self {
        GcsAdapter {
            project: None,
            settings: None,
            state: None,
        }
    }

    /// Project used for this adapter only, ahead of `GOOGLE_CLOUD_PROJECT`.
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Settings `configure` reads instead of the environment.
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// An adapter that is configured already, around a client built elsewhere.
    pub fn with_client(config: GcsConfig, client: C) -> StorageResult<Self> {
        Ok(GcsAdapter {
            project: config.project.clone(),
            settings: None,
            state: Some(Configured {
                client,
                config,
                runtime: util::poll::new_runtime()?,
            }),
        })
    }

    pub fn config(&self) -> StorageResult<&GcsConfig> {
        Ok(&self.state()?.config)
    }

    pub fn project(&self) -> StorageResult<&str> {
        self.state()?.config.project()
    }

    fn state(&self) -> StorageResult<&Configured<C>> {
        self.state
            .as_ref()
            .ok_or(StorageError::NotConfigured(PROVIDER))
    }

    fn list_all(
        &self,
        state: &Configured<C>,
        bucket: &str,
        prefix: Option<&str>,
    ) -> StorageResult<Vec<Object>> {
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let (items, next) = state.poll(state.client.list_objects(bucket, prefix, page_token))?;
            objects.extend(items);

            page_token = next;
            if page_token.is_none() {
                break;
            }
        }

        Ok(objects)
    }

    fn public_url(
        &self,
        config: &GcsConfig,
        bucket: &str,
        key: &str,
        options: &PresignOptions,
    ) -> StorageResult<String> {
        let secure = options.secure.unwrap_or(config.secure);
        let hostname = options
            .use_hostname
            .clone()
            .or_else(|| config.external_hostname.clone())
            .or_else(|| config.emulator_host.as_ref().map(|e| e.authority.clone()))
            .unwrap_or_else(|| GCS_PUBLIC_HOST.to_string());

        let url = adapters::object_url(secure, &hostname, bucket, key)?;
        Ok(url.to_string())
    }
}

impl<C: GcsApi> StorageClient for GcsAdapter<C> {
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
        let mut config = GcsConfig::from_settings(&settings)?;
        if self.project.is_some() {
            config.project = self.project.clone();
        }

        let runtime = util::poll::new_runtime()?;
        let client = C::connect(&config, &runtime)?;
        debug!(project=?config.project, url_mode=?config.url_mode, "configured");

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
        let project = state.config.project()?;
        self.require_absent_bucket(bucket)?;

        state.poll(state.client.insert_bucket(project, bucket))
    }

    fn remove_bucket(&self, bucket: &str) -> StorageResult<()> {
        let state = self.state()?;
        self.require_bucket(bucket)?;

        let policy = state.config.remove_bucket_policy;
        let mut failures = Vec::new();
        for obj in self.list_all(state, bucket, None)? {
            if let Err(err) = state.poll(state.client.delete_object(bucket, &obj.name)) {
                failures.push((obj.name, err));
                if policy == RemoveBucketPolicy::FailFast {
                    break;
                }
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

        state.poll(state.client.upload_object(
            bucket,
            key,
            data,
            content_type.unwrap_or(DEFAULT_CONTENT_TYPE),
        ))
    }

    fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        let state = self.state()?;
        self.require_object(bucket, key)?;

        state.poll(state.client.download_object(bucket, key))
    }

    fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let state = self.state()?;
        self.require_object(bucket, key)?;

        state.poll(state.client.delete_object(bucket, key))
    }

    fn object_exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        let state = self.state()?;
        self.require_bucket(bucket)?;

        Ok(state.poll(state.client.get_object(bucket, key))?.is_some())
    }

    fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> StorageResult<Vec<StorageObject>> {
        let state = self.state()?;
        self.require_bucket(bucket)?;

        Ok(self
            .list_all(state, bucket, prefix)?
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

        let mut rewrite_token: Option<String> = None;
        loop {
            let progress = state.poll(state.client.rewrite_object(
                source_bucket,
                source_key,
                destination_bucket,
                destination_key,
                rewrite_token,
            ))?;
            debug!(
                bytes_rewritten = progress.bytes_rewritten,
                object_size = progress.object_size,
                "rewrite progress"
            );

            if progress.done {
                break;
            }
            rewrite_token = match progress.rewrite_token {
                Some(token) => Some(token),
                None => {
                    return Err(StorageError::provider(
                        "RewriteIncomplete",
                        format!(
                            "rewrite of {}/{} stopped at {}/{} bytes without a token",
                            source_bucket,
                            source_key,
                            progress.bytes_rewritten,
                            progress.object_size
                        ),
                    ))
                }
            };
        }

        Ok(())
    }

    fn concat_objects(&self, bucket: &str, destination: &str, sources: &[&str]) -> StorageResult<()> {
        let state = self.state()?;
        if sources.is_empty() {
            return Err(StorageError::invalid("concat_objects needs at least one source"));
        }
        if sources.len() > MAX_COMPOSE_SOURCES {
            return Err(StorageError::invalid(format!(
                "gcs composes at most {} objects, got {}",
                MAX_COMPOSE_SOURCES,
                sources.len()
            )));
        }

        self.require_object(bucket, destination)?;
        for source in sources {
            self.require_object(bucket, source)?;
        }

        state.poll(state.client.compose_object(bucket, destination, sources))
    }

    fn md5_checksum(&self, bucket: &str, key: &str) -> StorageResult<String> {
        let state = self.state()?;
        self.require_bucket(bucket)?;

        let obj = state
            .poll(state.client.get_object(bucket, key))?
            .ok_or_else(|| StorageError::NotFound(Resource::object(bucket, key)))?;

        match obj.md5_hash.as_deref() {
            Some(encoded) => object::md5_hex_from_base64(encoded),
            // composite objects carry only a crc32c
            None => {
                let data = state.poll(state.client.download_object(bucket, key))?;
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

        let expires = match options.expires {
            Some(expires) => Some(signer::validate_expiry(expires)?),
            None if state.config.url_mode == UrlMode::Signed => {
                return Err(StorageError::invalid("expires must be defined to sign urls"))
            }
            None => None,
        };

        if method.requires_existing_object() {
            self.require_object(bucket, key)?;
        }

        match (state.config.url_mode, expires) {
            (UrlMode::Signed, Some(expires)) => state.poll(state.client.signed_url(
                bucket,
                key,
                method,
                expires,
                options.content_type.as_deref(),
                options.use_hostname.as_deref(),
            )),
            _ => self.public_url(&state.config, bucket, key, options),
        }
    }
}
