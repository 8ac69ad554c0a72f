use std::{fmt, path::Path, str::FromStr};

use tracing::debug;

use crate::{
    model::error::{StorageError, StorageResult},
    util::endpoint::Endpoint,
};

pub const STORAGE_EMULATOR_HOST: &str = "STORAGE_EMULATOR_HOST";
pub const GOOGLE_CLOUD_PROJECT: &str = "GOOGLE_CLOUD_PROJECT";
pub const STORAGE_EXTERNAL_HOSTNAME: &str = "STORAGE_EXTERNAL_HOSTNAME";
pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const AWS_SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";
pub const AWS_REGION: &str = "AWS_REGION";
pub const S3_ENDPOINT: &str = "S3_ENDPOINT";
pub const STORAGE_REMOVE_BUCKET_POLICY: &str = "STORAGE_REMOVE_BUCKET_POLICY";

pub const DEFAULT_REGION: &str = "us-east-1";
pub const GCS_PUBLIC_HOST: &str = "storage.googleapis.com";

/// What `remove_bucket` does when a member object cannot be deleted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RemoveBucketPolicy {
    /// Stop and report; the bucket itself is left alone.
    #[default]
    FailFast,
    /// Log and skip failed members, then ask the provider to delete the bucket anyway.
    BestEffort,
}

impl FromStr for RemoveBucketPolicy {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "fail-fast" | "atomic" => Ok(RemoveBucketPolicy::FailFast),
            "best-effort" => Ok(RemoveBucketPolicy::BestEffort),
            other => Err(StorageError::Configuration(format!(
                "unknown {}: {}",
                STORAGE_REMOVE_BUCKET_POLICY, other
            ))),
        }
    }
}

/// How presigned URLs are issued.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UrlMode {
    /// Plain URLs against an emulator, which cannot check signatures.
    Public,
    Signed,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Credentials {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            session_token,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"** redacted **")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "** redacted **"),
            )
            .finish()
    }
}

/// The named values adapters are configured from.
#[derive(Clone, Debug, Default)]
pub struct Settings {
    pub project: Option<String>,
    pub emulator_host: Option<String>,
    pub external_hostname: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub session_token: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub remove_bucket_policy: Option<String>,
}

impl Settings {
    /// Reads the process environment, after loading `.env` from the working
    /// directory when one exists. Values already in the environment win.
    pub fn from_env() -> Self {
        match dotenvy::from_path(Path::new(".env")) {
            Ok(()) => debug!("loaded .env"),
            Err(err) if err.not_found() => {}
            Err(err) => debug!(error_message=%err, "ignored unreadable .env"),
        }

        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        Settings {
            project: get(GOOGLE_CLOUD_PROJECT),
            emulator_host: get(STORAGE_EMULATOR_HOST),
            external_hostname: get(STORAGE_EXTERNAL_HOSTNAME),
            access_key: get(AWS_ACCESS_KEY_ID),
            secret_key: get(AWS_SECRET_ACCESS_KEY),
            session_token: get(AWS_SESSION_TOKEN),
            region: get(AWS_REGION),
            endpoint: get(S3_ENDPOINT),
            remove_bucket_policy: get(STORAGE_REMOVE_BUCKET_POLICY),
        }
    }

    fn policy(&self) -> StorageResult<RemoveBucketPolicy> {
        self.remove_bucket_policy
            .as_deref()
            .map(str::parse::<RemoveBucketPolicy>)
            .transpose()
            .map(Option::unwrap_or_default)
    }
}

fn external_host(settings: &Settings) -> Option<String> {
    settings
        .external_hostname
        .as_deref()
        .and_then(Endpoint::parse)
        .map(|e| e.authority)
}

/// Snapshot a GCS adapter is configured with.
#[derive(Clone, Debug)]
pub struct GcsConfig {
    pub project: Option<String>,
    pub emulator_host: Option<Endpoint>,
    pub external_hostname: Option<String>,
    pub secure: bool,
    pub url_mode: UrlMode,
    pub remove_bucket_policy: RemoveBucketPolicy,
}

impl GcsConfig {
    pub fn from_settings(settings: &Settings) -> StorageResult<Self> {
        let emulator_host = settings.emulator_host.as_deref().and_then(Endpoint::parse);

        let (secure, url_mode) = match &emulator_host {
            Some(endpoint) => {
                debug!(
                    "will not sign urls due to presence of {}",
                    STORAGE_EMULATOR_HOST
                );
                (endpoint.is_tls().unwrap_or(false), UrlMode::Public)
            }
            None => (true, UrlMode::Signed),
        };

        Ok(GcsConfig {
            project: settings.project.clone(),
            emulator_host,
            external_hostname: external_host(settings),
            secure,
            url_mode,
            remove_bucket_policy: settings.policy()?,
        })
    }

    pub fn project(&self) -> StorageResult<&str> {
        self.project.as_deref().ok_or_else(|| {
            StorageError::Configuration(format!(
                "gcs client requires that the {} env variable is present or a project is passed",
                GOOGLE_CLOUD_PROJECT
            ))
        })
    }
}

/// Snapshot an S3 adapter is configured with.
#[derive(Clone, Debug)]
pub struct S3Config {
    pub region: String,
    pub endpoint: Option<Endpoint>,
    pub emulator_host: Option<Endpoint>,
    pub external_hostname: Option<String>,
    pub credentials: Option<Credentials>,
    pub secure: bool,
    pub url_mode: UrlMode,
    pub public_bucket_policy: bool,
    pub remove_bucket_policy: RemoveBucketPolicy,
}

impl S3Config {
    pub fn from_settings(settings: &Settings) -> StorageResult<Self> {
        let endpoint = settings.endpoint.as_deref().and_then(Endpoint::parse);
        let emulator_host = settings.emulator_host.as_deref().and_then(Endpoint::parse);

        let credentials = match (&settings.access_key, &settings.secret_key) {
            (Some(access_key), Some(secret_key)) => Some(Credentials::new(
                access_key,
                secret_key,
                settings.session_token.clone(),
            )),
            (None, None) => None,
            _ => {
                return Err(StorageError::Configuration(format!(
                    "{} and {} must be set together",
                    AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY
                )))
            }
        };

        // an emulator host alone still decides the scheme of the URLs we build
        let secure = match endpoint.as_ref().or(emulator_host.as_ref()) {
            Some(endpoint) => endpoint.is_tls().unwrap_or(false),
            None => true,
        };

        let url_mode = if emulator_host.is_some() {
            debug!(
                "will not sign urls due to presence of {}",
                STORAGE_EMULATOR_HOST
            );
            UrlMode::Public
        } else {
            UrlMode::Signed
        };

        Ok(S3Config {
            region: settings
                .region
                .clone()
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            public_bucket_policy: endpoint.is_some(),
            endpoint,
            emulator_host,
            external_hostname: external_host(settings),
            credentials,
            secure,
            url_mode,
            remove_bucket_policy: settings.policy()?,
        })
    }

    /// Host presigned URLs point at when the caller gives none.
    pub fn default_host(&self) -> String {
        self.external_hostname
            .clone()
            .or_else(|| self.endpoint.as_ref().map(|e| e.authority.clone()))
            .or_else(|| self.emulator_host.as_ref().map(|e| e.authority.clone()))
            .unwrap_or_else(|| format!("s3.{}.amazonaws.com", self.region))
    }
}
