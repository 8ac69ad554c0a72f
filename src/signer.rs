use std::time::{Duration, SystemTime};

use aws_sigv4::{
    http_request::{
        sign, PercentEncodingMode, SignableBody, SignableRequest, SignatureLocation,
        SigningSettings, UriPathNormalizationMode,
    },
    sign::v4,
};
use aws_smithy_runtime_api::client::identity::Identity;
use url::Url;

use crate::{
    config::Credentials,
    model::{
        error::{StorageError, StorageResult},
        http::HttpMethod,
    },
};

/// Longest validity window SigV4 accepts.
pub const MAX_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Everything a signer needs to authorize one request.
#[derive(Debug)]
pub struct SigningRequest<'a> {
    pub method: HttpMethod,
    pub url: &'a Url,
    pub region: &'a str,
    pub credentials: Option<&'a Credentials>,
    pub expires: Duration,
    pub timestamp: SystemTime,
}

/// Turns a canonical request URL into a presigned one.
pub trait UrlSigner: Send + Sync {
    fn presign(&self, request: &SigningRequest<'_>) -> StorageResult<String>;
}

pub fn validate_expiry(expires: Duration) -> StorageResult<Duration> {
    if expires.as_secs() == 0 || expires > MAX_EXPIRY {
        return Err(StorageError::invalid(format!(
            "expires must be between 1 second and {} seconds, got {}",
            MAX_EXPIRY.as_secs(),
            expires.as_secs()
        )));
    }

    Ok(expires)
}

/// AWS Signature Version 4 query-string signing, S3 flavour.
#[derive(Clone, Debug)]
pub struct SigV4Signer {
    service: String,
}

impl SigV4Signer {
    pub fn new() -> Self {
        SigV4Signer {
            service: "s3".to_string(),
        }
    }
}

impl Default for SigV4Signer {
    fn default() -> Self {
        Self::new()
    }
}

fn signing_error(err: impl std::fmt::Display) -> StorageError {
    StorageError::provider("SigningError", err.to_string())
}

impl UrlSigner for SigV4Signer {
    fn presign(&self, request: &SigningRequest<'_>) -> StorageResult<String> {
        let credentials = request.credentials.ok_or_else(|| {
            StorageError::Configuration("credentials are required to sign urls".to_string())
        })?;

        let identity: Identity = aws_credential_types::Credentials::new(
            credentials.access_key.clone(),
            credentials.secret_key.clone(),
            credentials.session_token.clone(),
            None,
            "multicloud-storage",
        )
        .into();

        let mut settings = SigningSettings::default();
        settings.signature_location = SignatureLocation::QueryParams;
        settings.expires_in = Some(request.expires);
        settings.percent_encoding_mode = PercentEncodingMode::Single;
        settings.uri_path_normalization_mode = UriPathNormalizationMode::Disabled;

        let params = v4::SigningParams::builder()
            .identity(&identity)
            .region(request.region)
            .name(&self.service)
            .time(request.timestamp)
            .settings(settings)
            .build()
            .map_err(signing_error)?
            .into();

        let signable = SignableRequest::new(
            request.method.as_str(),
            request.url.as_str(),
            std::iter::empty(),
            SignableBody::UnsignedPayload,
        )
        .map_err(signing_error)?;

        let (instructions, _signature) = sign(signable, &params)
            .map_err(signing_error)?
            .into_parts();

        let mut signed = request.url.clone();
        {
            let mut query = signed.query_pairs_mut();
            for (name, value) in instructions.params() {
                query.append_pair(name, value);
            }
        }

        Ok(signed.to_string())
    }
}
