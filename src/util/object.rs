use std::str::FromStr;

use crate::model::error::StorageError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provider {
    AWS,
    GCS,
}

impl FromStr for Provider {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s3" | "aws" => Ok(Provider::AWS),
            "gs" | "gcs" => Ok(Provider::GCS),
            _ => parse_provider_from_uri(s),
        }
    }
}

pub fn parse_provider_from_uri(bucket_uri: &str) -> Result<Provider, StorageError> {
    if bucket_uri.starts_with("s3://") {
        Ok(Provider::AWS)
    } else if bucket_uri.starts_with("gs://") {
        Ok(Provider::GCS)
    } else {
        Err(StorageError::invalid(format!(
            "failed to parse provider of: {}",
            bucket_uri
        )))
    }
}
