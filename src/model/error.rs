use std::{convert::Infallible, fmt};

use thiserror::Error;

/// The thing an existence precondition was checked against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resource {
    Bucket(String),
    Object { bucket: String, key: String },
}

impl Resource {
    pub fn bucket(name: &str) -> Self {
        Resource::Bucket(name.to_string())
    }

    pub fn object(bucket: &str, key: &str) -> Self {
        Resource::Object {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Bucket(name) => write!(f, "bucket {}", name),
            Resource::Object { bucket, key } => {
                write!(f, "object {} in bucket {}", key, bucket)
            }
        }
    }
}

/// Errors returned by every adapter, whatever the backend.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{0} does not exist")]
    NotFound(Resource),

    #[error("bucket {0} already exists")]
    AlreadyExists(String),

    #[error("{0} client has not been configured")]
    NotConfigured(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("provider error: {message} (code: {code})")]
    Provider { code: String, message: String },

    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl StorageError {
    pub fn provider(code: impl Into<String>, message: impl Into<String>) -> Self {
        StorageError::Provider {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        StorageError::InvalidArgument(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StorageError::AlreadyExists(_))
    }
}

impl From<Infallible> for StorageError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
