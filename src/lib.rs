//! Provider-neutral object storage over Google Cloud Storage and S3.
//!
//! ```no_run
//! use multicloud_storage::{Provider, Storage};
//!
//! let storage = Storage::connect(Provider::AWS)?;
//! storage.make_bucket("bucket")?;
//! storage.put_object("bucket", "key", r#"{"test":"test"}"#, Some("application/json"))?;
//! # Ok::<(), multicloud_storage::StorageError>(())
//! ```

pub mod adapters;
pub mod config;
pub mod model;
pub mod signer;
pub mod storage;
pub mod util;

pub use adapters::{gcs::GcsAdapter, s3::S3Adapter, PresignOptions, StorageClient};
pub use config::{Credentials, GcsConfig, RemoveBucketPolicy, S3Config, Settings, UrlMode};
pub use model::{
    error::{Resource, StorageError, StorageResult},
    http::HttpMethod,
    object::StorageObject,
};
pub use signer::{SigV4Signer, SigningRequest, UrlSigner};
pub use storage::Storage;
pub use util::object::Provider;
