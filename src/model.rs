pub mod error;
pub mod gcs;
pub mod http;
pub mod object;
pub mod s3;
