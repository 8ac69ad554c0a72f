use std::future::Future;

use tokio::runtime::{Builder, Runtime};

use crate::model::error::{StorageError, StorageResult};

/// Runtime owned by one adapter; every provider call is driven on it.
pub fn new_runtime() -> StorageResult<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            StorageError::Configuration(format!("failed to build runtime: {}", err))
        })
}

/// Blocks the calling thread until `future` resolves.
///
/// Panics if called from inside another tokio runtime, like `Runtime::block_on`.
pub fn poll_until_ready<Fut>(runtime: &Runtime, future: Fut) -> Fut::Output
where
    Fut: Future,
{
    runtime.block_on(future)
}
