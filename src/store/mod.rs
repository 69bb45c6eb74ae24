//! Window store backends.

mod memory;
mod redis_store;

pub use memory::{MemoryStore, DEFAULT_PURGE_INTERVAL};
pub use redis_store::{RedisStore, DEFAULT_KEY_PREFIX};

use tracing::info;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::Result;
use crate::ratelimit::WindowStore;

/// Build the store described by `config`.
pub async fn connect(config: &StoreConfig) -> Result<Box<dyn WindowStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-process window store");
            Ok(Box::new(MemoryStore::new()))
        }
        StoreBackend::Redis => {
            let store = RedisStore::connect(&config.redis_url, config.key_prefix.clone()).await?;
            Ok(Box::new(store))
        }
    }
}
