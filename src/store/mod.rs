//! Single-row-per-point writer to the time-series store.

mod cassandra;
mod devnull;

pub use cassandra::CassandraStore;
pub use devnull::DevNullStore;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use thiserror::Error;

use crate::config::StoreConfig;
use crate::parser::DataPoint;
use crate::stats::Stats;
use crate::util::parse_duration_with_fallback;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store write failed after retries: {0}")]
    WriteFailed(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert(&self, datapoint: DataPoint) -> Result<(), StoreError>;
}

/// `floor(ts / resolution) * resolution`, idempotent under repeated
/// application for a fixed resolution.
pub fn bucket(timestamp: i64, resolution_seconds: i64) -> i64 {
    if resolution_seconds <= 0 {
        return timestamp;
    }
    timestamp.div_euclid(resolution_seconds) * resolution_seconds
}

/// Zero or negative timestamps mean "now".
pub fn resolved_timestamp(timestamp: i64) -> i64 {
    if timestamp > 0 {
        timestamp
    } else {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

pub async fn new_store(config: &StoreConfig, stats: Arc<Stats>) -> anyhow::Result<Box<dyn Store>> {
    match config.driver.as_str() {
        "cassandra" => Ok(Box::new(CassandraStore::connect(config, stats).await?)),
        _ => Ok(Box::new(DevNullStore::default())),
    }
}

pub(crate) fn resolution_seconds(config: &StoreConfig) -> i64 {
    parse_duration_with_fallback(&config.resolution, std::time::Duration::from_secs(60)).as_secs() as i64
}

pub(crate) fn retention_seconds(config: &StoreConfig) -> i64 {
    parse_duration_with_fallback(&config.retention, std::time::Duration::from_secs(24 * 3600)).as_secs() as i64
}
