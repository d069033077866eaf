use std::time::Instant;

use async_trait::async_trait;

use crate::parser::DataPoint;

use super::Index;

/// No-op index for testing and dry runs.
#[derive(Default)]
pub struct DevNullIndex;

#[async_trait]
impl Index for DevNullIndex {
    async fn index(&self, datapoint: DataPoint) {
        log::debug!("index:/dev/null: {datapoint:?}");
    }

    async fn shutdown(&self, _deadline: Instant) {}
}
