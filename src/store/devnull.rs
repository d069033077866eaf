use async_trait::async_trait;

use crate::parser::DataPoint;

use super::{Store, StoreError};

/// No-op store for testing and dry runs.
#[derive(Default)]
pub struct DevNullStore;

#[async_trait]
impl Store for DevNullStore {
    async fn insert(&self, datapoint: DataPoint) -> Result<(), StoreError> {
        log::debug!("store:/dev/null: {datapoint:?}");
        Ok(())
    }
}
