use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scylla::{Session, SessionBuilder};
use scylla::prepared_statement::PreparedStatement;

use crate::config::StoreConfig;
use crate::parser::DataPoint;
use crate::stats::Stats;

use super::{Store, StoreError, bucket, resolution_seconds, resolved_timestamp, retention_seconds};

const MIN_BACKOFF: Duration = Duration::from_millis(3);
const MAX_BACKOFF: Duration = Duration::from_millis(90);
const MAX_ATTEMPTS: u32 = 3;

/// Wide-row writer: `UPDATE <table> USING TTL <retention> SET value = ?
/// WHERE path = ? AND timestamp = ?`, retried with exponential backoff.
pub struct CassandraStore {
    session: Session,
    statement: PreparedStatement,
    resolution_seconds: i64,
    stats: Arc<Stats>,
}

impl CassandraStore {
    pub async fn connect(config: &StoreConfig, stats: Arc<Stats>) -> anyhow::Result<Self> {
        let mut builder = SessionBuilder::new();
        for host in &config.hosts {
            builder = builder.known_node(format!("{host}:{}", config.port));
        }
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            if !user.is_empty() && !pass.is_empty() {
                builder = builder.user(user, pass);
            }
        }
        let session = builder.build().await?;
        session.use_keyspace(&config.keyspace, false).await?;

        let retention = retention_seconds(config);
        let query = format!(
            "UPDATE {} USING TTL {} SET value = ? WHERE path = ? AND timestamp = ?",
            config.table, retention
        );
        let statement = session.prepare(query).await?;

        Ok(Self {
            session,
            statement,
            resolution_seconds: resolution_seconds(config),
            stats,
        })
    }

    async fn write_once(&self, datapoint: &DataPoint, bucketed_ts: i64) -> Result<(), String> {
        self.session
            .execute_unpaged(
                &self.statement,
                (datapoint.value, datapoint.metric.as_str(), bucketed_ts),
            )
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl Store for CassandraStore {
    async fn insert(&self, datapoint: DataPoint) -> Result<(), StoreError> {
        let ts = resolved_timestamp(datapoint.timestamp);
        let bucketed_ts = bucket(ts, self.resolution_seconds);

        let mut backoff = MIN_BACKOFF;
        let mut last_err = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            match self.write_once(&datapoint, bucketed_ts).await {
                Ok(()) => {
                    self.stats.record_default("cassandra.store", "success");
                    return Ok(());
                }
                Err(e) => {
                    last_err = e;
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        }

        log::error!("failed inserting {:?} into Cassandra: {last_err}", datapoint.metric);
        self.stats.record_default("cassandra.store", "failed");
        Err(StoreError::WriteFailed(last_err))
    }
}
