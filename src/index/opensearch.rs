use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use moka::sync::Cache;

use crate::config::IndexConfig;
use crate::parser::DataPoint;
use crate::stats::Stats;
use crate::util::parse_duration_with_fallback;

use super::bulk::BulkIndexer;
use super::client::SearchClient;
use super::{doc_id, prefixes, Index, PathDoc};

/// Search-engine backed index: caches which paths are already known and
/// only probes/enqueues the ones that aren't.
pub struct OpensearchIndex {
    cache: Cache<String, ()>,
    client: Arc<SearchClient>,
    bulk: Arc<BulkIndexer>,
    stats: Arc<Stats>,
}

impl OpensearchIndex {
    pub fn new(config: &IndexConfig, stats: Arc<Stats>) -> anyhow::Result<Self> {
        if config.sigv4 {
            log::warn!(
                "index.sigv4 is set but this build has no AWS SDK integration; \
                 falling back to unsigned requests over {:?}",
                config.region
            );
        }
        if config.addresses.is_empty() {
            anyhow::bail!("index.addresses must not be empty for driver \"opensearch\"");
        }

        let client = Arc::new(SearchClient::new(
            config.addresses.clone(),
            config.name.clone(),
            config.insecure,
            config.username.clone(),
            config.password.clone(),
        )?);

        let cache: Cache<String, ()> = Cache::new(config.cache.size);

        let flush_bytes = config.flush.bytes;
        let flush_interval = parse_duration_with_fallback(&config.flush.interval, std::time::Duration::from_secs(300));
        let cache_for_size = cache.clone();
        let bulk = BulkIndexer::new(client.clone(), flush_bytes, flush_interval, stats.clone(), move || {
            cache_for_size.entry_count() as i64
        });

        Ok(Self {
            cache,
            client,
            bulk,
            stats,
        })
    }
}

#[async_trait]
impl Index for OpensearchIndex {
    async fn index(&self, datapoint: DataPoint) {
        if self.cache.contains_key(&datapoint.metric) {
            self.stats.record_default("cache", "hit");
            return;
        }

        for (path, depth, leaf) in prefixes(&datapoint.metric) {
            if self.cache.contains_key(&path) {
                self.stats.record_default("cache", "hit");
                continue;
            }
            self.stats.record_default("cache", "miss");

            let id = doc_id(&path);
            if self.client.exists(&id).await {
                self.stats.record_default("doc", "already_in");
            } else {
                self.bulk.add(id, PathDoc::new(path.clone(), depth, leaf)).await;
            }
            self.cache.insert(path, ());
        }
    }

    async fn shutdown(&self, deadline: Instant) {
        self.bulk.shutdown(deadline).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, FlushConfig, StatsConfig};
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;
    use std::time::Duration;

    fn stats() -> Arc<Stats> {
        Arc::new(Stats::new(
            StatsConfig {
                path: "carbon.writer".to_string(),
                interval: "60s".to_string(),
                log: false,
                segment: 0,
            },
            "host1".to_string(),
        ))
    }

    fn config(address: String) -> IndexConfig {
        IndexConfig {
            driver: "opensearch".to_string(),
            addresses: vec![address],
            name: "metrics".to_string(),
            username: None,
            password: None,
            insecure: false,
            region: None,
            sigv4: false,
            flush: FlushConfig {
                bytes: 1_000_000,
                interval: "1h".to_string(),
            },
            cache: CacheConfig { size: 1_000 },
        }
    }

    #[tokio::test]
    async fn law5_path_tree_completeness_enqueues_one_add_per_segment() {
        let server = MockServer::start();
        let probe = server.mock(|when, then| {
            when.method(GET).path_contains("/_doc/");
            then.status(404);
        });
        let bulk = server.mock(|when, then| {
            when.method(POST).path("/_bulk");
            then.status(200).json_body(serde_json::json!({"items": []}));
        });

        let index = OpensearchIndex::new(&config(server.base_url()), stats()).unwrap();
        index
            .index(DataPoint {
                metric: "a.b.c".to_string(),
                value: 1.0,
                timestamp: 1,
            })
            .await;
        index.shutdown(Instant::now() + Duration::from_secs(5)).await;

        probe.assert_hits(3);
        bulk.assert_hits(1);
    }

    #[tokio::test]
    async fn law4_cache_monotonicity_suppresses_repeat_probes() {
        let server = MockServer::start();
        let probe = server.mock(|when, then| {
            when.method(GET);
            then.status(404);
        });
        server.mock(|when, then| {
            when.method(POST).path("/_bulk");
            then.status(200).json_body(serde_json::json!({"items": []}));
        });

        let index = OpensearchIndex::new(&config(server.base_url()), stats()).unwrap();
        let dp = DataPoint {
            metric: "a.b.c".to_string(),
            value: 1.0,
            timestamp: 1,
        };

        index.index(dp.clone()).await;
        let hits_after_first = probe.hits();
        assert_eq!(hits_after_first, 3);

        index.index(dp).await;
        assert_eq!(probe.hits(), hits_after_first, "second call should probe nothing");
    }

    #[tokio::test]
    async fn s5_warm_cache_is_a_pure_hit() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET);
            then.status(200);
        });

        let index = OpensearchIndex::new(&config(server.base_url()), stats()).unwrap();
        let dp = DataPoint {
            metric: "a.b.c".to_string(),
            value: 1.0,
            timestamp: 1,
        };
        index.index(dp.clone()).await;
        index.index(dp).await;
        assert!(index.cache.contains_key("a.b.c"));
    }
}
