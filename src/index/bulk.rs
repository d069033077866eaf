//! Batches document upserts and flushes them to the search backend either
//! when the buffered payload crosses a byte threshold or on a fixed
//! interval, whichever comes first.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::stats::Stats;

use super::client::SearchClient;
use super::PathDoc;

struct Item {
    id: String,
    doc: PathDoc,
}

struct Buffer {
    items: Vec<Item>,
    bytes: usize,
}

pub struct BulkIndexer {
    client: Arc<SearchClient>,
    flush_bytes: usize,
    buffer: Mutex<Buffer>,
    stats: Arc<Stats>,
    added: AtomicI64,
    failed: AtomicI64,
    cache_size: Box<dyn Fn() -> i64 + Send + Sync>,
    ticker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BulkIndexer {
    pub fn new(
        client: Arc<SearchClient>,
        flush_bytes: usize,
        flush_interval: Duration,
        stats: Arc<Stats>,
        cache_size: impl Fn() -> i64 + Send + Sync + 'static,
    ) -> Arc<Self> {
        let indexer = Arc::new(Self {
            client,
            flush_bytes,
            buffer: Mutex::new(Buffer { items: Vec::new(), bytes: 0 }),
            stats,
            added: AtomicI64::new(0),
            failed: AtomicI64::new(0),
            cache_size: Box::new(cache_size),
            ticker: std::sync::Mutex::new(None),
        });
        let ticker_indexer = indexer.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(flush_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                ticker_indexer.flush().await;
            }
        });
        *indexer.ticker.lock().unwrap() = Some(handle);
        indexer
    }

    pub async fn add(&self, id: String, doc: PathDoc) {
        let estimate = id.len() + doc.path.len() + 64;
        let should_flush = {
            let mut buf = self.buffer.lock().await;
            buf.items.push(Item { id, doc });
            buf.bytes += estimate;
            buf.bytes >= self.flush_bytes
        };
        if should_flush {
            self.flush().await;
        }
    }

    pub async fn flush(&self) {
        let items = {
            let mut buf = self.buffer.lock().await;
            if buf.items.is_empty() {
                return;
            }
            buf.bytes = 0;
            std::mem::take(&mut buf.items)
        };

        let count = items.len();
        let mut body = String::new();
        for item in &items {
            let action = serde_json::json!({"index": {"_index": self.client.index_name(), "_id": item.id}});
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&serde_json::to_string(&item.doc).unwrap_or_default());
            body.push('\n');
        }

        match self.client.bulk(body).await {
            Ok(response) => {
                let failures = count_bulk_failures(&response, &items);
                self.added.fetch_add((count - failures) as i64, Ordering::Relaxed);
                self.failed.fetch_add(failures as i64, Ordering::Relaxed);
            }
            Err(e) => {
                log::error!("bulk index request failed for {count} documents: {e}");
                self.failed.fetch_add(count as i64, Ordering::Relaxed);
            }
        }

        self.on_flush_end();
    }

    fn on_flush_end(&self) {
        self.stats.record_default("index.bulk", "flush");
        let added = self.added.swap(0, Ordering::Relaxed);
        let failed = self.failed.swap(0, Ordering::Relaxed);
        if added > 0 {
            self.stats.record("index.bulk", "added", added);
        }
        if failed > 0 {
            self.stats.record("index.bulk", "failed", failed);
        }
        self.stats.record_fixed("cache", "size", (self.cache_size)());
    }

    pub async fn shutdown(&self, deadline: Instant) {
        if let Some(handle) = self.ticker.lock().unwrap().take() {
            handle.abort();
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if tokio::time::timeout(remaining, self.flush()).await.is_err() {
            log::warn!("bulk indexer flush did not complete before shutdown deadline");
        }
    }
}

/// The bulk response mirrors item order; a per-item error means that
/// document failed and should be logged, not the whole batch.
fn count_bulk_failures(response: &serde_json::Value, items: &[Item]) -> usize {
    let Some(results) = response.get("items").and_then(|v| v.as_array()) else {
        return 0;
    };
    let mut failures = 0;
    for (i, entry) in results.iter().enumerate() {
        let Some(op) = entry.get("index") else { continue };
        let status = op.get("status").and_then(|v| v.as_i64()).unwrap_or(200);
        if !(200..300).contains(&status) {
            failures += 1;
            let id = items.get(i).map(|it| it.id.as_str()).unwrap_or("?");
            let reason = op
                .get("error")
                .and_then(|e| e.get("reason"))
                .and_then(|r| r.as_str())
                .unwrap_or("unknown");
            log::warn!("failed to index document {id}: {reason}");
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StatsConfig;
    use httpmock::Method::POST;
    use httpmock::MockServer;

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

    #[tokio::test]
    async fn cache_size_is_reported_on_flush_not_on_add() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/_bulk");
            then.status(200).json_body(serde_json::json!({"items": []}));
        });
        let client = Arc::new(
            SearchClient::new(vec![server.base_url()], "metrics".to_string(), false, None, None).unwrap(),
        );
        let stats = stats();
        let probes = Arc::new(AtomicI64::new(7));
        let probes_for_closure = probes.clone();
        let indexer = BulkIndexer::new(client, 1_000_000, Duration::from_secs(3600), stats.clone(), move || {
            probes_for_closure.load(Ordering::Relaxed)
        });

        indexer
            .add(
                "id1".to_string(),
                PathDoc::new("a.b".to_string(), 2, true),
            )
            .await;
        assert!(snapshot(&stats, "cache.size").is_none());

        indexer.flush().await;
        assert_eq!(snapshot(&stats, "cache.size"), Some(7));
    }

    fn snapshot(stats: &Stats, key: &str) -> Option<i64> {
        let (tx, rx) = crossbeam_channel::unbounded();
        stats.flush(&tx);
        let mut found = None;
        while let Ok(dp) = rx.try_recv() {
            if dp.metric.ends_with(key) {
                found = Some(dp.value as i64);
            }
        }
        found
    }
}
