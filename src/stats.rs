//! Self-metrics: a mutex-guarded counter map, flushed periodically as
//! synthetic datapoints through the same bus used for external ingestion.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::config::StatsConfig;
use crate::parser::DataPoint;
use crate::util::parse_duration_with_fallback;

enum Update {
    Accumulate(i64),
    Fixed(i64),
}

pub struct Stats {
    metrics: Mutex<HashMap<String, i64>>,
    config: StatsConfig,
    hostname: String,
}

impl Stats {
    pub fn new(config: StatsConfig, hostname: String) -> Self {
        Self {
            metrics: Mutex::new(HashMap::new()),
            config,
            hostname,
        }
    }

    fn key(unit: &str, stat: &str) -> String {
        format!("{unit}.{stat}")
    }

    fn apply(&self, unit: &str, stat: &str, update: Update) {
        let key = Self::key(unit, stat);
        let mut metrics = self.metrics.lock().unwrap();
        match update {
            Update::Accumulate(delta) => {
                *metrics.entry(key).or_insert(0) += delta;
            }
            Update::Fixed(value) => {
                metrics.insert(key, value);
            }
        }
    }

    /// Accumulating increment; `delta` defaults to +1.
    pub fn record(&self, unit: &str, stat: &str, delta: i64) {
        self.apply(unit, stat, Update::Accumulate(delta));
    }

    pub fn record_default(&self, unit: &str, stat: &str) {
        self.record(unit, stat, 1);
    }

    /// Overwriting update.
    pub fn record_fixed(&self, unit: &str, stat: &str, value: i64) {
        self.apply(unit, stat, Update::Fixed(value));
    }

    /// Records cardinality of ingestion per top-level metric namespace, when
    /// `stats.segment` is configured positive.
    pub fn record_metric_ingestion(&self, metric: &str) {
        if self.config.segment <= 0 {
            return;
        }
        let Some(first_segment) = metric.split('.').next() else {
            return;
        };
        if first_segment.is_empty() {
            return;
        }
        self.record_default("metric", first_segment);
    }

    /// Snapshots and zeroes the counter map, emitting one synthetic
    /// datapoint per entry through `emit`.
    pub fn flush(&self, emit: &Sender<DataPoint>) {
        let frozen: HashMap<String, i64> = {
            let mut metrics = self.metrics.lock().unwrap();
            let frozen = metrics.clone();
            for value in metrics.values_mut() {
                *value = 0;
            }
            frozen
        };

        for (key, value) in frozen {
            if self.config.log && !key.starts_with("metric") {
                log::info!("stat {key} = {value}");
            }
            let metric = format!("{}.{}.{}", self.config.path, self.hostname, key);
            let dp = DataPoint {
                metric,
                value: value as f64,
                timestamp: 0,
            };
            let _ = emit.send(dp);
        }
    }

    /// Spawns the periodic flush timer. Returns its join handle so callers
    /// can abort it on shutdown.
    pub fn start(self: std::sync::Arc<Self>, emit: Sender<DataPoint>) -> tokio::task::JoinHandle<()> {
        let interval = parse_duration_with_fallback(&self.config.interval, Duration::from_secs(60));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                self.flush(&emit);
            }
        })
    }

    /// Flushes whatever has accumulated since the last tick so that a final
    /// burst of synthetic datapoints reaches the bus before shutdown.
    pub fn drain(&self, emit: &Sender<DataPoint>) {
        self.flush(emit);
    }
}
