//! Path-tree indexer: maintains a searchable document per metric path and
//! every proper prefix, batched through a bulk-indexing HTTP client and
//! deduplicated through an adaptive-replacement cache.

mod bulk;
mod client;
mod devnull;
mod opensearch;

pub use devnull::DevNullIndex;
pub use opensearch::OpensearchIndex;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::IndexConfig;
use crate::parser::DataPoint;
use crate::stats::Stats;

/// Tenant tag preserved for compatibility with a sibling query service.
const TENANT: &str = "NONE";

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct PathDoc {
    pub depth: usize,
    pub tenant: &'static str,
    pub leaf: bool,
    pub path: String,
}

impl PathDoc {
    pub(crate) fn new(path: String, depth: usize, leaf: bool) -> Self {
        Self {
            depth,
            tenant: TENANT,
            leaf,
            path,
        }
    }
}

/// Hex-encoded MD5 of the path string: sidesteps document-id length limits
/// and URL-escaping without needing to escape the path itself.
pub fn doc_id(path: &str) -> String {
    format!("{:x}", md5::compute(path.as_bytes()))
}

#[async_trait]
pub trait Index: Send + Sync {
    async fn index(&self, datapoint: DataPoint);
    async fn shutdown(&self, deadline: Instant);
}

pub async fn new_index(config: &IndexConfig, stats: Arc<Stats>) -> anyhow::Result<Box<dyn Index>> {
    match config.driver.as_str() {
        "opensearch" => Ok(Box::new(OpensearchIndex::new(config, stats)?)),
        _ => Ok(Box::new(DevNullIndex::default())),
    }
}

/// Splits a metric into its ordered, non-empty prefixes: `a.b.c` yields
/// `a`, `a.b`, `a.b.c`.
pub(crate) fn prefixes(metric: &str) -> Vec<(String, usize, bool)> {
    let segments: Vec<&str> = metric.split('.').collect();
    let total = segments.len();
    segments
        .iter()
        .enumerate()
        .map(|(i, _)| {
            let path = segments[..=i].join(".");
            let depth = i + 1;
            let leaf = depth == total;
            (path, depth, leaf)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s4_path_tree_completeness_for_three_segments() {
        let prefixes = prefixes("a.b.c");
        assert_eq!(
            prefixes,
            vec![
                ("a".to_string(), 1, false),
                ("a.b".to_string(), 2, false),
                ("a.b.c".to_string(), 3, true),
            ]
        );
    }

    #[test]
    fn single_segment_metric_is_immediately_a_leaf() {
        assert_eq!(prefixes("a"), vec![("a".to_string(), 1, true)]);
    }

    #[test]
    fn doc_id_is_stable_hex_md5() {
        let id = doc_id("a.b.c");
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, doc_id("a.b.c"));
        assert_ne!(id, doc_id("a.b"));
    }
}
