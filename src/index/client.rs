//! Thin REST client over the document store's existence-probe and bulk
//! endpoints. Round-robins across configured addresses.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::StatusCode;

pub struct SearchClient {
    http: reqwest::Client,
    addresses: Vec<String>,
    next: AtomicUsize,
    index_name: String,
}

impl SearchClient {
    pub fn new(
        addresses: Vec<String>,
        index_name: String,
        insecure: bool,
        username: Option<String>,
        password: Option<String>,
    ) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .danger_accept_invalid_certs(insecure);
        if let (Some(user), Some(pass)) = (username, password) {
            let mut headers = reqwest::header::HeaderMap::new();
            let value = basic_auth_header(&user, &pass);
            headers.insert(reqwest::header::AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }
        Ok(Self {
            http: builder.build()?,
            addresses,
            next: AtomicUsize::new(0),
            index_name,
        })
    }

    fn node(&self) -> &str {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.addresses.len();
        &self.addresses[i]
    }

    /// `true` if the document already exists, `false` if absent or the
    /// probe itself failed (caller falls back to indexing it).
    pub async fn exists(&self, doc_id: &str) -> bool {
        let url = format!("{}/{}/_doc/{}", self.node(), self.index_name, doc_id);
        match self.http.get(&url).send().await {
            Ok(resp) if resp.status() == StatusCode::OK => true,
            Ok(resp) if resp.status() == StatusCode::NOT_FOUND => false,
            Ok(resp) => {
                log::warn!("unexpected status probing {url}: {}", resp.status());
                false
            }
            Err(e) => {
                log::warn!("existence probe failed for {doc_id}: {e}");
                false
            }
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub async fn bulk(&self, body: String) -> anyhow::Result<serde_json::Value> {
        let url = format!("{}/_bulk", self.node());
        let resp = self
            .http
            .post(&url)
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}

fn basic_auth_header(user: &str, pass: &str) -> reqwest::header::HeaderValue {
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
    reqwest::header::HeaderValue::from_str(&format!("Basic {encoded}"))
        .unwrap_or_else(|_| reqwest::header::HeaderValue::from_static(""))
}
