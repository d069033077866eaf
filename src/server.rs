//! Plaintext line-protocol TCP front end: one task per connection, fed
//! straight into the bus.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;

use crate::bus::Bus;
use crate::config::EndpointConfig;
use crate::parser::parse_plain_graphite_protocol;
use crate::stats::Stats;

/// A connection that sends nothing for this long is treated as dead rather
/// than held open indefinitely; without this, one idle client could block
/// shutdown forever.
const IDLE_READ_TIMEOUT: Duration = Duration::from_secs(300);

pub struct Server {
    config: EndpointConfig,
    bus: Arc<Bus>,
    stats: Arc<Stats>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    connections: Mutex<JoinSet<()>>,
}

impl Server {
    pub fn new(config: EndpointConfig, bus: Arc<Bus>, stats: Arc<Stats>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            bus,
            stats,
            shutdown_tx,
            shutdown_rx,
            connections: Mutex::new(JoinSet::new()),
        }
    }

    fn bind(&self) -> anyhow::Result<std::net::TcpListener> {
        use socket2::{Domain, Socket, Type};

        let addr: std::net::SocketAddr = format!("0.0.0.0:{}", self.config.port).parse()?;
        let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        if self.config.reuseport {
            #[cfg(unix)]
            socket.set_reuse_port(true)?;
        }
        socket.bind(&addr.into())?;
        socket.listen(1024)?;
        Ok(socket.into())
    }

    /// Runs the accept loop until `shutdown` is called. One listener per
    /// call; `endpoint.multicore` spawns several of these across the Tokio
    /// thread pool, each with `SO_REUSEPORT` sharing the same port.
    pub async fn run(&self) -> anyhow::Result<()> {
        let std_listener = self.bind()?;
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener)?;
        log::info!("listening on 0.0.0.0:{}", self.config.port);

        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            log::warn!("accept failed: {e}");
                            continue;
                        }
                    };
                    self.stats.record_default("tcp", "connections");
                    let bus = self.bus.clone();
                    let stats = self.stats.clone();
                    self.connections.lock().await.spawn(async move {
                        if let Err(e) = handle_connection(socket, &bus, &stats).await {
                            log::debug!("connection from {peer} ended: {e}");
                        }
                    });
                }
                _ = shutdown_rx.changed() => {
                    log::info!("server shutting down, no longer accepting connections");
                    return Ok(());
                }
            }
        }
    }

    /// Stops accepting new connections and waits (bounded by `deadline`) for
    /// in-flight connections to finish on their own; anything still open
    /// past the deadline is aborted.
    pub async fn shutdown(&self, deadline: Instant) {
        let _ = self.shutdown_tx.send(true);

        let mut connections = self.connections.lock().await;
        loop {
            if connections.is_empty() {
                return;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, connections.join_next()).await {
                Ok(Some(_)) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }

        log::warn!(
            "shutdown deadline reached with {} connection(s) still open; aborting",
            connections.len()
        );
        connections.abort_all();
        while connections.join_next().await.is_some() {}
    }
}

async fn handle_connection(mut socket: TcpStream, bus: &Arc<Bus>, stats: &Arc<Stats>) -> anyhow::Result<()> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    loop {
        let n = match tokio::time::timeout(IDLE_READ_TIMEOUT, socket.read(&mut chunk)).await {
            Ok(result) => result?,
            Err(_) => {
                log::debug!("connection idle past {IDLE_READ_TIMEOUT:?}, closing");
                return Ok(());
            }
        };
        if n == 0 {
            // Connection closed with an unterminated line in the buffer:
            // nothing more can arrive, so the tail is silently discarded.
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);

        let (datapoints, err) = parse_plain_graphite_protocol(&buf);
        let consumed = consumed_bytes(&buf, datapoints.len(), err);

        for dp in datapoints {
            stats.record_metric_ingestion(&dp.metric);
            bus.emit(dp);
        }

        buf.drain(..consumed);
    }
}

/// How much of `buf` was fully consumed by the parse: everything up to and
/// including the last accepted newline. A trailing partial line stays in
/// the buffer for the next read; a bad line is dropped along with
/// everything before it, since the parser already gave up at that point.
fn consumed_bytes(buf: &[u8], accepted: usize, err: Option<crate::parser::ParseError>) -> usize {
    use crate::parser::ParseError;
    match err {
        None => buf.len(),
        Some(ParseError::UnfinishedLine) => {
            // Reparsing is cheap relative to TCP round-trips; find the
            // offset after the last newline consumed for `accepted` lines.
            offset_after_nth_newline(buf, accepted)
        }
        Some(ParseError::BadMessage) => buf.len(),
    }
}

fn offset_after_nth_newline(buf: &[u8], n: usize) -> usize {
    let mut seen = 0;
    for (i, &b) in buf.iter().enumerate() {
        if b == b'\n' {
            seen += 1;
            if seen == n {
                return i + 1;
            }
        }
    }
    0
}
