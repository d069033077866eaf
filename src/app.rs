//! Wires the adapters, bus, stats timer and server together and owns the
//! startup/shutdown sequence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;

use crate::bus::Bus;
use crate::config::Config;
use crate::index::new_index;
use crate::server::Server;
use crate::stats::Stats;
use crate::store::new_store;
use crate::util::resolve_hostname;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct App {
    server: Arc<Server>,
    bus: Arc<Bus>,
    stats_handle: tokio::task::JoinHandle<()>,
    multicore_tasks: usize,
}

impl App {
    pub async fn start(config: Config) -> anyhow::Result<Self> {
        let hostname = resolve_hostname();
        log::info!("starting as host {hostname}");

        let stats = Arc::new(Stats::new(config.stats.clone(), hostname));

        let store = new_store(&config.store, stats.clone())
            .await
            .context("initializing store driver")?;
        let index = new_index(&config.index, stats.clone())
            .await
            .context("initializing index driver")?;

        let bus = Arc::new(Bus::new(store, index, stats.clone(), true));
        bus.start();

        let stats_handle = stats.clone().start(bus.emitter());

        let server = Arc::new(Server::new(config.endpoint.clone(), bus.clone(), stats.clone()));
        let multicore_tasks = if config.endpoint.multicore {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            1
        };

        Ok(Self {
            server,
            bus,
            stats_handle,
            multicore_tasks,
        })
    }

    /// Runs the accept loop(s) until a shutdown signal arrives. `multicore`
    /// fans out identical accept loops across the runtime, all sharing the
    /// listening port via `SO_REUSEPORT`.
    pub async fn run_until_shutdown(&self) -> anyhow::Result<()> {
        let mut tasks = Vec::with_capacity(self.multicore_tasks);
        for _ in 0..self.multicore_tasks {
            let server = self.server.clone();
            tasks.push(tokio::spawn(async move { server.run().await }));
        }

        wait_for_shutdown_signal().await;
        log::info!("shutdown signal received");

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        self.server.shutdown(deadline).await;

        for task in tasks {
            match task.await {
                Ok(Err(e)) => log::warn!("server task ended with an error: {e:#}"),
                Err(e) => log::warn!("server task panicked: {e}"),
                Ok(Ok(())) => {}
            }
        }

        self.shutdown(deadline).await;
        Ok(())
    }

    async fn shutdown(&self, deadline: Instant) {
        self.stats_handle.abort();
        self.bus.drain(deadline).await;
        log::info!("shutdown complete");
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
