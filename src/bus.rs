//! In-process fan-out: an unbounded queue between producers (the server,
//! the stats timer) and a single dispatcher that writes to the store and
//! index adapters.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::index::Index;
use crate::parser::DataPoint;
use crate::stats::Stats;
use crate::store::Store;

/// `Emit` is the only capability producers need; handing this out (rather
/// than a reference to the whole `Bus`) is what lets the stats timer feed
/// the same pipeline without depending on the bus object.
pub type Emit = Sender<DataPoint>;

pub struct Bus {
    store: Box<dyn Store>,
    index: Box<dyn Index>,
    stats: std::sync::Arc<Stats>,
    sender: Sender<DataPoint>,
    receiver: Receiver<DataPoint>,
    running: AtomicBool,
    /// Unqueued mode performs Insert+Index on the caller's thread at Emit
    /// time. Preserved for test harnesses; queued is the production default.
    queued: bool,
    dispatcher: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Bus {
    pub fn new(
        store: Box<dyn Store>,
        index: Box<dyn Index>,
        stats: std::sync::Arc<Stats>,
        queued: bool,
    ) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            store,
            index,
            stats,
            sender,
            receiver,
            running: AtomicBool::new(false),
            queued,
            dispatcher: Mutex::new(None),
        }
    }

    pub fn emitter(&self) -> Emit {
        self.sender.clone()
    }

    /// Non-blocking: enqueues and returns (or, in unqueued mode, dispatches
    /// synchronously on the caller's thread).
    pub fn emit(&self, dp: DataPoint) {
        if self.queued {
            let _ = self.sender.send(dp);
        } else {
            Handle::current().block_on(self.dispatch(dp));
        }
    }

    async fn dispatch(&self, dp: DataPoint) {
        let _ = self.store.insert(dp.clone()).await;
        self.index.index(dp).await;
    }

    /// Starts the dispatcher loop on a dedicated OS thread: dequeue, dispatch,
    /// and on an empty queue sleep one second and retry. No condition
    /// variable — the 60s flush cadence dominates wakeup latency in
    /// steady state.
    pub fn start(self: &std::sync::Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        let bus = std::sync::Arc::clone(self);
        let rt = Handle::current();
        let handle = std::thread::spawn(move || {
            log::info!("bus dispatcher started");
            let mut last_depth_report = Instant::now();
            while bus.running.load(Ordering::SeqCst) {
                match bus.receiver.try_recv() {
                    Ok(dp) => rt.block_on(bus.dispatch(dp)),
                    Err(TryRecvError::Empty) => {
                        std::thread::sleep(Duration::from_secs(1));
                    }
                    Err(TryRecvError::Disconnected) => break,
                }
                if last_depth_report.elapsed() >= Duration::from_secs(60) {
                    bus.stats
                        .record_fixed("bus", "queue.size", bus.receiver.len() as i64);
                    last_depth_report = Instant::now();
                }
            }
        });
        *self.dispatcher.lock().unwrap() = Some(handle);
    }

    /// Drains the queue on shutdown: dispatch everything in flight, ask
    /// stats to flush (producing one last burst of synthetic datapoints),
    /// dispatch that burst too, then shut the index adapter down.
    pub async fn drain(&self, deadline: Instant) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.dispatcher.lock().unwrap().take() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let joined = tokio::time::timeout(remaining, tokio::task::spawn_blocking(move || handle.join())).await;
            match joined {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(_))) => log::warn!("bus dispatcher thread panicked"),
                Ok(Err(e)) => log::warn!("failed to join bus dispatcher thread: {e}"),
                Err(_) => log::warn!("bus dispatcher thread did not stop before shutdown deadline"),
            }
        }

        self.drain_queue(deadline).await;
        self.stats.drain(&self.sender);
        self.drain_queue(deadline).await;

        self.index.shutdown(deadline).await;
    }

    async fn drain_queue(&self, deadline: Instant) {
        while let Ok(dp) = self.receiver.try_recv() {
            if Instant::now() >= deadline {
                log::warn!(
                    "shutdown deadline reached with items still queued; dropping {} remaining",
                    self.receiver.len() + 1
                );
                return;
            }
            self.dispatch(dp).await;
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.receiver.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::DevNullIndex;
    use crate::store::DevNullStore;

    fn bus(queued: bool) -> Bus {
        let stats = std::sync::Arc::new(Stats::new(
            crate::config::StatsConfig {
                path: "carbon.writer".to_string(),
                interval: "60s".to_string(),
                log: false,
                segment: 0,
            },
            "host1".to_string(),
        ));
        Bus::new(
            Box::new(DevNullStore::default()),
            Box::new(DevNullIndex::default()),
            stats,
            queued,
        )
    }

    #[tokio::test]
    async fn queued_emit_enqueues_without_blocking() {
        let bus = bus(true);
        bus.emit(DataPoint {
            metric: "a.b".to_string(),
            value: 1.0,
            timestamp: 1,
        });
        assert_eq!(bus.queue_depth(), 1);
    }

    #[tokio::test]
    async fn unqueued_emit_dispatches_immediately() {
        let bus = bus(false);
        bus.emit(DataPoint {
            metric: "a.b".to_string(),
            value: 1.0,
            timestamp: 1,
        });
        assert_eq!(bus.queue_depth(), 0);
    }

    #[tokio::test]
    async fn drain_empties_the_queue_and_flushes_stats() {
        let bus = bus(true);
        bus.emit(DataPoint {
            metric: "a.b".to_string(),
            value: 1.0,
            timestamp: 1,
        });
        bus.drain(Instant::now() + Duration::from_secs(1)).await;
        assert_eq!(bus.queue_depth(), 0);
    }
}
