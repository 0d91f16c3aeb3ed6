use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use postview_events::{Acknowledge, EventBus, Keyed, Subscription};

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// Messages already delivered to the subscription are handled before
    /// this returns.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Partitioned projection worker.
///
/// - Subscribes to an event bus
/// - Routes each message by a hash of its key to one of N partitions
/// - Each partition is one thread applying the handler in arrival order, so
///   per-key order is kept while distinct keys proceed in parallel
/// - Handler errors are logged and never stop the loop
/// - A message's delivery receipt is settled only after its handler
///   returned, so a crash mid-handling leaves it unconfirmed at the transport
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    /// Spawn the dispatcher and `partitions` consumer threads.
    ///
    /// `handler` must be idempotent (at-least-once delivery safe).
    pub fn spawn<M, B, H, E>(
        name: &'static str,
        bus: B,
        partitions: usize,
        handler: H,
    ) -> std::io::Result<WorkerHandle>
    where
        M: Keyed + Acknowledge + Send + 'static,
        B: EventBus<M> + 'static,
        H: Fn(M) -> Result<(), E> + Send + Sync + 'static,
        E: core::fmt::Debug + 'static,
    {
        let partitions = partitions.max(1);
        let handler = Arc::new(handler);

        let mut senders = Vec::with_capacity(partitions);
        let mut joins = Vec::with_capacity(partitions);
        for index in 0..partitions {
            let (tx, rx) = mpsc::channel::<M>();
            let handler = Arc::clone(&handler);
            let join = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || partition_loop(name, index, rx, handler.as_ref()))?;
            senders.push(tx);
            joins.push(join);
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<M> = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                // The bus must outlive the subscription for remote transports.
                let _bus = bus;
                dispatch_loop(name, &sub, shutdown_rx, &senders);
                drop(senders);
                for j in joins {
                    let _ = j.join();
                }
                // Dropped after the partitions settled their receipts.
                drop(sub);
                info!(worker = name, "projection worker stopped");
            })?;

        info!(worker = name, partitions, "projection worker started");
        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

/// Partition a key is pinned to.
pub fn partition_for(key: &str, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions.max(1) as u64) as usize
}

fn dispatch_loop<M>(
    name: &'static str,
    sub: &Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    partitions: &[mpsc::Sender<M>],
) where
    M: Keyed,
{
    let tick = Duration::from_millis(250);
    let route = |msg: M| {
        let index = partition_for(msg.key(), partitions.len());
        if partitions[index].send(msg).is_err() {
            warn!(worker = name, partition = index, "partition consumer gone; message dropped");
        }
    };

    loop {
        // Shutdown check (non-blocking)
        if shutdown_rx.try_recv().is_ok() {
            // Drain what was already delivered before stopping intake.
            while let Ok(msg) = sub.try_recv() {
                route(msg);
            }
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(msg) => route(msg),
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn partition_loop<M, H, E>(name: &'static str, index: usize, rx: mpsc::Receiver<M>, handler: &H)
where
    M: Acknowledge,
    H: Fn(M) -> Result<(), E>,
    E: core::fmt::Debug,
{
    // Ends once the dispatcher drops its sender and the queue is empty.
    for mut msg in rx {
        let receipt = msg.take_receipt();
        if let Err(err) = handler(msg) {
            // Handler errors mean the message itself is unusable; redelivery
            // would fail the same way, so it is settled too.
            warn!(worker = name, partition = index, error = ?err, "projection worker handler failed");
        }
        if let Some(receipt) = receipt {
            receipt.settle();
        }
    }
}
