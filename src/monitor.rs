//! Periodic acquisition scheduler.
//!
//! One supervised tokio task per service polls the acquisition source on an
//! interval and fans completed snapshots out to subscribers. The loop starts
//! with the first subscriber and stops when the last one is dropped; bus
//! work runs on the blocking pool because the protocol clients sleep while
//! retrying and waiting for conversions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::battery::PackSnapshot;
use crate::chain::ChainClient;
use crate::error::Result;
use crate::smbus::SmbusClient;
use crate::transport::{ChainBus, SmbusBus};

/// What the scheduler needs from a protocol client.
///
/// The same connection never sees concurrent operations: the service keeps
/// the source behind a mutex and polls it from one place.
pub trait AcquisitionSource: Send + 'static {
    /// Fast-moving readings, every tick.
    fn refresh_actuals(&mut self) -> Result<()>;
    /// Slow wear figures, on the health cadence.
    fn refresh_health(&mut self) -> Result<()>;
    /// Current view of the recognized pack, if any.
    fn snapshot(&self) -> Option<PackSnapshot>;
}

impl<B: SmbusBus + 'static> AcquisitionSource for SmbusClient<B> {
    fn refresh_actuals(&mut self) -> Result<()> {
        SmbusClient::refresh_actuals(self)
    }
    fn refresh_health(&mut self) -> Result<()> {
        SmbusClient::refresh_health(self)
    }
    fn snapshot(&self) -> Option<PackSnapshot> {
        SmbusClient::snapshot(self)
    }
}

impl<B: ChainBus + 'static> AcquisitionSource for ChainClient<B> {
    fn refresh_actuals(&mut self) -> Result<()> {
        ChainClient::refresh_actuals(self)
    }
    fn refresh_health(&mut self) -> Result<()> {
        ChainClient::refresh_health(self)
    }
    fn snapshot(&self) -> Option<PackSnapshot> {
        ChainClient::snapshot(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorOptions {
    pub interval: Duration,
    /// Health registers are read every this many ticks.
    pub health_every: u64,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            health_every: 10,
        }
    }
}

enum Control {
    Trigger,
    Stop,
}

struct Lifecycle {
    control: Option<mpsc::UnboundedSender<Control>>,
    task: Option<JoinHandle<()>>,
}

type SnapshotCallback = Arc<dyn Fn(PackSnapshot) + Send + Sync>;
type Subscribers = Mutex<HashMap<u64, SnapshotCallback>>;

/// RAII handle for a monitoring subscription. Dropping the last one stops
/// the polling loop.
pub struct MonitorSubscription {
    id: u64,
    subscribers: Weak<Subscribers>,
    lifecycle: Weak<Mutex<Lifecycle>>,
}

impl Drop for MonitorSubscription {
    fn drop(&mut self) {
        let Some(subscribers) = self.subscribers.upgrade() else {
            return;
        };
        let now_empty = match subscribers.lock() {
            Ok(mut map) => {
                map.remove(&self.id);
                map.is_empty()
            }
            Err(_) => return,
        };
        if !now_empty {
            return;
        }
        if let Some(lifecycle) = self.lifecycle.upgrade() {
            if let Ok(mut guard) = lifecycle.lock() {
                if let Some(control) = guard.control.take() {
                    let _ = control.send(Control::Stop);
                }
            }
        }
    }
}

/// Polls one acquisition source periodically and fans snapshots out.
pub struct MonitoringService<S: AcquisitionSource> {
    source: Arc<tokio::sync::Mutex<S>>,
    subscribers: Arc<Subscribers>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    next_id: AtomicU64,
    ticks: Arc<AtomicU64>,
    options: MonitorOptions,
}

impl<S: AcquisitionSource> MonitoringService<S> {
    pub fn new(source: S) -> Self {
        Self::with_options(source, MonitorOptions::default())
    }

    pub fn with_options(source: S, options: MonitorOptions) -> Self {
        Self {
            source: Arc::new(tokio::sync::Mutex::new(source)),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                control: None,
                task: None,
            })),
            next_id: AtomicU64::new(0),
            ticks: Arc::new(AtomicU64::new(0)),
            options,
        }
    }

    /// Polling rounds started so far; a round that fails transiently still
    /// counts.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Registers `callback` for every snapshot; starts the polling loop if
    /// it is not running. Must be called within a tokio runtime.
    #[must_use]
    pub fn subscribe<F>(&self, callback: F) -> MonitorSubscription
    where
        F: Fn(PackSnapshot) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let start = match self.subscribers.lock() {
            Ok(mut map) => {
                map.insert(id, Arc::new(callback));
                map.len() == 1
            }
            Err(_) => false,
        };
        if start {
            self.start_loop();
        }
        MonitorSubscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
            lifecycle: Arc::downgrade(&self.lifecycle),
        }
    }

    /// Forces an immediate poll outside the interval cadence. Returns false
    /// when the loop is not running.
    pub fn trigger(&self) -> bool {
        match self.lifecycle.lock() {
            Ok(guard) => guard
                .control
                .as_ref()
                .map(|control| control.send(Control::Trigger).is_ok())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Waits for the polling task to finish after the last unsubscribe.
    pub async fn stopped(&self) {
        let task = match self.lifecycle.lock() {
            Ok(mut guard) => guard.task.take(),
            Err(_) => None,
        };
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    fn start_loop(&self) {
        let (control, mut inbox) = mpsc::unbounded_channel();
        let source = Arc::clone(&self.source);
        let subscribers = Arc::clone(&self.subscribers);
        let ticks = Arc::clone(&self.ticks);
        let options = self.options;
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(options.interval);
            loop {
                let fire = tokio::select! {
                    _ = interval.tick() => true,
                    message = inbox.recv() => match message {
                        Some(Control::Trigger) => true,
                        Some(Control::Stop) | None => break,
                    },
                };
                if !fire {
                    continue;
                }
                let tick = ticks.fetch_add(1, Ordering::SeqCst);
                let include_health = tick % options.health_every == 0;
                match poll(&source, include_health).await {
                    Ok(Some(snapshot)) => dispatch(&subscribers, snapshot),
                    Ok(None) => warn!("poll completed without a recognized pack"),
                    Err(err) if err.is_transient() => {
                        warn!(%err, "transient acquisition fault, retrying next tick");
                    }
                    Err(err) => error!(%err, "acquisition failed"),
                }
            }
            debug!("monitoring loop stopped");
        });
        if let Ok(mut guard) = self.lifecycle.lock() {
            guard.control = Some(control);
            guard.task = Some(task);
        }
    }
}

/// One acquisition round on the blocking pool; the source mutex guarantees
/// a single in-flight operation per connection.
async fn poll<S: AcquisitionSource>(
    source: &Arc<tokio::sync::Mutex<S>>,
    include_health: bool,
) -> Result<Option<PackSnapshot>> {
    let source = Arc::clone(source);
    let joined = tokio::task::spawn_blocking(move || {
        let mut guard = source.blocking_lock();
        if include_health {
            guard.refresh_health()?;
        }
        guard.refresh_actuals()?;
        Ok(guard.snapshot())
    })
    .await;
    match joined {
        Ok(result) => result,
        Err(err) => {
            error!(%err, "acquisition task aborted");
            Ok(None)
        }
    }
}

fn dispatch(subscribers: &Arc<Subscribers>, snapshot: PackSnapshot) {
    let callbacks: Vec<(u64, SnapshotCallback)> = match subscribers.lock() {
        Ok(map) => map.iter().map(|(id, cb)| (*id, Arc::clone(cb))).collect(),
        Err(_) => return,
    };
    for (id, callback) in callbacks {
        let snapshot = snapshot.clone();
        let worker = tokio::spawn(async move { callback(snapshot) });
        // A panicking subscriber must not take the loop or its peers down.
        tokio::spawn(async move {
            if let Err(err) = worker.await {
                if err.is_panic() {
                    error!(subscriber = id, "snapshot callback panicked");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cadence_reads_health_every_tenth_tick() {
        let options = MonitorOptions::default();
        assert_eq!(options.health_every, 10);
        assert_eq!(options.interval, Duration::from_secs(1));
    }
}
