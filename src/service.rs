//! Background services
//!
//! Long-running maintenance tasks run under a small supervisor with a
//! shared broadcast shutdown signal. The only built-in service is the
//! sweeper, which periodically drops expired cache entries and finished
//! tasks past their result TTL.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::api::ExplorerService;

/// Where a service is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStatus {
    /// Registered but not started
    Idle,
    /// Main loop running
    Running,
    /// Shutdown observed, loop exited
    Stopped,
}

/// A long-running background task
///
/// Implementations own their loop and must exit promptly when the
/// shutdown receiver fires.
#[async_trait::async_trait]
pub trait Service: Send + Sync {
    /// Run the service until shutdown
    async fn run(&self, shutdown: broadcast::Receiver<()>);

    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Current lifecycle state
    fn status(&self) -> ServiceStatus;
}

/// Spawns registered services and coordinates their shutdown
pub struct Supervisor {
    shutdown_tx: broadcast::Sender<()>,
    handles: RwLock<Vec<(&'static str, JoinHandle<()>)>>,
}

impl Supervisor {
    /// New supervisor with no services running
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_tx,
            handles: RwLock::new(Vec::new()),
        }
    }

    /// Spawn a service onto the runtime
    pub fn spawn(&self, service: Arc<dyn Service>) {
        let shutdown = self.shutdown_tx.subscribe();
        let name = service.name();
        let handle = tokio::spawn(async move {
            tracing::info!(service = name, "Service started");
            service.run(shutdown).await;
            tracing::info!(service = name, "Service stopped");
        });
        self.handles.write().push((name, handle));
    }

    /// Signal every service to stop and wait for their loops to exit
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let handles: Vec<_> = self.handles.write().drain(..).collect();
        for (name, handle) in handles {
            if handle.await.is_err() {
                tracing::warn!(service = name, "Service task panicked during shutdown");
            }
        }
    }

    /// How many services are currently spawned
    pub fn len(&self) -> usize {
        self.handles.read().len()
    }

    /// Whether no services are spawned
    pub fn is_empty(&self) -> bool {
        self.handles.read().is_empty()
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic sweep of expired cache entries and finished tasks
pub struct SweeperService {
    explorer: Arc<ExplorerService>,
    interval: Duration,
    status: RwLock<ServiceStatus>,
}

impl SweeperService {
    /// Sweeper over one explorer instance, ticking every `interval`
    pub fn new(explorer: Arc<ExplorerService>, interval: Duration) -> Self {
        Self {
            explorer,
            interval,
            status: RwLock::new(ServiceStatus::Idle),
        }
    }
}

#[async_trait::async_trait]
impl Service for SweeperService {
    async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        *self.status.write() = ServiceStatus::Running;
        let mut ticker = tokio::time::interval(self.interval);
        // the first tick fires immediately; skip it so a fresh process
        // does not sweep before anything could expire
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    let removed = self.explorer.sweep();
                    if removed > 0 {
                        tracing::debug!(removed, "Sweeper removed expired entries");
                    }
                }
            }
        }
        *self.status.write() = ServiceStatus::Stopped;
    }

    fn name(&self) -> &'static str {
        "sweeper"
    }

    fn status(&self) -> ServiceStatus {
        self.status.read().clone()
    }
}
