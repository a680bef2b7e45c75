//! Named background services sharing one shutdown token.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::ServerResult;

/// How long [`ServiceManager::stop`] waits before giving up on services.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

/// Delays between outstanding checks while stopping. The last one repeats.
const STOP_POLL_STEPS: [Duration; 5] = [
    Duration::from_millis(10),
    Duration::from_millis(20),
    Duration::from_millis(30),
    Duration::from_millis(40),
    Duration::from_secs(1),
];

type Running = Arc<Mutex<BTreeMap<String, usize>>>;

/// Removes a service from the running set when its task ends, however it ends.
struct RunningGuard {
    running: Running,
    name: String,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = running.get_mut(&self.name) {
            *count -= 1;
            if *count == 0 {
                running.remove(&self.name);
            }
        }
    }
}

/// Spawns services and waits for them on shutdown.
pub struct ServiceManager {
    cancel: CancellationToken,
    running: Running,
    tasks: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl std::fmt::Debug for ServiceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceManager")
            .field("outstanding", &self.outstanding())
            .field("grace", &self.grace)
            .finish_non_exhaustive()
    }
}

impl ServiceManager {
    /// Services are cancelled through children of `cancel`.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            running: Arc::default(),
            tasks: Vec::new(),
            grace: DEFAULT_STOP_GRACE,
        }
    }

    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Spawns `service` under `name`.
    ///
    /// An error returned by the service is logged and ends only that service.
    pub fn add<F, Fut>(&mut self, name: impl Into<String>, service: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ServerResult<()>> + Send + 'static,
    {
        let name = name.into();
        *self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.clone())
            .or_default() += 1;

        let guard = RunningGuard {
            running: Arc::clone(&self.running),
            name: name.clone(),
        };
        let future = service(self.cancel.child_token());
        info!(service = %name, "starting service");
        self.tasks.push(tokio::spawn(async move {
            let _guard = guard;
            match future.await {
                Ok(()) => info!(service = %name, "service exited"),
                Err(e) => error!(service = %name, error = %e, "service failed"),
            }
        }));
    }

    /// Names of services that have not exited yet.
    pub fn outstanding(&self) -> Vec<String> {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Cancels every service and waits for them to exit.
    ///
    /// Returns the names still running when the grace period ran out. Their
    /// tasks are aborted.
    pub async fn stop(mut self) -> Vec<String> {
        self.cancel.cancel();
        let start = Instant::now();
        let mut steps = STOP_POLL_STEPS.iter().copied();
        let mut delay = Duration::ZERO;

        loop {
            let outstanding = self.outstanding();
            if outstanding.is_empty() {
                info!("all services stopped");
                for task in self.tasks.drain(..) {
                    let _ = task.await;
                }
                return outstanding;
            }

            let elapsed = start.elapsed();
            if elapsed >= self.grace {
                warn!(services = ?outstanding, "services did not stop in time");
                for task in self.tasks.drain(..) {
                    task.abort();
                }
                return outstanding;
            }

            if delay >= Duration::from_secs(1) {
                for name in &outstanding {
                    info!(service = %name, "still running");
                }
            }

            delay = steps.next().unwrap_or(delay);
            tokio::time::sleep(delay.min(self.grace - elapsed)).await;
        }
    }
}
