use ack_worker::{Job, WorkerEngine, WorkerError};
use async_trait::async_trait;
use tracing::{error, info};

/// Lifecycle of one background worker, as seen by the fleet.
#[async_trait]
pub trait ManagedWorker: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> Result<(), WorkerError>;

    async fn stop(&self);
}

#[async_trait]
impl<J: Job> ManagedWorker for WorkerEngine<J> {
    fn name(&self) -> &str {
        WorkerEngine::name(self)
    }

    async fn start(&self) -> Result<(), WorkerError> {
        WorkerEngine::start(self).await
    }

    async fn stop(&self) {
        WorkerEngine::stop(self).await
    }
}

/// Every background worker of a process.
///
/// Workers start in registration order and stop in reverse, so a consumer
/// registered after its producer is stopped first.
#[derive(Default)]
pub struct WorkerFleet {
    workers: Vec<Box<dyn ManagedWorker>>,
}

impl WorkerFleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, worker: impl ManagedWorker + 'static) -> Self {
        self.workers.push(Box::new(worker));
        self
    }

    pub fn push(&mut self, worker: Box<dyn ManagedWorker>) {
        self.workers.push(worker);
    }

    pub fn names(&self) -> Vec<&str> {
        self.workers.iter().map(|w| w.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Start all workers. If one fails, the ones already started are
    /// stopped again and the error is returned.
    pub async fn start_all(&self) -> Result<(), WorkerError> {
        for (index, worker) in self.workers.iter().enumerate() {
            if let Err(e) = worker.start().await {
                error!(worker = %worker.name(), error = %e, "worker failed to start");
                for started in self.workers[..index].iter().rev() {
                    started.stop().await;
                }
                return Err(e);
            }
        }
        info!(workers = self.workers.len(), "all workers started");
        Ok(())
    }

    pub async fn stop_all(&self) {
        for worker in self.workers.iter().rev() {
            worker.stop().await;
        }
        info!(workers = self.workers.len(), "all workers stopped");
    }
}
