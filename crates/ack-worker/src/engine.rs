use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use ack_types::TenantId;
use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::config::EngineSettings;
use crate::error::WorkerError;

/// A unit of periodic background work, run once per tenant on every tick.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Tenants to visit on the next tick.
    async fn tenants(&self) -> Result<Vec<TenantId>, WorkerError>;

    /// Process one tenant. `cancel` fires when the engine is stopping;
    /// jobs stop taking on new work but finish what they hold.
    async fn run_tenant(
        &self,
        tenant: &TenantId,
        cancel: &CancellationToken,
    ) -> Result<TenantOutcome, WorkerError>;
}

/// What one tenant run did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TenantOutcome {
    pub delivered: u64,
    pub retried: u64,
    pub dead: u64,
    /// In-flight claims returned to pending, stale or never started.
    pub released: u64,
    /// Items whose outcome could not be recorded.
    pub failed: u64,
    /// Rows removed by a sweeper.
    pub swept: u64,
}

impl TenantOutcome {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }

    fn absorb(&mut self, other: &TenantOutcome) {
        self.delivered += other.delivered;
        self.retried += other.retried;
        self.dead += other.dead;
        self.released += other.released;
        self.failed += other.failed;
        self.swept += other.swept;
    }
}

/// Summary of one tick across all tenants.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tenants: usize,
    pub failed_tenants: usize,
    pub totals: TenantOutcome,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the scheduling loop of one [`Job`].
///
/// `start` and `stop` are idempotent. The engine can be restarted after a
/// stop. Dropping a running engine cancels its loop.
pub struct WorkerEngine<J: Job> {
    job: Arc<J>,
    settings: EngineSettings,
    span: Span,
    running: Mutex<Option<Running>>,
}

impl<J: Job> WorkerEngine<J> {
    pub fn new(job: J, settings: EngineSettings) -> Self {
        Self::from_arc(Arc::new(job), settings)
    }

    pub fn from_arc(job: Arc<J>, settings: EngineSettings) -> Self {
        Self {
            job,
            settings,
            span: Span::none(),
            running: Mutex::new(None),
        }
    }

    /// Parent span for the loop and everything the job logs.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn name(&self) -> &str {
        self.job.name()
    }

    pub fn job(&self) -> &Arc<J> {
        &self.job
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Start the scheduling loop.
    ///
    /// Probes the job's storage by listing tenants first; an unreachable
    /// store fails with [`WorkerError::StorageUnavailable`]. Calling `start`
    /// on a running engine does nothing.
    pub async fn start(&self) -> Result<(), WorkerError> {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            debug!(parent: &self.span, job = %self.job.name(), "worker already running");
            return Ok(());
        }

        match self.job.tenants().await {
            Ok(tenants) => {
                debug!(parent: &self.span, job = %self.job.name(), tenants = tenants.len(), "storage probe ok")
            }
            Err(WorkerError::StorageUnavailable(reason)) => {
                return Err(WorkerError::StorageUnavailable(reason))
            }
            Err(e) => return Err(WorkerError::StorageUnavailable(e.to_string())),
        }

        let cancel = CancellationToken::new();
        let span = tracing::info_span!(parent: &self.span, "worker", job = %self.job.name());
        let handle = tokio::spawn(
            run_loop(Arc::clone(&self.job), self.settings, cancel.clone()).instrument(span),
        );
        *running = Some(Running { cancel, handle });
        info!(
            parent: &self.span,
            job = %self.job.name(),
            poll_secs = self.settings.poll_interval.as_secs_f64(),
            "worker started"
        );
        Ok(())
    }

    /// Stop the loop, letting the in-flight tick finish within the shutdown
    /// grace period. Past the grace period the task is aborted.
    pub async fn stop(&self) {
        let Some(Running { cancel, mut handle }) = self.running.lock().await.take() else {
            return;
        };
        cancel.cancel();

        match tokio::time::timeout(self.settings.shutdown_grace, &mut handle).await {
            Ok(Ok(())) => info!(parent: &self.span, job = %self.job.name(), "worker stopped"),
            Ok(Err(e)) => {
                error!(parent: &self.span, job = %self.job.name(), error = %e, "worker task failed")
            }
            Err(_) => {
                warn!(
                    parent: &self.span,
                    job = %self.job.name(),
                    grace_secs = self.settings.shutdown_grace.as_secs_f64(),
                    "shutdown grace elapsed, aborting worker"
                );
                handle.abort();
                let _ = handle.await;
            }
        }
    }

    /// Run a single tick outside the loop.
    pub async fn tick(&self) -> Result<TickReport, WorkerError> {
        let span = tracing::info_span!(parent: &self.span, "tick", job = %self.job.name());
        run_tick(&self.job, &self.settings, &CancellationToken::new())
            .instrument(span)
            .await
    }
}

impl<J: Job> Drop for WorkerEngine<J> {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

async fn run_loop<J: Job>(job: Arc<J>, settings: EngineSettings, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(settings.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        match AssertUnwindSafe(run_tick(&job, &settings, &cancel))
            .catch_unwind()
            .await
        {
            Ok(Ok(report)) if report.failed_tenants > 0 || !report.totals.is_idle() => {
                debug!(
                    tenants = report.tenants,
                    failed = report.failed_tenants,
                    delivered = report.totals.delivered,
                    retried = report.totals.retried,
                    dead = report.totals.dead,
                    released = report.totals.released,
                    item_errors = report.totals.failed,
                    swept = report.totals.swept,
                    "tick finished"
                );
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "tick skipped: cannot list tenants"),
            Err(panic) => error!(panic = %panic_message(panic.as_ref()), "tick panicked"),
        }
    }
    debug!("worker loop exited");
}

async fn run_tick<J: Job>(
    job: &Arc<J>,
    settings: &EngineSettings,
    cancel: &CancellationToken,
) -> Result<TickReport, WorkerError> {
    let tenants = job.tenants().await?;
    let mut report = TickReport {
        tenants: tenants.len(),
        ..TickReport::default()
    };

    let results: Vec<(TenantId, Result<TenantOutcome, WorkerError>)> =
        futures::stream::iter(tenants)
            .map(|tenant| async move {
                let result = run_one(job.as_ref(), &tenant, settings, cancel).await;
                (tenant, result)
            })
            .buffer_unordered(settings.tenant_concurrency)
            .collect()
            .await;

    for (tenant, result) in results {
        match result {
            Ok(outcome) => report.totals.absorb(&outcome),
            Err(e) => {
                report.failed_tenants += 1;
                warn!(tenant = %tenant, error = %e, "tenant run failed");
            }
        }
    }
    Ok(report)
}

/// Run one tenant, isolating its panics and bounding its duration.
async fn run_one<J: Job>(
    job: &J,
    tenant: &TenantId,
    settings: &EngineSettings,
    cancel: &CancellationToken,
) -> Result<TenantOutcome, WorkerError> {
    let span = tracing::debug_span!("tenant", tenant = %tenant);
    let run = AssertUnwindSafe(job.run_tenant(tenant, cancel)).catch_unwind();
    match tokio::time::timeout(settings.tenant_timeout, run)
        .instrument(span)
        .await
    {
        Ok(Ok(result)) => result,
        Ok(Err(panic)) => Err(WorkerError::TenantPanicked {
            tenant: tenant.to_string(),
            message: panic_message(panic.as_ref()),
        }),
        Err(_) => Err(WorkerError::TenantTimeout {
            tenant: tenant.to_string(),
            secs: settings.tenant_timeout.as_secs(),
        }),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use super::*;

    /// Counts calls; a few tenant names trigger special behavior.
    #[derive(Default)]
    struct ProbeJob {
        tenants: Vec<&'static str>,
        storage_down: bool,
        tenant_calls: AtomicUsize,
        runs: AtomicUsize,
        visited: std::sync::Mutex<HashSet<String>>,
    }

    impl ProbeJob {
        fn with_tenants(tenants: &[&'static str]) -> Self {
            Self {
                tenants: tenants.to_vec(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Job for ProbeJob {
        fn name(&self) -> &str {
            "probe"
        }

        async fn tenants(&self) -> Result<Vec<TenantId>, WorkerError> {
            self.tenant_calls.fetch_add(1, Ordering::SeqCst);
            if self.storage_down {
                return Err(WorkerError::Storage("connection refused".into()));
            }
            Ok(self
                .tenants
                .iter()
                .map(|t| TenantId::new(*t).unwrap())
                .collect())
        }

        async fn run_tenant(
            &self,
            tenant: &TenantId,
            _cancel: &CancellationToken,
        ) -> Result<TenantOutcome, WorkerError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            match tenant.as_str() {
                "slow" => tokio::time::sleep(Duration::from_secs(30)).await,
                "broken" => return Err(WorkerError::Storage("tenant schema missing".into())),
                "panics" => panic!("handler bug"),
                _ => {}
            }
            self.visited.lock().unwrap().insert(tenant.to_string());
            Ok(TenantOutcome {
                delivered: 1,
                ..TenantOutcome::default()
            })
        }
    }

    fn fast_settings() -> EngineSettings {
        EngineSettings {
            poll_interval: Duration::from_millis(20),
            shutdown_grace: Duration::from_millis(200),
            tenant_concurrency: 4,
            tenant_timeout: Duration::from_millis(100),
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn stop_without_start_is_noop() {
        let engine = WorkerEngine::new(ProbeJob::with_tenants(&["a"]), fast_settings());
        engine.stop().await;
        engine.stop().await;
        assert!(!engine.is_running().await);
        assert_eq!(engine.job().runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn double_start_runs_one_loop() {
        let settings = EngineSettings {
            poll_interval: Duration::from_secs(3600),
            ..fast_settings()
        };
        let engine = WorkerEngine::new(ProbeJob::with_tenants(&["a"]), settings);
        engine.start().await.unwrap();
        engine.start().await.unwrap();
        let job = Arc::clone(engine.job());
        wait_until(|| job.runs.load(Ordering::SeqCst) >= 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // One probe plus one immediate tick.
        assert_eq!(job.tenant_calls.load(Ordering::SeqCst), 2);
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
        engine.stop().await;
    }

    #[tokio::test]
    async fn start_then_stop_leaves_nothing_running() {
        let engine = WorkerEngine::new(ProbeJob::with_tenants(&["a"]), fast_settings());
        engine.start().await.unwrap();
        assert!(engine.is_running().await);
        engine.stop().await;
        assert!(!engine.is_running().await);

        let runs = engine.job().runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.job().runs.load(Ordering::SeqCst), runs);
    }

    #[tokio::test]
    async fn engine_restarts_after_stop() {
        let engine = WorkerEngine::new(ProbeJob::with_tenants(&["a"]), fast_settings());
        engine.start().await.unwrap();
        engine.stop().await;
        let before = engine.job().runs.load(Ordering::SeqCst);

        engine.start().await.unwrap();
        let job = Arc::clone(engine.job());
        wait_until(|| job.runs.load(Ordering::SeqCst) > before).await;
        engine.stop().await;
    }

    #[tokio::test]
    async fn unreachable_storage_fails_start() {
        let job = ProbeJob {
            storage_down: true,
            ..ProbeJob::with_tenants(&["a"])
        };
        let engine = WorkerEngine::new(job, fast_settings());
        let err = engine.start().await.unwrap_err();
        assert!(matches!(err, WorkerError::StorageUnavailable(_)));
        assert!(!engine.is_running().await);
    }

    #[tokio::test]
    async fn bad_tenants_do_not_block_others() {
        let engine = WorkerEngine::new(
            ProbeJob::with_tenants(&["a", "slow", "broken", "panics", "b"]),
            fast_settings(),
        );
        let report = engine.tick().await.unwrap();

        assert_eq!(report.tenants, 5);
        assert_eq!(report.failed_tenants, 3);
        assert_eq!(report.totals.delivered, 2);
        let visited = engine.job().visited.lock().unwrap().clone();
        assert_eq!(visited, HashSet::from(["a".to_string(), "b".to_string()]));
    }

    /// Ignores cancellation and never finishes on its own.
    struct StuckJob;

    #[async_trait]
    impl Job for StuckJob {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn tenants(&self) -> Result<Vec<TenantId>, WorkerError> {
            Ok(vec![TenantId::default_tenant()])
        }

        async fn run_tenant(
            &self,
            _tenant: &TenantId,
            _cancel: &CancellationToken,
        ) -> Result<TenantOutcome, WorkerError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(TenantOutcome::default())
        }
    }

    #[tokio::test]
    async fn stop_aborts_after_grace() {
        let settings = EngineSettings {
            tenant_timeout: Duration::from_secs(3600),
            ..fast_settings()
        };
        let engine = WorkerEngine::new(StuckJob, settings);
        engine.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        engine.stop().await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!engine.is_running().await);
    }

    /// Takes 50 ms per tenant and counts runs that got to the end.
    #[derive(Default)]
    struct SteadyJob {
        started: AtomicUsize,
        finished: AtomicUsize,
    }

    #[async_trait]
    impl Job for SteadyJob {
        fn name(&self) -> &str {
            "steady"
        }

        async fn tenants(&self) -> Result<Vec<TenantId>, WorkerError> {
            Ok(vec![TenantId::default_tenant()])
        }

        async fn run_tenant(
            &self,
            _tenant: &TenantId,
            _cancel: &CancellationToken,
        ) -> Result<TenantOutcome, WorkerError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(TenantOutcome {
                delivered: 1,
                ..TenantOutcome::default()
            })
        }
    }

    #[tokio::test]
    async fn stop_lets_the_running_tick_finish_within_grace() {
        let settings = EngineSettings {
            poll_interval: Duration::from_secs(3600),
            shutdown_grace: Duration::from_secs(2),
            tenant_concurrency: 1,
            tenant_timeout: Duration::from_secs(2),
        };
        let engine = WorkerEngine::new(SteadyJob::default(), settings);
        engine.start().await.unwrap();
        let job = Arc::clone(engine.job());
        wait_until(|| job.started.load(Ordering::SeqCst) == 1).await;
        assert_eq!(job.finished.load(Ordering::SeqCst), 0);

        let stopping = Instant::now();
        engine.stop().await;
        assert_eq!(job.finished.load(Ordering::SeqCst), 1);
        assert!(stopping.elapsed() < settings.shutdown_grace);
        assert!(!engine.is_running().await);
    }
}
