//! Bounded-parallel test runs over a candidate set
//!
//! A [`RunController`] owns the "one run at a time" invariant. Each run gets
//! a fresh [`TestSession`], a counting admission gate sized to the worker
//! budget, and a cancellation token. Results stream out in completion order
//! as [`RunEvent`]s while the session folds them into its [`Aggregator`].

use crate::error::RunError;
use crate::proxy::aggregator::{Aggregator, FinalStats};
use crate::proxy::checker::Probe;
use crate::proxy::models::{Candidate, ProbeResult};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Something a run reports while in progress
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A pipeline finished; emitted exactly once per reported candidate
    Result(ProbeResult),
    /// Completed count so far, out of the run's total
    Progress { completed: usize, total: usize },
}

/// State scoped to a single run
#[derive(Debug, Clone)]
pub struct TestSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    candidates: Vec<Candidate>,
    results: Vec<ProbeResult>,
    aggregator: Aggregator,
}

impl TestSession {
    fn new(candidates: Vec<Candidate>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            candidates,
            results: Vec::new(),
            aggregator: Aggregator::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Results in completion order
    pub fn results(&self) -> &[ProbeResult] {
        &self.results
    }

    pub fn best(&self) -> Option<&Candidate> {
        self.aggregator.best()
    }

    pub fn stats(&self) -> FinalStats {
        self.aggregator.finish(self.candidates.len())
    }

    fn record(&mut self, result: ProbeResult) {
        if self.aggregator.observe(&result) {
            debug!(best = %result.candidate, http_ms = result.http_time_ms, "new best candidate");
        }
        self.results.push(result);
    }
}

/// What a finished run hands back
#[derive(Debug, Clone)]
pub struct RunReport {
    pub session: TestSession,
    pub stats: FinalStats,
    /// The run ended on a stop request rather than exhaustion
    pub stopped: bool,
}

#[derive(Debug, Default)]
struct ControlState {
    /// Held for the whole lifetime of a run's driver
    active: AtomicBool,
    /// Cleared by a stop request
    running: AtomicBool,
    cancel: Mutex<CancellationToken>,
}

impl ControlState {
    fn current_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install_token(&self, token: CancellationToken) {
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = token;
    }
}

/// Releases the one-run slot when the driver ends, even by panic
struct ActiveGuard(Arc<ControlState>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
        self.0.active.store(false, Ordering::SeqCst);
    }
}

/// Cloneable handle for requesting a cooperative stop
#[derive(Debug, Clone)]
pub struct StopHandle {
    state: Arc<ControlState>,
}

impl StopHandle {
    /// Stop the current run, if any. In-flight pipelines are cancelled.
    pub fn stop(&self) {
        if self.state.running.swap(false, Ordering::SeqCst) {
            info!("test stopped by user");
        }
        self.state.current_token().cancel();
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }
}

/// A run in progress
pub struct RunHandle {
    events: mpsc::UnboundedReceiver<RunEvent>,
    driver: JoinHandle<RunReport>,
    stop: StopHandle,
    token: CancellationToken,
}

impl RunHandle {
    /// Next event, or `None` once the run has ended.
    ///
    /// Nothing is delivered after a stop request, including events the
    /// driver queued before it saw the stop.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        loop {
            let event = self.events.recv().await?;
            if !self.token.is_cancelled() {
                return Some(event);
            }
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Wait for the run to end. Undelivered events are discarded.
    pub async fn finish(self) -> Result<RunReport, RunError> {
        drop(self.events);
        self.driver
            .await
            .map_err(|e| RunError::Driver(e.to_string()))
    }
}

/// Runs a [`Probe`] over candidate sets, one run at a time
pub struct RunController<P: Probe> {
    prober: Arc<P>,
    state: Arc<ControlState>,
}

impl<P: Probe> RunController<P> {
    pub fn new(prober: P) -> Self {
        Self::from_arc(Arc::new(prober))
    }

    pub fn from_arc(prober: Arc<P>) -> Self {
        Self {
            prober,
            state: Arc::new(ControlState::default()),
        }
    }

    pub fn prober(&self) -> &Arc<P> {
        &self.prober
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            state: Arc::clone(&self.state),
        }
    }

    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    /// Start a run in the background.
    ///
    /// Fails without doing any work if a run is already active or there
    /// are no candidates. Must be called from within a tokio runtime.
    pub fn start(&self, candidates: Vec<Candidate>, max_workers: usize) -> Result<RunHandle, RunError> {
        if self
            .state
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RunError::AlreadyRunning);
        }
        let guard = ActiveGuard(Arc::clone(&self.state));
        if candidates.is_empty() {
            return Err(RunError::NoCandidates);
        }

        let token = CancellationToken::new();
        self.state.install_token(token.clone());
        self.state.running.store(true, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive(
            Arc::clone(&self.prober),
            candidates,
            max_workers.max(1),
            Arc::clone(&self.state),
            token.clone(),
            tx,
            guard,
        ));

        Ok(RunHandle {
            events: rx,
            driver,
            stop: self.stop_handle(),
            token,
        })
    }

    /// Run to completion, delivering each result and progress update to the callbacks
    pub async fn run<R, G>(
        &self,
        candidates: Vec<Candidate>,
        max_workers: usize,
        mut on_result: R,
        mut on_progress: G,
    ) -> Result<RunReport, RunError>
    where
        R: FnMut(&ProbeResult),
        G: FnMut(usize, usize),
    {
        let mut handle = self.start(candidates, max_workers)?;
        while let Some(event) = handle.next_event().await {
            match event {
                RunEvent::Result(result) => on_result(&result),
                RunEvent::Progress { completed, total } => on_progress(completed, total),
            }
        }
        handle.finish().await
    }
}

/// One pipeline under the admission gate; `None` when cancelled first
async fn run_pipeline<P: Probe>(
    prober: Arc<P>,
    permit: OwnedSemaphorePermit,
    token: CancellationToken,
    candidate: Candidate,
) -> Option<ProbeResult> {
    let _permit = permit;
    let probe = AssertUnwindSafe(prober.probe(&candidate)).catch_unwind();

    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        outcome = probe => Some(outcome.unwrap_or_else(|_| {
            warn!(%candidate, "probe pipeline panicked");
            ProbeResult::error(candidate.clone())
        })),
    }
}

async fn drive<P: Probe>(
    prober: Arc<P>,
    candidates: Vec<Candidate>,
    max_workers: usize,
    state: Arc<ControlState>,
    token: CancellationToken,
    events: mpsc::UnboundedSender<RunEvent>,
    _guard: ActiveGuard,
) -> RunReport {
    let total = candidates.len();
    let mut session = TestSession::new(candidates);
    let mut pending = session.candidates.clone().into_iter();
    let gate = Arc::new(Semaphore::new(max_workers));
    let mut tasks: JoinSet<Option<ProbeResult>> = JoinSet::new();
    let mut completed = 0usize;
    let mut stopped = false;

    info!(session = %session.id, total, max_workers, "test run started");

    while !pending.as_slice().is_empty() || !tasks.is_empty() {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                stopped = true;
                break;
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                let Some(result) = unwrap_joined(joined) else {
                    continue;
                };
                if !state.running.load(Ordering::SeqCst) {
                    session.record(result);
                    stopped = true;
                    break;
                }
                completed += 1;
                session.record(result.clone());
                let _ = events.send(RunEvent::Result(result));
                let _ = events.send(RunEvent::Progress { completed, total });
            }
            permit = Arc::clone(&gate).acquire_owned(), if !pending.as_slice().is_empty() => {
                let Ok(permit) = permit else {
                    break;
                };
                if let Some(candidate) = pending.next() {
                    tasks.spawn(run_pipeline(Arc::clone(&prober), permit, token.clone(), candidate));
                }
            }
        }
    }

    if stopped {
        token.cancel();
        let mut late = 0usize;
        while let Some(joined) = tasks.join_next().await {
            if let Some(result) = unwrap_joined(joined) {
                late += 1;
                session.record(result);
            }
        }
        info!(session = %session.id, completed, late, "test run stopped");
    }

    state.running.store(false, Ordering::SeqCst);
    let stats = session.stats();
    info!(
        session = %session.id,
        tested = stats.tested,
        active = stats.active,
        best = ?stats.best_candidate.as_ref().map(|c| c.to_string()),
        "test run finished"
    );

    RunReport {
        session,
        stats,
        stopped,
    }
}

fn unwrap_joined(joined: Result<Option<ProbeResult>, tokio::task::JoinError>) -> Option<ProbeResult> {
    match joined {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "probe task failed");
            None
        }
    }
}
