use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use sigforge_adapters::{AdapterContext, SourceAdapter};
use sigforge_core::{
    normalize, score, AdapterReport, AdapterStatus, RuleSet, RuleSetError, RunCounts, RunState,
    RunSummary, SourceErrorKind,
};
use sigforge_storage::{HttpFetcher, PostingStore};
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::alerts::AlertDispatcher;

pub const MAX_FANOUT: usize = 8;

/// Run-fatal failures. Cloneable so every coalesced caller gets its own copy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error("rule set unavailable: {0}")]
    Rules(String),
    #[error("internal fault: {0}")]
    Internal(String),
}

impl From<RuleSetError> for RunError {
    fn from(err: RuleSetError) -> Self {
        RunError::Rules(err.to_string())
    }
}

/// Where each run takes its rule snapshot from.
#[derive(Debug, Clone)]
pub enum RuleSource {
    /// Re-read at the start of every run.
    File(PathBuf),
    Static(Arc<RuleSet>),
}

impl RuleSource {
    pub async fn load(&self) -> Result<Arc<RuleSet>, RuleSetError> {
        match self {
            RuleSource::Static(rules) => Ok(rules.clone()),
            RuleSource::File(path) => {
                let origin = path.display().to_string();
                let text = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| RuleSetError::Read {
                        path: origin.clone(),
                        source,
                    })?;
                Ok(Arc::new(RuleSet::from_yaml_str(&text, &origin)?))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub run_timeout: Duration,
    pub max_fanout: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            run_timeout: Duration::from_secs(120),
            max_fanout: MAX_FANOUT,
        }
    }
}

type RunOutcome = Option<Result<RunSummary, RunError>>;

/// Drives collection runs: one at a time, with at most one more queued behind it.
pub struct Orchestrator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    store: Arc<dyn PostingStore>,
    dispatcher: Option<AlertDispatcher>,
    rules: RuleSource,
    http: Arc<HttpFetcher>,
    config: OrchestratorConfig,
    run_lock: tokio::sync::Mutex<()>,
    queued: Mutex<Option<Arc<watch::Sender<RunOutcome>>>>,
    state: Arc<AtomicU8>,
    last_summary: RwLock<Option<RunSummary>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("adapters", &self.adapter_names())
            .field("alerts", &self.dispatcher.is_some())
            .field("rules", &self.rules)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        adapters: Vec<Arc<dyn SourceAdapter>>,
        store: Arc<dyn PostingStore>,
        rules: RuleSource,
        http: Arc<HttpFetcher>,
    ) -> Self {
        Self {
            adapters,
            store,
            dispatcher: None,
            rules,
            http,
            config: OrchestratorConfig::default(),
            run_lock: tokio::sync::Mutex::new(()),
            queued: Mutex::new(None),
            state: Arc::new(AtomicU8::new(RunState::Pending as u8)),
            last_summary: RwLock::new(None),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Option<AlertDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn adapter_names(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.name().to_string()).collect()
    }

    pub fn store(&self) -> Arc<dyn PostingStore> {
        self.store.clone()
    }

    pub fn rule_source(&self) -> &RuleSource {
        &self.rules
    }

    /// Furthest state reached by the current (or latest) run.
    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn last_run_summary(&self) -> Option<RunSummary> {
        self.last_summary
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Starts a run, or joins the one already queued. Callers that coalesce onto the
    /// same queued run all receive its outcome. Dropping the returned future does not
    /// cancel the run.
    pub async fn trigger_run(self: &Arc<Self>) -> Result<RunSummary, RunError> {
        let mut rx = {
            let mut queued = self.queued.lock().unwrap_or_else(PoisonError::into_inner);
            match queued.as_ref().map(|tx| tx.subscribe()) {
                Some(rx) => {
                    debug!("run already queued; coalescing trigger");
                    rx
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    let tx = Arc::new(tx);
                    *queued = Some(tx.clone());
                    let this = Arc::clone(self);
                    tokio::spawn(async move { this.lead(tx).await });
                    rx
                }
            }
        };

        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map(|outcome| (*outcome).clone())
            .map_err(|_| RunError::Internal("run ended without reporting".into()))?;
        outcome.unwrap_or_else(|| Err(RunError::Internal("run ended without reporting".into())))
    }

    async fn lead(self: Arc<Self>, tx: Arc<watch::Sender<RunOutcome>>) {
        let _running = self.run_lock.lock().await;
        {
            let mut queued = self.queued.lock().unwrap_or_else(PoisonError::into_inner);
            if queued.as_ref().is_some_and(|q| Arc::ptr_eq(q, &tx)) {
                *queued = None;
            }
        }
        let outcome = self.execute().await;
        tx.send_replace(Some(outcome));
    }

    fn advance(&self, state: RunState) {
        self.state.fetch_max(state as u8, Ordering::AcqRel);
    }

    fn finish(&self, summary: &RunSummary) {
        self.state.store(summary.state as u8, Ordering::Release);
        *self
            .last_summary
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(summary.clone());
    }

    async fn execute(&self) -> Result<RunSummary, RunError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        self.state.store(RunState::Pending as u8, Ordering::Release);
        let span = info_span!("collection_run", %run_id);

        async move {
            info!(adapters = self.adapters.len(), "collection run started");
            let rules = match self.rules.load().await {
                Ok(rules) => rules,
                Err(err) => {
                    error!(error = %err, "rule set load failed; run aborted");
                    let summary = RunSummary::from_reports(
                        run_id,
                        started_at,
                        Utc::now(),
                        RunState::Failed,
                        Vec::new(),
                    );
                    self.finish(&summary);
                    return Err(err.into());
                }
            };

            let deadline = Instant::now() + self.config.run_timeout;
            let ctx = AdapterContext::new(run_id, started_at, deadline, self.http.clone());
            let permits = Arc::new(Semaphore::new(
                self.adapters.len().clamp(1, self.config.max_fanout.max(1)),
            ));
            let claims: AlertClaims = Arc::new(Mutex::new(HashSet::new()));

            self.advance(RunState::Collecting);
            let mut handles = Vec::with_capacity(self.adapters.len());
            for adapter in &self.adapters {
                let name = adapter.name().to_string();
                let worker = AdapterWorker {
                    adapter: adapter.clone(),
                    store: self.store.clone(),
                    dispatcher: self.dispatcher.clone(),
                    rules: rules.clone(),
                    ctx: ctx.clone(),
                    state: self.state.clone(),
                    claims: claims.clone(),
                };
                let permits = permits.clone();
                let task = async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|_| RunError::Internal("fan-out semaphore closed".into()))?;
                    Ok::<_, RunError>(worker.run().await)
                }
                .instrument(info_span!("adapter", adapter = %name));
                handles.push((name, Instant::now(), tokio::spawn(task)));
            }

            // Totals are order independent.
            let mut reports = Vec::with_capacity(handles.len());
            let mut fault: Option<RunError> = None;
            for (name, spawned, handle) in handles {
                match handle.await {
                    Ok(Ok(report)) => reports.push(report),
                    Ok(Err(err)) => {
                        error!(adapter = %name, error = %err, "adapter task could not start");
                        fault.get_or_insert(err);
                    }
                    // A crashed adapter is contained like any other adapter failure.
                    Err(join_err) => {
                        error!(adapter = %name, error = %join_err, "adapter task panicked");
                        reports.push(report(
                            name,
                            AdapterStatus::Failed {
                                kind: SourceErrorKind::Crashed,
                                reason: crash_reason(join_err),
                            },
                            RunCounts::default(),
                            spawned,
                        ));
                    }
                }
            }

            let state = if fault.is_some() {
                RunState::Failed
            } else {
                RunState::Completed
            };
            let summary = RunSummary::from_reports(run_id, started_at, Utc::now(), state, reports);
            self.finish(&summary);
            info!(
                state = %summary.state,
                succeeded = summary.succeeded_adapters(),
                failed = summary.failed_adapters(),
                fetched = summary.totals.fetched,
                new = summary.totals.new,
                alerted = summary.totals.alerted,
                "collection run finished"
            );

            match fault {
                Some(err) => Err(err),
                None => Ok(summary),
            }
        }
        .instrument(span)
        .await
    }
}

// Ids alerted (or being alerted) in the current run; stops two adapters that
// observe the same posting from both sending.
type AlertClaims = Arc<Mutex<HashSet<String>>>;

struct AdapterWorker {
    adapter: Arc<dyn SourceAdapter>,
    store: Arc<dyn PostingStore>,
    dispatcher: Option<AlertDispatcher>,
    rules: Arc<RuleSet>,
    ctx: AdapterContext,
    state: Arc<AtomicU8>,
    claims: AlertClaims,
}

impl AdapterWorker {
    fn advance(&self, state: RunState) {
        self.state.fetch_max(state as u8, Ordering::AcqRel);
    }

    fn claim(&self, id: &str) -> bool {
        self.claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string())
    }

    async fn run(self) -> AdapterReport {
        let started = Instant::now();
        let name = self.adapter.name().to_string();
        let mut counts = RunCounts::default();

        let records = match tokio::time::timeout_at(self.ctx.deadline, self.adapter.fetch(&self.ctx)).await {
            Ok(Ok(records)) => records,
            Ok(Err(err)) => {
                warn!(kind = %err.kind, error = %err.message, "adapter fetch failed");
                return report(name, AdapterStatus::Failed { kind: err.kind, reason: err.message }, counts, started);
            }
            Err(_) => {
                warn!("adapter fetch exceeded run deadline");
                return report(
                    name,
                    AdapterStatus::Failed {
                        kind: SourceErrorKind::Timeout,
                        reason: "run deadline elapsed before fetch completed".into(),
                    },
                    counts,
                    started,
                );
            }
        };
        counts.fetched = records.len();

        let as_of = self.ctx.started_at;
        let threshold = self.rules.alert_threshold;
        for raw in &records {
            let mut posting = match normalize(raw, &name, as_of) {
                Ok(posting) => posting,
                Err(err) => {
                    counts.normalization_failures += 1;
                    debug!(error = %err, "record skipped");
                    continue;
                }
            };
            counts.normalized += 1;

            self.advance(RunState::Scoring);
            posting.score = score(&posting, &self.rules, as_of);

            self.advance(RunState::Persisting);
            let upsert = match self.store.upsert(&posting).await {
                Ok(result) => result,
                Err(err) => {
                    counts.store_failures += 1;
                    warn!(posting_id = %posting.id, error = %err, "upsert failed");
                    continue;
                }
            };
            if upsert.is_new {
                counts.new += 1;
            } else {
                counts.updated += 1;
            }

            let eligible = (upsert.is_new || posting.score >= threshold)
                && !upsert.previously_alerted
                && posting.score >= threshold;
            let Some(dispatcher) = self.dispatcher.as_ref() else {
                continue;
            };
            if !eligible || !self.claim(&posting.id) {
                continue;
            }

            self.advance(RunState::Alerting);
            if dispatcher.dispatch(&posting).await.is_err() {
                counts.dispatch_failures += 1;
                continue;
            }
            match self.store.mark_alerted(&posting.id).await {
                Ok(()) => counts.alerted += 1,
                Err(err) => {
                    counts.store_failures += 1;
                    warn!(posting_id = %posting.id, error = %err, "alert sent but not recorded");
                }
            }
        }

        info!(
            fetched = counts.fetched,
            new = counts.new,
            updated = counts.updated,
            alerted = counts.alerted,
            "adapter finished"
        );
        report(name, AdapterStatus::Ok, counts, started)
    }
}

fn crash_reason(err: tokio::task::JoinError) -> String {
    if err.is_cancelled() {
        return "adapter task cancelled".into();
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".into());
    format!("adapter task panicked: {message}")
}

fn report(adapter: String, status: AdapterStatus, counts: RunCounts, started: Instant) -> AdapterReport {
    AdapterReport {
        adapter,
        status,
        counts,
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    }
}
