//! Periodic triggers for collection runs.
//!
//! Every trigger goes through [`Orchestrator::trigger_run`], so an interval tick that
//! lands while a run is executing queues (or coalesces) instead of overlapping it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::config::SyncConfig;
use crate::orchestrator::Orchestrator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub interval: Duration,
    pub crons: Vec<String>,
    pub run_on_start: bool,
}

impl From<&SyncConfig> for ScheduleConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            interval: config.interval(),
            crons: config.schedule_crons.clone(),
            run_on_start: config.run_on_start,
        }
    }
}

async fn run_triggered(orchestrator: Arc<Orchestrator>, trigger: &'static str) {
    match orchestrator.trigger_run().await {
        Ok(summary) => info!(
            trigger,
            run_id = %summary.run_id,
            new = summary.totals.new,
            alerted = summary.totals.alerted,
            "scheduled run finished"
        ),
        Err(err) => error!(trigger, error = %err, "scheduled run failed"),
    }
}

/// Builds and starts the scheduler: a fixed-interval job, one job per cron expression,
/// and optionally an immediate run.
pub async fn start_scheduler(orchestrator: Arc<Orchestrator>, schedule: &ScheduleConfig) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await.context("creating scheduler")?;

    let interval_orchestrator = orchestrator.clone();
    let interval_job = Job::new_repeated_async(schedule.interval, move |_uuid, _lock| {
        let orchestrator = interval_orchestrator.clone();
        Box::pin(async move { run_triggered(orchestrator, "interval").await })
    })
    .context("creating interval job")?;
    scheduler.add(interval_job).await.context("adding interval job")?;

    for cron in &schedule.crons {
        let cron_orchestrator = orchestrator.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let orchestrator = cron_orchestrator.clone();
            Box::pin(async move { run_triggered(orchestrator, "cron").await })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        scheduler.add(job).await.context("adding cron job")?;
    }

    scheduler.start().await.context("starting scheduler")?;
    info!(
        interval_secs = schedule.interval.as_secs(),
        crons = schedule.crons.len(),
        run_on_start = schedule.run_on_start,
        "scheduler started"
    );

    if schedule.run_on_start {
        tokio::spawn(run_triggered(orchestrator, "startup"));
    }
    Ok(scheduler)
}
