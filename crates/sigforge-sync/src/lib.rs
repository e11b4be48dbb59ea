//! Collection pipeline orchestration: runs, alerts, schedules and process wiring.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sigforge_adapters::{build_adapters, load_sources};
use sigforge_core::RuleSet;
use sigforge_storage::{
    HttpFetcher, MemoryPostingStore, PgPostingStore, PostingFilter, PostingStore,
};
use tracing::{info, warn};

mod alerts;
mod config;
mod orchestrator;
mod scheduler;

pub use alerts::{
    format_alert, AlertDispatcher, ChannelError, DispatchError, NotificationChannel,
    TelegramChannel, TELEGRAM_API_BASE,
};
pub use config::{ConfigError, SyncConfig, DEFAULT_USER_AGENT};
pub use orchestrator::{Orchestrator, OrchestratorConfig, RuleSource, RunError, MAX_FANOUT};
pub use scheduler::{start_scheduler, ScheduleConfig};

pub const CRATE_NAME: &str = "sigforge-sync";

/// Per-send bound for one alert, on top of the channel's own retries.
pub const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Postgres when `DATABASE_URL` is set (migrations applied), memory otherwise.
pub async fn build_store(config: &SyncConfig) -> Result<Arc<dyn PostingStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PgPostingStore::connect(url)
                .await
                .context("connecting to postgres")?;
            store.migrate().await.context("applying migrations")?;
            info!("using postgres posting store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set; postings are kept in memory only");
            Ok(Arc::new(MemoryPostingStore::new()))
        }
    }
}

/// `None` when alerts are disabled. Call after [`SyncConfig::validate`].
pub fn build_dispatcher(config: &SyncConfig) -> Result<Option<AlertDispatcher>> {
    if !config.enable_alerts {
        info!("alerts disabled");
        return Ok(None);
    }
    let (Some(token), Some(chat_id)) = (&config.telegram_token, &config.telegram_chat_id) else {
        return Err(ConfigError::MissingAlertSetting("TELEGRAM_TOKEN/TELEGRAM_CHAT_ID").into());
    };
    let channel = TelegramChannel::new(
        token.clone(),
        chat_id.clone(),
        Duration::from_secs(config.http_timeout_secs),
    )?;
    Ok(Some(AlertDispatcher::new(Arc::new(channel), DISPATCH_TIMEOUT)))
}

/// Wires registry, store, rules and alerts into a ready orchestrator.
pub async fn build_orchestrator(config: &SyncConfig) -> Result<Arc<Orchestrator>> {
    config.validate()?;

    let sources = load_sources(&config.sources_file)?;
    let adapters = build_adapters(&sources)?;
    let http = Arc::new(HttpFetcher::new(config.http_client_config())?);
    let store = build_store(config).await?;
    let dispatcher = build_dispatcher(config)?;

    // Fail fast on a broken rules file; each run still re-reads it.
    RuleSet::load(&config.rules_file)
        .with_context(|| format!("loading rules from {}", config.rules_file.display()))?;

    let orchestrator = Orchestrator::new(adapters, store, RuleSource::File(config.rules_file.clone()), http)
        .with_dispatcher(dispatcher)
        .with_config(OrchestratorConfig {
            run_timeout: config.run_timeout(),
            ..OrchestratorConfig::default()
        });
    info!(adapters = ?orchestrator.adapter_names(), "orchestrator ready");
    Ok(Arc::new(orchestrator))
}

/// Sends alerts for the `count` highest-scored postings without touching `alerted`.
pub async fn send_test_alerts(
    store: &dyn PostingStore,
    dispatcher: &AlertDispatcher,
    count: usize,
) -> Result<usize> {
    let top = store
        .list(&PostingFilter {
            limit: count,
            ..PostingFilter::default()
        })
        .await?;
    let mut sent = 0;
    for stored in &top {
        match dispatcher.dispatch(&stored.posting).await {
            Ok(()) => sent += 1,
            Err(err) => warn!(posting_id = %stored.posting.id, error = %err, "test alert failed"),
        }
    }
    Ok(sent)
}
