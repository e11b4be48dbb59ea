use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use sigforge_storage::{PgPostingStore, PostingFilter};
use sigforge_sync::{ScheduleConfig, SyncConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "sigforge")]
#[command(about = "SigForge job signal pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one collection and print its summary.
    Collect,
    /// Scheduler plus the HTTP surface.
    Serve,
    /// Scheduler only.
    Schedule,
    /// Apply Postgres migrations.
    Migrate,
    Stats,
    ListJobs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        min_score: Option<u8>,
        #[arg(long)]
        location: Option<String>,
    },
    /// Send alerts for the top postings without marking them alerted.
    TestAlert {
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,hyper=warn,reqwest=warn"));
    let json = std::env::var("SIGFORGE_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "ctrl-c handler failed");
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Collect) {
        Commands::Collect => {
            let orchestrator = sigforge_sync::build_orchestrator(&config).await?;
            let summary = orchestrator.trigger_run().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Serve => {
            let orchestrator = sigforge_sync::build_orchestrator(&config).await?;
            let mut scheduler =
                sigforge_sync::start_scheduler(orchestrator.clone(), &ScheduleConfig::from(&config)).await?;
            sigforge_web::serve(&config.web_addr, orchestrator, shutdown_signal()).await?;
            scheduler.shutdown().await?;
        }
        Commands::Schedule => {
            let orchestrator = sigforge_sync::build_orchestrator(&config).await?;
            let mut scheduler =
                sigforge_sync::start_scheduler(orchestrator, &ScheduleConfig::from(&config)).await?;
            shutdown_signal().await;
            scheduler.shutdown().await?;
        }
        Commands::Migrate => {
            let Some(url) = config.database_url.as_deref() else {
                bail!("DATABASE_URL must be set to run migrations");
            };
            let store = PgPostingStore::connect(url).await?;
            store.migrate().await?;
            println!("migrations applied");
        }
        Commands::Stats => {
            let store = sigforge_sync::build_store(&config).await?;
            let threshold = sigforge_core::RuleSet::load(&config.rules_file)?.alert_threshold;
            let stats = store.stats(threshold).await?;
            println!(
                "total={} high_score={} alerted={} threshold={}",
                stats.total, stats.high_score, stats.alerted, threshold
            );
        }
        Commands::ListJobs {
            limit,
            min_score,
            location,
        } => {
            let store = sigforge_sync::build_store(&config).await?;
            let filter = PostingFilter {
                limit,
                min_score,
                location,
                ..PostingFilter::default()
            };
            for stored in store.list(&filter).await? {
                let p = &stored.posting;
                println!(
                    "{:>3}  {}  {} @ {}  [{}]  {}",
                    p.score,
                    p.id,
                    p.title,
                    if p.company.is_empty() { "Unknown" } else { p.company.as_str() },
                    p.location,
                    p.url
                );
            }
        }
        Commands::TestAlert { count } => {
            config.validate()?;
            let Some(dispatcher) = sigforge_sync::build_dispatcher(&config)? else {
                bail!("SIGFORGE_ENABLE_ALERTS is off; nothing to send through");
            };
            let store = sigforge_sync::build_store(&config).await?;
            let sent = sigforge_sync::send_test_alerts(store.as_ref(), &dispatcher, count).await?;
            println!("sent {sent} test alert(s) via {}", dispatcher.channel_name());
        }
    }

    Ok(())
}
