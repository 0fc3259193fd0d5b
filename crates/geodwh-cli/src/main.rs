use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use geodwh_migrate::MigrationRunner;
use geodwh_sync::{
    run_pipeline, sync_entity, MarkerSync, RegionSync, SyncConfig, UserSync,
};

#[derive(Debug, Parser)]
#[command(name = "geodwh-cli")]
#[command(about = "Geospatial DWH loader command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Full load: clean-start migrations, then region, marker and user sync.
    Run {
        /// Cron expression for repeated runs; one-shot when omitted.
        #[arg(long)]
        cron: Option<String>,
    },
    /// Apply warehouse migrations without syncing anything.
    Migrate {
        #[arg(value_enum, default_value = "up")]
        mode: MigrateMode,
    },
    /// Sync a single entity against the current warehouse schema.
    Sync {
        #[arg(value_enum)]
        entity: Entity,
    },
    /// Drop the warehouse database entirely.
    DropDwh,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MigrateMode {
    Up,
    Down,
    CleanStart,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Entity {
    Regions,
    Markers,
    Users,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match dispatch(cli.command.unwrap_or(Commands::Run { cron: None }), &config).await {
        Ok(true) => ExitCode::SUCCESS,
        // The run reached its end but at least one entity batch rolled back.
        Ok(false) => ExitCode::from(2),
        Err(err) => {
            let detail = format!("{err:#}");
            error!(error = %detail, "run aborted");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: Commands, config: &SyncConfig) -> Result<bool> {
    match command {
        Commands::Run { cron: None } => {
            let summary = run_pipeline(config).await?;
            info!(
                run_id = %summary.run_id,
                synced = summary.reports.len(),
                failures = summary.failures.len(),
                "run complete"
            );
            Ok(summary.clean())
        }
        Commands::Run { cron: Some(expr) } => {
            run_scheduled(config, &expr).await?;
            Ok(true)
        }
        Commands::Migrate { mode } => {
            let warehouse = connect_warehouse(config).await?;
            let runner = MigrationRunner::new(&config.migrations_path);
            match mode {
                MigrateMode::Up => runner.migrate_up(&warehouse).await?,
                MigrateMode::Down => runner.migrate_down(&warehouse).await?,
                MigrateMode::CleanStart => runner.migrate_with_clean_start(&warehouse).await?,
            }
            Ok(true)
        }
        Commands::Sync { entity } => {
            let db = config.db();
            let warehouse = connect_warehouse(config).await?;
            let report = match entity {
                Entity::Regions => {
                    let source = geodwh_db::connect_source(&db)?;
                    sync_entity(&RegionSync::new(&source), &warehouse).await?
                }
                Entity::Markers => {
                    let source = geodwh_db::connect_source(&db)?;
                    sync_entity(&MarkerSync::new(&source), &warehouse).await?
                }
                Entity::Users => {
                    sync_entity(&UserSync::new(&config.users_data_path), &warehouse).await?
                }
            };
            info!(
                entity = report.entity,
                upserted = report.upserted,
                deleted = report.deleted,
                "entity sync complete"
            );
            Ok(true)
        }
        Commands::DropDwh => {
            let db = config.db();
            let mut bootstrap = geodwh_db::bootstrap_connection(&db)
                .await
                .context("opening bootstrap connection")?;
            geodwh_db::drop_database(&mut bootstrap, &db.dwh_dbname)
                .await
                .context("dropping warehouse database")?;
            info!(database = %db.dwh_dbname, "warehouse dropped");
            Ok(true)
        }
    }
}

async fn connect_warehouse(config: &SyncConfig) -> Result<sqlx::PgPool> {
    let db = config.db();
    let mut bootstrap = geodwh_db::bootstrap_connection(&db)
        .await
        .context("opening bootstrap connection")?;
    geodwh_db::ensure_database(&mut bootstrap, &db.dwh_dbname)
        .await
        .context("ensuring warehouse database exists")?;
    drop(bootstrap);

    geodwh_db::connect_warehouse(&db)
        .await
        .context("connecting to warehouse database")
}

async fn run_scheduled(config: &SyncConfig, cron: &str) -> Result<()> {
    let mut sched = JobScheduler::new().await.context("creating scheduler")?;
    let job_config = config.clone();
    let job = Job::new_async(cron, move |_uuid, _l| {
        let config = job_config.clone();
        Box::pin(async move {
            match run_pipeline(&config).await {
                Ok(summary) if summary.clean() => {}
                Ok(summary) => warn!(
                    failures = summary.failures.len(),
                    "scheduled run finished with failures"
                ),
                Err(err) => {
                    let detail = format!("{err:#}");
                    error!(error = %detail, "scheduled run aborted");
                }
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;

    sched.add(job).await.context("adding scheduler job")?;
    sched.start().await.context("starting scheduler")?;
    info!(cron, "scheduler running; Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    sched.shutdown().await.context("stopping scheduler")?;
    Ok(())
}

fn init_tracing() {
    let level = match std::env::var("LOG_LEVEL").ok().as_deref() {
        Some("debug") => "debug",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
