use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use archivist::{
    config::ArchivistConfig,
    db,
    dialect::DatabaseFamily,
    engine::{
        AgingSelection, Archiver, ConnectionPair, EngineSettings, ProcessReport, RunRequest,
        SqlTransactionLog, TracingNotifier, TransactionLog, notify,
    },
    observability,
    policy::TomlPolicyStore,
};
use chrono::NaiveDate;
use clap::Parser;
use tokio_util::sync::CancellationToken;

/// CLI arguments for the archive engine
#[derive(Parser, Debug)]
#[command(version, about = "Policy-driven archive and purge engine", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file
    #[arg(short, long, global = true, default_value = "archivist.toml")]
    config: PathBuf,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run archive and purge policies
    Run {
        /// Policies to run, in order (defaults to every policy)
        #[arg(short, long, value_delimiter = ',')]
        policies: Vec<String>,
        /// Keep this many days of data for every archive policy
        #[arg(long, conflicts_with = "aging_date")]
        aging_days: Option<u32>,
        /// Archive everything older than this date (YYYY-MM-DD)
        #[arg(long)]
        aging_date: Option<NaiveDate>,
        /// SQL family to generate fragments for (overrides engine.dialect)
        #[arg(long)]
        dialect: Option<DatabaseFamily>,
    },
    /// Create the transaction log tables in the core database
    Install,
    /// Resolve every policy's filter templates without touching data
    Check {
        /// Policies to check (defaults to every policy)
        #[arg(short, long, value_delimiter = ',')]
        policies: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let config = load_config(&args.config);

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Failed to initialize tracing: {e}");
        return ExitCode::FAILURE;
    }

    match args.command {
        Command::Run {
            policies,
            aging_days,
            aging_date,
            dialect,
        } => {
            let aging = match (aging_days, aging_date) {
                (_, Some(date)) => AgingSelection::Date(date),
                (Some(days), None) => AgingSelection::Days(days),
                (None, None) => AgingSelection::Default,
            };
            run_process(config, RunRequest { policies, aging }, dialect).await
        }
        Command::Install => run_install(&config).await,
        Command::Check { policies } => run_check(&config, &policies).await,
    }
}

fn load_config(path: &Path) -> ArchivistConfig {
    match ArchivistConfig::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn load_store(config: &ArchivistConfig) -> TomlPolicyStore {
    match TomlPolicyStore::from_config(config) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Failed to load policies: {e}");
            std::process::exit(1);
        }
    }
}

async fn run_process(
    config: ArchivistConfig,
    request: RunRequest,
    dialect: Option<DatabaseFamily>,
) -> ExitCode {
    if config.core.is_none() {
        eprintln!("Error: no [core] database configured");
        return ExitCode::FAILURE;
    }

    let store = load_store(&config);
    let notifier = match notify::from_config(&config.notifications) {
        Ok(n) => n,
        Err(e) => {
            eprintln!("Failed to initialize notifications: {e}");
            return ExitCode::FAILURE;
        }
    };
    let mut settings = EngineSettings::from_config(&config.engine);
    if dialect.is_some() {
        settings.dialect = dialect;
    }

    let mut connections = match ConnectionPair::connect(&config).await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e.diagnostic(), "Failed to connect");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    let archiver = Archiver::new(
        Arc::new(store),
        Arc::new(SqlTransactionLog::from_config(&config.transaction_log)),
        notifier,
        settings,
    )
    .with_cancellation(cancel.clone());
    tokio::spawn(interrupt_on_signal(cancel));

    match archiver.run(&mut connections, &request).await {
        Ok(report) => {
            print_report(&report);
            if report.has_errors {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            tracing::error!(error = %e.diagnostic(), "Archive process failed");
            ExitCode::FAILURE
        }
    }
}

fn print_report(report: &ProcessReport) {
    for tx in &report.transactions {
        println!(
            "{:<24} {:<8} {:>10} records  {}",
            tx.policy, tx.status, tx.records_affected, tx.id
        );
    }
    if report.interrupted {
        println!("Run interrupted; remaining policies were not started");
    }
    if let Some(date) = report.boundary_date {
        println!("Archive boundary date: {date}");
    }
}

/// Cancel the run on Ctrl+C or SIGTERM. The batch in flight finishes or
/// rolls back before the run stops.
async fn interrupt_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::warn!("Interrupt received, stopping after the current batch");
    cancel.cancel();
}

async fn run_install(config: &ArchivistConfig) -> ExitCode {
    let mut core = match db::connect(&config.core).await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to core database");
            return ExitCode::FAILURE;
        }
    };
    let txlog = SqlTransactionLog::from_config(&config.transaction_log);
    match txlog.install(core.as_mut()).await {
        Ok(()) => {
            tracing::info!(
                transactions = txlog.transactions_table(),
                details = txlog.details_table(),
                "Transaction log installed"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e.diagnostic(), "Failed to install transaction log");
            ExitCode::FAILURE
        }
    }
}

async fn run_check(config: &ArchivistConfig, names: &[String]) -> ExitCode {
    let family = config
        .engine
        .dialect
        .or_else(|| config.core.family())
        .unwrap_or(DatabaseFamily::Sqlite);
    let archiver = Archiver::new(
        Arc::new(load_store(config)),
        Arc::new(SqlTransactionLog::from_config(&config.transaction_log)),
        Arc::new(TracingNotifier),
        EngineSettings::from_config(&config.engine),
    );

    let checks = match archiver.check(names, family).await {
        Ok(checks) => checks,
        Err(e) => {
            eprintln!("Error: {}", e.diagnostic());
            return ExitCode::FAILURE;
        }
    };

    let mut failed = false;
    for check in &checks {
        match &check.result {
            Ok(details) => println!("{:<24} ok ({details} details, {family})", check.policy),
            Err(e) => {
                failed = true;
                println!("{:<24} FAILED: {}", check.policy, e.diagnostic());
            }
        }
    }
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
