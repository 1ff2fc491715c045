//! Command-line entry point for the marker cascade batch.
//!
//! # Responsibility
//! - Load configuration, bootstrap logging and the SQLite store.
//! - Run the batch or print marker coverage, with deterministic output.

use cascade_core::db::open_db;
use cascade_core::{
    core_version, init_logging, load_config, BatchConfig, BatchRunner, CompletionNotifier,
    LogMailTransport, MailTransport, NotificationOutcome, OutboxMailTransport, RunReport,
    SqliteBatchStore, SqliteRecipientRepository, BATCH_MARKER,
};
use clap::{Args, Parser, Subcommand};
use log::error;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "cascade", version, about = "Stamp root records and their children, then notify")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the batch over every root record.
    Run {
        #[command(flatten)]
        common: CommonArgs,
        /// Overrides `chunk_size` from the config.
        #[arg(long)]
        chunk_size: Option<usize>,
    },
    /// Print how many records already carry the batch marker.
    Status {
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Debug, Args)]
struct CommonArgs {
    /// TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides `storage.db_path` from the config.
    #[arg(long)]
    db: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { common, chunk_size } => match prepare(&common) {
            Ok(mut config) => {
                if let Some(chunk_size) = chunk_size {
                    config.chunk_size = chunk_size;
                }
                run(&config)
            }
            Err(message) => fail(&message),
        },
        Command::Status { common } => match prepare(&common) {
            Ok(config) => status(&config),
            Err(message) => fail(&message),
        },
    }
}

fn prepare(common: &CommonArgs) -> Result<BatchConfig, String> {
    let mut config = load_config(common.config.as_deref()).map_err(|err| err.to_string())?;
    if let Some(db) = &common.db {
        config.storage.db_path = db.clone();
    }
    if let Some(dir) = &config.logging.dir {
        let dir = dir
            .to_str()
            .ok_or_else(|| format!("log dir `{}` is not valid UTF-8", dir.display()))?;
        init_logging(&config.logging.level, dir)?;
    }
    Ok(config)
}

fn run(config: &BatchConfig) -> ExitCode {
    let conn = match open_db(&config.storage.db_path) {
        Ok(conn) => conn,
        Err(err) => return fail(&err.to_string()),
    };
    let store = match SqliteBatchStore::try_new(&conn) {
        Ok(store) => store,
        Err(err) => return fail(&err.to_string()),
    };
    let transport: Box<dyn MailTransport> = match &config.mail.outbox_path {
        Some(path) => Box::new(OutboxMailTransport::new(path)),
        None => Box::new(LogMailTransport),
    };
    let notifier = CompletionNotifier::new(
        SqliteRecipientRepository::new(&conn),
        transport,
        config.notifier.clone(),
    );

    let report = BatchRunner::new(store, notifier, config).and_then(|runner| runner.run());
    match report {
        Ok(report) => {
            print_report(&report);
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("event=cli_run module=cli status=error error={err}");
            fail(&err.to_string())
        }
    }
}

fn status(config: &BatchConfig) -> ExitCode {
    let status = open_db(&config.storage.db_path)
        .map_err(|err| err.to_string())
        .and_then(|conn| {
            SqliteBatchStore::try_new(&conn)
                .and_then(|store| store.marker_status(BATCH_MARKER))
                .map_err(|err| err.to_string())
        });
    match status {
        Ok(status) => {
            println!("cascade version={}", core_version());
            println!("roots marked={}/{}", status.roots_marked, status.roots_total);
            println!(
                "children marked={}/{}",
                status.children_marked, status.children_total
            );
            ExitCode::SUCCESS
        }
        Err(message) => fail(&message),
    }
}

fn print_report(report: &RunReport) {
    println!("cascade version={}", core_version());
    println!("chunks_processed={}", report.chunks_processed);
    println!("roots_updated={}", report.roots_updated);
    println!("children_updated={}", report.children_updated);
    println!("cancelled={}", report.cancelled);
    for failure in &report.chunk_failures {
        println!("chunk_failure {failure}");
    }
    let notification = match &report.notification {
        Some(NotificationOutcome::Sent { recipient_count }) => {
            format!("sent recipients={recipient_count}")
        }
        Some(NotificationOutcome::Skipped) => "skipped".to_string(),
        Some(NotificationOutcome::Failed { reason }) => format!("failed reason={reason}"),
        None => "not_attempted".to_string(),
    };
    println!("notification={notification}");
}

fn fail(message: &str) -> ExitCode {
    eprintln!("cascade error: {message}");
    ExitCode::FAILURE
}
