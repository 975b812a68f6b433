use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rusqlite::Connection;
use time::{Date, OffsetDateTime, macros::format_description};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use pocketbook::{RuleKind, initialize_db, run_notification_rules, run_recurring_scheduler};

/// Batch runner for the pocketbook engines.
///
/// Meant to be invoked on a schedule (e.g., once daily from cron); each
/// invocation runs one engine to completion and exits.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the SQLite database file.
    #[arg(long, default_value = "pocketbook.db")]
    database: PathBuf,

    /// Process as if today were this date (YYYY-MM-DD). Defaults to the
    /// current UTC date.
    #[arg(long, value_parser = parse_date)]
    date: Option<Date>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute every active recurring rule that is due.
    Scheduler,
    /// Evaluate one notification rule for every user.
    Notify {
        /// The rule to evaluate.
        #[arg(value_enum)]
        rule: RuleKind,
    },
}

fn parse_date(text: &str) -> Result<Date, String> {
    Date::parse(text, format_description!("[year]-[month]-[day]"))
        .map_err(|error| error.to_string())
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let today = cli
        .date
        .unwrap_or_else(|| OffsetDateTime::now_utc().date());

    let connection = Connection::open(&cli.database).expect("could not open the database");
    initialize_db(&connection).expect("could not initialize the database schema");

    match cli.command {
        Command::Scheduler => {
            let outcome =
                run_recurring_scheduler(today, &connection).expect("the scheduler run failed");
            tracing::info!(
                "considered {} due rules and created {} transactions",
                outcome.considered,
                outcome.created
            );
        }
        Command::Notify { rule } => {
            let outcome = run_notification_rules(rule, today, &connection)
                .expect("the notification run failed");
            tracing::info!("sent {} notifications", outcome.sent);
        }
    }
}
