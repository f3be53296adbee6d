//! wattsync CLI
//!
//! Command-line tools for a file-backed wattsync result cache.
//!
//! # Commands
//!
//! - `report` - Count recorded validation errors per class and kind
//! - `clear` - Delete recorded validation errors
//! - `validate` - Compare cached results against reference values
//! - `inspect` - Display cache statistics

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use wattsync_cache::ReportDate;
use wattsync_protocol::Period;

/// wattsync result cache tools.
#[derive(Parser)]
#[command(name = "wattsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the cache store file
    #[arg(global = true, short, long)]
    store: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Filter shared by `report` and `clear`.
#[derive(clap::Args)]
struct FilterArgs {
    /// Result class code (for example ot101)
    #[arg(long)]
    class: Option<String>,

    /// Contract code
    #[arg(long)]
    contract: Option<String>,

    /// Period (YYYYMM or YYYYMMDD)
    #[arg(long)]
    period: Option<Period>,

    /// Validation date: today, any, or YYYY-MM-DD
    #[arg(long, default_value = "today", value_parser = commands::parse_date)]
    date: ReportDate,
}

#[derive(Subcommand)]
enum Commands {
    /// Count recorded validation errors
    Report {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Delete recorded validation errors
    Clear {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Compare cached results against reference values
    Validate {
        /// Result class code
        #[arg(long)]
        class: String,

        /// Contract code
        #[arg(long)]
        contract: String,

        /// Only validate this period
        #[arg(long)]
        period: Option<Period>,

        /// Reference values as a JSON object of period to value
        #[arg(long)]
        values: String,

        /// Do not record error entries
        #[arg(long)]
        no_log: bool,
    },

    /// Display cache statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store = cli.store.ok_or("Cache store path required (--store)")?;

    match cli.command {
        Commands::Report { filter } => {
            commands::report::run(&store, &filter.into_filter())?;
        }
        Commands::Clear { filter } => {
            commands::clear::run(&store, &filter.into_filter())?;
        }
        Commands::Validate {
            class,
            contract,
            period,
            values,
            no_log,
        } => {
            let values = commands::validate::parse_values(&values)?;
            commands::validate::run(&store, &class, &contract, period, &values, !no_log)?;
        }
        Commands::Inspect { format } => {
            commands::inspect::run(&store, &format)?;
        }
    }

    Ok(())
}

impl FilterArgs {
    fn into_filter(self) -> wattsync_cache::ReportFilter {
        wattsync_cache::ReportFilter {
            class: self.class,
            contract: self.contract,
            period: self.period,
            date: self.date,
        }
    }
}
