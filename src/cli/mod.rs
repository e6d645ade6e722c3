pub mod daemon_path;
pub mod data;
pub mod process;
pub mod range;
pub mod report;
pub mod settings;

use std::{
    env,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use daemon_path::to_daemon_path;
use process::{kill_previous_servers, restart_server};
use range::RangeArgs;
use settings::{process_settings_command, SettingsCommand};
use tracing::level_filters::LevelFilter;

use crate::{
    daemon::{
        args::{DaemonArgs, Source},
        start_daemon,
        storage::{
            bucket_storage::{BucketStorage, FileBucketStorage},
            RECORDS_DIR,
        },
    },
    query::Aggregator,
    utils::{
        clock::{Clock, DefaultClock},
        dir::create_application_default_path,
        logging::{enable_logging, CLI_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "dwelltime", version, long_about = None)]
#[command(about = "Tracks time spent per website or application", long_about = None)]
pub(crate) struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Starts a daemon for the application")]
    Init {
        #[arg(long, value_enum, default_value_t = Source::Desktop)]
        source: Source,
    },
    #[command(
        about = "Run a daemon directly in current console. Used for debugging. Accepts the same options as the daemon"
    )]
    Serve {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        daemon_args: Vec<String>,
    },
    #[command(about = "Stop currently running daemon.")]
    Stop {},
    #[command(about = "Screen time of today with the daily goal")]
    Today,
    #[command(about = "Totals per day")]
    Week {
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    #[command(about = "Total of the current month")]
    Month,
    #[command(about = "Entities with the most time")]
    Top {
        #[command(flatten)]
        range: RangeArgs,
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    #[command(about = "Time per category")]
    Categories {
        #[command(flatten)]
        range: RangeArgs,
    },
    #[command(about = "Export totals per day and entity as CSV")]
    Export {
        #[command(flatten)]
        range: RangeArgs,
        #[arg(short, long, help = "File to write. Prints to stdout by default")]
        output: Option<PathBuf>,
    },
    #[command(about = "Read or change settings")]
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
    #[command(about = "What the daemon is tracking right now")]
    Ongoing,
    #[command(about = "Delete all recorded data")]
    Clear {
        #[arg(long, help = "Confirm deletion")]
        yes: bool,
    },
    #[command(about = "Delete records older than the given number of days")]
    Cleanup {
        #[arg(long, default_value_t = 90)]
        keep_days: u32,
    },
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let app_dir = args.dir.map_or_else(create_application_default_path, Ok)?;
    std::fs::create_dir_all(&app_dir)?;

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(CLI_PREFIX, &app_dir, logging_level, args.log)?;

    let today = DefaultClock.today();

    match args.commands {
        Commands::Init { source } => {
            restart_server(&daemon_path()?, Some(&app_dir), source)?;
            Ok(())
        }
        Commands::Stop {} => {
            let stopped = kill_previous_servers(&daemon_path()?)?;
            println!("Stopped {stopped} daemon(s)");
            Ok(())
        }
        Commands::Serve { daemon_args } => {
            let daemon_args = DaemonArgs::parse_from(
                std::iter::once("serve".to_string()).chain(daemon_args),
            );
            start_daemon(app_dir, daemon_args.tracker_config()).await
        }
        Commands::Today => {
            let settings = settings::load(&app_dir).await?;
            let aggregator = live_aggregator(&app_dir, today).await?;
            report::print_today(&aggregator, today, &settings).await
        }
        Commands::Week { days } => {
            let settings = settings::load(&app_dir).await?;
            let aggregator = live_aggregator(&app_dir, today).await?;
            report::print_week(&aggregator, today, days, &settings).await
        }
        Commands::Month => {
            let aggregator = live_aggregator(&app_dir, today).await?;
            report::print_month(&aggregator, today).await
        }
        Commands::Top { range, limit } => {
            let aggregator = live_aggregator(&app_dir, today).await?;
            report::print_top(&aggregator, range.resolve(today)?, limit).await
        }
        Commands::Categories { range } => {
            let aggregator = live_aggregator(&app_dir, today).await?;
            report::print_categories(&aggregator, range.resolve(today)?).await
        }
        Commands::Export { range, output } => {
            let aggregator = live_aggregator(&app_dir, today).await?;
            let rows =
                data::export_csv(&aggregator, range.resolve(today)?, output.as_deref()).await?;
            if let Some(output) = output {
                println!("Exported {rows} rows into {output:?}");
            }
            Ok(())
        }
        Commands::Settings { command } => process_settings_command(&app_dir, command).await,
        Commands::Ongoing => {
            report::print_ongoing(report::fetch_live(&app_dir).await.as_ref());
            Ok(())
        }
        Commands::Clear { yes } => {
            if !yes {
                println!("This deletes every record. Run again with --yes to confirm");
                return Ok(());
            }
            let removed = open_storage(&app_dir)?.clear().await?;
            println!("Deleted {removed} day(s)");
            Ok(())
        }
        Commands::Cleanup { keep_days } => {
            let storage = open_storage(&app_dir)?;
            let removed = data::delete_days_before(&storage, today, keep_days).await?;
            println!("Deleted {removed} day(s)");
            Ok(())
        }
    }
}

fn daemon_path() -> Result<PathBuf> {
    Ok(to_daemon_path(env::current_exe()?))
}

fn open_storage(app_dir: &Path) -> Result<FileBucketStorage> {
    Ok(FileBucketStorage::new(app_dir.join(RECORDS_DIR))?)
}

async fn live_aggregator(
    app_dir: &Path,
    today: NaiveDate,
) -> Result<Aggregator<Arc<FileBucketStorage>>> {
    let storage = Arc::new(open_storage(app_dir)?);
    Ok(Aggregator::new(storage).with_ongoing(today, report::fetch_live(app_dir).await))
}
