pub mod history;
pub mod output;
pub mod run;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use history::{process_history_command, HistoryCommand};
use run::{process_run_command, RunCommand};
use tracing::level_filters::LevelFilter;

use crate::{
    storage::{history::History, preferences::PreferencesFile, PREFERENCES_FILE_NAME},
    utils::{
        dir::{create_application_default_path, ensure_dir},
        logging::{enable_logging, CLI_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "BreakNanny", version, long_about = None)]
#[command(about = "Coding blocks with enforced breaks and a reflection log", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
    #[arg(long, global = true, help = "Print logs to the console as well")]
    log_console: bool,
    #[arg(
        long,
        global = true,
        help = "Log level, e.g. info or trace. Defaults to RUST_LOG or debug"
    )]
    log_filter: Option<LevelFilter>,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Plan and run a coding block followed by a break")]
    Run {
        #[command(flatten)]
        command: RunCommand,
    },
    #[command(about = "Display completed blocks grouped by day")]
    History {
        #[command(flatten)]
        command: HistoryCommand,
    },
    #[command(about = "Remove every completed block")]
    ClearHistory {},
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let app_dir = args
        .dir
        .map_or_else(create_application_default_path, ensure_dir)?;
    enable_logging(
        CLI_PREFIX,
        &app_dir.join("logs"),
        args.log_filter,
        args.log_console,
    )?;
    let store = PreferencesFile::new(app_dir.join(PREFERENCES_FILE_NAME));

    match args.commands {
        Commands::Run { command } => process_run_command(command, store).await,
        Commands::History { command } => process_history_command(command, store).await,
        Commands::ClearHistory {} => {
            let mut history = History::load(store).await;
            let count = history.blocks().len();
            history.clear().await;
            println!("Removed {count} completed blocks");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Args, Commands};

    #[test]
    fn global_flags_work_after_subcommand() {
        let args = Args::parse_from([
            "breaknanny",
            "history",
            "--since",
            "yesterday",
            "--dir",
            "/tmp/breaknanny",
            "--log-filter",
            "trace",
        ]);

        assert!(matches!(args.commands, Commands::History { .. }));
        assert_eq!(args.dir.as_deref(), Some(std::path::Path::new("/tmp/breaknanny")));
        assert_eq!(
            args.log_filter,
            Some(tracing::level_filters::LevelFilter::TRACE)
        );
    }
}
