use std::{io::Write, sync::Arc};

use anyhow::Result;
use clap::{CommandFactory, Parser, ValueEnum};
use futures::StreamExt;
use tokio::{
    io::{stdin, AsyncBufReadExt, BufReader},
    select,
    sync::{broadcast, mpsc, watch},
};
use tokio_stream::wrappers::{LinesStream, WatchStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    event_source::GenericEventSource,
    session::{
        runtime::SessionRuntime,
        shutdown::detect_shutdown,
        status::{PhaseKind, RaiseWindow, StatusSnapshot},
        Session, SessionCommand, SessionConfig,
    },
    storage::{history::History, preferences::KeyValueStore},
    utils::{clock::DefaultClock, time::time_string},
};

use super::Args;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CodingPreset {
    #[value(name = "1m")]
    OneMinute,
    #[value(name = "10m")]
    TenMinutes,
    #[value(name = "15m")]
    FifteenMinutes,
    #[value(name = "20m")]
    TwentyMinutes,
}

impl CodingPreset {
    pub fn seconds(self) -> u64 {
        60 * match self {
            CodingPreset::OneMinute => 1,
            CodingPreset::TenMinutes => 10,
            CodingPreset::FifteenMinutes => 15,
            CodingPreset::TwentyMinutes => 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BreakPreset {
    #[value(name = "1m")]
    OneMinute,
    #[value(name = "5m")]
    FiveMinutes,
    #[value(name = "10m")]
    TenMinutes,
}

impl BreakPreset {
    pub fn seconds(self) -> u64 {
        60 * match self {
            BreakPreset::OneMinute => 1,
            BreakPreset::FiveMinutes => 5,
            BreakPreset::TenMinutes => 10,
        }
    }
}

#[derive(Debug, Parser)]
pub struct RunCommand {
    #[arg(short, long, help = "What you intend to get done during this block")]
    intention: String,
    #[arg(long, value_enum, default_value = "15m", help = "Length of the coding interval")]
    coding: CodingPreset,
    #[arg(
        long = "break",
        value_enum,
        default_value = "5m",
        help = "Length of the break. Every key typed during the break goes into the reflection log"
    )]
    break_length: BreakPreset,
    #[arg(long, help = "Confirm that the pre-coding exercises are done")]
    exercises_done: bool,
}

/// Runs a single block in the foreground: coding, then a break with captured reflection. Type
/// `done` and Enter while coding to start the break early.
pub async fn process_run_command(
    RunCommand {
        intention,
        coding,
        break_length,
        exercises_done,
    }: RunCommand,
    store: impl KeyValueStore,
) -> Result<()> {
    if intention.is_empty() || !exercises_done {
        return Err(Args::command()
            .error(
                clap::error::ErrorKind::ValueValidation,
                "A block needs a non-empty intention and --exercises-done",
            )
            .into());
    }

    let (hook, watcher) = GenericEventSource::create()?;
    let config = SessionConfig {
        key_codes: hook.key_codes(),
        ..SessionConfig::default()
    };
    let history = History::load(store).await;
    let (session, queues) = Session::new(hook, watcher, history, Arc::new(DefaultClock), config);
    let status = session.subscribe_status();
    let raise = session.subscribe_raise();

    let (command_tx, command_rx) = mpsc::channel(8);
    let shutdown = CancellationToken::new();
    let runtime = SessionRuntime::new(session, queues, command_rx, shutdown.clone());

    command_tx
        .send(SessionCommand::StartBlock {
            intention,
            exercises_acknowledged: exercises_done,
            coding_seconds: coding.seconds(),
            break_seconds: break_length.seconds(),
        })
        .await?;

    let (session, _, _, _) = tokio::join!(
        runtime.run(),
        detect_shutdown(shutdown.clone()),
        print_status(status, raise, shutdown.clone()),
        read_commands(command_tx, shutdown.clone()),
    );
    let session = session.inspect_err(|e| error!("Session loop failed {e:?}"))?;
    info!(
        "Session finished with {} blocks in history",
        session.history().len()
    );
    Ok(())
}

/// Mirrors the status projection to the terminal and stops everything once the block completes.
async fn print_status(
    status: watch::Receiver<StatusSnapshot>,
    mut raise: broadcast::Receiver<RaiseWindow>,
    shutdown: CancellationToken,
) {
    let mut updates = WatchStream::new(status);
    let mut previous = PhaseKind::Idle;
    loop {
        select! {
            _ = shutdown.cancelled() => return,
            Ok(RaiseWindow) = raise.recv() => {
                // Terminal bell in place of a window.
                print!("\x07");
            }
            update = updates.next() => {
                let Some(snapshot) = update else {
                    return;
                };
                match (previous, snapshot.phase) {
                    (PhaseKind::Coding, PhaseKind::Break) => {
                        if let Some(block) = &snapshot.active_block {
                            println!("\n{}", block.coding_activity().summary());
                        }
                        println!("Break time. Everything you type now goes into the reflection.");
                    }
                    (PhaseKind::Break, PhaseKind::Idle) => {
                        println!("\nBlock complete.");
                        shutdown.cancel();
                        return;
                    }
                    _ => {}
                }
                previous = snapshot.phase;
                if snapshot.phase != PhaseKind::Idle {
                    print!(
                        "\r{} ({})   ",
                        snapshot.text(),
                        time_string(snapshot.remaining_seconds)
                    );
                    if let Err(e) = std::io::stdout().flush() {
                        warn!("Failed to flush stdout {e:?}");
                    }
                }
            }
        }
    }
}

/// Forwards `done` lines from stdin as a request to finish coding early.
async fn read_commands(commands: mpsc::Sender<SessionCommand>, shutdown: CancellationToken) {
    let mut lines = LinesStream::new(BufReader::new(stdin()).lines());
    loop {
        select! {
            _ = shutdown.cancelled() => return,
            line = lines.next() => match line {
                Some(Ok(line)) if line.trim() == "done" => {
                    if commands.send(SessionCommand::FinishCodingEarly).await.is_err() {
                        return;
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Failed to read stdin {e:?}");
                    return;
                }
                None => return,
            }
        }
    }
}
