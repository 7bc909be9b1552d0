use std::fmt::Display;

use ansi_term::{Colour, Style};
use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use chrono_english::parse_date_string;
use clap::{CommandFactory, Parser, ValueEnum};

use crate::storage::{history::History, preferences::KeyValueStore};

use super::{
    output::{activity_rows, block_lines, group_by_day, timestamp_text},
    Args,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DateStyle {
    Uk,
    Us,
}

impl From<DateStyle> for chrono_english::Dialect {
    fn from(value: DateStyle) -> Self {
        match value {
            DateStyle::Uk => Self::Uk,
            DateStyle::Us => Self::Us,
        }
    }
}

impl Display for DateStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateStyle::Uk => write!(f, "uk"),
            DateStyle::Us => write!(f, "us"),
        }
    }
}

#[derive(Debug, Parser)]
pub struct HistoryCommand {
    #[arg(
        long,
        short,
        help = "Only show blocks completed after this moment. Examples are \"yesterday\", \"3 days ago\", \"15/03/2025\""
    )]
    since: Option<String>,
    #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
    date_style: DateStyle,
}

/// Prints completed blocks grouped by day, most recent first.
pub async fn process_history_command(
    HistoryCommand { since, date_style }: HistoryCommand,
    store: impl KeyValueStore,
) -> Result<()> {
    let since = parse_since(since, date_style)?;
    let history = History::load(store).await;
    let blocks = history
        .blocks()
        .iter()
        .filter(|v| match (since, v.completed_at()) {
            (Some(since), Some(completed_at)) => completed_at >= since,
            _ => true,
        });

    let groups = group_by_day(blocks);
    if groups.is_empty() {
        println!("{}", Style::new().italic().paint("No completed coding blocks yet"));
        return Ok(());
    }

    let system = Colour::Fixed(245);
    for group in groups {
        println!("{}", Style::new().bold().paint(group.header()));
        for block in group.blocks {
            let mut lines = block_lines(block).into_iter();
            if let (Some(completed_at), Some(intention)) = (block.completed_at(), lines.next()) {
                println!("{} {intention}", system.paint(timestamp_text(completed_at)));
            }
            for line in lines {
                println!("  {line}");
            }
            for [app, minutes, share] in activity_rows(block) {
                println!("    {app:<24}{minutes:>5}{share:>6}");
            }
            println!();
        }
    }
    Ok(())
}

fn parse_since(since: Option<String>, date_style: DateStyle) -> Result<Option<DateTime<Utc>>> {
    let Some(since) = since else {
        return Ok(None);
    };
    match parse_date_string(&since, Local::now(), date_style.into()) {
        Ok(v) => Ok(Some(v.with_timezone(&Utc))),
        Err(e) => Err(Args::command()
            .error(
                clap::error::ErrorKind::ValueValidation,
                format!("Failed to validate since date {e}"),
            )
            .into()),
    }
}
