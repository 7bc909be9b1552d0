//! Plain text rendering of completed blocks. Styling is applied by the callers so that the text
//! here stays easy to compare in tests.

use std::collections::BTreeMap;

use chrono::{DateTime, Local, Utc};

use crate::{
    session::block::CodingBlock,
    utils::{
        percentage::Percentage,
        time::{duration_string, local_day_start},
    },
};

/// Number of applications shown per block.
pub const TOP_APPS: usize = 5;

const REFLECTION_PLACEHOLDER: &str = "Coding Block Reflection";

pub struct DayGroup<'a> {
    pub day: DateTime<Local>,
    pub blocks: Vec<&'a CodingBlock>,
}

impl DayGroup<'_> {
    pub fn total_active_minutes(&self) -> u64 {
        self.blocks
            .iter()
            .map(|v| v.total_active_minutes() as u64)
            .sum()
    }

    /// Coding and break time together, rounded down per block.
    pub fn total_minutes(&self) -> u64 {
        self.blocks
            .iter()
            .map(|v| (v.actual_coding_duration() + v.actual_break_duration()) / 60)
            .sum()
    }

    pub fn header(&self) -> String {
        format!(
            "{}  {}m active / {}m total",
            self.day.format("%a, %b %-d"),
            self.total_active_minutes(),
            self.total_minutes()
        )
    }
}

/// Groups blocks by the local day they were completed on, most recent day first. Blocks keep their
/// history order inside a day; blocks that never completed are left out.
pub fn group_by_day<'a>(blocks: impl IntoIterator<Item = &'a CodingBlock>) -> Vec<DayGroup<'a>> {
    let mut days = BTreeMap::<DateTime<Local>, Vec<&CodingBlock>>::new();
    for block in blocks {
        let Some(completed_at) = block.completed_at() else {
            continue;
        };
        days.entry(local_day_start(completed_at))
            .or_default()
            .push(block);
    }
    days.into_iter()
        .rev()
        .map(|(day, blocks)| DayGroup { day, blocks })
        .collect()
}

pub fn timestamp_text(completed_at: DateTime<Utc>) -> String {
    completed_at
        .with_timezone(&Local)
        .format("%b %-d %-I:%M%P")
        .to_string()
}

/// Intention, durations and reflection of a block, one entry per line.
pub fn block_lines(block: &CodingBlock) -> Vec<String> {
    let reflection = if block.actual_description().is_empty() {
        REFLECTION_PLACEHOLDER
    } else {
        block.actual_description()
    };
    let mut lines = vec![
        block.intended_description().to_owned(),
        format!("{} of coding", duration_string(block.actual_coding_duration())),
        String::new(),
    ];
    lines.extend(reflection.lines().map(str::to_owned));
    lines.push(format!(
        "{} of break",
        duration_string(block.actual_break_duration())
    ));
    lines
}

/// Rows of the activity table, header first. Empty when nothing was attributed.
pub fn activity_rows(block: &CodingBlock) -> Vec<[String; 3]> {
    if block.app_activity().is_empty() {
        return vec![];
    }
    let mut rows = vec![["App".into(), "Min".into(), "%".into()]];
    rows.extend(block.app_activity().iter().take(TOP_APPS).map(|v| {
        [
            v.app_name.clone(),
            v.active_minutes.to_string(),
            Percentage::of(v.active_minutes, block.total_active_minutes()).to_string(),
        ]
    }));
    rows
}
