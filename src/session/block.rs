use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attribution::{AppActivitySummary, CodingActivity};

/// One intention-to-reflection work unit and the unit of history.
///
/// Durations are in seconds. The planned values and the intention are fixed at creation; the
/// rest is filled in by the session as the block moves through its phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodingBlock {
    id: Uuid,
    intended_description: String,
    #[serde(default)]
    actual_description: String,
    planned_coding_duration: u64,
    planned_break_duration: u64,
    #[serde(default)]
    actual_coding_duration: u64,
    #[serde(default)]
    actual_break_duration: u64,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    app_activity: Vec<AppActivitySummary>,
    #[serde(default)]
    total_active_minutes: u32,
    #[serde(default)]
    total_minutes: u64,
}

impl CodingBlock {
    pub fn new(intention: &str, planned_coding_duration: u64, planned_break_duration: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            intended_description: intention.to_owned(),
            actual_description: String::new(),
            planned_coding_duration,
            planned_break_duration,
            actual_coding_duration: 0,
            actual_break_duration: 0,
            completed_at: None,
            app_activity: vec![],
            total_active_minutes: 0,
            total_minutes: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn intended_description(&self) -> &str {
        &self.intended_description
    }

    pub fn actual_description(&self) -> &str {
        &self.actual_description
    }

    pub fn planned_coding_duration(&self) -> u64 {
        self.planned_coding_duration
    }

    pub fn planned_break_duration(&self) -> u64 {
        self.planned_break_duration
    }

    pub fn actual_coding_duration(&self) -> u64 {
        self.actual_coding_duration
    }

    pub fn actual_break_duration(&self) -> u64 {
        self.actual_break_duration
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Applications ordered by active minutes, most used first.
    pub fn app_activity(&self) -> &[AppActivitySummary] {
        &self.app_activity
    }

    pub fn total_active_minutes(&self) -> u32 {
        self.total_active_minutes
    }

    pub fn total_minutes(&self) -> u64 {
        self.total_minutes
    }

    pub fn coding_activity(&self) -> CodingActivity {
        CodingActivity {
            app_activity: self.app_activity.clone(),
            total_active_minutes: self.total_active_minutes,
            total_minutes: self.total_minutes,
        }
    }

    pub(crate) fn push_reflection(&mut self, text: &str) {
        self.actual_description.push_str(text);
    }

    pub(crate) fn pop_reflection(&mut self) {
        self.actual_description.pop();
    }

    pub(crate) fn finish_coding(&mut self, actual_coding_duration: u64, activity: CodingActivity) {
        self.actual_coding_duration = actual_coding_duration;
        self.app_activity = activity.app_activity;
        self.total_active_minutes = activity.total_active_minutes;
        self.total_minutes = activity.total_minutes;
    }

    pub(crate) fn finish_break(&mut self, actual_break_duration: u64, completed_at: DateTime<Utc>) {
        self.actual_break_duration = actual_break_duration;
        self.completed_at.get_or_insert(completed_at);
    }
}
