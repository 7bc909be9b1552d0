//! Joins the activation timeline of a coding interval with its active minutes, producing the
//! per-application breakdown stored in each block.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::focus::AppActivationEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppActivitySummary {
    pub app_name: String,
    pub active_minutes: u32,
}

/// Attributes every active minute to the application that was frontmost by the end of that
/// minute and counts minutes per application. The result is ordered by application name.
///
/// The whole activation sequence is scanned in arrival order and the last activation at or before
/// the minute end wins, so an activation past the minute end never hides later arrivals. Among
/// activations sharing the winning timestamp the first to arrive is taken. Minutes with no
/// qualifying activation are dropped.
pub fn attribute(
    activations: &[AppActivationEvent],
    active_minutes: &BTreeSet<u32>,
    session_start: DateTime<Utc>,
) -> Vec<AppActivitySummary> {
    if activations.is_empty() {
        return vec![];
    }

    let mut counts = BTreeMap::<&str, u32>::new();
    for &minute in active_minutes {
        let minute_end = session_start + Duration::minutes(minute as i64 + 1);
        let Some(app) = app_at(activations, minute_end) else {
            trace!("Minute {minute} precedes every activation");
            continue;
        };
        trace!("Minute {minute} attributed to {app}");
        *counts.entry(app).or_default() += 1;
    }

    counts
        .into_iter()
        .map(|(app_name, active_minutes)| AppActivitySummary {
            app_name: app_name.to_owned(),
            active_minutes,
        })
        .collect()
}

fn app_at(activations: &[AppActivationEvent], moment: DateTime<Utc>) -> Option<&str> {
    let last = activations
        .iter()
        .filter(|v| v.timestamp <= moment)
        .last()?;
    let first_with_same_time = activations
        .iter()
        .find(|v| v.timestamp == last.timestamp)?;
    Some(first_with_same_time.app_name.as_ref())
}

/// Orders summaries for display, most minutes first. The sort is stable, so equal counts keep the
/// name order produced by [attribute].
pub fn rank_by_minutes(mut summaries: Vec<AppActivitySummary>) -> Vec<AppActivitySummary> {
    summaries.sort_by(|a, b| b.active_minutes.cmp(&a.active_minutes));
    summaries
}

/// Activity figures captured at the end of a coding interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodingActivity {
    pub app_activity: Vec<AppActivitySummary>,
    pub total_active_minutes: u32,
    pub total_minutes: u64,
}

impl CodingActivity {
    pub fn collect(
        activations: &[AppActivationEvent],
        active_minutes: &BTreeSet<u32>,
        session_start: DateTime<Utc>,
        elapsed_seconds: u64,
    ) -> Self {
        let activity = Self {
            app_activity: rank_by_minutes(attribute(activations, active_minutes, session_start)),
            total_active_minutes: active_minutes.len() as u32,
            total_minutes: elapsed_seconds / 60,
        };
        debug!(
            "Collected coding activity from {} activations: {:?}",
            activations.len(),
            activity
        );
        activity
    }

    /// Plain text report printed at the end of the coding interval.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "active minutes: {} / total minutes: {}",
            self.total_active_minutes, self.total_minutes
        )];
        lines.extend(
            self.app_activity
                .iter()
                .filter(|v| v.active_minutes > 0)
                .map(|v| format!("* app [{}]: {} active minutes", v.app_name, v.active_minutes)),
        );
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::{attribute, rank_by_minutes, AppActivitySummary, CodingActivity};
    use crate::focus::AppActivationEvent;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 22, 9, 0, 0).unwrap()
    }

    fn activation(app: &str, offset_seconds: i64) -> AppActivationEvent {
        AppActivationEvent {
            app_name: app.into(),
            timestamp: start() + Duration::seconds(offset_seconds),
        }
    }

    fn summary(app: &str, minutes: u32) -> AppActivitySummary {
        AppActivitySummary {
            app_name: app.into(),
            active_minutes: minutes,
        }
    }

    fn minutes(values: &[u32]) -> BTreeSet<u32> {
        values.iter().copied().collect()
    }

    #[test]
    fn attributes_each_minute_to_latest_activation_by_its_end() {
        let activations = [activation("A", 0), activation("B", 90)];

        let result = attribute(&activations, &minutes(&[0, 1, 2]), start());

        assert_eq!(result, vec![summary("A", 1), summary("B", 2)]);
    }

    #[test]
    fn no_activations_yields_nothing() {
        assert!(attribute(&[], &minutes(&[0, 1]), start()).is_empty());
    }

    #[test]
    fn minutes_before_first_activation_are_dropped() {
        let activations = [activation("Editor", 150)];

        let result = attribute(&activations, &minutes(&[0, 1, 2, 3]), start());

        assert_eq!(result, vec![summary("Editor", 2)]);
    }

    #[test]
    fn activation_exactly_at_minute_end_counts_for_that_minute() {
        let activations = [activation("A", 0), activation("B", 60)];

        let result = attribute(&activations, &minutes(&[0]), start());

        assert_eq!(result, vec![summary("B", 1)]);
    }

    #[test]
    fn equal_timestamps_keep_first_arrival() {
        let activations = [activation("A", 0), activation("C", 30), activation("B", 30)];

        let result = attribute(&activations, &minutes(&[0]), start());

        assert_eq!(result, vec![summary("C", 1)]);
    }

    #[test]
    fn scan_looks_past_out_of_window_activations() {
        // The wall clock stepped back between B and C.
        let activations = [activation("A", 0), activation("B", 200), activation("C", 10)];

        let result = attribute(&activations, &minutes(&[0, 3]), start());

        assert_eq!(result, vec![summary("C", 2)]);
    }

    #[test]
    fn equal_timestamps_after_a_clock_step_keep_first_arrival() {
        let activations = [
            activation("A", 30),
            activation("B", 200),
            activation("C", 30),
        ];

        let result = attribute(&activations, &minutes(&[0]), start());

        assert_eq!(result, vec![summary("A", 1)]);
    }

    #[test]
    fn output_is_sorted_by_name_and_repeatable() {
        let activations = [
            activation("Zed", 0),
            activation("Alacritty", 70),
            activation("Zed", 130),
        ];
        let active = minutes(&[0, 1, 2, 5]);

        let first = attribute(&activations, &active, start());
        let second = attribute(&activations, &active, start());

        assert_eq!(first, vec![summary("Alacritty", 1), summary("Zed", 3)]);
        assert_eq!(first, second);
    }

    #[test]
    fn ranking_is_descending_with_name_ties() {
        let ranked = rank_by_minutes(vec![
            summary("Alpha", 2),
            summary("Beta", 5),
            summary("Gamma", 2),
        ]);

        assert_eq!(
            ranked,
            vec![summary("Beta", 5), summary("Alpha", 2), summary("Gamma", 2)]
        );
    }

    #[test]
    fn collected_activity_renders_summary() {
        let activations = [activation("A", 0), activation("B", 90)];

        let activity = CodingActivity::collect(&activations, &minutes(&[0, 1, 2]), start(), 200);

        assert_eq!(activity.total_active_minutes, 3);
        assert_eq!(activity.total_minutes, 3);
        assert_eq!(
            activity.summary(),
            "active minutes: 3 / total minutes: 3\n\
             * app [B]: 2 active minutes\n\
             * app [A]: 1 active minutes"
        );
    }
}
