use chrono::{DateTime, Local, Utc};
use now::DateTimeNow;

/// Start of the local calendar day containing `moment`. History is grouped by this value.
pub fn local_day_start(moment: DateTime<Utc>) -> DateTime<Local> {
    moment.with_timezone(&Local).beginning_of_day()
}

/// `MM:SS` rendering of a countdown.
pub fn time_string(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Whole minutes, e.g. `14m` for 899 seconds.
pub fn duration_string(seconds: u64) -> String {
    format!("{}m", seconds / 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_string_pads_minutes_and_seconds() {
        assert_eq!(time_string(0), "00:00");
        assert_eq!(time_string(65), "01:05");
        assert_eq!(time_string(1500), "25:00");
    }

    #[test]
    fn duration_string_truncates_partial_minutes() {
        assert_eq!(duration_string(59), "0m");
        assert_eq!(duration_string(899), "14m");
    }
}
