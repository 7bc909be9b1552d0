use std::fmt::Display;

/// Whole-number share used by the activity tables. Truncates like the minute counts it is built
/// from, so rows never add up to more than 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Percentage(u32);

impl Percentage {
    pub fn of(part: u32, whole: u32) -> Percentage {
        if whole == 0 {
            return Percentage(0);
        }
        Percentage(((part as u64 * 100) / whole as u64) as u32)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl Display for Percentage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.0)
    }
}
