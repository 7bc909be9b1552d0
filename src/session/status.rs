use super::block::CodingBlock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhaseKind {
    #[default]
    Idle,
    Coding,
    Break,
}

/// Read-only projection of the session, republished after every change.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusSnapshot {
    pub phase: PhaseKind,
    pub remaining_seconds: u64,
    pub active_block: Option<CodingBlock>,
}

impl StatusSnapshot {
    pub fn text(&self) -> String {
        status_text(self.phase, self.remaining_seconds)
    }
}

/// Fire-and-forget request to bring the primary window to the front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaiseWindow;

/// Short label suitable for a menu bar or a terminal title.
pub fn status_text(phase: PhaseKind, remaining_seconds: u64) -> String {
    let label = match phase {
        PhaseKind::Idle => return "Plan Code".into(),
        PhaseKind::Coding => "Coding",
        PhaseKind::Break => "Break",
    };
    if remaining_seconds < 60 {
        format!("{label} {remaining_seconds}s")
    } else {
        format!("{label} {}m", remaining_seconds / 60)
    }
}
