use std::time::Duration;

use tokio::time::Instant;

/// Coalescing one-shot timer. While a request is pending, further requests are dropped rather
/// than queued or pushed back.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    /// Returns false when a request was already outstanding.
    pub fn schedule(&mut self, now: Instant) -> bool {
        if self.pending.is_some() {
            return false;
        }
        self.pending = Some(now + self.delay);
        true
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Consumes the pending request once its deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.pending {
            Some(deadline) if deadline <= now => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::Debouncer;

    #[test]
    fn requests_coalesce_while_pending() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(50));

        assert!(debouncer.schedule(start));
        assert!(!debouncer.schedule(start + Duration::from_millis(10)));
        assert_eq!(debouncer.deadline(), Some(start + Duration::from_millis(50)));

        assert!(!debouncer.take_due(start + Duration::from_millis(49)));
        assert!(debouncer.take_due(start + Duration::from_millis(50)));
        assert!(!debouncer.take_due(start + Duration::from_millis(60)));
        assert!(debouncer.schedule(start + Duration::from_millis(60)));
    }

    #[test]
    fn cancel_drops_the_request() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(50));
        debouncer.schedule(start);
        debouncer.cancel();

        assert!(!debouncer.is_pending());
        assert!(!debouncer.take_due(start + Duration::from_secs(1)));
    }
}
