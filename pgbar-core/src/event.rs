/// Events delivered to the reader loop over the MPSC queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A module changed its contents; `force` bypasses output coalescing.
    Update { force: bool },
    /// A mouse or IPC payload to route through the input pipeline.
    Input { data: String },
    /// Stop the loop; `reload` re-execs the process instead of exiting.
    Quit { reload: bool },
    /// Verify that any module is still running, exit otherwise.
    Check,
}

impl Event {
    /// Whether two events may collapse into one during coalescing.
    /// UPDATE and CHECK both participate; INPUT and QUIT never do.
    #[must_use]
    pub fn coalesces_with(&self, other: &Event) -> bool {
        matches!(
            (self, other),
            (Event::Update { .. }, Event::Update { .. }) | (Event::Check, Event::Check)
        )
    }
}

/// Millisecond press-to-press timer used for double click detection.
///
/// `press` returns true when the event falls outside the configured offset
/// from the previous press, i.e. when it starts a fresh click.
#[derive(Debug, Copy, Clone)]
pub struct EventTimer {
    offset: u64,
    last: u64,
}

impl EventTimer {
    #[must_use]
    pub const fn new(offset_ms: u64) -> Self {
        Self {
            offset: offset_ms,
            last: 0,
        }
    }

    pub fn press(&mut self, time_ms: u64) -> bool {
        let fresh = time_ms >= self.last.saturating_add(self.offset);
        self.last = time_ms;
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coalescing_matrix() {
        let update = Event::Update { force: false };
        let forced = Event::Update { force: true };
        let input = Event::Input { data: "x".into() };
        assert!(update.coalesces_with(&forced));
        assert!(Event::Check.coalesces_with(&Event::Check));
        assert!(!update.coalesces_with(&Event::Check));
        assert!(!update.coalesces_with(&input));
        assert!(!input.coalesces_with(&input));
    }

    #[test]
    fn presses_within_the_window_are_doubles() {
        let mut timer = EventTimer::new(400);
        assert!(timer.press(1000));
        assert!(!timer.press(1300));
        assert!(timer.press(1701));
        assert!(!timer.press(2100));
    }
}
