use crate::frame::ActiveRange;
use crate::history::{HistoryBuffer, PushOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Live,
    Paused,
    FrozenRange(ActiveRange),
}

impl PlaybackState {
    pub fn label(&self) -> &'static str {
        match self {
            PlaybackState::Live => "live",
            PlaybackState::Paused => "paused",
            PlaybackState::FrozenRange(_) => "frozen",
        }
    }
}

/// Chooses which buffered frame is displayed. Navigation never fails:
/// requests outside the buffered window are clamped or ignored.
#[derive(Debug, Clone)]
pub struct PlaybackController {
    state: PlaybackState,
    current: Option<u64>,
}

impl Default for PlaybackController {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackController {
    pub fn new() -> Self {
        Self {
            state: PlaybackState::Live,
            current: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.state == PlaybackState::Live
    }

    /// Frame number currently on screen, if any frame has arrived.
    pub fn displayed(&self) -> Option<u64> {
        self.current
    }

    pub fn live(&mut self, history: &mut HistoryBuffer) {
        self.thaw(history);
        self.state = PlaybackState::Live;
        self.current = history.newest_available();
    }

    pub fn pause(&mut self, history: &mut HistoryBuffer) {
        self.thaw(history);
        self.state = PlaybackState::Paused;
        if self.current.is_none() {
            self.current = history.newest_available();
        }
    }

    /// Steps one frame towards the newest. Returns whether the display moved.
    pub fn forward(&mut self, history: &mut HistoryBuffer) -> bool {
        self.pause(history);
        let Some(current) = self.current else {
            return false;
        };
        match history.next_after(current) {
            Some(next) => {
                self.current = Some(next);
                true
            }
            None => false,
        }
    }

    /// Steps one frame towards the oldest. Returns whether the display moved.
    pub fn rewind(&mut self, history: &mut HistoryBuffer) -> bool {
        self.pause(history);
        let Some(current) = self.current else {
            return false;
        };
        match history.prev_before(current) {
            Some(prev) => {
                self.current = Some(prev);
                true
            }
            None => false,
        }
    }

    pub fn first(&mut self, history: &mut HistoryBuffer) {
        self.pause(history);
        if let Some(oldest) = history.oldest_available() {
            self.current = Some(oldest);
        }
    }

    pub fn last(&mut self, history: &mut HistoryBuffer) {
        self.pause(history);
        if let Some(newest) = history.newest_available() {
            self.current = Some(newest);
        }
    }

    /// Pins `frame_number` (clamped into the buffered window) and narrows
    /// its active range. Returns the range actually applied.
    pub fn freeze_frame(
        &mut self,
        history: &mut HistoryBuffer,
        frame_number: u64,
        min: i64,
        max: i64,
    ) -> Option<ActiveRange> {
        self.thaw(history);
        let (Some(oldest), Some(newest)) = (history.oldest_available(), history.newest_available())
        else {
            return None;
        };
        let mut target = frame_number.clamp(oldest, newest);
        if history.get(target).is_none() {
            target = history.next_after(target).unwrap_or(newest);
        }
        let frame = history.get_mut(target)?;
        let range = frame.with_range(min, max);
        self.state = PlaybackState::FrozenRange(range);
        self.current = Some(target);
        Some(range)
    }

    /// Called once per push, inside the same ingest step.
    pub fn on_frame_pushed(&mut self, history: &mut HistoryBuffer, outcome: PushOutcome) {
        if self.state == PlaybackState::Live {
            self.current = history.newest_available();
            return;
        }
        let evicted = match (outcome, self.current) {
            (PushOutcome::Reset { .. }, _) | (_, None) => true,
            (_, Some(current)) => history
                .oldest_available()
                .is_some_and(|oldest| current < oldest),
        };
        if evicted {
            // The frozen frame is gone, so there is no range to restore.
            self.state = PlaybackState::Paused;
            self.current = history.oldest_available();
        }
    }

    /// Restores the full range of a frozen frame before leaving the state.
    fn thaw(&mut self, history: &mut HistoryBuffer) {
        if let PlaybackState::FrozenRange(_) = self.state {
            if let Some(frame) = self.current.and_then(|n| history.get_mut(n)) {
                frame.reset_range();
            }
            self.state = PlaybackState::Paused;
        }
    }
}
