use crate::frame::Frame;
use std::collections::VecDeque;

/// Roughly 60 seconds of frames at 60 fps.
pub const DEFAULT_HISTORY_CAPACITY: usize = 3_600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Appended,
    Evicted { frame_number: u64 },
    /// The frame number did not advance past the newest frame (producer
    /// restarted numbering), so the buffer was cleared first.
    Reset { dropped: usize },
}

/// Fixed-capacity ring of the most recent frames, keyed by frame number.
#[derive(Debug)]
pub struct HistoryBuffer {
    capacity: usize,
    frames: VecDeque<Frame>,
    total_pushed: u64,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            frames: VecDeque::with_capacity(capacity),
            total_pushed: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }

    pub fn push(&mut self, frame: Frame) -> PushOutcome {
        self.total_pushed += 1;
        let mut outcome = PushOutcome::Appended;
        if let Some(newest) = self.newest_available() {
            if frame.frame_number() <= newest {
                outcome = PushOutcome::Reset {
                    dropped: self.frames.len(),
                };
                self.frames.clear();
            }
        }
        if self.frames.len() == self.capacity {
            if let Some(evicted) = self.frames.pop_front() {
                outcome = PushOutcome::Evicted {
                    frame_number: evicted.frame_number(),
                };
            }
        }
        self.frames.push_back(frame);
        outcome
    }

    fn position(&self, frame_number: u64) -> Option<usize> {
        let oldest = self.frames.front()?.frame_number();
        let offset = usize::try_from(frame_number.checked_sub(oldest)?).ok()?;
        // Frame numbers are usually contiguous, making this a direct hit.
        if let Some(frame) = self.frames.get(offset) {
            if frame.frame_number() == frame_number {
                return Some(offset);
            }
        }
        self.frames
            .binary_search_by_key(&frame_number, Frame::frame_number)
            .ok()
    }

    pub fn get(&self, frame_number: u64) -> Option<&Frame> {
        self.position(frame_number)
            .and_then(|idx| self.frames.get(idx))
    }

    pub fn get_mut(&mut self, frame_number: u64) -> Option<&mut Frame> {
        self.position(frame_number)
            .and_then(move |idx| self.frames.get_mut(idx))
    }

    pub fn oldest_available(&self) -> Option<u64> {
        self.frames.front().map(Frame::frame_number)
    }

    pub fn newest_available(&self) -> Option<u64> {
        self.frames.back().map(Frame::frame_number)
    }

    /// Smallest buffered frame number strictly greater than `frame_number`.
    pub fn next_after(&self, frame_number: u64) -> Option<u64> {
        let idx = self
            .frames
            .partition_point(|frame| frame.frame_number() <= frame_number);
        self.frames.get(idx).map(Frame::frame_number)
    }

    /// Largest buffered frame number strictly less than `frame_number`.
    pub fn prev_before(&self, frame_number: u64) -> Option<u64> {
        let idx = self
            .frames
            .partition_point(|frame| frame.frame_number() < frame_number);
        idx.checked_sub(1)
            .and_then(|idx| self.frames.get(idx))
            .map(Frame::frame_number)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
pub(crate) fn empty_frame(frame_number: u64) -> Frame {
    use crate::source::SourceTable;
    use crate::thread::ThreadRegistry;
    use crate::wire::{FrameMessage, StringInt};

    let message = FrameMessage {
        frame: StringInt(frame_number as i64),
        windowx: StringInt(640),
        windowy: StringInt(480),
        logs: Vec::new(),
        drawcalls: Vec::new(),
        threads: None,
        new_sources: Vec::new(),
        buff_map: Default::default(),
    };
    Frame::from_message(message, &mut SourceTable::new(), &mut ThreadRegistry::new())
        .expect("empty frame")
        .0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_is_defined_only_inside_the_retained_window() {
        for capacity in [1usize, 3, 8] {
            for pushes in 0u64..12 {
                let mut history = HistoryBuffer::new(capacity);
                for n in 0..pushes {
                    history.push(empty_frame(n));
                }
                let low = pushes.saturating_sub(capacity as u64);
                for i in 0..pushes + 2 {
                    let defined = history.get(i).is_some();
                    assert_eq!(
                        defined,
                        low <= i && i < pushes,
                        "capacity={capacity} pushes={pushes} i={i}"
                    );
                }
                assert_eq!(history.len() as u64, pushes.min(capacity as u64));
            }
        }
    }

    #[test]
    fn push_reports_evictions_and_resets() {
        let mut history = HistoryBuffer::new(2);
        assert_eq!(history.push(empty_frame(10)), PushOutcome::Appended);
        assert_eq!(history.push(empty_frame(11)), PushOutcome::Appended);
        assert_eq!(
            history.push(empty_frame(12)),
            PushOutcome::Evicted { frame_number: 10 }
        );
        assert_eq!(history.push(empty_frame(0)), PushOutcome::Reset { dropped: 2 });
        assert_eq!(history.oldest_available(), Some(0));
        assert_eq!(history.newest_available(), Some(0));
        assert_eq!(history.total_pushed(), 4);
    }

    #[test]
    fn lookups_tolerate_gaps() {
        let mut history = HistoryBuffer::new(8);
        for n in [3u64, 4, 7, 9] {
            history.push(empty_frame(n));
        }
        assert!(history.get(7).is_some());
        assert!(history.get(5).is_none());
        assert_eq!(history.next_after(4), Some(7));
        assert_eq!(history.prev_before(9), Some(7));
        assert_eq!(history.prev_before(3), None);
        assert_eq!(history.next_after(9), None);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut history = HistoryBuffer::new(0);
        history.push(empty_frame(0));
        history.push(empty_frame(1));
        assert_eq!(history.capacity(), 1);
        assert!(history.get(0).is_none());
        assert!(history.get(1).is_some());
    }
}
