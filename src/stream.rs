//! Input stream decoding and accounting
//!
//! The sensor firmware stamps every Input report with a little-endian 16-bit
//! sequence counter in the first two payload bytes. [`LossCounter`] turns the
//! gaps in that counter into a lost-report tally; [`RateCounter`] tracks the
//! delivery rate per second.

use std::time::{Duration, Instant};

/// A decoded Input report: sequence counter plus the remaining payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEvent {
    pub report_id: u8,
    pub sequence: u16,
    pub data: Vec<u8>,
}

/// Decode an Input report into an event. `None` when the payload is too
/// short to carry the sequence counter.
pub fn decode_input(report: &crate::types::Report) -> Option<InputEvent> {
    if report.payload.len() < 2 {
        return None;
    }
    let (counter, data) = report.payload.split_at(2);
    Some(InputEvent {
        report_id: report.report_id,
        sequence: u16::from_le_bytes([counter[0], counter[1]]),
        data: data.to_vec(),
    })
}

/// Lost-report accounting over the firmware sequence counter.
///
/// Wraparound-aware: a forward gap below half the counter space counts as
/// loss; anything at or past it is treated as a device reset or reordering
/// and only resyncs the expected value.
#[derive(Debug, Default)]
pub struct LossCounter {
    expected: Option<u16>,
    received: u64,
    lost: u64,
}

impl LossCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one received sequence number. Returns the number of
    /// reports lost since the previous one (0 when in order).
    pub fn observe(&mut self, sequence: u16) -> u64 {
        self.received += 1;
        let lost = match self.expected {
            None => 0,
            Some(expected) => {
                let gap = sequence.wrapping_sub(expected);
                if gap < 0x8000 {
                    u64::from(gap)
                } else {
                    // Behind or wildly ahead of the expected value; resync
                    // without charging it as loss.
                    0
                }
            }
        };
        self.lost += lost;
        self.expected = Some(sequence.wrapping_add(1));
        lost
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn lost(&self) -> u64 {
        self.lost
    }

    /// Forget the expected sequence, e.g. after re-binding a device.
    pub fn resync(&mut self) {
        self.expected = None;
    }
}

/// Reports-per-second counter over a sliding one-second window.
#[derive(Debug)]
pub struct RateCounter {
    window: Duration,
    window_start: Instant,
    in_window: u32,
    last_rate: u32,
}

impl Default for RateCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateCounter {
    pub fn new() -> Self {
        Self {
            window: Duration::from_secs(1),
            window_start: Instant::now(),
            in_window: 0,
            last_rate: 0,
        }
    }

    /// Record one delivery. Returns `Some(rate)` when a window just closed.
    pub fn tick(&mut self) -> Option<u32> {
        let now = Instant::now();
        let mut closed = None;
        if now.duration_since(self.window_start) >= self.window {
            self.last_rate = self.in_window;
            self.in_window = 0;
            self.window_start = now;
            closed = Some(self.last_rate);
        }
        self.in_window += 1;
        closed
    }

    /// Rate measured over the most recently closed window.
    pub fn rate(&self) -> u32 {
        self.last_rate
    }
}
