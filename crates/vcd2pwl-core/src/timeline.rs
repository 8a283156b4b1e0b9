//! Per-signal value timelines
//!
//! Each timeline stores its breakpoints in two flat vectors: the times, and
//! the bits of every value back to back (`width` bits per entry). Appending a
//! change therefore never allocates per event, and the last value is always
//! the tail of the level buffer.

use crate::decoder::ValueChange;
use crate::header::DeclarationTable;
use crate::types::Logic;

/// Ordered `(time, value)` breakpoints of one signal.
///
/// Times are strictly increasing, consecutive values always differ, and the
/// first entry is at time 0.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalTimeline {
    width: usize,
    times: Vec<u64>,
    levels: Vec<Logic>,
    /// Changes that repeated the current value and were dropped
    collapsed: usize,
    /// Some recorded change carried an `X` bit
    observed_undefined: bool,
}

impl SignalTimeline {
    /// A timeline holding `initial` on every bit from time 0
    pub fn new(width: usize, initial: Logic) -> Self {
        Self {
            width,
            times: vec![0],
            levels: vec![initial; width],
            collapsed: 0,
            observed_undefined: false,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.times.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn collapsed(&self) -> usize {
        self.collapsed
    }

    /// Whether a recorded change carried `X`. The initial value does not count.
    pub fn observed_undefined(&self) -> bool {
        self.observed_undefined
    }

    pub fn times(&self) -> &[u64] {
        &self.times
    }

    /// Value of breakpoint `index`, MSB first
    #[inline]
    pub fn value(&self, index: usize) -> &[Logic] {
        &self.levels[index * self.width..(index + 1) * self.width]
    }

    #[inline]
    pub fn last_value(&self) -> &[Logic] {
        self.value(self.len() - 1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &[Logic])> + '_ {
        self.times
            .iter()
            .copied()
            .zip(self.levels.chunks_exact(self.width))
    }

    /// Record `value` at `time`.
    ///
    /// `time` must not precede the last breakpoint. A change at the same time
    /// as the last breakpoint replaces it; a value equal to the current one is
    /// dropped.
    pub fn record(&mut self, time: u64, value: &[Logic]) {
        debug_assert_eq!(value.len(), self.width);
        let last = self.len() - 1;
        let last_time = self.times[last];
        debug_assert!(time >= last_time);
        self.observed_undefined |= value.contains(&Logic::Undefined);

        if time == last_time {
            self.levels[last * self.width..].copy_from_slice(value);
            // The replacement may now repeat the breakpoint before it
            if last > 0 && self.value(last - 1) == value {
                self.times.pop();
                self.levels.truncate(last * self.width);
                self.collapsed += 1;
            }
            return;
        }

        if self.last_value() == value {
            self.collapsed += 1;
            return;
        }

        self.times.push(time);
        self.levels.extend_from_slice(value);
    }

    /// Single-bit timeline of bit `bit` (LSB = 0), collapsed again
    pub fn bit(&self, bit: usize) -> SignalTimeline {
        let column = self.width - 1 - bit;
        let mut projected = SignalTimeline::new(1, self.levels[column]);
        for (time, value) in self.iter().skip(1) {
            projected.record(time, &value[column..=column]);
        }
        projected.collapsed = 0;
        projected
    }
}

/// Builds one timeline per declared signal during the forward pass.
pub struct TimelineBuilder {
    timelines: Vec<SignalTimeline>,
}

impl TimelineBuilder {
    /// Pre-allocate a timeline for every declaration, all starting at `initial`
    pub fn new(table: &DeclarationTable, initial: Logic) -> Self {
        Self {
            timelines: table
                .iter()
                .map(|decl| SignalTimeline::new(decl.width, initial))
                .collect(),
        }
    }

    #[inline]
    pub fn apply(&mut self, change: ValueChange<'_>) {
        self.timelines[change.signal].record(change.time, change.value);
    }

    /// Freeze the timelines once the body is exhausted
    pub fn finish(self, end_time: u64) -> Timelines {
        Timelines {
            timelines: self.timelines,
            end_time,
        }
    }
}

/// Finalized timelines, indexed like the declaration table
#[derive(Debug, Clone)]
pub struct Timelines {
    timelines: Vec<SignalTimeline>,
    end_time: u64,
}

impl Timelines {
    pub fn get(&self, signal: usize) -> &SignalTimeline {
        &self.timelines[signal]
    }

    /// Final timestamp of the trace, in ticks
    pub fn end_time(&self) -> u64 {
        self.end_time
    }

    pub fn len(&self) -> usize {
        self.timelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timelines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SignalTimeline> {
        self.timelines.iter()
    }
}
