//! Fixed-capacity circular buffer of samples.
//!
//! `RingStore` holds exactly `capacity` slots for one channel. Appends are O(1)
//! and overwrite the oldest slot once the buffer is full. When `capacity` is a
//! power of two the cursor wraps with a bitmask instead of a modulo division;
//! both paths produce identical results.
//!
//! # Memory Layout
//! ```text
//!  slots:  [ s4 | s5 | s6 | s1 | s2 | s3 ]      capacity = 6, count = 6
//!                          ^
//!                        cursor (next slot to overwrite, also the oldest)
//!
//!  chronological order = slots[cursor..] ++ slots[..cursor]
//! ```
//!
//! Reads never mutate state; every query returns an owned copy.

use crate::channel::Sample;
use crate::data::window_index::{WindowIndex, WindowPlan};
use crate::error::AppResult;

/// Buffer occupancy figures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferStats {
    /// Total slots.
    pub capacity: usize,
    /// Valid entries.
    pub count: usize,
    /// Whether every slot holds a sample.
    pub is_full: bool,
    /// `count / capacity`.
    pub utilization: f64,
}

/// Circular sample buffer for a single channel.
#[derive(Debug, Clone)]
pub struct RingStore {
    slots: Box<[Sample]>,
    /// Next slot to overwrite.
    cursor: usize,
    /// Valid entries, `<= capacity`.
    count: usize,
    /// `capacity - 1` when capacity is a power of two.
    mask: Option<usize>,
}

impl RingStore {
    /// Create an empty buffer.
    ///
    /// A capacity of zero is bumped to one so the buffer can always accept an append.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mask = capacity.is_power_of_two().then(|| capacity - 1);
        Self {
            slots: vec![Sample::default(); capacity].into_boxed_slice(),
            cursor: 0,
            count: 0,
            mask,
        }
    }

    /// Total number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of valid samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether no sample has been appended since creation or the last clear.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether every slot holds a sample.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.count == self.capacity()
    }

    #[inline]
    fn wrap(&self, index: usize) -> usize {
        match self.mask {
            Some(mask) => index & mask,
            None => index % self.capacity(),
        }
    }

    /// Physical slot of the logical index (0 = oldest).
    #[inline]
    fn physical(&self, logical: usize) -> usize {
        // cursor - count never underflows once lifted by capacity
        self.wrap(self.cursor + self.capacity() - self.count + logical)
    }

    /// Store a sample, overwriting the oldest one when full.
    #[inline]
    pub fn append(&mut self, sample: Sample) {
        self.slots[self.cursor] = sample;
        self.cursor = self.wrap(self.cursor + 1);
        if self.count < self.capacity() {
            self.count += 1;
        }
    }

    /// Sample at logical index `index` (0 = oldest, `len() - 1` = newest).
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Sample> {
        (index < self.count).then(|| self.slots[self.physical(index)])
    }

    /// Most recently appended sample.
    #[must_use]
    pub fn latest(&self) -> Option<Sample> {
        self.count.checked_sub(1).and_then(|i| self.get(i))
    }

    /// Every valid sample in chronological order.
    #[must_use]
    pub fn all(&self) -> Vec<Sample> {
        self.range(0, self.count)
    }

    /// Samples in the logical range `start..end`, oldest first.
    ///
    /// The range is clamped to the valid entries.
    #[must_use]
    pub fn range(&self, start: usize, end: usize) -> Vec<Sample> {
        let end = end.min(self.count);
        if start >= end {
            return Vec::new();
        }
        let len = end - start;
        let first = self.physical(start);
        let mut out = Vec::with_capacity(len);

        // Tail run up to the end of storage, then the head run from slot 0.
        let tail = len.min(self.capacity() - first);
        out.extend_from_slice(&self.slots[first..first + tail]);
        out.extend_from_slice(&self.slots[..len - tail]);
        out
    }

    /// Uniformly spaced view of the most recent `duration` seconds.
    ///
    /// Returns at most `index.output_points()` samples. When the buffer holds
    /// fewer samples than the window calls for, the available samples are
    /// subsampled at the best achievable stride; no value is ever fabricated.
    pub fn window(&self, index: &WindowIndex, duration: u32) -> AppResult<Vec<Sample>> {
        let plan = index.plan(duration)?;
        Ok(self.window_with_plan(plan, index.output_points()))
    }

    pub(crate) fn window_with_plan(&self, plan: &WindowPlan, output_points: usize) -> Vec<Sample> {
        if self.count == 0 {
            return Vec::new();
        }
        let window_len = plan.window_len();
        let available = self.count.min(window_len);
        let start = self.count - available;

        if available <= output_points {
            return self.range(start, self.count);
        }

        if available == window_len {
            // Fast path: precomputed offsets against the wrap-aware cursor.
            return plan
                .offsets()
                .iter()
                .map(|&offset| self.slots[self.physical(start + offset)])
                .collect();
        }

        let step = available as f64 / output_points as f64;
        (0..output_points)
            .map(|i| {
                let logical = if i + 1 == output_points {
                    start + available - 1
                } else {
                    start + (i as f64 * step) as usize
                };
                self.slots[self.physical(logical)]
            })
            .collect()
    }

    /// Drop every sample. Capacity is unchanged.
    pub fn clear(&mut self) {
        self.cursor = 0;
        self.count = 0;
    }

    /// Occupancy figures.
    #[must_use]
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            capacity: self.capacity(),
            count: self.count,
            is_full: self.is_full(),
            utilization: self.count as f64 / self.capacity() as f64,
        }
    }
}
