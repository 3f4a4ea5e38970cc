//! Precomputed window offsets.
//!
//! For every supported window duration the index stores which samples, counted
//! from the start of the window, make up `output_points` uniformly spaced
//! points. The table is built once at startup and never changes, so the live
//! tail query reduces to a handful of indexed loads.

use crate::error::{AppResult, DaqError};
use tracing::warn;

/// Offsets for one window duration.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowPlan {
    duration: u32,
    /// Samples the window spans, clamped to the buffer capacity.
    window_len: usize,
    /// Logical offsets from the window start, one per output point.
    offsets: Vec<usize>,
}

impl WindowPlan {
    fn build(duration: u32, window_len: usize, output_points: usize) -> Self {
        let offsets = if window_len > output_points && output_points > 0 {
            let step = window_len as f64 / output_points as f64;
            (0..output_points)
                .map(|i| {
                    if i + 1 == output_points {
                        window_len - 1
                    } else {
                        (i as f64 * step) as usize
                    }
                })
                .collect()
        } else {
            Vec::new()
        };
        Self {
            duration,
            window_len,
            offsets,
        }
    }

    /// Window duration in seconds.
    #[must_use]
    pub fn duration(&self) -> u32 {
        self.duration
    }

    /// Number of samples the full window spans.
    #[must_use]
    pub fn window_len(&self) -> usize {
        self.window_len
    }

    /// Offsets from the window start; empty when the window is no longer than the output.
    #[must_use]
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Average number of samples between consecutive output points.
    #[must_use]
    pub fn stride(&self, output_points: usize) -> f64 {
        if output_points == 0 {
            return 0.0;
        }
        (self.window_len as f64 / output_points as f64).max(1.0)
    }
}

/// Immutable map from window duration to its offsets.
#[derive(Debug, Clone)]
pub struct WindowIndex {
    sample_rate_hz: f64,
    output_points: usize,
    plans: Vec<WindowPlan>,
}

impl WindowIndex {
    /// Build the index.
    ///
    /// Windows longer than the buffer can hold are clamped to `capacity`
    /// samples; queries on them then cover the whole buffer.
    #[must_use]
    pub fn new(
        capacity: usize,
        sample_rate_hz: f64,
        window_durations: &[u32],
        output_points: usize,
    ) -> Self {
        let mut durations = window_durations.to_vec();
        durations.sort_unstable();
        durations.dedup();

        let plans = durations
            .into_iter()
            .map(|duration| {
                let wanted = ((sample_rate_hz * f64::from(duration)) as usize).max(1);
                if wanted > capacity {
                    warn!(
                        duration,
                        wanted,
                        capacity,
                        "Window exceeds buffer capacity, clamping"
                    );
                }
                WindowPlan::build(duration, wanted.min(capacity.max(1)), output_points)
            })
            .collect();

        Self {
            sample_rate_hz,
            output_points,
            plans,
        }
    }

    /// Maximum number of points any query returns.
    #[must_use]
    pub fn output_points(&self) -> usize {
        self.output_points
    }

    /// Sample rate the offsets were computed for.
    #[must_use]
    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    /// Supported durations, ascending.
    pub fn durations(&self) -> impl Iterator<Item = u32> + '_ {
        self.plans.iter().map(WindowPlan::duration)
    }

    /// Plan for `duration`, or `InvalidWindow`.
    pub fn plan(&self, duration: u32) -> AppResult<&WindowPlan> {
        self.plans
            .iter()
            .find(|plan| plan.duration == duration)
            .ok_or(DaqError::InvalidWindow(duration))
    }
}
