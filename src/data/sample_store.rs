//! Per-channel ring buffers sharing one window index.
//!
//! The calibration loop is the only writer. Readers take a short read lock and
//! copy out what they need, so no reader ever observes a half-written wrap and
//! the writer never waits on a slow consumer for longer than one copy.

use crate::channel::{Channel, Sample};
use crate::data::ring_store::{BufferStats, RingStore};
use crate::data::window_index::WindowIndex;
use crate::error::AppResult;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

/// Storage for every channel.
#[derive(Debug)]
pub struct SampleStore {
    rings: Vec<RwLock<RingStore>>,
    index: Arc<WindowIndex>,
}

impl SampleStore {
    /// One ring of `capacity` slots per channel.
    #[must_use]
    pub fn new(capacity: usize, index: Arc<WindowIndex>) -> Self {
        let rings = (0..Channel::COUNT)
            .map(|_| RwLock::new(RingStore::new(capacity)))
            .collect();
        Self { rings, index }
    }

    fn read(&self, channel: Channel) -> RwLockReadGuard<'_, RingStore> {
        self.rings[channel.index()]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a calibrated sample.
    pub fn append(&self, channel: Channel, sample: Sample) {
        self.rings[channel.index()]
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .append(sample);
    }

    /// Newest sample, if any.
    #[must_use]
    pub fn latest(&self, channel: Channel) -> Option<Sample> {
        self.read(channel).latest()
    }

    /// Uniformly spaced window of the newest samples.
    pub fn window(&self, channel: Channel, duration: u32) -> AppResult<Vec<Sample>> {
        let plan = self.index.plan(duration)?;
        Ok(self
            .read(channel)
            .window_with_plan(plan, self.index.output_points()))
    }

    /// Every stored sample, oldest first.
    #[must_use]
    pub fn all(&self, channel: Channel) -> Vec<Sample> {
        self.read(channel).all()
    }

    /// Occupancy figures.
    #[must_use]
    pub fn stats(&self, channel: Channel) -> BufferStats {
        self.read(channel).stats()
    }

    /// Drop every sample of one channel.
    pub fn clear(&self, channel: Channel) {
        self.rings[channel.index()]
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Drop every sample of every channel.
    pub fn clear_all(&self) {
        for channel in Channel::all() {
            self.clear(channel);
        }
    }

    /// Window index the store answers queries with.
    #[must_use]
    pub fn window_index(&self) -> &WindowIndex {
        &self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{DerivedChannel, PhysicalChannel};

    #[test]
    fn channels_are_independent() {
        let index = Arc::new(WindowIndex::new(16, 1.0, &[10], 5));
        let store = SampleStore::new(16, index);
        let force = Channel::Physical(PhysicalChannel::Force);
        let arc = Channel::Derived(DerivedChannel::Arc);

        store.append(force, Sample::new(1.0, 2.0));
        assert_eq!(store.latest(force), Some(Sample::new(1.0, 2.0)));
        assert!(store.latest(arc).is_none());
        assert_eq!(store.stats(force).count, 1);

        store.clear_all();
        assert!(store.all(force).is_empty());
    }
}
