//! Latest raw sample per physical channel.
//!
//! Each channel owns a `watch` slot: links overwrite it with every decoded
//! reading and the calibration loop picks up whatever is newest at its next
//! tick. Intermediate readings between two ticks are intentionally dropped.

use crate::channel::{PhysicalChannel, Sample};
use std::sync::Arc;
use tokio::sync::watch;

/// Shared raw sample slots.
#[derive(Debug)]
pub struct RawFeed {
    slots: Vec<watch::Sender<Option<Sample>>>,
}

impl Default for RawFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl RawFeed {
    /// One empty slot per physical channel.
    #[must_use]
    pub fn new() -> Self {
        let slots = PhysicalChannel::ALL
            .iter()
            .map(|_| watch::channel(None).0)
            .collect();
        Self { slots }
    }

    /// Overwrite a channel's slot.
    pub fn publish(&self, channel: PhysicalChannel, sample: Sample) {
        self.slots[channel.index()].send_replace(Some(sample));
    }

    /// Receiver observing a channel's slot. Marks the current value as seen.
    #[must_use]
    pub fn subscribe(&self, channel: PhysicalChannel) -> watch::Receiver<Option<Sample>> {
        self.slots[channel.index()].subscribe()
    }

    /// Newest raw sample of a channel.
    #[must_use]
    pub fn latest(&self, channel: PhysicalChannel) -> Option<Sample> {
        *self.slots[channel.index()].borrow()
    }
}

/// Write handle for one channel, given to its link task.
#[derive(Debug, Clone)]
pub struct RawPublisher {
    channel: PhysicalChannel,
    feed: Arc<RawFeed>,
}

impl RawPublisher {
    /// Publisher for `channel`.
    #[must_use]
    pub fn new(channel: PhysicalChannel, feed: Arc<RawFeed>) -> Self {
        Self { channel, feed }
    }

    /// Channel this publisher writes.
    #[must_use]
    pub fn channel(&self) -> PhysicalChannel {
        self.channel
    }

    /// Publish a reading.
    pub fn publish(&self, sample: Sample) {
        self.feed.publish(self.channel, sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_value_wins() {
        let feed = Arc::new(RawFeed::new());
        let mut rx = feed.subscribe(PhysicalChannel::Disp1);
        assert!(!rx.has_changed().unwrap());

        let publisher = RawPublisher::new(PhysicalChannel::Disp1, feed.clone());
        publisher.publish(Sample::new(1.0, 1.0));
        publisher.publish(Sample::new(2.0, 2.0));

        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), Some(Sample::new(2.0, 2.0)));
        assert!(!rx.has_changed().unwrap());
        assert_eq!(feed.latest(PhysicalChannel::Disp1), Some(Sample::new(2.0, 2.0)));
        assert_eq!(feed.latest(PhysicalChannel::Force), None);
    }
}
