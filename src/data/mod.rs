//! Time-series storage: ring buffers, window offsets and the per-channel store.

pub mod ring_store;
pub mod sample_store;
pub mod window_index;

pub use ring_store::{BufferStats, RingStore};
pub use sample_store::SampleStore;
pub use window_index::{WindowIndex, WindowPlan};
