//! Sample storage: live cache, recorder and CSV export

pub mod cache;
pub mod export;
pub mod sample;

pub use cache::{Recorder, SampleCache};
pub use export::{save_samples, write_samples};
pub use sample::{channel_means, SpectralSample};
