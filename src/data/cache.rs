//! Bounded live cache and unbounded recorder for spectral samples
//!
//! Both are owned by the controller thread, so neither needs interior
//! synchronization.

use std::collections::VecDeque;

use crate::data::sample::SpectralSample;

/// Fixed-capacity FIFO of the most recent samples
///
/// Appending past capacity evicts the oldest sample.
#[derive(Debug)]
pub struct SampleCache {
    samples: VecDeque<SpectralSample>,
    capacity: usize,
    evicted: u64,
}

impl SampleCache {
    /// Create a cache holding at most `capacity` samples
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    /// Append a sample, returning the evicted one if the cache was full
    pub fn push(&mut self, sample: SpectralSample) -> Option<SpectralSample> {
        let evicted = if self.samples.len() == self.capacity {
            self.evicted += 1;
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(sample);
        evicted
    }

    /// Most recently arrived sample
    pub fn latest(&self) -> Option<&SpectralSample> {
        self.samples.back()
    }

    /// Packet counter of the newest sample, 0 when empty
    pub fn watermark(&self) -> u64 {
        self.latest().map(|s| s.packet_count).unwrap_or(0)
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &SpectralSample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total samples evicted since creation
    pub fn evicted_count(&self) -> u64 {
        self.evicted
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Recording buffer filled only while recording is active
#[derive(Debug, Default)]
pub struct Recorder {
    samples: Vec<SpectralSample>,
    recording: bool,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new recording, discarding the previous one
    pub fn start(&mut self) {
        self.samples.clear();
        self.recording = true;
        tracing::info!("Recording started");
    }

    /// Stop recording and return a copy of what was collected with its length
    ///
    /// The recording stays available for export until the next `start` or
    /// `clear`.
    pub fn stop(&mut self) -> (Vec<SpectralSample>, usize) {
        self.recording = false;
        let count = self.samples.len();
        tracing::info!("Recording stopped, {} samples", count);
        (self.samples.clone(), count)
    }

    /// Copy a sample into the recording if active
    pub fn record(&mut self, sample: &SpectralSample) {
        if self.recording {
            self.samples.push(sample.clone());
        }
    }

    /// Discard the recording. Refused while recording.
    pub fn clear(&mut self) -> bool {
        if self.recording {
            return false;
        }
        self.samples.clear();
        true
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn samples(&self) -> &[SpectralSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::CHANNEL_COUNT;
    use proptest::prelude::*;

    fn sample(packet: u64) -> SpectralSample {
        SpectralSample::new(packet, packet, 0, [packet as f64; CHANNEL_COUNT], None)
    }

    #[test]
    fn test_cache_evicts_oldest() {
        let mut cache = SampleCache::new(3);
        for i in 1..=3 {
            assert!(cache.push(sample(i)).is_none());
        }

        let evicted = cache.push(sample(4)).unwrap();
        assert_eq!(evicted.packet_count, 1);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.evicted_count(), 1);

        let packets: Vec<u64> = cache.iter().map(|s| s.packet_count).collect();
        assert_eq!(packets, vec![2, 3, 4]);
        assert_eq!(cache.watermark(), 4);
    }

    #[test]
    fn test_empty_cache_watermark() {
        let cache = SampleCache::new(10);
        assert_eq!(cache.watermark(), 0);
        assert!(cache.latest().is_none());
    }

    #[test]
    fn test_recorder_only_records_while_active() {
        let mut recorder = Recorder::new();
        recorder.record(&sample(1));
        assert!(recorder.is_empty());

        recorder.start();
        recorder.record(&sample(2));
        recorder.record(&sample(3));
        assert!(!recorder.clear());

        let (samples, count) = recorder.stop();
        assert_eq!(count, 2);
        assert_eq!(samples[0].packet_count, 2);

        recorder.record(&sample(4));
        assert_eq!(recorder.len(), 2);
        assert!(recorder.clear());
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_start_resets_previous_recording() {
        let mut recorder = Recorder::new();
        recorder.start();
        recorder.record(&sample(1));
        recorder.stop();

        recorder.start();
        assert!(recorder.is_empty());
        assert!(recorder.is_recording());
    }

    proptest! {
        #[test]
        fn prop_cache_holds_most_recent(capacity in 1usize..64, n in 0u64..300) {
            let mut cache = SampleCache::new(capacity);
            for i in 0..n {
                cache.push(sample(i));
            }

            let expected_len = (n as usize).min(capacity);
            prop_assert_eq!(cache.len(), expected_len);

            let first = n - expected_len as u64;
            let packets: Vec<u64> = cache.iter().map(|s| s.packet_count).collect();
            let expected: Vec<u64> = (first..n).collect();
            prop_assert_eq!(packets, expected);
        }

        #[test]
        fn prop_recorder_returns_all_in_order(k in 0u64..500) {
            let mut cache = SampleCache::new(16);
            let mut recorder = Recorder::new();
            recorder.start();
            for i in 0..k {
                let s = sample(i);
                recorder.record(&s);
                cache.push(s);
            }

            let (samples, count) = recorder.stop();
            prop_assert_eq!(count, k as usize);
            let packets: Vec<u64> = samples.iter().map(|s| s.packet_count).collect();
            prop_assert_eq!(packets, (0..k).collect::<Vec<_>>());
        }
    }
}
