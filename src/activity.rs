//! Voice activity detection.
//!
//! The analyser averages the spectrum over the fundamental band of the human
//! voice and runs the result through a hysteresis counter, so a speaker is only
//! reported active after a short run of voiced frames and only reported silent
//! after a matching run of quiet ones.

use crate::error::{Result, VoiceFieldError};
use crate::spectrum::FrequencyTap;

const VOICE_BAND_LOW_HZ: f32 = 85.0;
const VOICE_BAND_HIGH_HZ: f32 = 255.0;

/// Level at or above which a frame counts as voiced.
const ACTIVITY_LEVEL_THRESHOLD: f32 = 0.5;

const COUNTER_MAX: u32 = 60;

/// The counter must exceed this for the source to be active.
const ACTIVE_COUNT_THRESHOLD: u32 = 5;

/// Reported when a source starts or stops speaking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityChange {
    pub id: String,
    pub is_active: bool,
}

pub struct ActivityAnalyser<T: FrequencyTap> {
    id: String,
    tap: T,
    buffer: Vec<f32>,
    counter: u32,
    was_active: bool,
}

impl<T: FrequencyTap> ActivityAnalyser<T> {
    pub fn new(id: impl Into<String>, buffer_size: usize, tap: T) -> Result<Self> {
        if buffer_size == 0 {
            return Err(VoiceFieldError::Analysis(
                "Activity analyser buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            id: id.into(),
            tap,
            buffer: vec![0.0; buffer_size],
            counter: 0,
            was_active: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tap(&self) -> &T {
        &self.tap
    }

    pub fn tap_mut(&mut self) -> &mut T {
        &mut self.tap
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn is_active(&self) -> bool {
        self.was_active
    }

    /// Runs one analysis step, returning the change if the activity state
    /// flipped.
    pub fn update(&mut self) -> Option<ActivityChange> {
        self.tap.read_frequency_data(&mut self.buffer);

        let average = self.band_average(VOICE_BAND_LOW_HZ, VOICE_BAND_HIGH_HZ);
        let level = 1.1 + average / 100.0;

        if level >= ACTIVITY_LEVEL_THRESHOLD {
            self.counter = (self.counter + 1).min(COUNTER_MAX);
        } else {
            self.counter = self.counter.saturating_sub(1);
        }

        let is_active = self.counter > ACTIVE_COUNT_THRESHOLD;
        if is_active == self.was_active {
            return None;
        }

        self.was_active = is_active;
        log::debug!(
            "Source {} is now {}",
            self.id,
            if is_active { "active" } else { "inactive" }
        );
        Some(ActivityChange {
            id: self.id.clone(),
            is_active,
        })
    }

    fn frequency_index(&self, frequency: f32) -> usize {
        let nyquist = self.tap.sample_rate() as f32 / 2.0;
        let size = self.buffer.len();
        let index = (frequency / nyquist * size as f32).round();
        (index.max(0.0) as usize).min(size)
    }

    fn band_average(&self, low: f32, high: f32) -> f32 {
        let last = self.buffer.len() - 1;
        let high_index = self.frequency_index(high).min(last);
        let low_index = self.frequency_index(low).min(high_index);
        let band = &self.buffer[low_index..=high_index];
        band.iter().sum::<f32>() / band.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reports the same level in every bin.
    struct FlatTap {
        level_db: f32,
    }

    impl FrequencyTap for FlatTap {
        fn sample_rate(&self) -> u32 {
            48000
        }

        fn frequency_bin_count(&self) -> usize {
            1024
        }

        fn read_frequency_data(&mut self, out: &mut [f32]) {
            out.fill(self.level_db);
        }
    }

    fn analyser(level_db: f32) -> ActivityAnalyser<FlatTap> {
        ActivityAnalyser::new("alice", 1024, FlatTap { level_db }).unwrap()
    }

    const LOUD: f32 = -30.0; // level 0.8
    const QUIET: f32 = -90.0; // level 0.2

    #[test]
    fn test_zero_buffer_size_is_rejected() {
        let result = ActivityAnalyser::new("alice", 0, FlatTap { level_db: LOUD });
        assert!(matches!(result, Err(VoiceFieldError::Analysis(_))));
    }

    #[test]
    fn test_activates_on_sixth_voiced_tick() {
        let mut analyser = analyser(LOUD);
        let mut events = Vec::new();
        for tick in 1..=6 {
            if let Some(change) = analyser.update() {
                events.push((tick, change));
            }
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, 6);
        assert_eq!(
            events[0].1,
            ActivityChange {
                id: "alice".to_string(),
                is_active: true
            }
        );
        assert!(analyser.is_active());
    }

    #[test]
    fn test_one_event_per_transition() {
        let mut analyser = analyser(LOUD);
        let mut count = 0;
        for _ in 0..100 {
            count += analyser.update().is_some() as usize;
        }
        assert_eq!(count, 1);
        assert_eq!(analyser.counter(), COUNTER_MAX);

        analyser.tap_mut().level_db = QUIET;
        let mut deactivated_after = None;
        for tick in 1..=100 {
            if let Some(change) = analyser.update() {
                assert!(!change.is_active);
                assert!(deactivated_after.is_none());
                deactivated_after = Some(tick);
            }
        }
        // counter falls from 60 to 5 after 55 quiet ticks
        assert_eq!(deactivated_after, Some(55));
        assert_eq!(analyser.counter(), 0);
    }

    #[test]
    fn test_counter_stays_in_range_under_flicker() {
        let mut analyser = analyser(LOUD);
        for tick in 0..500 {
            analyser.tap_mut().level_db = if tick % 3 == 0 { QUIET } else { LOUD };
            analyser.update();
            assert!(analyser.counter() <= COUNTER_MAX);
        }
        analyser.tap_mut().level_db = QUIET;
        for _ in 0..500 {
            analyser.update();
        }
        assert_eq!(analyser.counter(), 0);
    }

    #[test]
    fn test_level_threshold_is_inclusive() {
        // avg -60 dB gives exactly level 0.5
        let mut analyser = analyser(-60.0);
        analyser.update();
        assert_eq!(analyser.counter(), 1);
    }

    #[test]
    fn test_voice_band_indices() {
        let analyser = analyser(LOUD);
        // 85 / 24000 * 1024 = 3.63 -> 4, 255 / 24000 * 1024 = 10.88 -> 11
        assert_eq!(analyser.frequency_index(85.0), 4);
        assert_eq!(analyser.frequency_index(255.0), 11);
        assert_eq!(analyser.frequency_index(1.0e9), 1024);
    }

    #[test]
    fn test_only_voice_band_is_averaged() {
        struct BandTap;
        impl FrequencyTap for BandTap {
            fn sample_rate(&self) -> u32 {
                48000
            }
            fn frequency_bin_count(&self) -> usize {
                1024
            }
            fn read_frequency_data(&mut self, out: &mut [f32]) {
                for (i, v) in out.iter_mut().enumerate() {
                    *v = if (4..=11).contains(&i) { -20.0 } else { -150.0 };
                }
            }
        }

        let mut analyser = ActivityAnalyser::new("bob", 1024, BandTap).unwrap();
        analyser.update();
        assert!((analyser.band_average(85.0, 255.0) + 20.0).abs() < 1e-4);
        assert_eq!(analyser.counter(), 1);
    }
}
