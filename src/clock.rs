/// Shared audio clock.
///
/// Time advances with every rendered frame. A tick that arrives ahead of the
/// renderer pulls the clock forward so pose transitions never start in the
/// past.
#[derive(Debug, Clone)]
pub struct AudioClock {
    sample_rate: u32,
    frames: u64,
    floor: f64,
}

impl AudioClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames: 0,
            floor: 0.0,
        }
    }

    pub fn advance(&mut self, frames: usize) {
        self.frames += frames as u64;
    }

    pub fn sync_to(&mut self, t: f64) {
        if t > self.floor {
            self.floor = t;
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Seconds since the clock started.
    pub fn current_time(&self) -> f64 {
        let rendered = self.frames as f64 / self.sample_rate as f64;
        rendered.max(self.floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_follows_rendered_frames() {
        let mut clock = AudioClock::new(48000);
        clock.advance(24000);
        assert_eq!(clock.current_time(), 0.5);
        clock.sync_to(0.25);
        assert_eq!(clock.current_time(), 0.5);
        clock.sync_to(2.0);
        assert_eq!(clock.current_time(), 2.0);
    }
}
