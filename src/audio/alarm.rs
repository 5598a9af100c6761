use rodio::Source;
use std::f32::consts::PI;
use std::time::Duration;

const SAMPLE_RATE: u32 = 44100;
const BEEP_SECS: f32 = 0.25;
const GAP_SECS: f32 = 0.15;

/// Phase-complete alarm: alternating high/low beeps, each decaying
/// quickly. Infinite; wrap it in [`super::fade::FadeOut`] to bound it.
pub struct AlarmTone {
    high_freq: f32,
    low_freq: f32,
    sample_rate: u32,
    num_sample: usize,
}

impl AlarmTone {
    pub fn new() -> Self {
        Self {
            high_freq: 880.0,
            low_freq: 660.0,
            sample_rate: SAMPLE_RATE,
            num_sample: 0,
        }
    }
}

impl Default for AlarmTone {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for AlarmTone {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        let t = self.num_sample as f32 / self.sample_rate as f32;
        self.num_sample = self.num_sample.wrapping_add(1);

        let period = BEEP_SECS + GAP_SECS;
        let beep_index = (t / period) as usize;
        let within = t - beep_index as f32 * period;
        if within >= BEEP_SECS {
            return Some(0.0);
        }

        let freq = if beep_index % 2 == 0 {
            self.high_freq
        } else {
            self.low_freq
        };
        let envelope = (-within * 8.0).exp();
        Some((2.0 * PI * freq * t).sin() * envelope * 0.4)
    }
}

impl Source for AlarmTone {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gaps_are_silent() {
        let gap_start = (BEEP_SECS * SAMPLE_RATE as f32) as usize + 10;
        let sample = AlarmTone::new().nth(gap_start).unwrap();
        assert_eq!(sample, 0.0);
    }

    #[test]
    fn amplitude_stays_bounded() {
        assert!(AlarmTone::new()
            .take(SAMPLE_RATE as usize)
            .all(|s| s.abs() <= 0.4));
    }
}
