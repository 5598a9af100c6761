use rodio::Source;
use std::time::Duration;

/// Passes `inner` through unchanged until `fade_start`, ramps linearly to
/// silence over `fade_len`, then ends. The source never outlives
/// `fade_start + fade_len` even if the ramp is cut short upstream.
pub struct FadeOut<S> {
    inner: S,
    fade_start: usize,
    fade_len: usize,
    position: usize,
    hard_stop: Duration,
}

impl<S> FadeOut<S>
where
    S: Source<Item = f32>,
{
    pub fn new(inner: S, fade_start: Duration, fade_len: Duration) -> Self {
        let per_sec = inner.sample_rate() as f64 * inner.channels() as f64;
        let to_samples = |d: Duration| (d.as_secs_f64() * per_sec).round() as usize;
        Self {
            fade_start: to_samples(fade_start),
            fade_len: to_samples(fade_len).max(1),
            position: 0,
            hard_stop: fade_start + fade_len,
            inner,
        }
    }

    fn gain(&self) -> f32 {
        if self.position < self.fade_start {
            return 1.0;
        }
        let into_fade = (self.position - self.fade_start) as f32;
        (1.0 - into_fade / self.fade_len as f32).max(0.0)
    }
}

impl<S> Iterator for FadeOut<S>
where
    S: Source<Item = f32>,
{
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.fade_start + self.fade_len {
            return None;
        }
        let gain = self.gain();
        self.position += 1;
        self.inner.next().map(|sample| sample * gain)
    }
}

impl<S> Source for FadeOut<S>
where
    S: Source<Item = f32>,
{
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        self.inner.channels()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn total_duration(&self) -> Option<Duration> {
        Some(self.hard_stop)
    }
}
