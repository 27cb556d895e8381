use std::time::Instant;

/// Sine wave between `min` and `max` with a 10 s period, rounded to 2 decimals.
#[derive(Debug, Clone)]
pub(crate) struct Waveform {
    start: Instant,
    min: f64,
    max: f64,
}

impl Waveform {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            start: Instant::now(),
            min,
            max,
        }
    }

    pub fn sample(&self, phase: f64) -> f64 {
        let elapsed = self.start.elapsed().as_secs_f64();
        let range = self.max - self.min;
        let midpoint = self.min + range / 2.0;
        let amplitude = range / 2.0;

        let frequency = 0.1;
        let raw = midpoint
            + amplitude * ((elapsed * frequency + phase) * 2.0 * std::f64::consts::PI).sin();
        (raw * 100.0).round() / 100.0
    }
}
