//! Batch progress metering for long loops over addresses.

use std::time::Instant;

/// Logs `done/total` with rate, ETA and error count every `tick` steps and
/// on the final step.
pub struct Meter {
    label: &'static str,
    total: usize,
    tick: usize,
    start: Instant,
    done: usize,
    errors: usize,
}

impl Meter {
    pub fn new(label: &'static str, total: usize, tick: usize) -> Self {
        Self {
            label,
            total,
            tick: tick.max(1),
            start: Instant::now(),
            done: 0,
            errors: 0,
        }
    }

    pub fn step(&mut self, ok: bool) {
        self.done += 1;
        if !ok {
            self.errors += 1;
        }
        if self.done % self.tick == 0 || self.done == self.total {
            let elapsed = self.start.elapsed().as_secs_f64().max(1e-6);
            let rate = self.done as f64 / elapsed;
            let eta_secs = if rate > 0.0 {
                (self.total - self.done) as f64 / rate
            } else {
                0.0
            };
            tracing::info!(
                label = self.label,
                done = self.done,
                total = self.total,
                rate = format!("{rate:.2}"),
                eta_min = format!("{:.1}", eta_secs / 60.0),
                errors = self.errors,
                "progress"
            );
        }
    }

    pub fn errors(&self) -> usize {
        self.errors
    }
}
