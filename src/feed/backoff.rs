use rand::Rng;
use std::time::Duration;

/// Exponential reconnect backoff with jitter.
///
/// `delay = min(base * 2^(attempt-1), max) * random(0.5, 1.0)` — the
/// jitter spreads a fleet of clients reconnecting to the same PDP so they
/// do not stampede it in lockstep.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Backoff { base, max }
    }

    /// Delay before the given reconnect attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 2u32.saturating_pow(exponent);
        let uncapped = self.base.saturating_mul(factor);
        let capped = uncapped.min(self.max);
        capped.mul_f64(rand::thread_rng().gen_range(0.5..1.0))
    }
}
