// Geometric reconnect delay: floor, multiplier and cap.

use std::time::Duration;

pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 2_000;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 1.5;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 15_000;

#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    multiplier: f64,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// A multiplier below 1 (or non-finite) is treated as 1; a cap below
    /// the floor is raised to the floor.
    pub fn new(initial: Duration, multiplier: f64, max: Duration) -> Self {
        let multiplier = if multiplier.is_finite() && multiplier >= 1.0 { multiplier } else { 1.0 };
        let max = max.max(initial);
        Self { initial, multiplier, max, current: initial }
    }

    /// Delay the next unplanned reconnect will wait.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Grow the delay for the following failure, saturating at the cap.
    pub fn grow(&mut self) {
        let next = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max);
        self.current = next.min(self.max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard() -> Backoff {
        Backoff::new(
            Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            DEFAULT_BACKOFF_MULTIPLIER,
            Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
        )
    }

    fn millis(backoff: &Backoff) -> u128 {
        backoff.current().as_millis()
    }

    #[test]
    fn starts_at_floor() {
        assert_eq!(millis(&standard()), 2_000);
    }

    #[test]
    fn grows_by_half_until_capped() {
        let mut backoff = standard();
        let mut observed = Vec::new();
        for _ in 0..8 {
            observed.push(millis(&backoff));
            backoff.grow();
        }
        assert_eq!(observed, vec![2_000, 3_000, 4_500, 6_750, 10_125, 15_000, 15_000, 15_000]);
    }

    #[test]
    fn reset_returns_to_floor_from_cap() {
        let mut backoff = standard();
        for _ in 0..10 {
            backoff.grow();
        }
        assert_eq!(millis(&backoff), 15_000);
        backoff.reset();
        assert_eq!(millis(&backoff), 2_000);
    }

    #[test]
    fn degenerate_parameters_are_sanitized() {
        let mut backoff = Backoff::new(Duration::from_millis(500), f64::NAN, Duration::from_millis(100));
        backoff.grow();
        assert_eq!(millis(&backoff), 500);
    }
}
