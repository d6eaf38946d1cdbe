use std::time::{Duration, Instant};

/// Shared frame clock driving every timed interpolation. Advance it once per rendered
/// frame, either from the wall clock ([`FrameClock::tick`]) or by a fixed step
/// ([`FrameClock::advance`]).
#[derive(Debug, Clone)]
pub struct FrameClock {
    last: Instant,
    elapsed: Duration,
    pub delta: Duration,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameClock {
    pub fn new() -> Self {
        Self { last: Instant::now(), elapsed: Duration::ZERO, delta: Duration::ZERO }
    }

    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let delta = now - self.last;
        self.last = now;
        self.step(delta)
    }

    pub fn advance(&mut self, seconds: f32) -> f32 {
        self.last = Instant::now();
        self.step(Duration::from_secs_f32(seconds.max(0.0)))
    }

    fn step(&mut self, delta: Duration) -> f32 {
        self.delta = delta;
        self.elapsed += delta;
        self.delta_seconds()
    }

    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    pub fn elapsed_seconds(&self) -> f32 {
        self.elapsed.as_secs_f32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_advance_accumulates() {
        let mut clock = FrameClock::new();
        clock.advance(0.25);
        clock.advance(0.5);
        assert!((clock.elapsed_seconds() - 0.75).abs() < 1e-6);
        assert!((clock.delta_seconds() - 0.5).abs() < 1e-6);
        clock.advance(-1.0);
        assert_eq!(clock.delta_seconds(), 0.0);
    }
}
