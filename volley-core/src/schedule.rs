use std::time::Duration;

use crate::config::Stage;

/// Piecewise-linear target over a list of stages, starting from `start`.
#[derive(Debug, Clone)]
pub struct RampingSchedule {
    start: u64,
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
}

impl RampingSchedule {
    pub fn new(start: u64, stages: Vec<Stage>) -> Self {
        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Self {
            start,
            stages,
            cumulative_ends,
        }
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    /// Index of the stage containing `elapsed` (clamped to the last stage).
    fn stage_index(&self, elapsed: Duration) -> usize {
        let idx = match self
            .cumulative_ends
            .binary_search_by(|end| end.cmp(&elapsed))
        {
            Ok(i) | Err(i) => i,
        };
        idx.min(self.stages.len().saturating_sub(1))
    }

    fn stage_bounds(&self, idx: usize) -> (Duration, Duration) {
        let end = self.cumulative_ends[idx];
        let start = if idx == 0 {
            Duration::ZERO
        } else {
            self.cumulative_ends[idx - 1]
        };
        (start, end)
    }

    fn start_target_of(&self, idx: usize) -> u64 {
        if idx == 0 {
            self.start
        } else {
            self.stages[idx - 1].target
        }
    }

    pub fn target_at(&self, elapsed: Duration) -> u64 {
        if self.stages.is_empty() || elapsed == Duration::ZERO {
            return self.start;
        }

        if elapsed >= self.total_duration() {
            return self.stages.last().map_or(self.start, |s| s.target);
        }

        let idx = self.stage_index(elapsed);
        let (stage_start, stage_end) = self.stage_bounds(idx);
        let stage_duration = stage_end.saturating_sub(stage_start);
        let stage_elapsed = elapsed.saturating_sub(stage_start);

        let start_target = self.start_target_of(idx);
        let end_target = self.stages[idx].target;

        if stage_duration.is_zero() {
            return end_target;
        }

        // Linear interpolation across the stage.
        let start_i = i128::from(start_target);
        let delta = i128::from(end_target) - start_i;

        let num = stage_elapsed.as_nanos() as i128;
        let den = stage_duration.as_nanos() as i128;

        let cur = start_i + (delta.saturating_mul(num) / den.max(1));
        cur.clamp(0, i128::from(u64::MAX)) as u64
    }
}

/// Converts a per-`time_unit` rate into whole iterations per tick.
///
/// The fractional remainder is carried in exact integer arithmetic, so a constant rate
/// over `n` units yields exactly `rate * n` iterations regardless of tick jitter.
#[derive(Debug, Clone)]
pub struct RateAccumulator {
    // Twice the time unit: `due_between` sums both endpoint rates (trapezoid rule).
    denominator: u128,
    carry: u128,
}

impl RateAccumulator {
    pub fn new(time_unit: Duration) -> Self {
        Self {
            denominator: time_unit.as_nanos().max(1).saturating_mul(2),
            carry: 0,
        }
    }

    /// Iterations due for `tick` at a constant `rate` iterations per time unit.
    pub fn due(&mut self, rate: u64, tick: Duration) -> u64 {
        self.due_between(rate, rate, tick)
    }

    /// Iterations due for `tick` while the rate moves linearly from `from` to `to`.
    pub fn due_between(&mut self, from: u64, to: u64, tick: Duration) -> u64 {
        let scaled = (u128::from(from) + u128::from(to))
            .saturating_mul(tick.as_nanos())
            .saturating_add(self.carry);
        self.carry = scaled % self.denominator;
        u64::try_from(scaled / self.denominator).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn two_stage() -> RampingSchedule {
        RampingSchedule::new(
            0,
            vec![
                Stage {
                    duration: Duration::from_secs(10),
                    target: 100,
                },
                Stage {
                    duration: Duration::from_secs(10),
                    target: 0,
                },
            ],
        )
    }

    #[test]
    fn interpolates_up_and_down() {
        let s = two_stage();
        assert_eq!(s.target_at(Duration::ZERO), 0);
        assert_eq!(s.target_at(Duration::from_secs(5)), 50);
        assert_eq!(s.target_at(Duration::from_secs(10)), 100);
        assert_eq!(s.target_at(Duration::from_secs(15)), 50);
        assert_eq!(s.target_at(Duration::from_secs(20)), 0);
        assert_eq!(s.target_at(Duration::from_secs(99)), 0);
        assert!(s.is_done(Duration::from_secs(20)));
        assert!(!s.is_done(Duration::from_secs(19)));
    }

    #[test]
    fn next_stage_starts_from_previous_target() {
        let s = two_stage();
        assert_eq!(s.target_at(Duration::from_secs(12)), 80);
        assert_eq!(s.target_at(Duration::from_millis(10_100)), 99);
    }

    #[test]
    fn empty_schedule_holds_start() {
        let s = RampingSchedule::new(7, vec![]);
        assert_eq!(s.target_at(Duration::from_secs(3)), 7);
        assert_eq!(s.total_duration(), Duration::ZERO);
    }

    #[test]
    fn accumulator_carries_fractions() {
        // 50/s at 10ms ticks is half an iteration per tick.
        let mut acc = RateAccumulator::new(Duration::from_secs(1));
        let total: u64 = (0..200).map(|_| acc.due(50, ms(10))).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn accumulator_handles_uneven_ticks() {
        let mut acc = RateAccumulator::new(Duration::from_secs(1));
        let ticks = [ms(7), ms(13), ms(30), ms(450), ms(500)];
        let total: u64 = ticks.iter().map(|t| acc.due(10, *t)).sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn accumulator_integrates_linear_ramp() {
        // 0 -> 100/s over 10s is 500 iterations; integer targets lose a few to truncation.
        let s = RampingSchedule::new(
            0,
            vec![Stage {
                duration: Duration::from_secs(10),
                target: 100,
            }],
        );
        let mut acc = RateAccumulator::new(Duration::from_secs(1));
        let mut total = 0;
        for step in 0..1000u64 {
            let from = s.target_at(ms(step * 10));
            let to = s.target_at(ms((step + 1) * 10));
            total += acc.due_between(from, to, ms(10));
        }
        assert!((490..=500).contains(&total), "total={total}");
    }

    #[test]
    fn accumulator_respects_time_unit() {
        let mut acc = RateAccumulator::new(Duration::from_secs(60));
        let total: u64 = (0..60).map(|_| acc.due(120, Duration::from_secs(1))).sum();
        assert_eq!(total, 120);
    }
}
