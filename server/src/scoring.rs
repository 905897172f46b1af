//! Points awarded for a correct guess and per-player score records

use crate::config::GameConfig;

/// A player's standing in one room. Only the scoring functions below mutate it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreRecord {
    pub total: u64,
    pub streak: u32,
    pub correct_guesses: u32,
    /// Number of the last round this player won
    pub last_won_round: Option<u32>,
}

/// Breakdown of the points for one win.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreDelta {
    pub base: u64,
    pub time_bonus: u64,
    pub streak_bonus: u64,
    pub total: u64,
    /// Streak after this win
    pub streak: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoringPolicy {
    pub base_points: u64,
    pub max_time_bonus: u64,
    pub streak_step_points: u64,
    pub streak_max_steps: u32,
}

impl From<&GameConfig> for ScoringPolicy {
    fn from(config: &GameConfig) -> Self {
        Self {
            base_points: config.base_points,
            max_time_bonus: config.max_time_bonus,
            streak_step_points: config.streak_step_points,
            streak_max_steps: config.streak_max_steps,
        }
    }
}

impl ScoringPolicy {
    /// Scores a correct guess made `elapsed_ms` into a round lasting `duration_ms`.
    ///
    /// The time bonus falls linearly from `max_time_bonus` at the start of the
    /// round to zero at the deadline. The streak bonus grows by
    /// `streak_step_points` for each consecutive win beyond the first, capped
    /// at `streak_max_steps` steps.
    pub fn score(&self, elapsed_ms: u64, duration_ms: u64, current_streak: u32) -> ScoreDelta {
        let remaining = duration_ms.saturating_sub(elapsed_ms);
        let time_bonus = if duration_ms == 0 {
            0
        } else {
            ((self.max_time_bonus as u128 * remaining as u128) / duration_ms as u128) as u64
        };

        let streak = current_streak.saturating_add(1);
        let steps = (streak - 1).min(self.streak_max_steps) as u64;
        let streak_bonus = self.streak_step_points.saturating_mul(steps);

        ScoreDelta {
            base: self.base_points,
            time_bonus,
            streak_bonus,
            total: self
                .base_points
                .saturating_add(time_bonus)
                .saturating_add(streak_bonus),
            streak,
        }
    }
}

impl ScoreRecord {
    /// Applies a win in `round_number`.
    pub fn record_win(&mut self, round_number: u32, delta: &ScoreDelta) {
        self.total = self.total.saturating_add(delta.total);
        self.streak = delta.streak;
        self.correct_guesses += 1;
        self.last_won_round = Some(round_number);
    }

    /// The player did not win a round they were part of.
    pub fn break_streak(&mut self) {
        self.streak = 0;
    }

    pub fn reset(&mut self) {
        *self = ScoreRecord::default();
    }
}
