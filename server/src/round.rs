//! One guessing round and its state machine
//!
//! A room is `Pending` while it has no round. A started round is `Active`
//! until either a correct guess or its deadline moves it to `Resolved`. That
//! transition goes through [`Round::try_resolve`], a compare-and-set keyed on
//! the round number, so a late timer and a winning guess can never both
//! resolve the same round.

use crate::hints::HintCategory;
use crate::room::PlayerId;
use rand::Rng;
use shared::{GameError, GuessHint, RoundInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    Pending,
    Active,
    Resolved,
}

/// Result of a guess accepted by an active round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuessEvaluation {
    Correct,
    Incorrect(GuessHint),
}

#[derive(Debug, Clone)]
pub struct Round {
    pub number: u32,
    target: i64,
    pub low: i64,
    pub high: i64,
    pub started_at: u64,
    pub ends_at: u64,
    guesses: Vec<(PlayerId, i64)>,
    phase: RoundPhase,
    pub hint: Option<String>,
    pub hint_category: Option<HintCategory>,
}

impl Round {
    /// Starts round `number` with a target drawn uniformly from `[low, high]`.
    pub fn start<R: Rng + ?Sized>(
        number: u32,
        (low, high): (i64, i64),
        now: u64,
        duration_ms: u64,
        rng: &mut R,
    ) -> Self {
        let (low, high) = if low <= high { (low, high) } else { (high, low) };
        Self {
            number,
            target: rng.gen_range(low..=high),
            low,
            high,
            started_at: now,
            ends_at: now + duration_ms.max(1),
            guesses: Vec::new(),
            phase: RoundPhase::Active,
            hint: None,
            hint_category: None,
        }
    }

    pub fn target(&self) -> i64 {
        self.target
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == RoundPhase::Active
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.ends_at
    }

    pub fn duration_ms(&self) -> u64 {
        self.ends_at - self.started_at
    }

    pub fn contains(&self, value: i64) -> bool {
        (self.low..=self.high).contains(&value)
    }

    pub fn total_guesses(&self) -> u32 {
        self.guesses.len() as u32
    }

    pub fn guesses_by(&self, player: PlayerId) -> u32 {
        self.guesses.iter().filter(|(p, _)| *p == player).count() as u32
    }

    /// Players who guessed at least once this round.
    pub fn participants(&self) -> Vec<PlayerId> {
        let mut players: Vec<PlayerId> = self.guesses.iter().map(|(p, _)| *p).collect();
        players.sort_unstable();
        players.dedup();
        players
    }

    /// Records a guess and evaluates it. A correct guess resolves the round.
    ///
    /// Rejected guesses leave the round untouched.
    pub fn submit(&mut self, player: PlayerId, value: i64) -> Result<GuessEvaluation, GameError> {
        if !self.is_active() {
            return Err(GameError::RoundNotActive);
        }
        if !self.contains(value) {
            return Err(GameError::OutOfRange);
        }

        self.guesses.push((player, value));

        if value == self.target {
            self.try_resolve(self.number);
            Ok(GuessEvaluation::Correct)
        } else if value < self.target {
            Ok(GuessEvaluation::Incorrect(GuessHint::Higher))
        } else {
            Ok(GuessEvaluation::Incorrect(GuessHint::Lower))
        }
    }

    /// Moves `Active -> Resolved` if this is still round `expected_number`.
    ///
    /// Returns false when the round was already resolved or is a different round.
    pub fn try_resolve(&mut self, expected_number: u32) -> bool {
        if self.number != expected_number || self.phase != RoundPhase::Active {
            return false;
        }
        self.phase = RoundPhase::Resolved;
        true
    }

    pub fn info(&self) -> RoundInfo {
        RoundInfo {
            round_number: self.number,
            range: [self.low, self.high],
            end_time: self.ends_at,
            total_guesses: self.total_guesses(),
            hint: self.hint.clone(),
        }
    }
}
