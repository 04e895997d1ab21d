//! Contention-window policies and the ranked strategy selector.

use rand::Rng;
use serde::Serialize;
use std::fmt;
use tracing::debug;
use wlansim_common::{metric_defs, Identifier, SimError};

// ============================================================================
// Backoff Policies
// ============================================================================

/// Rule recomputing a station's contention window after a collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BackoffPolicy {
    /// Binary exponential backoff: the window doubles up to the maximum.
    StandardDcf,
    /// Uniform over `[1, cw_min / 2]`.
    ReducedRange,
    /// Uniform over `[cw_min / 4, cw_min / 2]`.
    NarrowBand,
    /// Constant window of 8.
    Fixed,
}

impl BackoffPolicy {
    /// Window used by [`BackoffPolicy::Fixed`].
    pub const FIXED_WINDOW: u32 = 8;

    /// Every built-in policy, in id order.
    pub const BUILTIN: [BackoffPolicy; 4] = [
        BackoffPolicy::StandardDcf,
        BackoffPolicy::ReducedRange,
        BackoffPolicy::NarrowBand,
        BackoffPolicy::Fixed,
    ];

    /// Stable candidate id of this policy.
    pub fn id(&self) -> u32 {
        match self {
            BackoffPolicy::StandardDcf => 1,
            BackoffPolicy::ReducedRange => 2,
            BackoffPolicy::NarrowBand => 3,
            BackoffPolicy::Fixed => 4,
        }
    }

    /// Policy for a candidate id, if the id names a built-in policy.
    pub fn from_id(id: u32) -> Option<Self> {
        Self::BUILTIN.into_iter().find(|p| p.id() == id)
    }

    /// Default candidate name.
    pub fn name(&self) -> &'static str {
        match self {
            BackoffPolicy::StandardDcf => "standard-dcf",
            BackoffPolicy::ReducedRange => "reduced-range",
            BackoffPolicy::NarrowBand => "narrow-band",
            BackoffPolicy::Fixed => "fixed",
        }
    }

    /// Next contention window after a collision.
    ///
    /// A window already at or above `cw_max` stays at `cw_max`; every result
    /// is capped at `cw_max` and is at least 1.
    pub fn next_window<R: Rng>(&self, cw: u32, cw_min: u32, cw_max: u32, rng: &mut R) -> u32 {
        let cw_max = cw_max.max(1);
        if cw >= cw_max {
            return cw_max;
        }
        let next = match self {
            BackoffPolicy::StandardDcf => cw.max(1).saturating_mul(2),
            BackoffPolicy::ReducedRange => uniform_window(1, cw_min / 2, rng),
            BackoffPolicy::NarrowBand => uniform_window(cw_min / 4, cw_min / 2, rng),
            BackoffPolicy::Fixed => Self::FIXED_WINDOW,
        };
        next.clamp(1, cw_max)
    }
}

impl fmt::Display for BackoffPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn uniform_window<R: Rng>(low: u32, high: u32, rng: &mut R) -> u32 {
    let low = low.max(1);
    let high = high.max(low);
    rng.gen_range(low..=high)
}

// ============================================================================
// Strategy Selector
// ============================================================================

/// A named policy competing in the [`StrategySelector`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    /// Display name.
    pub name: String,
    /// Stable id; ids 1-4 map to the built-in [`BackoffPolicy`] values.
    pub id: u32,
    /// Cumulative reward minus penalty.
    pub rank: i64,
    /// Times this candidate was selected.
    pub usage: u64,
}

/// Ranked set of contention-window policies.
///
/// Scores are driven from outside (for instance by the adaptive runner after
/// every interval); [`StrategySelector::select_strategy`] picks the best
/// ranked candidate, breaking ties uniformly at random.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StrategySelector {
    candidates: Vec<Candidate>,
    current: Option<u32>,
}

fn unknown_strategy(id: u32) -> SimError {
    SimError::UnknownIdentifier(Identifier::Strategy(id))
}

impl StrategySelector {
    /// Empty selector with no current policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Selector holding the four built-in policies at rank 0, standard DCF current.
    pub fn with_builtin_policies() -> Self {
        let mut selector = Self::new();
        for policy in BackoffPolicy::BUILTIN {
            selector.candidates.push(Candidate {
                name: policy.name().to_string(),
                id: policy.id(),
                rank: 0,
                usage: 0,
            });
        }
        selector.current = Some(BackoffPolicy::StandardDcf.id());
        selector
    }

    /// Register a candidate.
    pub fn add_candidate(&mut self, name: impl Into<String>, id: u32, rank: i64) -> Result<(), SimError> {
        if self.candidates.iter().any(|c| c.id == id) {
            return Err(SimError::DuplicateIdentifier(Identifier::Strategy(id)));
        }
        self.candidates.push(Candidate {
            name: name.into(),
            id,
            rank,
            usage: 0,
        });
        Ok(())
    }

    /// Remove a candidate. Removing the current candidate leaves no policy current.
    pub fn remove_candidate(&mut self, id: u32) -> Result<Candidate, SimError> {
        let index = self
            .candidates
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| unknown_strategy(id))?;
        if self.current == Some(id) {
            self.current = None;
        }
        Ok(self.candidates.remove(index))
    }

    fn candidate_mut(&mut self, id: u32) -> Result<&mut Candidate, SimError> {
        self.candidates
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| unknown_strategy(id))
    }

    /// Raise a candidate's rank.
    pub fn reward(&mut self, id: u32, amount: i64) -> Result<(), SimError> {
        let candidate = self.candidate_mut(id)?;
        candidate.rank = candidate.rank.saturating_add(amount);
        Ok(())
    }

    /// Lower a candidate's rank.
    pub fn penalise(&mut self, id: u32, amount: i64) -> Result<(), SimError> {
        let candidate = self.candidate_mut(id)?;
        candidate.rank = candidate.rank.saturating_sub(amount);
        Ok(())
    }

    /// Pick the highest ranked candidate and make it current.
    pub fn select_strategy<R: Rng>(&mut self, rng: &mut R) -> Option<u32> {
        let best = self.candidates.iter().map(|c| c.rank).max()?;
        let tied: Vec<usize> = self
            .candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.rank == best)
            .map(|(i, _)| i)
            .collect();
        let chosen = &mut self.candidates[tied[rng.gen_range(0..tied.len())]];
        chosen.usage += 1;
        self.current = Some(chosen.id);

        metrics::counter!(metric_defs::STRATEGY_SELECTED.name, "strategy" => chosen.name.clone()).increment(1);
        debug!(
            "Strategy {} ({}) selected with rank {} among {} tied",
            chosen.name,
            chosen.id,
            chosen.rank,
            tied.len()
        );
        self.current
    }

    /// Make a candidate current without counting a selection.
    pub fn set_current(&mut self, id: u32) -> Result<(), SimError> {
        if !self.candidates.iter().any(|c| c.id == id) {
            return Err(unknown_strategy(id));
        }
        self.current = Some(id);
        Ok(())
    }

    /// Id of the current candidate.
    pub fn current(&self) -> Option<u32> {
        self.current
    }

    /// Built-in policy of the current candidate.
    ///
    /// `None` when no candidate is current or its id has no built-in policy;
    /// colliding stations then keep their window.
    pub fn current_policy(&self) -> Option<BackoffPolicy> {
        self.current.and_then(BackoffPolicy::from_id)
    }

    /// All candidates in registration order.
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// One line per candidate: name, id, rank and usage.
    pub fn report(&self) -> String {
        let mut out = String::new();
        for c in &self.candidates {
            let marker = if self.current == Some(c.id) { "*" } else { " " };
            out.push_str(&format!("{}{}\t{}\trank {}\tused {}\n", marker, c.name, c.id, c.rank, c.usage));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_standard_dcf_doubles_up_to_max() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let policy = BackoffPolicy::StandardDcf;
        let mut cw = 31;
        let mut seen = Vec::new();
        for _ in 0..7 {
            cw = policy.next_window(cw, 31, 1023, &mut rng);
            seen.push(cw);
        }
        assert_eq!(seen, vec![62, 124, 248, 496, 992, 1023, 1023]);
    }

    #[test]
    fn test_ranged_policies_stay_in_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        for _ in 0..1_000 {
            let reduced = BackoffPolicy::ReducedRange.next_window(31, 31, 1023, &mut rng);
            assert!((1..=15).contains(&reduced));
            let narrow = BackoffPolicy::NarrowBand.next_window(31, 31, 1023, &mut rng);
            assert!((7..=15).contains(&narrow));
        }
        assert_eq!(BackoffPolicy::Fixed.next_window(15, 15, 1023, &mut rng), 8);
        // Window above max is pinned to max
        assert_eq!(BackoffPolicy::Fixed.next_window(2000, 15, 1023, &mut rng), 1023);
        // Degenerate ranges fall back to the lower bound
        assert_eq!(BackoffPolicy::NarrowBand.next_window(1, 1, 1023, &mut rng), 1);
    }

    #[test]
    fn test_policy_ids_round_trip() {
        for policy in BackoffPolicy::BUILTIN {
            assert_eq!(BackoffPolicy::from_id(policy.id()), Some(policy));
        }
        assert_eq!(BackoffPolicy::from_id(9), None);
    }

    #[test]
    fn test_selector_candidate_management() {
        let mut selector = StrategySelector::with_builtin_policies();
        assert_eq!(selector.current(), Some(1));
        assert_eq!(selector.current_policy(), Some(BackoffPolicy::StandardDcf));
        assert_eq!(selector.candidates().len(), 4);

        assert_eq!(
            selector.add_candidate("dup", 2, 0),
            Err(SimError::DuplicateIdentifier(Identifier::Strategy(2)))
        );
        assert!(selector.add_candidate("custom", 7, 0).is_ok());
        assert_eq!(selector.reward(99, 1), Err(unknown_strategy(99)));

        let removed = selector.remove_candidate(1).expect("candidate exists");
        assert_eq!(removed.name, "standard-dcf");
        assert_eq!(selector.current(), None);
        assert!(selector.remove_candidate(1).is_err());
    }

    #[test]
    fn test_selector_picks_highest_rank() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut selector = StrategySelector::with_builtin_policies();
        selector.reward(3, 5).expect("known");
        selector.penalise(1, 2).expect("known");
        assert_eq!(selector.select_strategy(&mut rng), Some(3));
        assert_eq!(selector.current_policy(), Some(BackoffPolicy::NarrowBand));
        let narrow = &selector.candidates()[2];
        assert_eq!((narrow.rank, narrow.usage), (5, 1));
        assert!(selector.report().contains("*narrow-band"));
    }

    #[test]
    fn test_selector_breaks_ties_uniformly() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let mut selector = StrategySelector::new();
        selector.add_candidate("a", 1, 0).expect("fresh id");
        selector.add_candidate("b", 2, 0).expect("fresh id");

        let trials = 10_000;
        let mut first = 0;
        for _ in 0..trials {
            if selector.select_strategy(&mut rng) == Some(1) {
                first += 1;
            }
        }
        let share = first as f64 / trials as f64;
        assert!((0.45..0.55).contains(&share), "share {}", share);
        let usage: u64 = selector.candidates().iter().map(|c| c.usage).sum();
        assert_eq!(usage, trials);
    }

    #[test]
    fn test_empty_selector_selects_nothing() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut selector = StrategySelector::new();
        assert_eq!(selector.select_strategy(&mut rng), None);
        assert_eq!(selector.current_policy(), None);
    }
}
