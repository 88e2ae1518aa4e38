//! # Stability Evaluator
//!
//! Decides, once per simulated year, whether an equilibrium-type stage has
//! reached a steady state before its maximum duration.
//!
//! Tracked aggregates: vegetation C, soil organic C, total N. The change of
//! each one between consecutive years is measured relative to the newer
//! value. The stage has converged when at least `min_years` have elapsed and
//! every change over the trailing `window` years is below `tolerance`.
//!
//! The evaluator only observes; it never touches model state.

use crate::primitives::{
    DEFAULT_CONVERGENCE_MIN_YEARS, DEFAULT_CONVERGENCE_TOLERANCE, DEFAULT_CONVERGENCE_WINDOW,
    RELATIVE_CHANGE_FLOOR,
};
use crate::state::Aggregates;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Early termination criteria of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceCriteria {
    /// Trailing window of yearly changes, in years.
    pub window: u32,
    /// Maximum relative inter-annual change.
    pub tolerance: f64,
    /// Years that must elapse before convergence may be declared.
    pub min_years: u32,
}

impl Default for ConvergenceCriteria {
    fn default() -> Self {
        Self {
            window: DEFAULT_CONVERGENCE_WINDOW,
            tolerance: DEFAULT_CONVERGENCE_TOLERANCE,
            min_years: DEFAULT_CONVERGENCE_MIN_YEARS,
        }
    }
}

/// Outcome of one yearly check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Decision {
    Continue,
    StopConverged,
    StopAtMax,
}

impl Decision {
    #[must_use]
    pub fn is_stop(&self) -> bool {
        !matches!(self, Decision::Continue)
    }
}

const TRACKED: usize = 3;

fn tracked(agg: &Aggregates) -> [f64; TRACKED] {
    [agg.veg_c, agg.soil_c, agg.total_n()]
}

fn relative_change(previous: f64, current: f64) -> f64 {
    (current - previous).abs() / current.abs().max(RELATIVE_CHANGE_FLOOR)
}

/// Per-stage evaluator. Create one per (cohort, stage) run.
#[derive(Debug, Clone)]
pub struct StabilityEvaluator {
    criteria: Option<ConvergenceCriteria>,
    max_years: u32,
    years_elapsed: u32,
    last: Option<[f64; TRACKED]>,
    /// Largest relative change of each completed year, newest last.
    changes: VecDeque<f64>,
}

impl StabilityEvaluator {
    /// `criteria = None` gives a fixed-duration stage.
    #[must_use]
    pub fn new(criteria: Option<ConvergenceCriteria>, max_years: u32) -> Self {
        let capacity = criteria.map(|c| c.window as usize).unwrap_or(0);
        Self {
            criteria,
            max_years,
            years_elapsed: 0,
            last: None,
            changes: VecDeque::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn years_elapsed(&self) -> u32 {
        self.years_elapsed
    }

    /// Largest relative change over the current window, if it is full.
    #[must_use]
    pub fn window_max_change(&self) -> Option<f64> {
        let window = self.criteria?.window as usize;
        (self.changes.len() >= window).then(|| self.changes.iter().copied().fold(0.0, f64::max))
    }

    /// Record the aggregates at the end of a year and decide.
    pub fn observe(&mut self, year_end: &Aggregates) -> Decision {
        self.years_elapsed = self.years_elapsed.saturating_add(1);

        if let Some(criteria) = self.criteria {
            let current = tracked(year_end);
            if let Some(previous) = self.last {
                let change = previous
                    .iter()
                    .zip(current.iter())
                    .map(|(p, c)| {
                        let r = relative_change(*p, *c);
                        if r.is_nan() { f64::INFINITY } else { r }
                    })
                    .fold(0.0, f64::max);
                if self.changes.len() == criteria.window as usize {
                    self.changes.pop_front();
                }
                self.changes.push_back(change);
            }
            self.last = Some(current);

            if self.years_elapsed >= criteria.min_years
                && self
                    .window_max_change()
                    .is_some_and(|max| max < criteria.tolerance)
            {
                return Decision::StopConverged;
            }
        }

        if self.years_elapsed >= self.max_years {
            Decision::StopAtMax
        } else {
            Decision::Continue
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn agg(v: f64) -> Aggregates {
        Aggregates {
            veg_c: v,
            soil_c: 2.0 * v,
            veg_n: 0.1 * v,
            ..Aggregates::default()
        }
    }

    #[test]
    fn fixed_duration_stops_at_max() {
        let mut e = StabilityEvaluator::new(None, 3);
        assert_eq!(e.observe(&agg(1.0)), Decision::Continue);
        assert_eq!(e.observe(&agg(1.0)), Decision::Continue);
        assert_eq!(e.observe(&agg(1.0)), Decision::StopAtMax);
    }

    #[test]
    fn not_before_min_years() {
        let criteria = ConvergenceCriteria {
            window: 3,
            tolerance: 1e-3,
            min_years: 10,
        };
        let mut e = StabilityEvaluator::new(Some(criteria), 100);
        for year in 1..10 {
            assert_eq!(e.observe(&agg(5.0)), Decision::Continue, "year {}", year);
        }
        assert_eq!(e.observe(&agg(5.0)), Decision::StopConverged);
        assert_eq!(e.years_elapsed(), 10);
    }

    #[test]
    fn window_must_be_full_and_quiet() {
        let criteria = ConvergenceCriteria {
            window: 4,
            tolerance: 1e-3,
            min_years: 1,
        };
        let mut e = StabilityEvaluator::new(Some(criteria), 1000);
        // growing 10% per year never converges
        let mut v = 1.0;
        for _ in 0..20 {
            v *= 1.1;
            assert_eq!(e.observe(&agg(v)), Decision::Continue);
        }
        // constant: needs 4 quiet changes after the last jump
        for _ in 0..3 {
            assert_eq!(e.observe(&agg(v)), Decision::Continue);
        }
        assert_eq!(e.observe(&agg(v)), Decision::StopConverged);
    }

    #[test]
    fn never_converging_runs_to_max() {
        let criteria = ConvergenceCriteria {
            window: 2,
            tolerance: 1e-6,
            min_years: 1,
        };
        let mut e = StabilityEvaluator::new(Some(criteria), 5);
        let decisions: Vec<_> = (1..=5).map(|y| e.observe(&agg(f64::from(y)))).collect();
        assert_eq!(decisions.last(), Some(&Decision::StopAtMax));
        assert!(decisions[..4].iter().all(|d| *d == Decision::Continue));
    }

    #[test]
    fn convergence_wins_on_final_year() {
        let criteria = ConvergenceCriteria {
            window: 1,
            tolerance: 1e-3,
            min_years: 2,
        };
        let mut e = StabilityEvaluator::new(Some(criteria), 2);
        assert_eq!(e.observe(&agg(1.0)), Decision::Continue);
        assert_eq!(e.observe(&agg(1.0)), Decision::StopConverged);
    }

    #[test]
    fn non_finite_aggregates_never_converge() {
        let criteria = ConvergenceCriteria {
            window: 1,
            tolerance: 1.0,
            min_years: 1,
        };
        let mut e = StabilityEvaluator::new(Some(criteria), 10);
        e.observe(&agg(f64::NAN));
        assert_eq!(e.observe(&agg(f64::NAN)), Decision::Continue);
    }
}
