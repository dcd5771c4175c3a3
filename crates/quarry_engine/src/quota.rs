//! Per-source extraction quotas with spill.
//!
//! A job's `max_questions_per_source` is split evenly across that
//! source's targets unless a target declares a hard cap. Unused quota
//! from exhausted targets spills to the source's remaining targets when
//! the spill policy is on.

use quarry_protocol::types::{Target, TargetId};
use std::collections::HashMap;

#[derive(Debug)]
struct TargetQuota {
    budget: u64,
    used: u64,
    /// Declared hard cap, never exceeded by spill.
    hard_cap: Option<u64>,
    exhausted: bool,
}

/// Quota bookkeeping for one (job, source) pair. Single writer: the
/// source's worker.
#[derive(Debug)]
pub struct QuotaTracker {
    targets: HashMap<TargetId, TargetQuota>,
    spill_enabled: bool,
}

impl QuotaTracker {
    pub fn new(max_per_source: u64, targets: &[&Target], spill_enabled: bool) -> Self {
        let n = targets.len().max(1) as u64;
        let even = max_per_source / n;
        let mut remainder = max_per_source % n;

        let mut map = HashMap::new();
        for target in targets {
            let mut budget = even;
            if remainder > 0 {
                budget += 1;
                remainder -= 1;
            }
            if let Some(cap) = target.max_questions {
                budget = budget.min(cap);
            }
            map.insert(
                target.target_id.clone(),
                TargetQuota {
                    budget,
                    used: 0,
                    hard_cap: target.max_questions,
                    exhausted: false,
                },
            );
        }
        Self {
            targets: map,
            spill_enabled,
        }
    }

    /// Seed prior consumption (resume path) so a re-run of the plan never
    /// exceeds the original allocation.
    pub fn preload(&mut self, target: &str, used: u64) {
        if let Some(quota) = self.targets.get_mut(target) {
            quota.used = used.min(quota.budget);
        }
    }

    /// Consume one unit for `target`. False means the target's budget is
    /// spent and nothing could spill in.
    pub fn try_consume(&mut self, target: &str) -> bool {
        let Some(quota) = self.targets.get_mut(target) else {
            return false;
        };
        if quota.used < quota.budget {
            quota.used += 1;
            return true;
        }
        if !self.spill_enabled {
            return false;
        }
        // Try to pull one unit from an exhausted target's leftover.
        if self.reclaim_spill(target) {
            let quota = self.targets.get_mut(target).expect("target present");
            quota.used += 1;
            return true;
        }
        false
    }

    fn reclaim_spill(&mut self, beneficiary: &str) -> bool {
        // The beneficiary's own hard cap is never exceeded by spill.
        let at_cap = self
            .targets
            .get(beneficiary)
            .and_then(|q| q.hard_cap.map(|cap| q.budget >= cap))
            .unwrap_or(false);
        if at_cap {
            return false;
        }

        let donor_id: Option<TargetId> = self
            .targets
            .iter()
            .find(|(id, q)| id.as_str() != beneficiary && q.exhausted && q.used < q.budget)
            .map(|(id, _)| id.clone());
        let Some(donor_id) = donor_id else {
            return false;
        };

        self.targets.get_mut(&donor_id).expect("donor present").budget -= 1;
        self.targets
            .get_mut(beneficiary)
            .expect("target present")
            .budget += 1;
        true
    }

    /// Mark a target as done producing (page plan exhausted or failed);
    /// its remaining budget becomes spillable.
    pub fn mark_exhausted(&mut self, target: &str) {
        if let Some(quota) = self.targets.get_mut(target) {
            quota.exhausted = true;
        }
    }

    pub fn remaining(&self, target: &str) -> u64 {
        self.targets
            .get(target)
            .map_or(0, |q| q.budget.saturating_sub(q.used))
    }

    pub fn used_total(&self) -> u64 {
        self.targets.values().map(|q| q.used).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_protocol::types::{Pagination, SelectorSet};

    fn target(id: &str, cap: Option<u64>) -> Target {
        Target {
            target_id: id.to_string(),
            category: "logical".to_string(),
            difficulty: None,
            entry_url: format!("https://site.example/{id}"),
            pagination: Pagination::None,
            selectors: SelectorSet {
                question: "div.q".to_string(),
                text: "p".to_string(),
                options: "li".to_string(),
                correct_answer: "span".to_string(),
                explanation: None,
                metadata: Default::default(),
            },
            min_expected: 0,
            max_questions: cap,
        }
    }

    #[test]
    fn splits_evenly_with_remainder() {
        let t1 = target("a", None);
        let t2 = target("b", None);
        let t3 = target("c", None);
        let tracker = QuotaTracker::new(10, &[&t1, &t2, &t3], true);
        let budgets: u64 = ["a", "b", "c"].iter().map(|t| tracker.remaining(t)).sum();
        assert_eq!(budgets, 10);
        assert!(tracker.remaining("a") >= 3);
    }

    #[test]
    fn hard_cap_limits_allocation() {
        let t1 = target("a", Some(2));
        let t2 = target("b", None);
        let tracker = QuotaTracker::new(10, &[&t1, &t2], true);
        assert_eq!(tracker.remaining("a"), 2);
        assert_eq!(tracker.remaining("b"), 5);
    }

    #[test]
    fn consumption_stops_at_budget_without_spill() {
        let t1 = target("a", None);
        let t2 = target("b", None);
        let mut tracker = QuotaTracker::new(4, &[&t1, &t2], false);
        assert!(tracker.try_consume("a"));
        assert!(tracker.try_consume("a"));
        assert!(!tracker.try_consume("a"));
    }

    #[test]
    fn unused_quota_spills_from_exhausted_targets() {
        let t1 = target("a", None);
        let t2 = target("b", None);
        let mut tracker = QuotaTracker::new(6, &[&t1, &t2], true);

        // Target a produces only one question, then its plan runs out.
        assert!(tracker.try_consume("a"));
        tracker.mark_exhausted("a");

        // Target b can now run past its own half.
        for _ in 0..3 {
            assert!(tracker.try_consume("b"));
        }
        assert!(tracker.try_consume("b"), "spilled unit from target a");
        assert!(tracker.try_consume("b"), "second spilled unit");
        assert!(!tracker.try_consume("b"), "total still capped at 6");
        assert_eq!(tracker.used_total(), 6);
    }

    #[test]
    fn preload_counts_prior_consumption() {
        let t1 = target("a", None);
        let t2 = target("b", None);
        let mut tracker = QuotaTracker::new(4, &[&t1, &t2], false);
        tracker.preload("a", 2);
        assert!(!tracker.try_consume("a"), "budget already spent pre-pause");
        assert!(tracker.try_consume("b"));
    }

    #[test]
    fn spill_never_exceeds_beneficiary_hard_cap() {
        let t1 = target("a", None);
        let t2 = target("b", Some(2));
        let mut tracker = QuotaTracker::new(8, &[&t1, &t2], true);
        tracker.mark_exhausted("a");
        assert!(tracker.try_consume("b"));
        assert!(tracker.try_consume("b"));
        assert!(!tracker.try_consume("b"), "hard cap holds against spill");
    }
}
