//! Victim selection for work stealing
//!
//! A worker going idle asks its [`VictimSelector`] which peer to rob.
//! `Adaptive` remembers which victims paid off; `NumaAware` biases
//! toward topologically close workers using the SLIT distance over 10
//! as a cost multiplier.

use std::sync::Arc;

use rand::Rng;

use crate::numa::NumaTopology;

/// How a worker picks steal victims
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StealPolicy {
    /// Uniform random victim
    Random,

    /// Cycle through victims in order
    RoundRobin,

    /// Prefer victims whose steals succeeded recently
    Adaptive,

    /// Prefer victims on the same NUMA node
    NumaAware,
}

/// Work-stealing knobs carried by the pool config/builder
#[derive(Debug, Clone)]
pub struct WorkStealingConfig {
    /// Steal attempts per idle pass
    pub max_steal_attempts: usize,

    /// Victim selection policy
    pub policy: StealPolicy,

    /// Jobs pulled from the global queue into the local deque per refill
    pub local_batch: usize,
}

impl Default for WorkStealingConfig {
    fn default() -> Self {
        Self {
            max_steal_attempts: 4,
            policy: StealPolicy::Random,
            local_batch: 16,
        }
    }
}

impl WorkStealingConfig {
    pub fn new(policy: StealPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    pub fn max_steal_attempts(mut self, attempts: usize) -> Self {
        self.max_steal_attempts = attempts;
        self
    }

    pub fn local_batch(mut self, batch: usize) -> Self {
        self.local_batch = batch;
        self
    }
}

/// Per-worker victim picker; not shared between workers
pub struct VictimSelector {
    policy: StealPolicy,
    me: usize,
    rr_cursor: usize,
    /// Exponentially decayed success score per victim slot (Adaptive)
    scores: Vec<f64>,
    topology: Option<Arc<NumaTopology>>,
    /// My NUMA node index, when known
    my_node: Option<usize>,
}

impl VictimSelector {
    pub fn new(
        policy: StealPolicy,
        me: usize,
        topology: Option<Arc<NumaTopology>>,
        my_node: Option<usize>,
    ) -> Self {
        Self {
            policy,
            me,
            rr_cursor: me,
            scores: Vec::new(),
            topology,
            my_node,
        }
    }

    /// Pick a victim among `victims` (worker id, node idx) pairs.
    /// Returns an index into `victims`, never one referring to `me`.
    pub fn pick(&mut self, victims: &[(usize, Option<usize>)]) -> Option<usize> {
        let candidates: Vec<usize> = victims
            .iter()
            .enumerate()
            .filter(|(_, (id, _))| *id != self.me)
            .map(|(i, _)| i)
            .collect();
        if candidates.is_empty() {
            return None;
        }

        match self.policy {
            StealPolicy::Random => {
                let pick = rand::thread_rng().gen_range(0..candidates.len());
                Some(candidates[pick])
            }
            StealPolicy::RoundRobin => {
                self.rr_cursor = self.rr_cursor.wrapping_add(1);
                Some(candidates[self.rr_cursor % candidates.len()])
            }
            StealPolicy::Adaptive => {
                self.scores.resize(victims.len().max(self.scores.len()), 0.0);
                // Mostly exploit the best-scoring victim, sometimes explore.
                let mut rng = rand::thread_rng();
                if rng.gen_bool(0.2) {
                    let pick = rng.gen_range(0..candidates.len());
                    return Some(candidates[pick]);
                }
                candidates
                    .into_iter()
                    .max_by(|&a, &b| {
                        self.scores[a]
                            .partial_cmp(&self.scores[b])
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
            }
            StealPolicy::NumaAware => {
                // Weight victims by 1 / cost, cost = distance / 10.
                let mut rng = rand::thread_rng();
                let weights: Vec<f64> = candidates
                    .iter()
                    .map(|&i| {
                        let cost = self.steal_cost(victims[i].1);
                        1.0 / cost.max(1.0)
                    })
                    .collect();
                let total: f64 = weights.iter().sum();
                if total <= 0.0 {
                    let pick = rng.gen_range(0..candidates.len());
                    return Some(candidates[pick]);
                }
                let mut roll = rng.gen_range(0.0..total);
                for (idx, weight) in candidates.iter().zip(&weights) {
                    if roll < *weight {
                        return Some(*idx);
                    }
                    roll -= weight;
                }
                Some(*candidates.last().unwrap())
            }
        }
    }

    /// Cost multiplier for stealing from a worker on `victim_node`
    fn steal_cost(&self, victim_node: Option<usize>) -> f64 {
        let (Some(topology), Some(mine), Some(theirs)) =
            (self.topology.as_deref(), self.my_node, victim_node)
        else {
            return 1.0;
        };
        match topology.distance(mine, theirs) {
            Some(d) => f64::from(d) / 10.0,
            None => 1.0,
        }
    }

    /// Feed back a steal outcome (Adaptive learns from this)
    pub fn record(&mut self, victim_idx: usize, success: bool) {
        if self.policy != StealPolicy::Adaptive {
            return;
        }
        self.scores.resize(self.scores.len().max(victim_idx + 1), 0.0);
        let score = &mut self.scores[victim_idx];
        *score = 0.8 * *score + if success { 0.2 } else { 0.0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn victims(n: usize) -> Vec<(usize, Option<usize>)> {
        (0..n).map(|i| (i, Some(0))).collect()
    }

    #[test]
    fn test_never_picks_self() {
        let mut selector = VictimSelector::new(StealPolicy::Random, 2, None, None);
        let v = victims(4);
        for _ in 0..100 {
            let pick = selector.pick(&v).unwrap();
            assert_ne!(v[pick].0, 2);
        }
    }

    #[test]
    fn test_no_victims_means_none() {
        let mut selector = VictimSelector::new(StealPolicy::Random, 0, None, None);
        assert_eq!(selector.pick(&victims(1)), None);
        assert_eq!(selector.pick(&[]), None);
    }

    #[test]
    fn test_round_robin_cycles() {
        let mut selector = VictimSelector::new(StealPolicy::RoundRobin, 0, None, None);
        let v = victims(4);
        let picks: Vec<usize> = (0..6).map(|_| selector.pick(&v).unwrap()).collect();
        // Cycles over the three non-self victims.
        assert_eq!(picks[0..3], picks[3..6]);
        let mut unique = picks[0..3].to_vec();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_adaptive_prefers_successful_victim() {
        let mut selector = VictimSelector::new(StealPolicy::Adaptive, 0, None, None);
        let v = victims(4);
        for _ in 0..20 {
            selector.record(2, true);
            selector.record(1, false);
            selector.record(3, false);
        }
        let hits = (0..200)
            .filter(|_| selector.pick(&v) == Some(2))
            .count();
        // 80% exploit share goes to the winner; allow slack for the
        // 20% exploration.
        assert!(hits > 100, "victim 2 picked only {} times", hits);
    }

    #[test]
    fn test_numa_aware_prefers_local_node() {
        let topology = Arc::new(NumaTopology::fallback());
        let mut selector =
            VictimSelector::new(StealPolicy::NumaAware, 0, Some(topology), Some(0));
        // Victim 1 on my node, victim 2 on a (synthetic) remote node
        // that the fallback topology cannot resolve; both remain pickable.
        let v = vec![(0, Some(0)), (1, Some(0)), (2, None)];
        let mut local = 0;
        for _ in 0..100 {
            match selector.pick(&v) {
                Some(1) => local += 1,
                Some(2) => {}
                other => panic!("unexpected pick {:?}", other),
            }
        }
        assert!(local > 20);
    }
}
