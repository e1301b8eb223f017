//! Pareto-frontier search.

use std::cmp::Ordering;

use super::types::{Criterion, DecisionPath, Direction};

/// Finds non-dominated decision paths.
#[derive(Debug, Clone)]
pub struct MultiObjectiveOptimizer {
    directions: Vec<Direction>,
}

impl MultiObjectiveOptimizer {
    /// Optimizer over `criteria`, in the order paths carry their scores.
    pub fn new(criteria: &[Criterion]) -> Self {
        Self {
            directions: criteria.iter().map(|c| c.direction).collect(),
        }
    }

    /// Whether `a` is at least as good as `b` on every criterion and
    /// strictly better on at least one.
    pub fn dominates(&self, a: &DecisionPath, b: &DecisionPath) -> bool {
        let mut strictly_better = false;
        for ((dir, sa), sb) in self.directions.iter().zip(&a.scores).zip(&b.scores) {
            let (oa, ob) = (dir.orient(*sa), dir.orient(*sb));
            if oa < ob {
                return false;
            }
            if oa > ob {
                strictly_better = true;
            }
        }
        strictly_better
    }

    /// Paths not dominated by any other path in `paths`.
    ///
    /// Ordered by the first criterion, best first; equal values keep input
    /// order.
    pub fn pareto_frontier(&self, paths: &[DecisionPath]) -> Vec<DecisionPath> {
        let mut frontier: Vec<DecisionPath> = paths
            .iter()
            .filter(|candidate| !paths.iter().any(|other| self.dominates(other, candidate)))
            .cloned()
            .collect();

        if let Some(first) = self.directions.first() {
            frontier.sort_by(|a, b| {
                let oa = a.scores.first().map(|s| first.orient(*s)).unwrap_or_default();
                let ob = b.scores.first().map(|s| first.orient(*s)).unwrap_or_default();
                ob.partial_cmp(&oa).unwrap_or(Ordering::Equal)
            });
        }
        frontier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::types::weighted_total;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn path(id: &str, scores: &[f64]) -> DecisionPath {
        DecisionPath {
            id: id.to_string(),
            choices: vec![id.to_string()],
            scores: scores.to_vec(),
            weighted_score: 0.0,
        }
    }

    #[test]
    fn test_frontier_excludes_dominated() {
        let criteria = vec![Criterion::new("quality", 0.5), Criterion::new("speed", 0.5)];
        let optimizer = MultiObjectiveOptimizer::new(&criteria);
        let paths = vec![
            path("a", &[0.9, 0.2]),
            path("b", &[0.5, 0.5]),
            path("c", &[0.4, 0.4]),
            path("d", &[0.2, 0.9]),
        ];
        let ids: Vec<_> = optimizer
            .pareto_frontier(&paths)
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "d"]);
    }

    #[test]
    fn test_minimize_direction() {
        let criteria = vec![Criterion::new("cost", 0.5).minimize(), Criterion::new("value", 0.5)];
        let optimizer = MultiObjectiveOptimizer::new(&criteria);
        let cheap = path("cheap", &[1.0, 0.5]);
        let pricey = path("pricey", &[2.0, 0.5]);
        assert!(optimizer.dominates(&cheap, &pricey));
        assert!(!optimizer.dominates(&pricey, &cheap));
        let frontier = optimizer.pareto_frontier(&[pricey, cheap]);
        assert_eq!(frontier.len(), 1);
        assert_eq!(frontier[0].id, "cheap");
    }

    #[test]
    fn test_equal_paths_are_both_kept_in_input_order() {
        let criteria = vec![Criterion::new("x", 1.0)];
        let optimizer = MultiObjectiveOptimizer::new(&criteria);
        let frontier = optimizer.pareto_frontier(&[path("first", &[0.5]), path("second", &[0.5])]);
        let ids: Vec<_> = frontier.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[test]
    fn test_frontier_never_contains_dominated_path_for_random_sets() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let dims = rng.gen_range(1..=4);
            let criteria: Vec<_> = (0..dims)
                .map(|i| {
                    let c = Criterion::new(format!("c{}", i), 1.0 / dims as f64);
                    if rng.gen_bool(0.3) {
                        c.minimize()
                    } else {
                        c
                    }
                })
                .collect();
            let optimizer = MultiObjectiveOptimizer::new(&criteria);
            let paths: Vec<_> = (0..rng.gen_range(1..30))
                .map(|i| {
                    let scores: Vec<f64> = (0..dims).map(|_| (rng.gen_range(0..5) as f64) / 4.0).collect();
                    let mut p = path(&format!("p{}", i), &scores);
                    p.weighted_score = weighted_total(&criteria, &scores);
                    p
                })
                .collect();

            let frontier = optimizer.pareto_frontier(&paths);
            assert!(!frontier.is_empty());
            for member in &frontier {
                assert!(paths.iter().all(|other| !optimizer.dominates(other, member)));
            }
            // Every excluded path is dominated by something.
            for p in paths.iter().filter(|p| !frontier.iter().any(|f| f.id == p.id)) {
                assert!(paths.iter().any(|other| optimizer.dominates(other, p)));
            }
        }
    }
}
