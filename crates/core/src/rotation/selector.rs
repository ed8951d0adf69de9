//! Pure selection over already-filtered candidates.
//!
//! The selector never inspects availability; callers pass only the providers
//! (or pool members) that may be used right now, in their preferred order.

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use super::strategy::RotationStrategy;

/// What a strategy needs to know about a candidate.
pub trait Candidate {
    fn priority(&self) -> i32;

    fn weight(&self) -> i32;

    /// Global request count for providers, per-pool use count for members.
    fn usage(&self) -> u64;

    /// Average response time in milliseconds, `None` if never measured.
    fn avg_response_time(&self) -> Option<f64>;
}

/// Outcome of a selection: index into the candidate slice and the cursor to
/// use for the next call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub index: usize,
    pub cursor: u64,
}

/// Picks one candidate according to `strategy`.
///
/// Returns `None` for an empty slice. Ties in priority, usage and response
/// time go to the earliest candidate.
pub fn select<C: Candidate, R: Rng + ?Sized>(
    strategy: RotationStrategy,
    candidates: &[C],
    cursor: u64,
    rng: &mut R,
) -> Option<Selection> {
    if candidates.is_empty() {
        return None;
    }

    let index = match strategy {
        RotationStrategy::RoundRobin => {
            let index = (cursor % candidates.len() as u64) as usize;
            return Some(Selection {
                index,
                cursor: cursor.wrapping_add(1),
            });
        }
        RotationStrategy::Priority => first_best(candidates, |a, b| a.priority() > b.priority()),
        RotationStrategy::Weighted => weighted_index(candidates, rng),
        RotationStrategy::LeastUsed => first_best(candidates, |a, b| a.usage() < b.usage()),
        RotationStrategy::FastestResponse => first_best(candidates, |a, b| {
            response_key(a.avg_response_time()) < response_key(b.avg_response_time())
        }),
    };

    Some(Selection { index, cursor })
}

/// Index of the first candidate no later candidate strictly beats.
fn first_best<C: Candidate>(candidates: &[C], beats: impl Fn(&C, &C) -> bool) -> usize {
    let mut best = 0;
    for (index, candidate) in candidates.iter().enumerate().skip(1) {
        if beats(candidate, &candidates[best]) {
            best = index;
        }
    }
    best
}

/// Unmeasured providers sort after every measured one.
fn response_key(avg: Option<f64>) -> f64 {
    match avg {
        Some(ms) if ms > 0.0 && ms.is_finite() => ms,
        _ => f64::INFINITY,
    }
}

fn weighted_index<C: Candidate, R: Rng + ?Sized>(candidates: &[C], rng: &mut R) -> usize {
    let weights = candidates.iter().map(|c| c.weight().max(0) as u64);
    match WeightedIndex::new(weights) {
        Ok(dist) => dist.sample(rng),
        // Every weight is zero.
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[derive(Default, Clone)]
    struct Fake {
        priority: i32,
        weight: i32,
        usage: u64,
        avg: Option<f64>,
    }

    impl Candidate for Fake {
        fn priority(&self) -> i32 {
            self.priority
        }
        fn weight(&self) -> i32 {
            self.weight
        }
        fn usage(&self) -> u64 {
            self.usage
        }
        fn avg_response_time(&self) -> Option<f64> {
            self.avg
        }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn test_empty_returns_none() {
        let empty: Vec<Fake> = Vec::new();
        for strategy in RotationStrategy::ALL {
            assert_eq!(select(strategy, &empty, 3, &mut rng()), None);
        }
    }

    #[test]
    fn test_round_robin_visits_each_once() {
        let candidates = vec![Fake::default(); 4];
        let mut cursor = 0;
        let mut seen = Vec::new();
        for _ in 0..8 {
            let selection =
                select(RotationStrategy::RoundRobin, &candidates, cursor, &mut rng()).unwrap();
            seen.push(selection.index);
            cursor = selection.cursor;
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 0, 1, 2, 3]);
    }

    #[test]
    fn test_priority_highest_first_seen_on_tie() {
        let candidates: Vec<Fake> = [1, 5, 3, 5]
            .into_iter()
            .map(|priority| Fake {
                priority,
                ..Default::default()
            })
            .collect();
        let selection = select(RotationStrategy::Priority, &candidates, 0, &mut rng()).unwrap();
        assert_eq!(selection.index, 1);
        assert_eq!(selection.cursor, 0);
    }

    #[test]
    fn test_least_used() {
        let candidates: Vec<Fake> = [7, 2, 2, 9]
            .into_iter()
            .map(|usage| Fake {
                usage,
                ..Default::default()
            })
            .collect();
        let selection = select(RotationStrategy::LeastUsed, &candidates, 0, &mut rng()).unwrap();
        assert_eq!(selection.index, 1);
    }

    #[test]
    fn test_fastest_response_deprioritizes_unmeasured() {
        let candidates = vec![
            Fake {
                avg: None,
                ..Default::default()
            },
            Fake {
                avg: Some(0.0),
                ..Default::default()
            },
            Fake {
                avg: Some(450.0),
                ..Default::default()
            },
            Fake {
                avg: Some(120.0),
                ..Default::default()
            },
        ];
        let selection =
            select(RotationStrategy::FastestResponse, &candidates, 0, &mut rng()).unwrap();
        assert_eq!(selection.index, 3);

        let unmeasured = vec![Fake::default(), Fake::default()];
        let selection =
            select(RotationStrategy::FastestResponse, &unmeasured, 0, &mut rng()).unwrap();
        assert_eq!(selection.index, 0);
    }

    #[test]
    fn test_weighted_distribution() {
        let candidates = vec![
            Fake {
                weight: 10,
                ..Default::default()
            },
            Fake {
                weight: 90,
                ..Default::default()
            },
        ];
        let mut rng = rng();
        let second = (0..1000)
            .filter(|_| {
                select(RotationStrategy::Weighted, &candidates, 0, &mut rng)
                    .unwrap()
                    .index
                    == 1
            })
            .count();
        assert!((855..=945).contains(&second), "second chosen {} times", second);
    }

    #[test]
    fn test_weighted_all_zero_falls_back_to_first() {
        let candidates = vec![Fake::default(), Fake::default()];
        let selection = select(RotationStrategy::Weighted, &candidates, 0, &mut rng()).unwrap();
        assert_eq!(selection.index, 0);
    }
}
