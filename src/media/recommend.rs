use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::SystemTime;

use crate::media::library::MediaEntry;

/// Policy constants of the selection weight
/// `boost * (floor + exp(-age_days / decay_days))`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SelectionWeights {
    pub favorite_boost: f64,
    pub decay_days: f64,
    /// Keeps old items selectable.
    pub floor: f64,
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self {
            favorite_boost: 3.0,
            decay_days: 90.0,
            floor: 0.1,
        }
    }
}

impl SelectionWeights {
    pub fn weight(&self, is_favorite: bool, age_days: f64) -> f64 {
        let boost = if is_favorite { self.favorite_boost } else { 1.0 };
        let decay = if self.decay_days > 0.0 {
            (-age_days.max(0.0) / self.decay_days).exp()
        } else {
            0.0
        };
        (boost * (self.floor + decay)).max(0.0)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WeightedCandidate {
    pub relative_path: String,
    pub weight: f64,
}

/// Recency- and favorite-biased shuffling of a scanned file set.
#[derive(Debug, Clone, Default)]
pub struct RecommendService {
    weights: SelectionWeights,
}

impl RecommendService {
    pub fn new(weights: SelectionWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &SelectionWeights {
        &self.weights
    }

    /// Weigh every entry, ordered by relative path so that the pool does not
    /// depend on directory iteration order.
    pub fn weigh(
        &self,
        entries: &[MediaEntry],
        favorites: &BTreeSet<String>,
        now: SystemTime,
    ) -> Vec<WeightedCandidate> {
        let mut pool: Vec<WeightedCandidate> = entries
            .iter()
            .map(|entry| WeightedCandidate {
                relative_path: entry.relative_path.clone(),
                weight: self
                    .weights
                    .weight(favorites.contains(&entry.relative_path), entry.age_days(now)),
            })
            .collect();
        pool.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        pool
    }

    /// Pick `min(limit, entries.len())` distinct relative paths.
    ///
    /// With a seed the result is reproducible for the same candidate set,
    /// which paginated browsing relies on.
    pub fn select(
        &self,
        entries: &[MediaEntry],
        favorites: &BTreeSet<String>,
        limit: usize,
        seed: Option<u64>,
    ) -> Vec<String> {
        self.select_at(entries, favorites, limit, seed, SystemTime::now())
    }

    pub fn select_at(
        &self,
        entries: &[MediaEntry],
        favorites: &BTreeSet<String>,
        limit: usize,
        seed: Option<u64>,
        now: SystemTime,
    ) -> Vec<String> {
        let pool = self.weigh(entries, favorites, now);
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        sample_without_replacement(pool, limit, &mut rng)
    }
}

/// Weighted sampling without replacement.
pub fn sample_without_replacement<R: Rng + ?Sized>(
    mut pool: Vec<WeightedCandidate>,
    limit: usize,
    rng: &mut R,
) -> Vec<String> {
    // Taking everything: any permutation is reachable, a shuffle is enough
    if limit >= pool.len() {
        let mut all: Vec<String> = pool.into_iter().map(|c| c.relative_path).collect();
        all.shuffle(rng);
        return all;
    }

    let mut result = Vec::with_capacity(limit);
    while result.len() < limit && !pool.is_empty() {
        let total: f64 = pool.iter().map(|c| c.weight).sum();
        if !total.is_finite() || total <= 0.0 {
            pool.shuffle(rng);
            let remaining = limit - result.len();
            result.extend(pool.into_iter().take(remaining).map(|c| c.relative_path));
            break;
        }

        let pick = rng.gen_range(0.0..total);
        let mut running = 0.0;
        // Float rounding can leave `running` a hair below `pick`
        let mut chosen = pool.len() - 1;
        for (index, candidate) in pool.iter().enumerate() {
            running += candidate.weight;
            if running >= pick {
                chosen = index;
                break;
            }
        }
        result.push(pool.remove(chosen).relative_path);
    }

    result
}

/// Map a caller-facing seed string onto the generator's `u64` seed.
pub fn seed_from_str(seed: &str) -> u64 {
    let digest = blake3::hash(seed.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::library::MediaKind;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::time::Duration;

    fn now() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn entry(path: &str, age_days: u64) -> MediaEntry {
        let modified = now() - Duration::from_secs(age_days * 86_400);
        MediaEntry {
            absolute_path: PathBuf::from("/media").join(path),
            relative_path: path.to_string(),
            size_bytes: 1,
            modified_time: modified,
            created_time: modified,
            kind: MediaKind::Video,
        }
    }

    fn library(n: usize) -> Vec<MediaEntry> {
        (0..n)
            .map(|i| entry(&format!("clip_{i:03}.mp4"), i as u64 * 7))
            .collect()
    }

    #[test]
    fn test_weight_formula() {
        let weights = SelectionWeights::default();
        assert!((weights.weight(false, 0.0) - 1.1).abs() < 1e-12);
        assert!((weights.weight(true, 0.0) - 3.3).abs() < 1e-12);
        assert!((weights.weight(false, 90.0) - (0.1 + (-1.0f64).exp())).abs() < 1e-12);
        // Future mtimes count as age zero
        assert_eq!(weights.weight(false, -5.0), weights.weight(false, 0.0));
        // The floor keeps ancient files in play
        assert!(weights.weight(false, 100_000.0) >= 0.1);
    }

    #[test]
    fn test_seeded_selection_is_deterministic() {
        let service = RecommendService::default();
        let entries = library(40);
        let favorites: BTreeSet<String> = ["clip_003.mp4".to_string()].into();

        let first = service.select_at(&entries, &favorites, 10, Some(42), now());
        let second = service.select_at(&entries, &favorites, 10, Some(42), now());
        assert_eq!(first, second);

        let full_first = service.select_at(&entries, &favorites, 100, Some(7), now());
        let full_second = service.select_at(&entries, &favorites, 100, Some(7), now());
        assert_eq!(full_first, full_second);
    }

    #[test]
    fn test_seeded_selection_ignores_scan_order() {
        let service = RecommendService::default();
        let entries = library(25);
        let mut reversed = entries.clone();
        reversed.reverse();
        let favorites = BTreeSet::new();

        assert_eq!(
            service.select_at(&entries, &favorites, 8, Some(9), now()),
            service.select_at(&reversed, &favorites, 8, Some(9), now())
        );
    }

    #[test]
    fn test_selection_respects_limit_and_distinctness() {
        let service = RecommendService::default();
        let entries = library(15);
        let all_paths: HashSet<String> = entries.iter().map(|e| e.relative_path.clone()).collect();
        let favorites = BTreeSet::new();

        for limit in [0, 1, 5, 14, 15, 16, 100] {
            let picked = service.select_at(&entries, &favorites, limit, Some(limit as u64), now());
            assert_eq!(picked.len(), limit.min(entries.len()));

            let unique: HashSet<&String> = picked.iter().collect();
            assert_eq!(unique.len(), picked.len());
            assert!(picked.iter().all(|p| all_paths.contains(p)));
        }
    }

    #[test]
    fn test_empty_candidates() {
        let service = RecommendService::default();
        assert!(
            service
                .select(&[], &BTreeSet::new(), 10, None)
                .is_empty()
        );
    }

    #[test]
    fn test_favorite_bias() {
        let service = RecommendService::default();
        let entries = vec![entry("fav.mp4", 10), entry("plain.mp4", 10), entry("other.mp4", 10)];
        let favorites: BTreeSet<String> = ["fav.mp4".to_string()].into();

        let mut fav_hits = 0;
        let mut plain_hits = 0;
        for seed in 0..2_000u64 {
            let picked = service.select_at(&entries, &favorites, 1, Some(seed), now());
            match picked[0].as_str() {
                "fav.mp4" => fav_hits += 1,
                "plain.mp4" => plain_hits += 1,
                _ => {}
            }
        }
        assert!(
            fav_hits > plain_hits * 2,
            "favorite picked {fav_hits} times vs {plain_hits}"
        );
    }

    #[test]
    fn test_recency_bias() {
        let service = RecommendService::default();
        let entries = vec![entry("new.mp4", 0), entry("old.mp4", 2_000), entry("mid.mp4", 400)];
        let favorites = BTreeSet::new();

        let new_first = (0..1_000u64)
            .filter(|seed| {
                service.select_at(&entries, &favorites, 1, Some(*seed), now())[0] == "new.mp4"
            })
            .count();
        assert!(new_first > 600, "newest file led only {new_first} times");
    }

    #[test]
    fn test_degenerate_weights_still_fill_limit() {
        let pool: Vec<WeightedCandidate> = (0..6)
            .map(|i| WeightedCandidate {
                relative_path: format!("{i}.mp4"),
                weight: 0.0,
            })
            .collect();
        let mut rng = StdRng::seed_from_u64(1);

        let picked = sample_without_replacement(pool, 4, &mut rng);
        assert_eq!(picked.len(), 4);
        let unique: HashSet<&String> = picked.iter().collect();
        assert_eq!(unique.len(), 4);
    }

    #[test]
    fn test_seed_from_str_is_stable() {
        assert_eq!(seed_from_str("123456"), seed_from_str("123456"));
        assert_ne!(seed_from_str("123456"), seed_from_str("123457"));
    }
}
