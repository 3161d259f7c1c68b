use crate::{
    database::{db::DbClient, db_structs::MapRow},
    error::Result,
    model::{constants::DEFAULT_ELO, structures::ruleset::Ruleset}
};
use rand::{seq::IndexedRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;
use tracing::{info, warn};

/// Maps remembered per lobby before they may repeat.
pub const RECENT_HISTORY: usize = 25;

/// Candidates considered around the roster median per pick.
pub const BUCKET_SIZE: usize = 25;

/// Median of roster display ratings; empty rosters fall back to the
/// neutral default.
pub fn median(ratings: &[f64]) -> f64 {
    if ratings.is_empty() {
        return DEFAULT_ELO;
    }

    let mut sorted = ratings.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Drops recently played maps from a nearest-first candidate list and
/// truncates to the bucket size. Candidates are fetched with enough
/// headroom that the exclusion alone can never empty a non-empty pool.
pub fn shortlist(candidates: Vec<MapRow>, recent: &RecentMaps, size: usize) -> Vec<MapRow> {
    candidates
        .into_iter()
        .filter(|map| !recent.contains(map.id))
        .take(size)
        .collect()
}

/// Ring buffer of recently played map ids.
#[derive(Debug, Default)]
pub struct RecentMaps {
    ring: VecDeque<i64>
}

impl RecentMaps {
    pub fn remember(&mut self, map_id: i64) {
        if self.ring.len() == RECENT_HISTORY {
            self.ring.pop_front();
        }
        self.ring.push_back(map_id);
    }

    pub fn contains(&self, map_id: i64) -> bool {
        self.ring.contains(&map_id)
    }

    pub fn ids(&self) -> Vec<i64> {
        self.ring.iter().copied().collect()
    }
}

/// Outcome flags for the caller's announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickKind {
    Pooled,
    /// The active pool ran dry and an extra map was admitted.
    Promoted,
    /// Unrestricted random fallback; the pool is exhausted.
    Exhausted
}

/// Picks the next map for a lobby: pooled maps nearest the roster median,
/// uniform within the bucket, never repeating recent history unless
/// nothing else is left.
pub struct MapSelector {
    db: DbClient,
    rng: ChaCha8Rng,
    recent: RecentMaps
}

impl MapSelector {
    pub fn new(db: DbClient) -> MapSelector {
        MapSelector {
            db,
            rng: ChaCha8Rng::from_os_rng(),
            recent: RecentMaps::default()
        }
    }

    pub fn remember(&mut self, map_id: i64) {
        self.recent.remember(map_id);
    }

    pub async fn pick(&mut self, ruleset: Ruleset, target: f64) -> Result<Option<(MapRow, PickKind)>> {
        // Headroom so that excluding the recent history cannot drain a
        // bucket the pool could still fill.
        let fetch = (BUCKET_SIZE + RECENT_HISTORY) as i64;

        let candidates = self.db.pooled_maps_near(ruleset, target, fetch).await?;
        let bucket = shortlist(candidates, &self.recent, BUCKET_SIZE);
        if let Some(map) = bucket.choose(&mut self.rng) {
            let map = map.clone();
            self.remember(map.id);
            return Ok(Some((map, PickKind::Pooled)));
        }

        // Pool has nothing new near this rating; admit the closest
        // unpooled map and try once more.
        if let Some(promoted) = self.db.promote_nearest_unpooled(ruleset, target).await? {
            info!(map_id = promoted.id, target, "admitted map into pool");
            let candidates = self.db.pooled_maps_near(ruleset, target, fetch).await?;
            let bucket = shortlist(candidates, &self.recent, BUCKET_SIZE);
            if let Some(map) = bucket.choose(&mut self.rng) {
                let map = map.clone();
                self.recent.remember(map.id);
                return Ok(Some((map, PickKind::Promoted)));
            }
        }

        warn!(?ruleset, target, "map pool exhausted, falling back to random");
        let fallback = self.db.random_pooled_map(ruleset).await?;
        Ok(fallback.map(|map| {
            self.remember(map.id);
            (map, PickKind::Exhausted)
        }))
    }

    /// Collection lobbies ignore ratings and draw uniformly from the
    /// linked maps, still avoiding recent repeats while possible.
    pub async fn pick_from_collection(&mut self, collection_id: i64) -> Result<Option<MapRow>> {
        let exclude = self.recent.ids();
        let picked = match self.db.random_collection_map(collection_id, &exclude).await? {
            Some(map) => Some(map),
            // Everything has been played recently; allow repeats.
            None => self.db.random_collection_map(collection_id, &[]).await?
        };

        if let Some(map) = &picked {
            self.recent.remember(map.id);
        }
        Ok(picked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{database::db_structs::MapRow, model::structures::ruleset::Ruleset};

    fn map(id: i64) -> MapRow {
        MapRow {
            id,
            title: format!("map {id}"),
            ruleset: Ruleset::Osu,
            stars: 5.0,
            circle_size: 4.0,
            set_id: id,
            length_seconds: 120,
            ranked_status: 1,
            takedown: false,
            rating_id: id as i32,
            pool_admitted_at: None
        }
    }

    #[test]
    fn test_median_odd_even_empty() {
        assert_eq!(median(&[1400.0, 1500.0, 1700.0]), 1500.0);
        assert_eq!(median(&[1400.0, 1600.0]), 1500.0);
        assert_eq!(median(&[]), 1500.0);
        assert_eq!(median(&[1700.0, 1400.0, 1600.0, 1500.0]), 1550.0);
    }

    #[test]
    fn test_shortlist_never_repeats_recent_history() {
        let mut recent = RecentMaps::default();
        recent.remember(1);
        recent.remember(3);

        // Candidates arrive nearest-first; the shortlist keeps that order
        let picked = shortlist(vec![map(1), map(2), map(3), map(4), map(5)], &recent, 2);
        let ids: Vec<i64> = picked.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![2, 4]);
    }

    #[test]
    fn test_shortlist_empty_when_pool_is_all_recent() {
        // Forces the caller down to promotion, then the unrestricted
        // random fallback; only that last stage may repeat a map.
        let mut recent = RecentMaps::default();
        for id in 1..=3 {
            recent.remember(id);
        }
        assert!(shortlist(vec![map(1), map(2), map(3)], &recent, BUCKET_SIZE).is_empty());
    }

    #[test]
    fn test_recent_ring_caps_at_history_size() {
        let mut recent = RecentMaps::default();
        for id in 0..40 {
            recent.remember(id);
        }
        let ids = recent.ids();
        assert_eq!(ids.len(), RECENT_HISTORY);
        // Oldest entries fell off the front
        assert!(!recent.contains(14));
        assert!(recent.contains(15));
        assert!(recent.contains(39));
    }
}
