use crate::model::{
    constants::{DEFAULT_ELO, GLICKO_SCALE, SIGMA_CEILING},
    structures::ruleset::Ruleset
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

/// Whether a rating row belongs to a player or a map. Kept as a column so
/// percentile standings never mix the two populations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntityKind {
    Player = 0,
    Map = 1
}

impl TryFrom<i32> for EntityKind {
    type Error = ();

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(EntityKind::Player),
            1 => Ok(EntityKind::Map),
            _ => Err(())
        }
    }
}

/// One row per (entity, ruleset) pair. Mutated only by the rating engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Rating {
    pub id: i32,
    pub entity: EntityKind,
    pub ruleset: Ruleset,
    pub base_mu: f64,
    pub base_sigma: f64,
    /// Id of the last score folded into the base rating.
    pub base_cursor: i64,
    pub current_mu: f64,
    pub current_sigma: f64,
    pub evidence_count: i32,
    pub display_rating: f64
}

impl Rating {
    /// A fresh rating seeded at `mu` with maximum uncertainty.
    pub fn seeded(entity: EntityKind, ruleset: Ruleset, mu: f64) -> Rating {
        let mut rating = Rating {
            id: 0,
            entity,
            ruleset,
            base_mu: mu,
            base_sigma: SIGMA_CEILING,
            base_cursor: 0,
            current_mu: mu,
            current_sigma: SIGMA_CEILING,
            evidence_count: 0,
            display_rating: DEFAULT_ELO
        };
        rating.refresh_display();
        rating
    }

    /// Must be called whenever current mu/sigma change.
    pub fn refresh_display(&mut self) {
        self.display_rating =
            self.current_mu * GLICKO_SCALE + DEFAULT_ELO - 3.0 * self.current_sigma * GLICKO_SCALE;
    }
}

#[derive(Debug, Clone)]
pub struct MapRow {
    pub id: i64,
    pub title: String,
    pub ruleset: Ruleset,
    pub stars: f64,
    /// CS for osu!/catch, key count for mania.
    pub circle_size: f64,
    pub set_id: i64,
    pub length_seconds: i32,
    /// Ranked-status enum straight from the osu! API, not a boolean.
    pub ranked_status: i32,
    pub takedown: bool,
    pub rating_id: i32,
    /// Admission timestamp into the active season pool, if pooled.
    pub pool_admitted_at: Option<DateTime<Utc>>
}

#[derive(Debug, Clone)]
pub struct PlayerRow {
    pub id: i64,
    pub username: String,
    pub country: String,
    /// Opaque profile snapshot. Retained so offline recomputation can
    /// re-derive the same seed mu.
    pub profile: serde_json::Value,
    /// One rating row per ruleset, indexed by `Ruleset as usize`.
    pub rating_ids: [i32; 4],
    pub division_labels: [String; 4],
    pub discord_user_id: Option<String>
}

impl PlayerRow {
    pub fn rating_id(&self, ruleset: Ruleset) -> i32 {
        self.rating_ids[ruleset as usize]
    }

    pub fn division(&self, ruleset: Ruleset) -> &str {
        &self.division_labels[ruleset as usize]
    }
}

#[derive(Debug, Clone)]
pub struct MatchRow {
    pub id: i64,
    pub invite_code: Option<i64>,
    pub name: Option<String>,
    /// Free-form session blob, owned by `lobby::state::LobbyData`.
    pub data: serde_json::Value,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>
}

#[derive(Debug, Clone)]
pub struct GameRow {
    /// External game id; the unique constraint makes insertion idempotent.
    pub id: i64,
    pub match_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub map_id: i64,
    pub ruleset: Ruleset,
    pub scoring_type: i32,
    pub team_type: i32,
    pub mods: i64
}

#[derive(Debug, Clone)]
pub struct ScoreRow {
    pub game_id: i64,
    pub player_id: i64,
    pub ruleset: Ruleset,
    pub accuracy: f64,
    pub score: i64,
    pub max_combo: i32,
    pub count_50: i32,
    pub count_100: i32,
    pub count_300: i32,
    pub count_miss: i32,
    pub count_geki: i32,
    pub count_katu: i32,
    pub perfect: bool,
    pub passed: bool,
    pub dodged: bool,
    pub mods: i64,
    pub created_at: DateTime<Utc>,
    pub map_id: i64,
    pub won: bool
}
