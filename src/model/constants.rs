// Glicko-2 internal scale. display = mu * SCALE + 1500 - 3 * sigma * SCALE
pub const GLICKO_SCALE: f64 = 173.7178;
pub const DEFAULT_ELO: f64 = 1500.0;

/// Evidence items folded into the base rating per rating period.
pub const BATCH_SIZE: usize = 15;

pub const SIGMA_FLOOR: f64 = 30.0 / GLICKO_SCALE;
pub const SIGMA_CEILING: f64 = 350.0 / GLICKO_SCALE;

/// Entities with fewer evidence items than this stay Unranked and are
/// excluded from percentile standings.
pub const MIN_RANKED_EVIDENCE: i32 = 5;

/// Initial mu approximation from profile pp: elo = clamp(pp * 0.15, 500, 2500)
pub const SEED_PP_FACTOR: f64 = 0.15;
pub const SEED_ELO_FLOOR: f64 = 500.0;
pub const SEED_ELO_CEILING: f64 = 2500.0;

pub const WIN_ACCURACY_THRESHOLD: f64 = 0.95;

/// Division changes announced per chat line before Bancho truncates.
pub const RANK_UPDATES_PER_MESSAGE: usize = 6;
