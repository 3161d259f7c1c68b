use super::db_structs::{EntityKind, GameRow, MapRow, MatchRow, PlayerRow, Rating, ScoreRow};
use crate::{
    error::{BotError, Result},
    model::{
        constants::MIN_RANKED_EVIDENCE,
        engine::{seed_mu_from_pp, Evidence},
        structures::{mods::Mods, ruleset::Ruleset}
    },
    utils::progress_utils::progress_bar
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use strum::IntoEnumIterator;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{error, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ratings (
    id SERIAL PRIMARY KEY,
    entity INTEGER NOT NULL,
    ruleset INTEGER NOT NULL,
    base_mu DOUBLE PRECISION NOT NULL,
    base_sigma DOUBLE PRECISION NOT NULL,
    base_cursor BIGINT NOT NULL DEFAULT 0,
    current_mu DOUBLE PRECISION NOT NULL,
    current_sigma DOUBLE PRECISION NOT NULL,
    evidence_count INTEGER NOT NULL DEFAULT 0,
    display_rating DOUBLE PRECISION NOT NULL
);
CREATE TABLE IF NOT EXISTS players (
    id BIGINT PRIMARY KEY,
    username TEXT NOT NULL,
    country TEXT NOT NULL DEFAULT '',
    profile JSONB NOT NULL DEFAULT '{}',
    osu_rating_id INTEGER NOT NULL REFERENCES ratings(id),
    taiko_rating_id INTEGER NOT NULL REFERENCES ratings(id),
    catch_rating_id INTEGER NOT NULL REFERENCES ratings(id),
    mania_rating_id INTEGER NOT NULL REFERENCES ratings(id),
    osu_division TEXT NOT NULL DEFAULT 'Unranked',
    taiko_division TEXT NOT NULL DEFAULT 'Unranked',
    catch_division TEXT NOT NULL DEFAULT 'Unranked',
    mania_division TEXT NOT NULL DEFAULT 'Unranked',
    discord_user_id TEXT
);
CREATE TABLE IF NOT EXISTS maps (
    id BIGINT PRIMARY KEY,
    title TEXT NOT NULL,
    ruleset INTEGER NOT NULL,
    stars DOUBLE PRECISION NOT NULL,
    circle_size DOUBLE PRECISION NOT NULL DEFAULT 0,
    set_id BIGINT NOT NULL,
    length_seconds INTEGER NOT NULL,
    ranked_status INTEGER NOT NULL,
    takedown BOOLEAN NOT NULL DEFAULT FALSE,
    rating_id INTEGER NOT NULL REFERENCES ratings(id),
    pool_admitted_at TIMESTAMPTZ
);
CREATE TABLE IF NOT EXISTS matches (
    id BIGINT PRIMARY KEY,
    invite_code BIGINT,
    name TEXT,
    data JSONB NOT NULL DEFAULT '{}',
    start_time TIMESTAMPTZ NOT NULL,
    end_time TIMESTAMPTZ
);
CREATE TABLE IF NOT EXISTS games (
    id BIGINT PRIMARY KEY,
    match_id BIGINT NOT NULL REFERENCES matches(id),
    start_time TIMESTAMPTZ NOT NULL,
    end_time TIMESTAMPTZ NOT NULL,
    map_id BIGINT NOT NULL REFERENCES maps(id),
    ruleset INTEGER NOT NULL,
    scoring_type INTEGER NOT NULL,
    team_type INTEGER NOT NULL,
    mods BIGINT NOT NULL
);
CREATE TABLE IF NOT EXISTS scores (
    id BIGSERIAL UNIQUE,
    game_id BIGINT NOT NULL REFERENCES games(id),
    player_id BIGINT NOT NULL REFERENCES players(id),
    ruleset INTEGER NOT NULL,
    accuracy DOUBLE PRECISION NOT NULL,
    score BIGINT NOT NULL,
    max_combo INTEGER NOT NULL,
    count_50 INTEGER NOT NULL,
    count_100 INTEGER NOT NULL,
    count_300 INTEGER NOT NULL,
    count_miss INTEGER NOT NULL,
    count_geki INTEGER NOT NULL,
    count_katu INTEGER NOT NULL,
    perfect BOOLEAN NOT NULL,
    passed BOOLEAN NOT NULL,
    dodged BOOLEAN NOT NULL,
    mods BIGINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    map_id BIGINT NOT NULL REFERENCES maps(id),
    won BOOLEAN NOT NULL,
    PRIMARY KEY (game_id, player_id)
);
CREATE TABLE IF NOT EXISTS collection_maps (
    collection_id BIGINT NOT NULL,
    map_id BIGINT NOT NULL REFERENCES maps(id),
    PRIMARY KEY (collection_id, map_id)
);
CREATE INDEX IF NOT EXISTS idx_scores_player ON scores (player_id, ruleset, id);
CREATE INDEX IF NOT EXISTS idx_scores_map ON scores (map_id, ruleset, id);
CREATE INDEX IF NOT EXISTS idx_ratings_standings ON ratings (entity, ruleset, display_rating);
CREATE INDEX IF NOT EXISTS idx_maps_pool ON maps (ruleset) WHERE pool_admitted_at IS NOT NULL AND NOT takedown;
";

#[derive(Clone)]
pub struct DbClient {
    client: Arc<Client>
}

impl DbClient {
    // Connect to the database and return a DbClient instance
    pub async fn connect(connection_str: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(connection_str, NoTls).await?;

        // Spawn the connection object to run in the background
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("connection error: {}", e);
            }
        });

        Ok(DbClient {
            client: Arc::new(client)
        })
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        self.client.batch_execute(SCHEMA).await?;
        Ok(())
    }

    // --- Ratings ---

    pub async fn get_rating(&self, id: i32) -> Result<Rating> {
        let row = self.client.query_one("SELECT * FROM ratings WHERE id = $1", &[&id]).await?;
        Self::rating_from_row(&row)
    }

    pub async fn insert_rating(&self, rating: &Rating) -> Result<i32> {
        let row = self
            .client
            .query_one(
                "INSERT INTO ratings (entity, ruleset, base_mu, base_sigma, base_cursor, current_mu, \
                 current_sigma, evidence_count, display_rating) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 RETURNING id",
                &[
                    &(rating.entity as i32),
                    &(rating.ruleset as i32),
                    &rating.base_mu,
                    &rating.base_sigma,
                    &rating.base_cursor,
                    &rating.current_mu,
                    &rating.current_sigma,
                    &rating.evidence_count,
                    &rating.display_rating
                ]
            )
            .await?;
        Ok(row.get::<_, i32>("id"))
    }

    pub async fn update_rating(&self, rating: &Rating) -> Result<()> {
        self.client
            .execute(
                "UPDATE ratings SET base_mu = $1, base_sigma = $2, base_cursor = $3, current_mu = $4, \
                 current_sigma = $5, evidence_count = $6, display_rating = $7 WHERE id = $8",
                &[
                    &rating.base_mu,
                    &rating.base_sigma,
                    &rating.base_cursor,
                    &rating.current_mu,
                    &rating.current_sigma,
                    &rating.evidence_count,
                    &rating.display_rating,
                    &rating.id
                ]
            )
            .await?;
        Ok(())
    }

    pub async fn count_ranked_players(&self, ruleset: Ruleset) -> Result<i64> {
        let row = self
            .client
            .query_one(
                "SELECT COUNT(*) AS n FROM ratings WHERE entity = 0 AND ruleset = $1 AND evidence_count >= $2",
                &[&(ruleset as i32), &MIN_RANKED_EVIDENCE]
            )
            .await?;
        Ok(row.get::<_, i64>("n"))
    }

    pub async fn count_better_players(&self, ruleset: Ruleset, display_rating: f64) -> Result<i64> {
        let row = self
            .client
            .query_one(
                "SELECT COUNT(*) AS n FROM ratings WHERE entity = 0 AND ruleset = $1 AND evidence_count >= $2 \
                 AND display_rating > $3",
                &[&(ruleset as i32), &MIN_RANKED_EVIDENCE, &display_rating]
            )
            .await?;
        Ok(row.get::<_, i64>("n"))
    }

    // --- Evidence ---

    /// Unbatched evidence for a player, opponents being the maps they
    /// played, in ascending score id order.
    pub async fn player_evidence(&self, player_id: i64, ruleset: Ruleset, cursor: i64) -> Result<Vec<Evidence>> {
        let rows = self
            .client
            .query(
                "SELECT s.id AS score_id, s.won, s.mods, r.current_mu, r.current_sigma \
                 FROM scores s \
                 JOIN maps m ON m.id = s.map_id \
                 JOIN ratings r ON r.id = m.rating_id \
                 WHERE s.player_id = $1 AND s.ruleset = $2 AND s.id > $3 \
                 ORDER BY s.id",
                &[&player_id, &(ruleset as i32), &cursor]
            )
            .await?;
        Ok(rows.iter().map(Self::evidence_from_row).collect())
    }

    /// Unbatched evidence for a map, opponents being the players who
    /// scored on it.
    pub async fn map_evidence(&self, map_id: i64, ruleset: Ruleset, cursor: i64) -> Result<Vec<Evidence>> {
        let query = format!(
            "SELECT s.id AS score_id, s.won, s.mods, r.current_mu, r.current_sigma \
             FROM scores s \
             JOIN players p ON p.id = s.player_id \
             JOIN ratings r ON r.id = p.{} \
             WHERE s.map_id = $1 AND s.ruleset = $2 AND s.id > $3 \
             ORDER BY s.id",
            ruleset.rating_column()
        );
        let rows = self.client.query(&query, &[&map_id, &(ruleset as i32), &cursor]).await?;
        Ok(rows.iter().map(Self::evidence_from_row).collect())
    }

    pub async fn map_rating(&self, map_id: i64) -> Result<Rating> {
        let row = self
            .client
            .query_one(
                "SELECT r.* FROM ratings r JOIN maps m ON m.rating_id = r.id WHERE m.id = $1",
                &[&map_id]
            )
            .await?;
        Self::rating_from_row(&row)
    }

    // --- Players ---

    pub async fn get_player(&self, id: i64) -> Result<Option<PlayerRow>> {
        let row = self.client.query_opt("SELECT * FROM players WHERE id = $1", &[&id]).await?;
        row.map(|r| Self::player_from_row(&r)).transpose()
    }

    pub async fn get_player_by_username(&self, username: &str) -> Result<Option<PlayerRow>> {
        let row = self
            .client
            .query_opt("SELECT * FROM players WHERE lower(username) = lower($1)", &[&username])
            .await?;
        row.map(|r| Self::player_from_row(&r)).transpose()
    }

    /// Creates the player with one seeded rating per ruleset, or refreshes
    /// username/country/profile if they already exist.
    pub async fn upsert_player(
        &self,
        id: i64,
        username: &str,
        country: &str,
        profile: &serde_json::Value
    ) -> Result<PlayerRow> {
        if let Some(mut existing) = self.get_player(id).await? {
            self.client
                .execute(
                    "UPDATE players SET username = $1, country = $2, profile = $3 WHERE id = $4",
                    &[&username, &country, profile, &id]
                )
                .await?;
            existing.username = username.to_string();
            existing.country = country.to_string();
            existing.profile = profile.clone();
            return Ok(existing);
        }

        let mu = seed_mu_from_pp(profile.get("pp_raw").and_then(|v| v.as_str()).and_then(|v| v.parse().ok()));
        let mut rating_ids = [0i32; 4];
        for ruleset in Ruleset::iter() {
            let rating = Rating::seeded(EntityKind::Player, ruleset, mu);
            rating_ids[ruleset as usize] = self.insert_rating(&rating).await?;
        }

        self.client
            .execute(
                "INSERT INTO players (id, username, country, profile, osu_rating_id, taiko_rating_id, \
                 catch_rating_id, mania_rating_id) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &id,
                    &username,
                    &country,
                    profile,
                    &rating_ids[0],
                    &rating_ids[1],
                    &rating_ids[2],
                    &rating_ids[3]
                ]
            )
            .await?;
        info!(player_id = id, username, "registered new player");

        self.get_player(id).await?.ok_or(BotError::UnknownUser)
    }

    pub async fn update_player_division(&self, player_id: i64, ruleset: Ruleset, label: &str) -> Result<()> {
        let query = format!("UPDATE players SET {} = $1 WHERE id = $2", ruleset.division_column());
        self.client.execute(&query, &[&label, &player_id]).await?;
        Ok(())
    }

    // --- Maps ---

    pub async fn get_map(&self, id: i64) -> Result<Option<MapRow>> {
        let row = self.client.query_opt("SELECT * FROM maps WHERE id = $1", &[&id]).await?;
        row.map(|r| Self::map_from_row(&r)).transpose()
    }

    /// Registers a map (and its rating row) if it is not yet known.
    pub async fn insert_map_if_missing(&self, map: &MapRow) -> Result<MapRow> {
        if let Some(existing) = self.get_map(map.id).await? {
            return Ok(existing);
        }

        let rating = Rating::seeded(EntityKind::Map, map.ruleset, 0.0);
        let rating_id = self.insert_rating(&rating).await?;
        self.client
            .execute(
                "INSERT INTO maps (id, title, ruleset, stars, circle_size, set_id, length_seconds, \
                 ranked_status, takedown, rating_id, pool_admitted_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
                 ON CONFLICT (id) DO NOTHING",
                &[
                    &map.id,
                    &map.title,
                    &(map.ruleset as i32),
                    &map.stars,
                    &map.circle_size,
                    &map.set_id,
                    &map.length_seconds,
                    &map.ranked_status,
                    &map.takedown,
                    &rating_id,
                    &map.pool_admitted_at
                ]
            )
            .await?;

        self.get_map(map.id).await?.ok_or(BotError::MalformedPayload)
    }

    pub async fn set_map_takedown(&self, map_id: i64, takedown: bool) -> Result<()> {
        self.client
            .execute("UPDATE maps SET takedown = $1 WHERE id = $2", &[&takedown, &map_id])
            .await?;
        Ok(())
    }

    /// The pooled maps closest to `target` by display rating, excluding
    /// the given ids. Mania pools are pinned to 4K.
    /// Pooled maps ordered by distance from `target`. Recent-history
    /// filtering happens in the selector, over these rows.
    pub async fn pooled_maps_near(&self, ruleset: Ruleset, target: f64, limit: i64) -> Result<Vec<MapRow>> {
        let mut query = String::from(
            "SELECT m.* FROM maps m JOIN ratings r ON r.id = m.rating_id \
             WHERE m.ruleset = $1 AND m.pool_admitted_at IS NOT NULL AND NOT m.takedown"
        );
        if ruleset == Ruleset::Mania {
            // Only 4K pools; CS doubles as the key count in mania.
            query.push_str(" AND m.circle_size = 4");
        }
        query.push_str(" ORDER BY ABS(r.display_rating - $2) LIMIT $3");

        let rows = self
            .client
            .query(&query, &[&(ruleset as i32), &target, &limit])
            .await?;
        rows.iter().map(Self::map_from_row).collect()
    }

    /// Admits the unpooled map whose display rating is closest to `target`
    /// into the pool and returns it.
    pub async fn promote_nearest_unpooled(&self, ruleset: Ruleset, target: f64) -> Result<Option<MapRow>> {
        let row = self
            .client
            .query_opt(
                "UPDATE maps SET pool_admitted_at = NOW() WHERE id = ( \
                     SELECT m.id FROM maps m JOIN ratings r ON r.id = m.rating_id \
                     WHERE m.ruleset = $1 AND m.pool_admitted_at IS NULL AND NOT m.takedown \
                     ORDER BY ABS(r.display_rating - $2) LIMIT 1 \
                 ) RETURNING *",
                &[&(ruleset as i32), &target]
            )
            .await?;
        row.map(|r| Self::map_from_row(&r)).transpose()
    }

    pub async fn random_pooled_map(&self, ruleset: Ruleset) -> Result<Option<MapRow>> {
        let row = self
            .client
            .query_opt(
                "SELECT m.* FROM maps m WHERE m.ruleset = $1 AND m.pool_admitted_at IS NOT NULL \
                 AND NOT m.takedown ORDER BY RANDOM() LIMIT 1",
                &[&(ruleset as i32)]
            )
            .await?;
        row.map(|r| Self::map_from_row(&r)).transpose()
    }

    // --- Collections ---

    pub async fn add_collection_map(&self, collection_id: i64, map_id: i64) -> Result<()> {
        self.client
            .execute(
                "INSERT INTO collection_maps (collection_id, map_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                &[&collection_id, &map_id]
            )
            .await?;
        Ok(())
    }

    pub async fn random_collection_map(&self, collection_id: i64, exclude: &[i64]) -> Result<Option<MapRow>> {
        let row = self
            .client
            .query_opt(
                "SELECT m.* FROM maps m JOIN collection_maps c ON c.map_id = m.id \
                 WHERE c.collection_id = $1 AND NOT m.takedown AND NOT (m.id = ANY($2)) \
                 ORDER BY RANDOM() LIMIT 1",
                &[&collection_id, &exclude]
            )
            .await?;
        row.map(|r| Self::map_from_row(&r)).transpose()
    }

    pub async fn collection_size(&self, collection_id: i64) -> Result<i64> {
        let row = self
            .client
            .query_one("SELECT COUNT(*) AS n FROM collection_maps WHERE collection_id = $1", &[
                &collection_id
            ])
            .await?;
        Ok(row.get::<_, i64>("n"))
    }

    // --- Matches ---

    pub async fn insert_match(&self, m: &MatchRow) -> Result<()> {
        self.client
            .execute(
                "INSERT INTO matches (id, invite_code, name, data, start_time, end_time) \
                 VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (id) DO NOTHING",
                &[&m.id, &m.invite_code, &m.name, &m.data, &m.start_time, &m.end_time]
            )
            .await?;
        Ok(())
    }

    pub async fn update_match_data(&self, match_id: i64, data: &serde_json::Value) -> Result<()> {
        self.client
            .execute("UPDATE matches SET data = $1 WHERE id = $2", &[data, &match_id])
            .await?;
        Ok(())
    }

    pub async fn update_match_name(&self, match_id: i64, name: &str) -> Result<()> {
        self.client
            .execute("UPDATE matches SET name = $1 WHERE id = $2", &[&name, &match_id])
            .await?;
        Ok(())
    }

    pub async fn finalize_match(&self, match_id: i64, end_time: DateTime<Utc>) -> Result<()> {
        self.client
            .execute("UPDATE matches SET end_time = $1 WHERE id = $2", &[&end_time, &match_id])
            .await?;
        Ok(())
    }

    /// Matches without an end time, i.e. lobbies the process should try to
    /// rejoin after a restart.
    pub async fn open_matches(&self) -> Result<Vec<MatchRow>> {
        let rows = self
            .client
            .query("SELECT * FROM matches WHERE end_time IS NULL ORDER BY id", &[])
            .await?;
        Ok(rows.iter().map(Self::match_from_row).collect())
    }

    // --- Games and scores ---

    /// Returns false when the game was already recorded.
    pub async fn insert_game(&self, game: &GameRow) -> Result<bool> {
        let n = self
            .client
            .execute(
                "INSERT INTO games (id, match_id, start_time, end_time, map_id, ruleset, scoring_type, \
                 team_type, mods) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) ON CONFLICT (id) DO NOTHING",
                &[
                    &game.id,
                    &game.match_id,
                    &game.start_time,
                    &game.end_time,
                    &game.map_id,
                    &(game.ruleset as i32),
                    &game.scoring_type,
                    &game.team_type,
                    &game.mods
                ]
            )
            .await?;
        Ok(n == 1)
    }

    pub async fn insert_score(&self, score: &ScoreRow) -> Result<()> {
        self.client
            .execute(
                "INSERT INTO scores (game_id, player_id, ruleset, accuracy, score, max_combo, count_50, \
                 count_100, count_300, count_miss, count_geki, count_katu, perfect, passed, dodged, mods, \
                 created_at, map_id, won) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, \
                 $14, $15, $16, $17, $18, $19) ON CONFLICT (game_id, player_id) DO NOTHING",
                &[
                    &score.game_id,
                    &score.player_id,
                    &(score.ruleset as i32),
                    &score.accuracy,
                    &score.score,
                    &score.max_combo,
                    &score.count_50,
                    &score.count_100,
                    &score.count_300,
                    &score.count_miss,
                    &score.count_geki,
                    &score.count_katu,
                    &score.perfect,
                    &score.passed,
                    &score.dodged,
                    &score.mods,
                    &score.created_at,
                    &score.map_id,
                    &score.won
                ]
            )
            .await?;
        Ok(())
    }

    pub async fn update_score_won(&self, game_id: i64, player_id: i64, won: bool) -> Result<()> {
        self.client
            .execute("UPDATE scores SET won = $1 WHERE game_id = $2 AND player_id = $3", &[
                &won, &game_id, &player_id
            ])
            .await?;
        Ok(())
    }

    pub async fn all_game_ids(&self) -> Result<Vec<i64>> {
        let rows = self.client.query("SELECT id FROM games ORDER BY id", &[]).await?;
        Ok(rows.iter().map(|r| r.get::<_, i64>("id")).collect())
    }

    pub async fn game_with_scores(&self, game_id: i64) -> Result<(GameRow, Vec<ScoreRow>)> {
        let game_row = self.client.query_one("SELECT * FROM games WHERE id = $1", &[&game_id]).await?;
        let score_rows = self
            .client
            .query("SELECT * FROM scores WHERE game_id = $1 ORDER BY id", &[&game_id])
            .await?;
        Ok((
            Self::game_from_row(&game_row),
            score_rows.iter().map(Self::score_from_row).collect()
        ))
    }

    /// Resets every rating back to its seed so a replay starts from
    /// scratch. Player seeds are re-derived from the stored profile
    /// snapshots, map seeds go back to the default.
    pub async fn reset_all_ratings(&self) -> Result<()> {
        self.client
            .execute(
                "UPDATE ratings r SET base_mu = 0, base_sigma = $1, base_cursor = 0, current_mu = 0, \
                 current_sigma = $1, evidence_count = 0, display_rating = $2 WHERE entity = 1",
                &[
                    &crate::model::constants::SIGMA_CEILING,
                    &(crate::model::constants::DEFAULT_ELO - 3.0 * 350.0)
                ]
            )
            .await?;

        let players = self.client.query("SELECT * FROM players", &[]).await?;
        let bar = progress_bar(players.len() as u64, "Reseeding player ratings".to_string());
        for row in &players {
            let player = Self::player_from_row(row)?;
            let mu = seed_mu_from_pp(
                player
                    .profile
                    .get("pp_raw")
                    .and_then(|v| v.as_str())
                    .and_then(|v| v.parse().ok())
            );
            for ruleset in Ruleset::iter() {
                let mut rating = Rating::seeded(EntityKind::Player, ruleset, mu);
                rating.id = player.rating_id(ruleset);
                self.update_rating(&rating).await?;
            }
            bar.inc(1);
        }
        bar.finish();

        self.client
            .execute("UPDATE players SET osu_division = 'Unranked', taiko_division = 'Unranked', \
                 catch_division = 'Unranked', mania_division = 'Unranked'", &[])
            .await?;
        Ok(())
    }

    // --- Row mapping ---

    fn rating_from_row(row: &Row) -> Result<Rating> {
        Ok(Rating {
            id: row.get::<_, i32>("id"),
            entity: EntityKind::try_from(row.get::<_, i32>("entity")).map_err(|_| BotError::MalformedPayload)?,
            ruleset: Ruleset::try_from(row.get::<_, i32>("ruleset")).map_err(|_| BotError::MalformedPayload)?,
            base_mu: row.get::<_, f64>("base_mu"),
            base_sigma: row.get::<_, f64>("base_sigma"),
            base_cursor: row.get::<_, i64>("base_cursor"),
            current_mu: row.get::<_, f64>("current_mu"),
            current_sigma: row.get::<_, f64>("current_sigma"),
            evidence_count: row.get::<_, i32>("evidence_count"),
            display_rating: row.get::<_, f64>("display_rating")
        })
    }

    fn evidence_from_row(row: &Row) -> Evidence {
        Evidence {
            score_id: row.get::<_, i64>("score_id"),
            opponent_mu: row.get::<_, f64>("current_mu"),
            opponent_sigma: row.get::<_, f64>("current_sigma"),
            won: row.get::<_, bool>("won"),
            mods: Mods(row.get::<_, i64>("mods"))
        }
    }

    fn player_from_row(row: &Row) -> Result<PlayerRow> {
        Ok(PlayerRow {
            id: row.get::<_, i64>("id"),
            username: row.get::<_, String>("username"),
            country: row.get::<_, String>("country"),
            profile: row.get::<_, serde_json::Value>("profile"),
            rating_ids: [
                row.get::<_, i32>("osu_rating_id"),
                row.get::<_, i32>("taiko_rating_id"),
                row.get::<_, i32>("catch_rating_id"),
                row.get::<_, i32>("mania_rating_id")
            ],
            division_labels: [
                row.get::<_, String>("osu_division"),
                row.get::<_, String>("taiko_division"),
                row.get::<_, String>("catch_division"),
                row.get::<_, String>("mania_division")
            ],
            discord_user_id: row.get::<_, Option<String>>("discord_user_id")
        })
    }

    fn map_from_row(row: &Row) -> Result<MapRow> {
        Ok(MapRow {
            id: row.get::<_, i64>("id"),
            title: row.get::<_, String>("title"),
            ruleset: Ruleset::try_from(row.get::<_, i32>("ruleset")).map_err(|_| BotError::MalformedPayload)?,
            stars: row.get::<_, f64>("stars"),
            circle_size: row.get::<_, f64>("circle_size"),
            set_id: row.get::<_, i64>("set_id"),
            length_seconds: row.get::<_, i32>("length_seconds"),
            ranked_status: row.get::<_, i32>("ranked_status"),
            takedown: row.get::<_, bool>("takedown"),
            rating_id: row.get::<_, i32>("rating_id"),
            pool_admitted_at: row.get::<_, Option<DateTime<Utc>>>("pool_admitted_at")
        })
    }

    fn match_from_row(row: &Row) -> MatchRow {
        MatchRow {
            id: row.get::<_, i64>("id"),
            invite_code: row.get::<_, Option<i64>>("invite_code"),
            name: row.get::<_, Option<String>>("name"),
            data: row.get::<_, serde_json::Value>("data"),
            start_time: row.get::<_, DateTime<Utc>>("start_time"),
            end_time: row.get::<_, Option<DateTime<Utc>>>("end_time")
        }
    }

    fn game_from_row(row: &Row) -> GameRow {
        GameRow {
            id: row.get::<_, i64>("id"),
            match_id: row.get::<_, i64>("match_id"),
            start_time: row.get::<_, DateTime<Utc>>("start_time"),
            end_time: row.get::<_, DateTime<Utc>>("end_time"),
            map_id: row.get::<_, i64>("map_id"),
            ruleset: Ruleset::try_from(row.get::<_, i32>("ruleset")).unwrap_or_default(),
            scoring_type: row.get::<_, i32>("scoring_type"),
            team_type: row.get::<_, i32>("team_type"),
            mods: row.get::<_, i64>("mods")
        }
    }

    fn score_from_row(row: &Row) -> ScoreRow {
        ScoreRow {
            game_id: row.get::<_, i64>("game_id"),
            player_id: row.get::<_, i64>("player_id"),
            ruleset: Ruleset::try_from(row.get::<_, i32>("ruleset")).unwrap_or_default(),
            accuracy: row.get::<_, f64>("accuracy"),
            score: row.get::<_, i64>("score"),
            max_combo: row.get::<_, i32>("max_combo"),
            count_50: row.get::<_, i32>("count_50"),
            count_100: row.get::<_, i32>("count_100"),
            count_300: row.get::<_, i32>("count_300"),
            count_miss: row.get::<_, i32>("count_miss"),
            count_geki: row.get::<_, i32>("count_geki"),
            count_katu: row.get::<_, i32>("count_katu"),
            perfect: row.get::<_, bool>("perfect"),
            passed: row.get::<_, bool>("passed"),
            dodged: row.get::<_, bool>("dodged"),
            mods: row.get::<_, i64>("mods"),
            created_at: row.get::<_, DateTime<Utc>>("created_at"),
            map_id: row.get::<_, i64>("map_id"),
            won: row.get::<_, bool>("won")
        }
    }
}
