use crate::model::structures::ruleset::Ruleset;
use serde::Deserialize;

// The v1 endpoints return every field as a JSON string (or null), so the
// DTOs keep them as strings and expose typed accessors.

fn parse<T: std::str::FromStr + Default>(value: &Option<String>) -> T {
    value.as_deref().and_then(|v| v.parse().ok()).unwrap_or_default()
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserDto {
    pub user_id: String,
    pub username: String,
    pub country: Option<String>,
    pub pp_raw: Option<String>,
    pub pp_rank: Option<String>,
    pub playcount: Option<String>
}

impl UserDto {
    pub fn id(&self) -> i64 {
        self.user_id.parse().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchDto {
    #[serde(rename = "match")]
    pub info: MatchInfoDto,
    pub games: Vec<GameDto>
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchInfoDto {
    pub match_id: String,
    pub name: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>
}

#[derive(Debug, Clone, Deserialize)]
pub struct GameDto {
    pub game_id: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub beatmap_id: String,
    pub play_mode: Option<String>,
    pub scoring_type: Option<String>,
    pub team_type: Option<String>,
    pub mods: Option<String>,
    pub scores: Vec<ScoreDto>
}

impl GameDto {
    pub fn id(&self) -> i64 {
        self.game_id.parse().unwrap_or_default()
    }

    pub fn map_id(&self) -> i64 {
        self.beatmap_id.parse().unwrap_or_default()
    }

    pub fn ruleset(&self) -> Ruleset {
        Ruleset::try_from(parse::<i32>(&self.play_mode)).unwrap_or_default()
    }

    pub fn mods(&self) -> i64 {
        parse(&self.mods)
    }

    /// A game still in progress has no end time yet.
    pub fn is_finished(&self) -> bool {
        self.end_time.as_deref().is_some_and(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoreDto {
    pub user_id: String,
    pub score: Option<String>,
    pub maxcombo: Option<String>,
    pub count50: Option<String>,
    pub count100: Option<String>,
    pub count300: Option<String>,
    pub countmiss: Option<String>,
    pub countgeki: Option<String>,
    pub countkatu: Option<String>,
    pub perfect: Option<String>,
    pub pass: Option<String>,
    pub enabled_mods: Option<String>
}

impl ScoreDto {
    pub fn player_id(&self) -> i64 {
        self.user_id.parse().unwrap_or_default()
    }

    pub fn total_score(&self) -> i64 {
        parse(&self.score)
    }

    pub fn passed(&self) -> bool {
        parse::<i32>(&self.pass) == 1
    }

    pub fn perfect_combo(&self) -> bool {
        parse::<i32>(&self.perfect) == 1
    }

    /// Per-score mods override the game mods when freemod is active;
    /// absent or zero means "use the game's".
    pub fn mods(&self, game_mods: i64) -> i64 {
        let own: i64 = parse(&self.enabled_mods);
        if own != 0 {
            own
        } else {
            game_mods
        }
    }

    /// Accuracy from raw hit counts, using each ruleset's own formula.
    pub fn accuracy(&self, ruleset: Ruleset) -> f64 {
        let c50: f64 = parse(&self.count50);
        let c100: f64 = parse(&self.count100);
        let c300: f64 = parse(&self.count300);
        let miss: f64 = parse(&self.countmiss);
        let geki: f64 = parse(&self.countgeki);
        let katu: f64 = parse(&self.countkatu);

        let (num, den) = match ruleset {
            Ruleset::Osu => (50.0 * c50 + 100.0 * c100 + 300.0 * c300, 300.0 * (c50 + c100 + c300 + miss)),
            Ruleset::Taiko => (0.5 * c100 + c300, c100 + c300 + miss),
            Ruleset::Catch => (c50 + c100 + c300, c50 + c100 + c300 + miss + katu),
            Ruleset::Mania => (
                50.0 * c50 + 100.0 * c100 + 200.0 * katu + 300.0 * (c300 + geki),
                300.0 * (c50 + c100 + c300 + miss + geki + katu)
            )
        };

        if den == 0.0 {
            return 0.0;
        }
        num / den
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BeatmapDto {
    pub beatmap_id: String,
    pub beatmapset_id: String,
    pub approved: Option<String>,
    pub mode: Option<String>,
    pub artist: Option<String>,
    pub title: Option<String>,
    pub version: Option<String>,
    pub total_length: Option<String>,
    pub diff_size: Option<String>,
    pub difficultyrating: Option<String>,
    pub download_unavailable: Option<String>
}

impl BeatmapDto {
    pub fn id(&self) -> i64 {
        self.beatmap_id.parse().unwrap_or_default()
    }

    pub fn set_id(&self) -> i64 {
        self.beatmapset_id.parse().unwrap_or_default()
    }

    pub fn ruleset(&self) -> Ruleset {
        Ruleset::try_from(parse::<i32>(&self.mode)).unwrap_or_default()
    }

    pub fn stars(&self) -> f64 {
        parse(&self.difficultyrating)
    }

    pub fn circle_size(&self) -> f64 {
        parse(&self.diff_size)
    }

    pub fn length_seconds(&self) -> i32 {
        parse(&self.total_length)
    }

    pub fn ranked_status(&self) -> i32 {
        parse(&self.approved)
    }

    /// Set when the mapset was taken down (DMCA etc.) and cannot be
    /// downloaded from the website anymore.
    pub fn download_unavailable(&self) -> bool {
        parse::<i32>(&self.download_unavailable) == 1
    }

    pub fn display_title(&self) -> String {
        format!(
            "{} - {} [{}]",
            self.artist.as_deref().unwrap_or(""),
            self.title.as_deref().unwrap_or(""),
            self.version.as_deref().unwrap_or("")
        )
    }
}

// osu!collector responses use plain JSON numbers, unlike the v1 API.

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionDto {
    pub id: i64,
    pub name: Option<String>,
    #[serde(default)]
    pub beatmapsets: Vec<CollectionSetDto>
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionSetDto {
    #[serde(default)]
    pub beatmaps: Vec<CollectionMapDto>
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionMapDto {
    pub id: i64
}

impl CollectionDto {
    pub fn beatmap_ids(&self) -> Vec<i64> {
        self.beatmapsets
            .iter()
            .flat_map(|set| set.beatmaps.iter().map(|b| b.id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn score(c50: &str, c100: &str, c300: &str, miss: &str, geki: &str, katu: &str) -> ScoreDto {
        ScoreDto {
            user_id: "123".to_string(),
            score: Some("100000".to_string()),
            maxcombo: Some("10".to_string()),
            count50: Some(c50.to_string()),
            count100: Some(c100.to_string()),
            count300: Some(c300.to_string()),
            countmiss: Some(miss.to_string()),
            countgeki: Some(geki.to_string()),
            countkatu: Some(katu.to_string()),
            perfect: Some("0".to_string()),
            pass: Some("1".to_string()),
            enabled_mods: None
        }
    }

    #[test]
    fn test_osu_accuracy() {
        // SS
        assert_abs_diff_eq!(score("0", "0", "100", "0", "0", "0").accuracy(Ruleset::Osu), 1.0);
        // All 100s
        assert_abs_diff_eq!(score("0", "100", "0", "0", "0", "0").accuracy(Ruleset::Osu), 1.0 / 3.0);
    }

    #[test]
    fn test_taiko_accuracy() {
        assert_abs_diff_eq!(score("0", "50", "50", "0", "0", "0").accuracy(Ruleset::Taiko), 0.75);
    }

    #[test]
    fn test_mania_accuracy_counts_geki_as_max() {
        assert_abs_diff_eq!(score("0", "0", "0", "0", "100", "0").accuracy(Ruleset::Mania), 1.0);
    }

    #[test]
    fn test_empty_score_has_zero_accuracy() {
        assert_abs_diff_eq!(score("0", "0", "0", "0", "0", "0").accuracy(Ruleset::Osu), 0.0);
    }

    #[test]
    fn test_collection_flattens_beatmap_ids() {
        let collection: CollectionDto = serde_json::from_value(serde_json::json!({
            "id": 42,
            "name": "jump practice",
            "beatmapsets": [
                { "beatmaps": [{ "id": 1 }, { "id": 2 }] },
                { "beatmaps": [{ "id": 3 }] },
                { "beatmaps": [] }
            ]
        }))
        .unwrap();
        assert_eq!(collection.beatmap_ids(), vec![1, 2, 3]);
    }

    #[test]
    fn test_freemod_score_mods_override_game_mods() {
        let mut s = score("0", "0", "100", "0", "0", "0");
        assert_eq!(s.mods(72), 72);
        s.enabled_mods = Some("8".to_string());
        assert_eq!(s.mods(72), 8);
    }
}
