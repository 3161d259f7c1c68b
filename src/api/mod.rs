pub mod api_structs;

use crate::error::{BotError, Result};
use api_structs::{BeatmapDto, CollectionDto, MatchDto, UserDto};
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, ClientBuilder};
use tracing::debug;

const API_ROOT: &str = "https://osu.ppy.sh/api";
const COLLECTOR_ROOT: &str = "https://osucollector.com/api/collections";

/// Legacy v1 API client. Everything comes back as arrays of string-typed
/// objects; the DTOs in [`api_structs`] do the decoding.
#[derive(Clone)]
pub struct OsuApi {
    client: Client,
    api_key: String
}

impl OsuApi {
    pub fn new(api_key: String) -> Result<OsuApi> {
        let client = ClientBuilder::new()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;
        Ok(OsuApi { client, api_key })
    }

    /// Looks a user up by name. Returns None for names osu! does not know,
    /// including tournament-lobby pseudo users like BanchoBot.
    pub async fn get_user(&self, username: &str) -> Result<Option<UserDto>> {
        let url = format!("{API_ROOT}/get_user");
        let users: Vec<UserDto> = self
            .client
            .get(&url)
            .query(&[("k", self.api_key.as_str()), ("u", username), ("type", "string")])
            .send()
            .await?
            .json()
            .await?;
        Ok(users.into_iter().next())
    }

    pub async fn get_user_by_id(&self, user_id: i64) -> Result<Option<UserDto>> {
        let url = format!("{API_ROOT}/get_user");
        let id = user_id.to_string();
        let users: Vec<UserDto> = self
            .client
            .get(&url)
            .query(&[("k", self.api_key.as_str()), ("u", id.as_str()), ("type", "id")])
            .send()
            .await?
            .json()
            .await?;
        Ok(users.into_iter().next())
    }

    /// Full multiplayer match history, games and scores included. Bancho
    /// publishes results here with a delay after the in-lobby finish
    /// announcement, so callers poll.
    pub async fn get_match(&self, match_id: i64) -> Result<MatchDto> {
        let url = format!("{API_ROOT}/get_match");
        let id = match_id.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[("k", self.api_key.as_str()), ("mp", id.as_str())])
            .send()
            .await?;
        debug!(match_id, status = %response.status(), "fetched match");

        let parsed: MatchDto = response.json().await.map_err(|_| BotError::ResultsUnavailable(match_id))?;
        Ok(parsed)
    }

    pub async fn get_beatmap(&self, map_id: i64) -> Result<Option<BeatmapDto>> {
        let url = format!("{API_ROOT}/get_beatmaps");
        let id = map_id.to_string();
        let maps: Vec<BeatmapDto> = self
            .client
            .get(&url)
            .query(&[("k", self.api_key.as_str()), ("b", id.as_str())])
            .send()
            .await?
            .json()
            .await?;
        Ok(maps.into_iter().next())
    }

    /// Fetches a shared collection from osu!collector.
    pub async fn get_collection(&self, collection_id: i64) -> Result<CollectionDto> {
        let url = format!("{COLLECTOR_ROOT}/{collection_id}");
        let collection: CollectionDto = self.client.get(&url).send().await?.error_for_status()?.json().await?;
        Ok(collection)
    }
}

/// v1 timestamps are naive UTC, e.g. "2024-03-01 18:30:00".
pub fn parse_api_time(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|t| t.and_utc())
}

#[cfg(test)]
mod tests {
    use super::parse_api_time;

    #[test]
    fn test_parse_api_time() {
        let t = parse_api_time("2024-03-01 18:30:00").unwrap();
        assert_eq!(t.to_rfc3339(), "2024-03-01T18:30:00+00:00");
        assert!(parse_api_time("").is_none());
        assert!(parse_api_time("not a time").is_none());
    }
}
