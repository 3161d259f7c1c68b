use crate::{
    database::{db::DbClient, db_structs::MapRow},
    error::Result,
    lobby::{commands::Context, selector, votes::VoteBox},
    model::structures::ruleset::Ruleset,
    protocol::{decoder::LineDecoder, events::SlotInfo}
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

/// What the lobby has been configured as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LobbyKind {
    /// Joined but not yet configured with !ranked or !collection.
    #[serde(rename = "new")]
    #[default]
    Fresh,
    Ranked,
    Collection
}

/// The persisted slice of a lobby: everything needed to pick up where we
/// left off after a restart. Mutate freely, then `save()` at a transition
/// boundary; individual field writes are never flushed on their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LobbyData {
    pub kind: LobbyKind,
    pub creator: String,
    pub creator_id: i64,
    pub ruleset: Ruleset,
    pub collection_id: Option<i64>
}

impl LobbyData {
    pub fn from_value(value: &serde_json::Value) -> LobbyData {
        serde_json::from_value(value.clone()).unwrap_or_else(|e| {
            warn!(error = %e, "unreadable lobby state blob, starting fresh");
            LobbyData::default()
        })
    }

    pub async fn save(&self, db: &DbClient, match_id: i64) -> Result<()> {
        db.update_match_data(match_id, &serde_json::to_value(self)?).await
    }

    pub fn context(&self) -> Context {
        match self.kind {
            LobbyKind::Fresh => Context::Fresh,
            LobbyKind::Ranked => Context::Ranked,
            LobbyKind::Collection => Context::Collection
        }
    }
}

/// Lifecycle of one lobby attempt cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the first roster snapshot after JOIN.
    Joining,
    Idle,
    /// Start command issued (or countdown running), match not started yet.
    Starting,
    Playing,
    /// Match ended, result fetch in flight.
    Finishing,
    Closed
}

impl Phase {
    /// Whether an all-ready announcement may issue a start command.
    /// Result fetching runs in the background, so Finishing counts: the
    /// next attempt lines up while the previous one is still being scored.
    pub fn startable(self) -> bool {
        matches!(self, Phase::Idle | Phase::Finishing)
    }
}

#[derive(Debug, Clone)]
pub struct RosterPlayer {
    pub user_id: i64,
    pub username: String,
    pub is_host: bool,
    pub display_rating: f64,
    /// Matches completed in this lobby since joining; gates !skip.
    pub matches_finished: i32
}

/// Full in-memory state of one joined lobby. Owned by its session task;
/// nothing else ever touches it.
pub struct Lobby {
    pub channel: String,
    pub match_id: i64,
    pub data: LobbyData,
    pub phase: Phase,
    pub decoder: LineDecoder,
    pub roster: Vec<RosterPlayer>,
    pub median_display: f64,
    pub current_map: Option<MapRow>,
    pub title: String,
    /// Players in the current attempt, by user id. Kicked players are
    /// removed so a forced kick is not also booked as a dodge.
    pub participants: Vec<i64>,
    pub scorers: HashSet<i64>,
    pub dodgers: HashSet<i64>,
    pub votes: VoteBox,
    /// Highest game id already folded into ratings.
    pub last_game_id: i64,
    /// Bumping this invalidates every timer armed before the bump.
    pub timer_generation: u64,
    pub countdown_running: bool,
    pub afk_timer_running: bool,
    pub created_just_now: bool
}

impl Lobby {
    pub fn new(channel: String, match_id: i64, data: LobbyData) -> Lobby {
        Lobby {
            channel,
            match_id,
            data,
            phase: Phase::Joining,
            decoder: LineDecoder::new(),
            roster: Vec::new(),
            median_display: selector::median(&[]),
            current_map: None,
            title: String::new(),
            participants: Vec::new(),
            scorers: HashSet::new(),
            dodgers: HashSet::new(),
            votes: VoteBox::new(),
            last_game_id: 0,
            timer_generation: 0,
            countdown_running: false,
            afk_timer_running: false,
            created_just_now: false
        }
    }

    pub fn find_player(&self, username: &str) -> Option<&RosterPlayer> {
        let wanted = username.replace(' ', "_").to_lowercase();
        self.roster
            .iter()
            .find(|p| p.username.replace(' ', "_").to_lowercase() == wanted)
    }

    pub fn find_player_mut(&mut self, username: &str) -> Option<&mut RosterPlayer> {
        let wanted = username.replace(' ', "_").to_lowercase();
        self.roster
            .iter_mut()
            .find(|p| p.username.replace(' ', "_").to_lowercase() == wanted)
    }

    /// Creator or currently elected host.
    pub fn is_privileged(&self, username: &str) -> bool {
        if let Some(player) = self.find_player(username) {
            if player.is_host || player.user_id == self.data.creator_id {
                return true;
            }
        }
        let wanted = username.replace(' ', "_").to_lowercase();
        self.data.creator.replace(' ', "_").to_lowercase() == wanted
    }

    pub fn recompute_median(&mut self) {
        let ratings: Vec<f64> = self.roster.iter().map(|p| p.display_rating).collect();
        self.median_display = selector::median(&ratings);
    }

    /// Replaces the roster with a snapshot, carrying over per-lobby
    /// counters for players that stayed.
    pub fn apply_snapshot(&mut self, slots: &[SlotInfo], ratings: &[(i64, f64)]) {
        let old = std::mem::take(&mut self.roster);
        for slot in slots {
            let carried = old.iter().find(|p| p.user_id == slot.user_id);
            let display_rating = ratings
                .iter()
                .find(|(id, _)| *id == slot.user_id)
                .map(|(_, r)| *r)
                .or(carried.map(|p| p.display_rating))
                .unwrap_or(selector::median(&[]));
            self.roster.push(RosterPlayer {
                user_id: slot.user_id,
                username: slot.username.clone(),
                is_host: slot.is_host,
                display_rating,
                matches_finished: carried.map(|p| p.matches_finished).unwrap_or(0)
            });
        }
        self.recompute_median();
    }

    pub fn remove_from_roster(&mut self, username: &str) -> Option<RosterPlayer> {
        let wanted = username.replace(' ', "_").to_lowercase();
        let idx = self
            .roster
            .iter()
            .position(|p| p.username.replace(' ', "_").to_lowercase() == wanted)?;
        let removed = self.roster.remove(idx);
        self.recompute_median();
        Some(removed)
    }

    /// Credits a completed attempt to everyone who took part in it.
    /// Runs at match-finished time, not when results land, so the !skip
    /// gate keeps advancing even when the results API is down.
    pub fn credit_finished_attempt(&mut self) {
        for player in &mut self.roster {
            if self.participants.contains(&player.user_id) {
                player.matches_finished += 1;
            }
        }
    }

    /// Clears per-attempt bookkeeping. Called on every match start.
    pub fn reset_attempt(&mut self) {
        self.participants.clear();
        self.scorers.clear();
        self.dodgers.clear();
        self.votes.clear_all();
        self.countdown_running = false;
        self.afk_timer_running = false;
    }

    /// Cancels every outstanding timer by invalidating their generation.
    pub fn cancel_timers(&mut self) -> u64 {
        self.timer_generation += 1;
        self.countdown_running = false;
        self.afk_timer_running = false;
        self.timer_generation
    }

    pub fn desired_title(&self) -> String {
        match self.data.kind {
            LobbyKind::Ranked => match &self.current_map {
                Some(map) => format!("{:.1}* x o!RL x Auto map select (!info)", map.stars),
                None => "o!RL x Auto map select (!info)".to_string()
            },
            LobbyKind::Collection => match self.data.collection_id {
                Some(id) => format!("o!RL x Collection #{id} (!info)"),
                None => "o!RL x Collection (!info)".to_string()
            },
            LobbyKind::Fresh => "o!RL (!info)".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(user_id: i64, username: &str, is_host: bool) -> SlotInfo {
        SlotInfo {
            slot: 1,
            state: "Not Ready".to_string(),
            user_id,
            username: username.to_string(),
            is_host
        }
    }

    #[test]
    fn test_data_round_trips_through_blob() {
        let data = LobbyData {
            kind: LobbyKind::Ranked,
            creator: "alice".to_string(),
            creator_id: 123,
            ruleset: Ruleset::Taiko,
            collection_id: None
        };
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(LobbyData::from_value(&value), data);
    }

    #[test]
    fn test_unreadable_blob_falls_back_to_fresh() {
        let data = LobbyData::from_value(&serde_json::json!("garbage"));
        assert_eq!(data.kind, LobbyKind::Fresh);
    }

    #[test]
    fn test_snapshot_carries_counters_for_stayers() {
        let mut lobby = Lobby::new("#mp_1".to_string(), 1, LobbyData::default());
        lobby.apply_snapshot(&[slot(1, "alice", true)], &[(1, 1600.0)]);
        lobby.roster[0].matches_finished = 7;

        lobby.apply_snapshot(&[slot(1, "alice", false), slot(2, "bob", true)], &[(2, 1400.0)]);
        let alice = lobby.find_player("alice").unwrap();
        assert_eq!(alice.matches_finished, 7);
        assert_eq!(alice.display_rating, 1600.0);
        assert!(!alice.is_host);
        assert!(lobby.find_player("bob").unwrap().is_host);
        assert_eq!(lobby.median_display, 1500.0);
    }

    #[test]
    fn test_privilege_creator_and_host() {
        let mut lobby = Lobby::new(
            "#mp_1".to_string(),
            1,
            LobbyData {
                creator: "Some Creator".to_string(),
                creator_id: 5,
                ..LobbyData::default()
            }
        );
        lobby.apply_snapshot(&[slot(5, "Some Creator", false), slot(6, "host guy", true)], &[]);

        // IRC senders use underscores for spaces
        assert!(lobby.is_privileged("Some_Creator"));
        assert!(lobby.is_privileged("host_guy"));
        lobby.apply_snapshot(&[slot(7, "random", false)], &[]);
        assert!(!lobby.is_privileged("random"));
        // Creator keeps privileges even when not in the roster
        assert!(lobby.is_privileged("Some_Creator"));
    }

    #[test]
    fn test_all_ready_can_start_while_results_are_pending() {
        // Bancho announces all-ready once; a lobby waiting on result
        // polling must not swallow it.
        assert!(Phase::Idle.startable());
        assert!(Phase::Finishing.startable());
        assert!(!Phase::Starting.startable());
        assert!(!Phase::Playing.startable());
        assert!(!Phase::Joining.startable());
        assert!(!Phase::Closed.startable());
    }

    #[test]
    fn test_finished_attempt_credits_participants_only() {
        let mut lobby = Lobby::new("#mp_1".to_string(), 1, LobbyData::default());
        lobby.apply_snapshot(&[slot(1, "alice", true), slot(2, "bob", false)], &[]);
        lobby.participants = vec![1];

        lobby.credit_finished_attempt();
        lobby.credit_finished_attempt();
        assert_eq!(lobby.find_player("alice").unwrap().matches_finished, 2);
        assert_eq!(lobby.find_player("bob").unwrap().matches_finished, 0);
    }

    #[test]
    fn test_snapshot_drops_players_absent_from_it() {
        let mut lobby = Lobby::new("#mp_1".to_string(), 1, LobbyData::default());
        lobby.apply_snapshot(&[slot(1, "alice", true), slot(2, "bob", false)], &[(1, 1800.0), (2, 1200.0)]);
        assert_eq!(lobby.roster.len(), 2);

        // A slot that failed to resolve is left out of the snapshot and
        // must not linger in the roster or the median.
        lobby.apply_snapshot(&[slot(1, "alice", true)], &[(1, 1800.0)]);
        assert!(lobby.find_player("bob").is_none());
        assert_eq!(lobby.median_display, 1800.0);
    }

    #[test]
    fn test_cancel_timers_bumps_generation() {
        let mut lobby = Lobby::new("#mp_1".to_string(), 1, LobbyData::default());
        lobby.countdown_running = true;
        let g1 = lobby.cancel_timers();
        let g2 = lobby.cancel_timers();
        assert!(g2 > g1);
        assert!(!lobby.countdown_running);
    }
}
