use crate::{
    api::OsuApi,
    bancho::{
        commands as mp,
        connection::{ChatSink, InboundLine}
    },
    database::{db::DbClient, db_structs::MatchRow},
    error::{BotError, Result},
    lobby::{
        commands::{dispatch, Command, Context, Dispatch},
        session::{LobbySession, SessionConfig, SessionEvent},
        state::{Lobby, LobbyData}
    },
    model::{constants::MIN_RANKED_EVIDENCE, structures::ruleset::Ruleset}
};
use chrono::Utc;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub fn channel_for_match(match_id: i64) -> String {
    format!("#mp_{match_id}")
}

fn match_id_for_channel(channel: &str) -> Option<i64> {
    channel.strip_prefix("#mp_")?.parse().ok()
}

/// What a failed JOIN requires: the match to stamp closed, and the
/// creator to notify if anyone is waiting. Boot-time rejoins register no
/// pending join, so only the notification may come up empty.
fn join_failure_actions(
    pending: &mut HashMap<String, String>,
    channel: &str
) -> (Option<i64>, Option<String>) {
    (match_id_for_channel(channel), pending.remove(channel))
}

/// Owns every live lobby session and routes inbound transport lines to
/// them. One instance per process, driven by the connection's receiver.
pub struct SessionManager {
    db: DbClient,
    api: OsuApi,
    sink: Arc<dyn ChatSink>,
    config: SessionConfig,
    sessions: HashMap<String, mpsc::Sender<SessionEvent>>,
    /// Channels we have asked to JOIN but not yet heard back about, with
    /// the creator to notify on failure.
    pending_joins: HashMap<String, String>
}

impl SessionManager {
    pub fn new(db: DbClient, api: OsuApi, sink: Arc<dyn ChatSink>, config: SessionConfig) -> SessionManager {
        SessionManager {
            db,
            api,
            sink,
            config,
            sessions: HashMap::new(),
            pending_joins: HashMap::new()
        }
    }

    /// Rejoins every match without an end time. Run once on boot so a
    /// restart picks its lobbies back up.
    pub async fn rejoin_open_matches(&mut self) -> Result<()> {
        let open = self.db.open_matches().await?;
        info!(count = open.len(), "rejoining open lobbies");
        for m in open {
            let data = LobbyData::from_value(&m.data);
            if let Err(e) = self.start_session(m.id, data).await {
                warn!(match_id = m.id, error = %e, "failed to rejoin lobby");
            }
        }
        Ok(())
    }

    /// Drives the manager until the transport closes, which is fatal; the
    /// process restarts rather than reconnecting with stale lobby state.
    pub async fn run(&mut self, mut rx: mpsc::Receiver<InboundLine>) -> Result<()> {
        while let Some(line) = rx.recv().await {
            match line {
                InboundLine::Channel { channel, sender, text } => {
                    self.pending_joins.remove(&channel);
                    self.forward(&channel, SessionEvent::Line { sender, text }).await;
                }
                InboundLine::Direct { sender, text } => {
                    if let Err(e) = self.handle_direct(&sender, &text).await {
                        error!(sender, error = %e, "direct message handling failed");
                    }
                }
                InboundLine::Parted { channel } => {
                    self.forward(&channel, SessionEvent::Closed).await;
                    self.sessions.remove(&channel);
                }
                InboundLine::JoinFailed { channel, reason } => {
                    self.handle_join_failure(&channel, &reason).await;
                }
            }
        }

        error!("inbound stream closed");
        Err(BotError::TransportClosed)
    }

    async fn forward(&mut self, channel: &str, event: SessionEvent) {
        let Some(tx) = self.sessions.get(channel) else {
            return;
        };
        if tx.send(event).await.is_err() {
            // Session task already ended
            self.sessions.remove(channel);
        }
    }

    async fn handle_join_failure(&mut self, channel: &str, reason: &str) {
        warn!(channel, reason, "could not join lobby");
        let (match_id, creator) = join_failure_actions(&mut self.pending_joins, channel);

        self.forward(channel, SessionEvent::Closed).await;
        self.sessions.remove(channel);

        // Stamp the end time so the next boot does not retry this lobby
        if let Some(match_id) = match_id {
            if let Err(e) = self.db.finalize_match(match_id, Utc::now()).await {
                error!(match_id, error = %e, "failed to close unjoinable match");
            }
        }

        if let Some(creator) = creator {
            let bot = &self.config.bot_username;
            let _ = self
                .sink
                .send_direct(
                    &creator,
                    &format!("Failed to join the lobby. Make sure you have sent '!mp addref {bot}' in it first.")
                )
                .await;
        }
    }

    async fn handle_direct(&mut self, sender: &str, text: &str) -> Result<()> {
        match dispatch(text, Context::Dm, false) {
            Dispatch::Run(Command::Join { match_id }) => self.cmd_join(sender, match_id).await,
            Dispatch::Run(Command::Rank { username }) => {
                let target = username.unwrap_or_else(|| sender.to_string());
                self.cmd_rank_dm(sender, &target).await
            }
            Dispatch::Run(Command::Discord) => {
                let url = &self.config.discord_invite_url;
                self.sink
                    .send_direct(sender, &format!("[{url} Come hang out in voice chat!] (or just text, no pressure)"))
                    .await
            }
            Dispatch::Run(Command::About) => {
                self.sink
                    .send_direct(
                        sender,
                        "Make a multiplayer lobby, send '!mp addref' for me in it, then send me '!join <lobby id>' here."
                    )
                    .await
            }
            Dispatch::RedirectToLobby => {
                self.sink
                    .send_direct(sender, "That command only works inside a lobby.")
                    .await
            }
            _ => Ok(())
        }
    }

    async fn cmd_join(&mut self, sender: &str, match_id: i64) -> Result<()> {
        let channel = channel_for_match(match_id);
        if self.sessions.contains_key(&channel) {
            return self.sink.send_direct(sender, "I am already in that lobby.").await;
        }

        // The creator keeps moderation rights for the lobby's lifetime, so
        // pin their id down now.
        let creator_id = self
            .api
            .get_user(&sender.replace('_', " "))
            .await?
            .map(|u| u.id())
            .unwrap_or_default();

        let data = LobbyData {
            creator: sender.to_string(),
            creator_id,
            ..LobbyData::default()
        };
        self.db
            .insert_match(&MatchRow {
                id: match_id,
                invite_code: None,
                name: None,
                data: serde_json::to_value(&data)?,
                start_time: Utc::now(),
                end_time: None
            })
            .await?;

        self.pending_joins.insert(channel.clone(), sender.to_string());
        self.start_session(match_id, data).await?;
        self.sink
            .send_direct(sender, "Joining... Send '!ranked <ruleset>' or '!collection <id>' in the lobby to set it up.")
            .await
    }

    async fn start_session(&mut self, match_id: i64, data: LobbyData) -> Result<()> {
        let channel = channel_for_match(match_id);
        let lobby = Lobby::new(channel.clone(), match_id, data);
        let (tx, session) = LobbySession::new(
            lobby,
            self.db.clone(),
            self.api.clone(),
            Arc::clone(&self.sink),
            self.config.clone()
        );
        tokio::spawn(session.run());
        self.sessions.insert(channel.clone(), tx);

        self.sink.join(&channel).await?;
        // First roster snapshot; the session leaves Joining once it lands.
        self.sink.send_channel(&channel, &mp::settings()).await
    }

    /// The DM variant of !rank has no lobby to take a ruleset from and
    /// reports the default one.
    async fn cmd_rank_dm(&self, sender: &str, target: &str) -> Result<()> {
        let ruleset = Ruleset::Osu;
        let Some(player) = self.db.get_player_by_username(&target.replace('_', " ")).await? else {
            return self
                .sink
                .send_direct(sender, &format!("{target} hasn't played in a ranked lobby yet."))
                .await;
        };

        let rating = self.db.get_rating(player.rating_id(ruleset)).await?;
        if rating.evidence_count < MIN_RANKED_EVIDENCE {
            return self
                .sink
                .send_direct(sender, &format!("{target} hasn't played in a ranked lobby yet."))
                .await;
        }

        let better = self.db.count_better_players(ruleset, rating.display_rating).await?;
        let website = &self.config.website_base_url;
        let text = format!(
            "[{website}/u/{}/ {}] | Rank: {} (#{}) | Elo: {} | Games played: {}",
            player.id,
            player.username,
            player.division(ruleset),
            better + 1,
            rating.display_rating.round() as i64,
            rating.evidence_count
        );
        self.sink.send_direct(sender, &text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name_round_trip() {
        assert_eq!(channel_for_match(108252083), "#mp_108252083");
        assert_eq!(match_id_for_channel("#mp_108252083"), Some(108252083));
        assert_eq!(match_id_for_channel("#osu"), None);
        assert_eq!(match_id_for_channel("#mp_abc"), None);
    }

    #[test]
    fn test_join_failure_closes_match_even_without_pending_join() {
        // Rejoin-on-boot registers no pending join; the stale match must
        // still be stamped closed or every restart retries it.
        let mut pending = HashMap::new();
        assert_eq!(join_failure_actions(&mut pending, "#mp_77"), (Some(77), None));

        pending.insert("#mp_77".to_string(), "alice".to_string());
        assert_eq!(
            join_failure_actions(&mut pending, "#mp_77"),
            (Some(77), Some("alice".to_string()))
        );
        assert!(pending.is_empty());
    }
}
