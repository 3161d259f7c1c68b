use crate::{
    api::{api_structs::{GameDto, MatchDto}, parse_api_time, OsuApi},
    bancho::{commands as mp, connection::ChatSink},
    database::{
        db::DbClient,
        db_structs::{GameRow, PlayerRow, ScoreRow}
    },
    error::Result,
    lobby::{
        commands::{dispatch, Command, Dispatch},
        selector::{MapSelector, PickKind},
        state::{Lobby, LobbyKind, Phase},
        votes::{afk_check, AfkAction}
    },
    model::{
        constants::{MIN_RANKED_EVIDENCE, RANK_UPDATES_PER_MESSAGE},
        engine::{won, DivisionChange, RatingEngine},
        structures::ruleset::Ruleset
    },
    protocol::events::BanchoEvent
};
use chrono::Utc;
use itertools::Itertools;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const AFK_TIMER: Duration = Duration::from_secs(10);
const COUNTDOWN_STAGE1: Duration = Duration::from_secs(30);
const COUNTDOWN_STAGE2: Duration = Duration::from_secs(10);
const RESULT_POLL_ATTEMPTS: u32 = 8;
const RESULT_POLL_DELAY: Duration = Duration::from_secs(5);
const SKIP_MATCHES_REQUIRED: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    CountdownStage1,
    CountdownStage2,
    Afk
}

/// Everything a lobby session reacts to, in one ordered stream. The
/// single consumer is what guarantees per-lobby event ordering.
#[derive(Debug)]
pub enum SessionEvent {
    /// Raw chat line from the lobby channel.
    Line { sender: String, text: String },
    /// A timer armed at `generation` fired. Stale generations are ignored.
    Timer { kind: TimerKind, generation: u64 },
    /// Identity lookup for a joining player completed.
    ResolvedJoin {
        username: String,
        player: Option<PlayerRow>
    },
    /// Result polling found a newly completed attempt.
    Results { attempt: Box<MatchDto> },
    ResultsFailed,
    /// Transport-level departure from the channel.
    Closed
}

#[derive(Clone)]
pub struct SessionConfig {
    pub website_base_url: String,
    pub discord_invite_url: String,
    pub bot_username: String
}

pub struct LobbySession {
    lobby: Lobby,
    db: DbClient,
    api: OsuApi,
    engine: RatingEngine,
    selector: MapSelector,
    sink: Arc<dyn ChatSink>,
    rx: mpsc::Receiver<SessionEvent>,
    tx: mpsc::Sender<SessionEvent>,
    config: SessionConfig
}

impl LobbySession {
    pub fn new(
        lobby: Lobby,
        db: DbClient,
        api: OsuApi,
        sink: Arc<dyn ChatSink>,
        config: SessionConfig
    ) -> (mpsc::Sender<SessionEvent>, LobbySession) {
        let (tx, rx) = mpsc::channel(256);
        let session = LobbySession {
            engine: RatingEngine::new(db.clone()),
            selector: MapSelector::new(db.clone()),
            lobby,
            db,
            api,
            sink,
            rx,
            tx: tx.clone(),
            config
        };
        (tx, session)
    }

    /// Consumes events until the lobby closes. Handler failures are
    /// reported with lobby context and do not kill the session.
    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            if let Err(e) = self.handle(event).await {
                error!(
                    channel = %self.lobby.channel,
                    match_id = self.lobby.match_id,
                    players = self.lobby.roster.len(),
                    phase = ?self.lobby.phase,
                    error = %e,
                    "lobby event handler failed"
                );
            }
            if self.lobby.phase == Phase::Closed {
                break;
            }
        }
        info!(channel = %self.lobby.channel, "lobby session ended");
    }

    async fn handle(&mut self, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::Line { sender, text } => {
                if let Some(parsed) = self.lobby.decoder.decode(&sender, &text) {
                    self.handle_bancho(parsed).await?;
                }
                Ok(())
            }
            SessionEvent::Timer { kind, generation } => self.handle_timer(kind, generation).await,
            SessionEvent::ResolvedJoin { username, player } => self.handle_resolved_join(username, player).await,
            SessionEvent::Results { attempt } => self.handle_results(*attempt).await,
            SessionEvent::ResultsFailed => {
                warn!(channel = %self.lobby.channel, "result polling exhausted, dropping attempt");
                // The next attempt may already be lining up or playing
                if self.lobby.phase == Phase::Finishing {
                    self.lobby.phase = Phase::Idle;
                }
                Ok(())
            }
            SessionEvent::Closed => self.close().await
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.lobby.cancel_timers();
        self.lobby.phase = Phase::Closed;
        self.db.finalize_match(self.lobby.match_id, Utc::now()).await?;
        Ok(())
    }

    // --- Protocol events ---

    async fn handle_bancho(&mut self, event: BanchoEvent) -> Result<()> {
        match event {
            BanchoEvent::RoomName { name, .. } | BanchoEvent::RoomRenamed { name } => {
                self.db.update_match_name(self.lobby.match_id, &name).await?;
                self.lobby.title = name;
                Ok(())
            }
            BanchoEvent::RosterReady { slots } => self.handle_roster(slots).await,
            BanchoEvent::PlayerJoined { username, .. } => {
                self.spawn_identity_lookup(username);
                Ok(())
            }
            BanchoEvent::PlayerLeft { username } => self.handle_player_left(&username).await,
            BanchoEvent::PlayerScored { username, score, .. } => {
                self.handle_player_scored(&username, score).await
            }
            BanchoEvent::AllReady => {
                // Ready-button spam can repeat this while the start is
                // already in flight.
                if self.lobby.phase.startable() {
                    self.lobby.phase = Phase::Starting;
                    self.say(&mp::start()).await?;
                }
                Ok(())
            }
            BanchoEvent::MatchStarted => self.handle_match_started().await,
            BanchoEvent::MatchAborted => {
                self.lobby.phase = Phase::Idle;
                Ok(())
            }
            BanchoEvent::MatchFinished => self.handle_match_finished().await,
            BanchoEvent::HostCleared => {
                for player in &mut self.lobby.roster {
                    player.is_host = false;
                }
                Ok(())
            }
            BanchoEvent::NewHost { username } => {
                let wanted = username.to_lowercase();
                for player in &mut self.lobby.roster {
                    player.is_host = player.username.to_lowercase() == wanted;
                }
                Ok(())
            }
            BanchoEvent::PasswordChanged => {
                // Managed lobbies stay open to everyone
                if self.lobby.data.kind != LobbyKind::Fresh {
                    self.say(&mp::clear_password()).await?;
                }
                Ok(())
            }
            BanchoEvent::RefereeRemoved { username } => {
                if username.eq_ignore_ascii_case(&self.config.bot_username) {
                    self.sink.part(&self.lobby.channel).await?;
                    self.close().await?;
                }
                Ok(())
            }
            BanchoEvent::ChatMessage { sender, text } => self.handle_chat(&sender, &text).await,
            // Informational lines the session has no reaction to
            BanchoEvent::PasswordRemoved
            | BanchoEvent::BeatmapAnnounced { .. }
            | BanchoEvent::RefChangedBeatmap { .. }
            | BanchoEvent::PlayerChangedBeatmap { .. }
            | BanchoEvent::TeamModeDeclared { .. }
            | BanchoEvent::ActiveMods { .. }
            | BanchoEvent::RefereeAdded { .. } => Ok(())
        }
    }

    async fn handle_roster(&mut self, slots: Vec<crate::protocol::events::SlotInfo>) -> Result<()> {
        let mut kept = Vec::with_capacity(slots.len());
        let mut ratings = Vec::with_capacity(slots.len());
        for slot in slots {
            match self.ensure_player_by_id(slot.user_id, &slot.username).await {
                Ok(player) => {
                    let rating = self.db.get_rating(player.rating_id(self.lobby.data.ruleset)).await?;
                    ratings.push((slot.user_id, rating.display_rating));
                    kept.push(slot);
                }
                Err(e) => {
                    // Dropped from this snapshot; the next refresh picks
                    // the player back up once the lookup goes through.
                    debug!(user_id = slot.user_id, error = %e, "identity lookup failed on snapshot");
                }
            }
        }

        self.lobby.apply_snapshot(&kept, &ratings);

        if self.lobby.phase == Phase::Playing {
            // Players still on "No Map" never started downloading; they are
            // spectators for this attempt, not participants.
            self.lobby.participants = kept
                .iter()
                .filter(|s| s.state != "No Map")
                .map(|s| s.user_id)
                .collect();
        }

        if self.lobby.phase == Phase::Joining {
            self.lobby.phase = Phase::Idle;
        }

        if self.lobby.created_just_now {
            self.lobby.created_just_now = false;
            self.select_next_map().await?;
        }
        Ok(())
    }

    fn spawn_identity_lookup(&self, username: String) {
        let api = self.api.clone();
        let db = self.db.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let player = match api.get_user(&username.replace('_', " ")).await {
                Ok(Some(user)) => {
                    let profile = serde_json::json!({
                        "pp_raw": user.pp_raw,
                        "pp_rank": user.pp_rank,
                        "playcount": user.playcount,
                    });
                    db.upsert_player(user.id(), &user.username, user.country.as_deref().unwrap_or(""), &profile)
                        .await
                        .ok()
                }
                Ok(None) => None,
                Err(e) => {
                    debug!(username, error = %e, "identity lookup failed");
                    None
                }
            };
            // Failures resolve themselves on the next roster snapshot
            let _ = tx.send(SessionEvent::ResolvedJoin { username, player }).await;
        });
    }

    async fn handle_resolved_join(&mut self, username: String, player: Option<PlayerRow>) -> Result<()> {
        let Some(player) = player else {
            return Ok(());
        };
        if self.lobby.roster.iter().any(|p| p.user_id == player.id) {
            return Ok(());
        }

        let rating = self.db.get_rating(player.rating_id(self.lobby.data.ruleset)).await?;
        self.lobby.roster.push(crate::lobby::state::RosterPlayer {
            user_id: player.id,
            username,
            is_host: false,
            display_rating: rating.display_rating,
            matches_finished: 0
        });
        self.lobby.recompute_median();

        // A join into a previously empty lobby needs a map on the board
        if self.lobby.roster.len() == 1 && self.lobby.data.kind != LobbyKind::Fresh {
            self.select_next_map().await?;
        }
        Ok(())
    }

    async fn handle_player_left(&mut self, username: &str) -> Result<()> {
        if let Some(player) = self.lobby.remove_from_roster(username) {
            if self.lobby.phase == Phase::Playing && self.lobby.participants.contains(&player.user_id) {
                // Leaving mid-attempt is a dodge; also counts as "scored"
                // so the AFK watchdog does not chase a ghost.
                self.lobby.dodgers.insert(player.user_id);
                self.lobby.scorers.insert(player.user_id);
            }
            self.lobby.votes.clear_kick(&player.username);
        }

        if self.lobby.roster.is_empty() {
            self.refresh_title().await?;
        }
        Ok(())
    }

    async fn handle_player_scored(&mut self, username: &str, score: i64) -> Result<()> {
        if self.lobby.phase != Phase::Playing {
            return Ok(());
        }
        if let Some(player) = self.lobby.find_player(username) {
            self.lobby.scorers.insert(player.user_id);
        }

        // Somebody being done while others idle at the results screen is
        // what stalls matches; watch for it from the first real score.
        if score > 0 && !self.lobby.afk_timer_running {
            self.lobby.afk_timer_running = true;
            self.arm_timer(TimerKind::Afk, AFK_TIMER);
        }
        Ok(())
    }

    async fn handle_match_started(&mut self) -> Result<()> {
        self.lobby.cancel_timers();
        self.lobby.reset_attempt();
        self.lobby.phase = Phase::Playing;
        self.lobby.data.save(&self.db, self.lobby.match_id).await?;
        // Fresh snapshot for the participant set
        self.say(&mp::settings()).await?;
        Ok(())
    }

    async fn handle_match_finished(&mut self) -> Result<()> {
        self.lobby.cancel_timers();
        self.lobby.phase = Phase::Finishing;
        self.lobby.credit_finished_attempt();

        // Keep the lobby moving; results are collected in the background.
        self.select_next_map().await?;
        self.spawn_result_poll();
        Ok(())
    }

    // --- Timers ---

    fn arm_timer(&self, kind: TimerKind, delay: Duration) {
        let tx = self.tx.clone();
        let generation = self.lobby.timer_generation;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(SessionEvent::Timer { kind, generation }).await;
        });
    }

    async fn handle_timer(&mut self, kind: TimerKind, generation: u64) -> Result<()> {
        if generation != self.lobby.timer_generation {
            // Armed before a cancellation point; ignore.
            return Ok(());
        }

        match kind {
            TimerKind::CountdownStage1 => {
                if self.lobby.phase == Phase::Playing {
                    self.lobby.countdown_running = false;
                    return Ok(());
                }
                self.say("Starting the match in 10 seconds... Ready up to start sooner.").await?;
                self.arm_timer(TimerKind::CountdownStage2, COUNTDOWN_STAGE2);
            }
            TimerKind::CountdownStage2 => {
                self.lobby.countdown_running = false;
                if self.lobby.phase != Phase::Playing {
                    self.say(&mp::start()).await?;
                }
            }
            TimerKind::Afk => {
                if self.lobby.phase != Phase::Playing {
                    self.lobby.afk_timer_running = false;
                    return Ok(());
                }
                match afk_check(&self.lobby.participants, &self.lobby.scorers) {
                    AfkAction::Kick { user_id } => {
                        self.lobby.afk_timer_running = false;
                        if let Some(player) = self.lobby.roster.iter().find(|p| p.user_id == user_id) {
                            let name = player.username.clone();
                            self.say(&mp::kick(&name)).await?;
                        }
                        // Forced kick, not a dodge
                        self.lobby.participants.retain(|p| *p != user_id);
                    }
                    AfkAction::Rearm => {
                        // More than one missing score is lag, not one
                        // player holding the lobby hostage.
                        self.arm_timer(TimerKind::Afk, AFK_TIMER);
                    }
                    AfkAction::Nothing => {
                        self.lobby.afk_timer_running = false;
                    }
                }
            }
        }
        Ok(())
    }

    // --- Chat commands ---

    async fn handle_chat(&mut self, sender: &str, text: &str) -> Result<()> {
        let context = self.lobby.data.context();
        let privileged = self.lobby.is_privileged(sender);

        match dispatch(text, context, privileged) {
            Dispatch::Run(command) => self.run_command(sender, command).await,
            Dispatch::Unauthorized => {
                self.reply(sender, "You need to be the lobby creator to use this command.").await
            }
            Dispatch::RedirectToDm => {
                self.reply(sender, "Send that to me in a private message instead.").await
            }
            // RedirectToLobby can only come out of a DM context
            Dispatch::RedirectToLobby | Dispatch::Ignore | Dispatch::NotACommand => Ok(())
        }
    }

    async fn run_command(&mut self, sender: &str, command: Command) -> Result<()> {
        match command {
            Command::Ranked { ruleset_text } => self.cmd_ranked(sender, &ruleset_text).await,
            Command::Collection { collection_id } => self.cmd_collection(sender, collection_id).await,
            Command::About => self.cmd_about().await,
            Command::Discord => {
                let url = self.config.discord_invite_url.clone();
                self.reply(sender, &format!("[{url} Come hang out in voice chat!] (or just text, no pressure)"))
                    .await
            }
            Command::Rank { username } => {
                let target = username.unwrap_or_else(|| sender.to_string());
                self.cmd_rank(sender, &target).await
            }
            Command::Abort => self.cmd_abort(sender).await,
            Command::Start => self.cmd_start().await,
            Command::Wait => self.cmd_wait().await,
            Command::Ban { target } => self.cmd_ban(sender, &target).await,
            Command::Skip => self.cmd_skip(sender).await,
            // Dispatch only yields Join in a direct-message context
            Command::Join { .. } => Ok(())
        }
    }

    async fn cmd_ranked(&mut self, sender: &str, ruleset_text: &str) -> Result<()> {
        let Some(ruleset) = Ruleset::from_user_input(ruleset_text) else {
            return self
                .reply(
                    sender,
                    &format!(
                        "Invalid ruleset \"{ruleset_text}\". Please choose one of \"osu\", \"taiko\", \"catch\" or \"mania\"."
                    )
                )
                .await;
        };

        self.lobby.data.kind = LobbyKind::Ranked;
        self.lobby.data.ruleset = ruleset;
        self.lobby.data.save(&self.db, self.lobby.match_id).await?;
        self.lobby.created_just_now = true;
        self.init_fresh_lobby().await
    }

    async fn cmd_collection(&mut self, sender: &str, collection_id: i64) -> Result<()> {
        match self.load_collection(collection_id).await {
            Ok(count) => {
                self.lobby.data.kind = LobbyKind::Collection;
                self.lobby.data.collection_id = Some(collection_id);
                self.lobby.data.save(&self.db, self.lobby.match_id).await?;
                self.lobby.created_just_now = true;
                self.say(&format!("Loaded {count} maps from collection #{collection_id}.")).await?;
                self.init_fresh_lobby().await
            }
            Err(e) => {
                self.reply(sender, &format!("Failed to load collection: {e}")).await
            }
        }
    }

    async fn load_collection(&mut self, collection_id: i64) -> Result<i64> {
        let collection = self.api.get_collection(collection_id).await?;
        for map_id in collection.beatmap_ids() {
            if self.ensure_map(map_id).await.is_ok() {
                self.db.add_collection_map(collection_id, map_id).await?;
            }
        }
        self.db.collection_size(collection_id).await
    }

    /// Fresh lobby configuration, issued once after !ranked or
    /// !collection.
    async fn init_fresh_lobby(&mut self) -> Result<()> {
        self.say(&mp::settings()).await?;
        self.say(&mp::clear_host()).await?;
        self.say(&mp::clear_password()).await?;
        self.say(&mp::freemod()).await?;
        self.say(&mp::default_settings()).await?;
        Ok(())
    }

    async fn cmd_about(&mut self) -> Result<()> {
        let url = &self.config.discord_invite_url;
        let text = match self.lobby.data.kind {
            LobbyKind::Collection => format!(
                "This lobby will auto-select maps of a specific collection from osu!collector. All commands and answers to your questions are [{url} in the Discord.]"
            ),
            LobbyKind::Ranked => format!(
                "In this lobby, you get a rank based on how often you pass maps with 95% accuracy. All commands and answers to your questions are [{url} in the Discord.]"
            ),
            LobbyKind::Fresh => "Send '!ranked <ruleset>' or '!collection <id>' to get started.".to_string()
        };
        self.say(&text).await
    }

    async fn cmd_rank(&mut self, sender: &str, target: &str) -> Result<()> {
        let player = match self.db.get_player_by_username(&target.replace('_', " ")).await? {
            Some(player) => Some(player),
            None => self.ensure_player_by_name(target).await.ok()
        };
        let Some(player) = player else {
            return self.reply(sender, &format!("{target} hasn't played in a ranked lobby yet.")).await;
        };

        let ruleset = self.lobby.data.ruleset;
        let rating = self.db.get_rating(player.rating_id(ruleset)).await?;
        if rating.evidence_count < MIN_RANKED_EVIDENCE {
            return self.reply(sender, &format!("{target} hasn't played in a ranked lobby yet.")).await;
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
        self.reply(sender, &text).await
    }

    async fn cmd_abort(&mut self, sender: &str) -> Result<()> {
        if self.lobby.phase != Phase::Playing {
            return self.reply(sender, "The match has not started, cannot abort.").await;
        }
        let Some(voter) = self.lobby.find_player(sender).map(|p| p.user_id) else {
            return Ok(());
        };

        let (tally, needed, passed) = self.lobby.votes.vote_abort(voter, self.lobby.roster.len());
        if passed {
            self.lobby.votes.clear_abort();
            self.say(&mp::abort()).await?;
            self.lobby.phase = Phase::Idle;
            self.select_next_map().await?;
        } else {
            self.say(&format!("{sender} voted to abort the match. {tally}/{needed} votes needed."))
                .await?;
        }
        Ok(())
    }

    async fn cmd_start(&mut self) -> Result<()> {
        if self.lobby.countdown_running || self.lobby.phase == Phase::Playing {
            return Ok(());
        }

        if self.lobby.roster.len() < 2 {
            return self.say(&mp::start()).await;
        }

        self.lobby.countdown_running = true;
        self.arm_timer(TimerKind::CountdownStage1, COUNTDOWN_STAGE1);
        self.say("Starting the match in 30 seconds... Ready up to start sooner.").await
    }

    async fn cmd_wait(&mut self) -> Result<()> {
        if !self.lobby.countdown_running {
            return Ok(());
        }
        self.lobby.cancel_timers();
        self.say("Match auto-start is cancelled. Type !start to restart it.").await
    }

    async fn cmd_ban(&mut self, sender: &str, target: &str) -> Result<()> {
        let Some(voter) = self.lobby.find_player(sender).map(|p| p.user_id) else {
            return Ok(());
        };

        let (tally, needed, passed) = self.lobby.votes.vote_kick(voter, target, self.lobby.roster.len());
        if passed {
            self.say(&mp::ban(target)).await?;
        } else {
            self.say(&format!("{sender} voted to ban {target}. {tally}/{needed} votes needed."))
                .await?;
        }
        Ok(())
    }

    async fn cmd_skip(&mut self, sender: &str) -> Result<()> {
        // A map nobody can download gets skipped for free
        if let Some(map) = self.lobby.current_map.clone() {
            if let Ok(Some(beatmap)) = self.api.get_beatmap(map.id).await {
                if beatmap.download_unavailable() {
                    self.lobby.cancel_timers();
                    self.db.set_map_takedown(map.id, true).await?;
                    self.select_next_map().await?;
                    self.say("Skipped previous map because download was unavailable.").await?;
                    return Ok(());
                }
            }
        }

        let Some(player) = self.lobby.find_player_mut(sender) else {
            return Ok(());
        };

        if player.matches_finished >= SKIP_MATCHES_REQUIRED {
            player.matches_finished = 0;
            self.select_next_map().await
        } else {
            let remaining = SKIP_MATCHES_REQUIRED - player.matches_finished;
            self.reply(sender, &format!("You need to play {remaining} more matches in this lobby before you can skip."))
                .await
        }
    }

    // --- Map selection ---

    async fn select_next_map(&mut self) -> Result<()> {
        self.lobby.votes.clear_abort();
        self.lobby.cancel_timers();

        let picked = match self.lobby.data.kind {
            LobbyKind::Collection => {
                let Some(id) = self.lobby.data.collection_id else {
                    return Ok(());
                };
                self.selector.pick_from_collection(id).await?.map(|m| (m, PickKind::Pooled))
            }
            LobbyKind::Ranked => {
                self.selector.pick(self.lobby.data.ruleset, self.lobby.median_display).await?
            }
            LobbyKind::Fresh => None
        };

        let Some((map, kind)) = picked else {
            warn!(channel = %self.lobby.channel, "no map available to select");
            return Ok(());
        };

        if kind == PickKind::Exhausted {
            warn!(channel = %self.lobby.channel, "map pool exhausted for this rating range");
        }

        self.say(&mp::change_map(map.id, map.ruleset)).await?;
        let link = format!("[https://osu.ppy.sh/beatmaps/{} {}]", map.id, map.title);
        let downloads = format!(
            "[https://beatconnect.io/b/{} [1]] [https://api.nerinyan.moe/d/{} [2]] [https://osu.sayobot.cn/osu.php?s={} [3]]",
            map.set_id, map.set_id, map.set_id
        );
        self.say(&format!("{link} ({:.2}*) Alternate downloads: {downloads}", map.stars)).await?;

        self.lobby.current_map = Some(map);
        self.refresh_title().await
    }

    async fn refresh_title(&mut self) -> Result<()> {
        let desired = self.lobby.desired_title();
        if self.lobby.title != desired {
            self.say(&mp::rename(&desired)).await?;
            self.lobby.title = desired;
        }
        Ok(())
    }

    // --- Results ---

    fn spawn_result_poll(&self) {
        let api = self.api.clone();
        let tx = self.tx.clone();
        let match_id = self.lobby.match_id;
        let last_game_id = self.lobby.last_game_id;

        tokio::spawn(async move {
            for attempt in 0..RESULT_POLL_ATTEMPTS {
                tokio::time::sleep(RESULT_POLL_DELAY).await;
                match api.get_match(match_id).await {
                    Ok(dto) => {
                        if dto.games.iter().any(|g| g.is_finished() && g.id() > last_game_id) {
                            let _ = tx.send(SessionEvent::Results { attempt: Box::new(dto) }).await;
                            return;
                        }
                        debug!(match_id, attempt, "results not published yet");
                    }
                    Err(e) => debug!(match_id, attempt, error = %e, "result fetch failed")
                }
            }
            let _ = tx.send(SessionEvent::ResultsFailed).await;
        });
    }

    async fn handle_results(&mut self, attempt: MatchDto) -> Result<()> {
        let new_games = new_finished_games(&attempt, self.lobby.last_game_id);
        for game in new_games {
            self.process_one_game(game).await?;
            self.lobby.last_game_id = game.id();
        }
        if self.lobby.phase == Phase::Finishing {
            self.lobby.phase = Phase::Idle;
        }
        Ok(())
    }

    async fn process_one_game(&mut self, game: &GameDto) -> Result<()> {
        let ruleset = game.ruleset();
        let map = self.ensure_map(game.map_id()).await?;
        let now = Utc::now();

        let game_row = GameRow {
            id: game.id(),
            match_id: self.lobby.match_id,
            start_time: game.start_time.as_deref().and_then(parse_api_time).unwrap_or(now),
            end_time: game.end_time.as_deref().and_then(parse_api_time).unwrap_or(now),
            map_id: map.id,
            ruleset,
            scoring_type: game.scoring_type.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0),
            team_type: game.team_type.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0),
            mods: game.mods()
        };
        if !self.db.insert_game(&game_row).await? {
            // Already recorded, nothing new to fold
            return Ok(());
        }

        let game_mods = game.mods();
        let mut score_rows: Vec<ScoreRow> = Vec::new();
        for dto in &game.scores {
            let player = match self.ensure_player_by_id(dto.player_id(), "").await {
                Ok(player) => player,
                Err(e) => {
                    warn!(player_id = dto.player_id(), error = %e, "skipping score for unknown player");
                    continue;
                }
            };
            let accuracy = dto.accuracy(ruleset);
            let dodged = self.lobby.dodgers.contains(&player.id);
            score_rows.push(ScoreRow {
                game_id: game_row.id,
                player_id: player.id,
                ruleset,
                accuracy,
                score: dto.total_score(),
                max_combo: dto.maxcombo.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0),
                count_50: dto.count50.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0),
                count_100: dto.count100.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0),
                count_300: dto.count300.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0),
                count_miss: dto.countmiss.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0),
                count_geki: dto.countgeki.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0),
                count_katu: dto.countkatu.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0),
                perfect: dto.perfect_combo(),
                passed: dto.passed(),
                dodged,
                mods: dto.mods(game_mods),
                created_at: now,
                map_id: map.id,
                won: won(dto.passed(), dodged, accuracy)
            });
        }

        // Dodgers who left before the API saw any score of theirs still
        // get a zeroed, dodged score on the books.
        for user_id in self.lobby.dodgers.clone() {
            if score_rows.iter().any(|s| s.player_id == user_id) {
                continue;
            }
            if self.db.get_player(user_id).await?.is_none() {
                continue;
            }
            score_rows.push(ScoreRow {
                game_id: game_row.id,
                player_id: user_id,
                ruleset,
                accuracy: 0.0,
                score: 0,
                max_combo: 0,
                count_50: 0,
                count_100: 0,
                count_300: 0,
                count_miss: 0,
                count_geki: 0,
                count_katu: 0,
                perfect: false,
                passed: false,
                dodged: true,
                mods: game_mods,
                created_at: now,
                map_id: map.id,
                won: false
            });
        }

        for row in &score_rows {
            self.db.insert_score(row).await?;
        }

        let changes = self.engine.process_game(&game_row, &score_rows).await?;
        for message in format_rank_updates(&changes, &self.config.website_base_url) {
            self.say(&message).await?;
        }
        Ok(())
    }

    // --- Shared helpers ---

    async fn ensure_player_by_id(&self, user_id: i64, username_hint: &str) -> Result<PlayerRow> {
        if let Some(player) = self.db.get_player(user_id).await? {
            return Ok(player);
        }

        let user = self
            .api
            .get_user_by_id(user_id)
            .await?
            .ok_or(crate::error::BotError::UnknownUser)?;
        let profile = serde_json::json!({
            "pp_raw": user.pp_raw,
            "pp_rank": user.pp_rank,
            "playcount": user.playcount,
        });
        let name = if user.username.is_empty() { username_hint } else { &user.username };
        self.db
            .upsert_player(user.id(), name, user.country.as_deref().unwrap_or(""), &profile)
            .await
    }

    async fn ensure_player_by_name(&self, username: &str) -> Result<PlayerRow> {
        let user = self
            .api
            .get_user(&username.replace('_', " "))
            .await?
            .ok_or(crate::error::BotError::UnknownUser)?;
        self.ensure_player_by_id(user.id(), &user.username).await
    }

    async fn ensure_map(&self, map_id: i64) -> Result<crate::database::db_structs::MapRow> {
        if let Some(map) = self.db.get_map(map_id).await? {
            return Ok(map);
        }

        let beatmap = self
            .api
            .get_beatmap(map_id)
            .await?
            .ok_or(crate::error::BotError::MalformedPayload)?;
        self.db
            .insert_map_if_missing(&crate::database::db_structs::MapRow {
                id: beatmap.id(),
                title: beatmap.display_title(),
                ruleset: beatmap.ruleset(),
                stars: beatmap.stars(),
                circle_size: beatmap.circle_size(),
                set_id: beatmap.set_id(),
                length_seconds: beatmap.length_seconds(),
                ranked_status: beatmap.ranked_status(),
                takedown: false,
                rating_id: 0,
                pool_admitted_at: None
            })
            .await
    }

    async fn say(&self, text: &str) -> Result<()> {
        self.sink.send_channel(&self.lobby.channel, text).await
    }

    async fn reply(&self, sender: &str, text: &str) -> Result<()> {
        self.say(&format!("{sender}: {text}")).await
    }
}

/// Completed games not yet folded into ratings, oldest first.
fn new_finished_games(attempt: &MatchDto, last_game_id: i64) -> Vec<&GameDto> {
    attempt
        .games
        .iter()
        .filter(|g| g.is_finished() && g.id() > last_game_id)
        .sorted_by_key(|g| g.id())
        .collect()
}

/// Bancho truncates long lines, so division changes go out in chunks.
fn format_rank_updates(changes: &[DivisionChange], website_base_url: &str) -> Vec<String> {
    if changes.is_empty() {
        return Vec::new();
    }

    let rendered: Vec<String> = changes
        .iter()
        .map(|c| {
            let arrow = if c.promoted { "▲" } else { "▼" };
            format!("{} [{website_base_url}/u/{}/ {arrow} {} ]", c.username, c.player_id, c.new_label)
        })
        .collect();

    rendered
        .chunks(RANK_UPDATES_PER_MESSAGE)
        .enumerate()
        .map(|(i, chunk)| {
            if i == 0 {
                format!("Rank updates: {}", chunk.join(" | "))
            } else {
                chunk.join(" | ")
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::api_structs::MatchInfoDto;

    fn game(id: i64, finished: bool) -> GameDto {
        GameDto {
            game_id: id.to_string(),
            start_time: Some("2024-03-01 18:00:00".to_string()),
            end_time: finished.then(|| "2024-03-01 18:05:00".to_string()),
            beatmap_id: "75".to_string(),
            play_mode: Some("0".to_string()),
            scoring_type: Some("0".to_string()),
            team_type: Some("0".to_string()),
            mods: Some("0".to_string()),
            scores: vec![]
        }
    }

    fn change(username: &str, promoted: bool) -> DivisionChange {
        DivisionChange {
            player_id: 1,
            username: username.to_string(),
            new_label: "Gold".to_string(),
            promoted
        }
    }

    #[test]
    fn test_new_finished_games_filters_and_sorts() {
        let attempt = MatchDto {
            info: MatchInfoDto {
                match_id: "1".to_string(),
                name: None,
                start_time: None,
                end_time: None
            },
            games: vec![game(30, true), game(10, true), game(20, true), game(40, false)]
        };

        let new = new_finished_games(&attempt, 10);
        let ids: Vec<i64> = new.iter().map(|g| g.id()).collect();
        // 10 already processed, 40 unfinished
        assert_eq!(ids, vec![20, 30]);
    }

    #[test]
    fn test_rank_updates_chunking() {
        let changes: Vec<DivisionChange> = (0..8)
            .map(|i| change(&format!("player{i}"), i % 2 == 0))
            .collect();
        let messages = format_rank_updates(&changes, "https://example.com");

        assert_eq!(messages.len(), 2);
        assert!(messages[0].starts_with("Rank updates: "));
        assert_eq!(messages[0].matches(" | ").count(), 5);
        assert!(!messages[1].starts_with("Rank updates: "));
        assert!(messages[0].contains('▲'));
        assert!(messages[0].contains('▼'));
    }

    #[test]
    fn test_no_rank_updates_no_messages() {
        assert!(format_rank_updates(&[], "https://example.com").is_empty());
    }
}
