/// One parsed slot line from a roster snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub slot: u32,
    /// Raw state text, e.g. "Not Ready" or "No Map".
    pub state: String,
    pub user_id: i64,
    pub username: String,
    pub is_host: bool
}

/// Everything the lobby state machine reacts to, decoded from system
/// announcements in a multiplayer channel.
#[derive(Debug, Clone, PartialEq)]
pub enum BanchoEvent {
    HostCleared,
    MatchStarted,
    MatchFinished,
    MatchAborted,
    AllReady,
    PasswordChanged,
    PasswordRemoved,
    RoomName { name: String, match_id: i64 },
    RoomRenamed { name: String },
    BeatmapAnnounced { map_id: i64, title: String },
    RefChangedBeatmap { map_id: i64, title: String },
    PlayerChangedBeatmap { map_id: i64, title: String },
    TeamModeDeclared { team_mode: String, win_condition: String },
    ActiveMods { mods: String },
    /// Consolidated snapshot, emitted once the slot burst announced by the
    /// player-count header has fully arrived.
    RosterReady { slots: Vec<SlotInfo> },
    RefereeAdded { username: String },
    RefereeRemoved { username: String },
    NewHost { username: String },
    PlayerJoined { username: String, slot: u32 },
    PlayerLeft { username: String },
    /// Live per-player result line at the end of their play.
    PlayerScored { username: String, score: i64, passed: bool },
    /// Anything that matched no template, or came from a regular player.
    ChatMessage { sender: String, text: String }
}
