use super::events::{BanchoEvent, SlotInfo};

const SYSTEM_SENDER: &str = "BanchoBot";
const BEATMAP_URL: &str = "https://osu.ppy.sh/b/";
const USER_URL: &str = "https://osu.ppy.sh/u/";
const HISTORY_SEP: &str = ", History: https://osu.ppy.sh/mp/";

/// Decodes system announcements one line at a time, in arrival order.
///
/// Stateful only for roster snapshots: the "Players: N" header opens a
/// burst of N slot lines which are buffered and emitted as one
/// consolidated event. Everything unrecognized falls through as chat, so
/// decoding never fails.
#[derive(Debug, Default)]
pub struct LineDecoder {
    slots_expected: usize,
    pending_slots: Vec<SlotInfo>
}

impl LineDecoder {
    pub fn new() -> LineDecoder {
        LineDecoder::default()
    }

    pub fn decode(&mut self, sender: &str, text: &str) -> Option<BanchoEvent> {
        if sender != SYSTEM_SENDER {
            return Some(BanchoEvent::ChatMessage {
                sender: sender.to_string(),
                text: text.to_string()
            });
        }

        match self.decode_system(text) {
            Step::Event(event) => Some(event),
            Step::Consumed => None,
            Step::Unrecognized => {
                if self.slots_expected > 0 {
                    // A line inside the burst that parsed as nothing:
                    // count it so the snapshot still completes, minus the
                    // dropped slot.
                    return self.drop_pending_slot();
                }
                Some(BanchoEvent::ChatMessage {
                    sender: sender.to_string(),
                    text: text.to_string()
                })
            }
        }
    }

    fn drop_pending_slot(&mut self) -> Option<BanchoEvent> {
        self.slots_expected -= 1;
        if self.slots_expected == 0 {
            return Some(BanchoEvent::RosterReady {
                slots: std::mem::take(&mut self.pending_slots)
            });
        }
        None
    }

    fn decode_system(&mut self, text: &str) -> Step {
        match text {
            "Cleared match host" => return Step::Event(BanchoEvent::HostCleared),
            "The match has started!" => return Step::Event(BanchoEvent::MatchStarted),
            "The match has finished!" => return Step::Event(BanchoEvent::MatchFinished),
            "Aborted the match" => return Step::Event(BanchoEvent::MatchAborted),
            "All players are ready" => return Step::Event(BanchoEvent::AllReady),
            "Changed the match password" => return Step::Event(BanchoEvent::PasswordChanged),
            "Removed the match password" => return Step::Event(BanchoEvent::PasswordRemoved),
            _ => {}
        }

        if let Some(rest) = text.strip_prefix("Players: ") {
            let Some(count) = rest.trim().parse::<usize>().ok() else {
                return Step::Unrecognized;
            };
            self.slots_expected = count;
            self.pending_slots = Vec::with_capacity(count);
            if count == 0 {
                return Step::Event(BanchoEvent::RosterReady { slots: Vec::new() });
            }
            return Step::Consumed;
        }
        if let Some(rest) = text.strip_prefix("Slot ") {
            return match Self::parse_slot(rest) {
                Some(info) => self.accept_slot(info),
                None => Step::Unrecognized
            };
        }

        match Self::parse_template(text) {
            Some(event) => Step::Event(event),
            None => Step::Unrecognized
        }
    }

    fn accept_slot(&mut self, info: SlotInfo) -> Step {
        if self.slots_expected == 0 {
            // Snapshot we never asked for; surface the line on its own.
            return Step::Event(BanchoEvent::RosterReady { slots: vec![info] });
        }

        self.pending_slots.push(info);
        self.slots_expected -= 1;
        if self.slots_expected == 0 {
            return Step::Event(BanchoEvent::RosterReady {
                slots: std::mem::take(&mut self.pending_slots)
            });
        }
        Step::Consumed
    }

    fn parse_template(text: &str) -> Option<BanchoEvent> {
        if let Some(rest) = text.strip_prefix("Room name: ") {
            let (name, id) = rest.split_once(HISTORY_SEP)?;
            return Some(BanchoEvent::RoomName {
                name: name.to_string(),
                match_id: id.trim().parse().ok()?
            });
        }
        if let Some(rest) = text.strip_prefix("Room name updated to \"") {
            let name = rest.strip_suffix('"')?;
            return Some(BanchoEvent::RoomRenamed { name: name.to_string() });
        }
        if let Some(rest) = text.strip_prefix("Beatmap: ") {
            let rest = rest.strip_prefix(BEATMAP_URL)?;
            let (id, title) = rest.split_once(' ')?;
            return Some(BanchoEvent::BeatmapAnnounced {
                map_id: id.parse().ok()?,
                title: title.to_string()
            });
        }
        if let Some(rest) = text.strip_prefix("Changed beatmap to ") {
            let rest = rest.strip_prefix(BEATMAP_URL)?;
            let (id, title) = rest.split_once(' ')?;
            return Some(BanchoEvent::RefChangedBeatmap {
                map_id: id.parse().ok()?,
                title: title.to_string()
            });
        }
        if let Some(rest) = text.strip_prefix("Beatmap changed to: ") {
            let rest = rest.strip_suffix(')')?;
            let (title, id) = rest.rsplit_once(&format!("({BEATMAP_URL}"))?;
            return Some(BanchoEvent::PlayerChangedBeatmap {
                map_id: id.parse().ok()?,
                title: title.trim_end().to_string()
            });
        }
        if let Some(rest) = text.strip_prefix("Team mode: ") {
            let (team_mode, win_condition) = rest.split_once(", Win condition: ")?;
            return Some(BanchoEvent::TeamModeDeclared {
                team_mode: team_mode.to_string(),
                win_condition: win_condition.to_string()
            });
        }
        if let Some(rest) = text.strip_prefix("Active mods: ") {
            return Some(BanchoEvent::ActiveMods { mods: rest.to_string() });
        }
        if let Some(rest) = text.strip_prefix("Added ") {
            let username = rest.strip_suffix(" to the match referees")?;
            return Some(BanchoEvent::RefereeAdded {
                username: username.to_string()
            });
        }
        if let Some(rest) = text.strip_prefix("Removed ") {
            let username = rest.strip_suffix(" from the match referees")?;
            return Some(BanchoEvent::RefereeRemoved {
                username: username.to_string()
            });
        }
        if let Some(username) = text.strip_suffix(" became the host.") {
            return Some(BanchoEvent::NewHost {
                username: username.to_string()
            });
        }
        if let Some(idx) = text.find(" joined in slot ") {
            let username = &text[..idx];
            let tail = &text[idx + " joined in slot ".len()..];
            let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
            return Some(BanchoEvent::PlayerJoined {
                username: username.to_string(),
                slot: digits.parse().ok()?
            });
        }
        if let Some(username) = text.strip_suffix(" left the game.") {
            return Some(BanchoEvent::PlayerLeft {
                username: username.to_string()
            });
        }
        if let Some(idx) = text.find(" finished playing (Score: ") {
            let username = &text[..idx];
            let tail = &text[idx + " finished playing (Score: ".len()..];
            let (score, status) = tail.strip_suffix(").")?.split_once(", ")?;
            return Some(BanchoEvent::PlayerScored {
                username: username.to_string(),
                score: score.parse().ok()?,
                passed: status == "PASSED"
            });
        }

        None
    }

    /// Slot lines look like
    /// `Slot 1  Not Ready https://osu.ppy.sh/u/123 username         [Host / Hidden]`
    /// with the username padded to a 16 character field before the
    /// attribute list.
    fn parse_slot(rest: &str) -> Option<SlotInfo> {
        let url_idx = rest.find(USER_URL)?;
        let head = rest[..url_idx].trim();
        let (slot_str, state) = head.split_once(char::is_whitespace)?;
        let slot: u32 = slot_str.parse().ok()?;

        let tail = &rest[url_idx + USER_URL.len()..];
        let (id_str, name_part) = tail.split_once(' ')?;
        let user_id: i64 = id_str.parse().ok()?;

        let (username, attrs) = if name_part.len() > 16 {
            name_part.split_at(16)
        } else {
            (name_part, "")
        };

        Some(SlotInfo {
            slot,
            state: state.trim().to_string(),
            user_id,
            username: username.trim_end().to_string(),
            is_host: attrs.contains("Host")
        })
    }
}

enum Step {
    Event(BanchoEvent),
    Consumed,
    Unrecognized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system(decoder: &mut LineDecoder, text: &str) -> Option<BanchoEvent> {
        decoder.decode("BanchoBot", text)
    }

    #[test]
    fn test_fixed_announcements() {
        let mut d = LineDecoder::new();
        assert_eq!(system(&mut d, "The match has started!"), Some(BanchoEvent::MatchStarted));
        assert_eq!(system(&mut d, "The match has finished!"), Some(BanchoEvent::MatchFinished));
        assert_eq!(system(&mut d, "Aborted the match"), Some(BanchoEvent::MatchAborted));
        assert_eq!(system(&mut d, "All players are ready"), Some(BanchoEvent::AllReady));
        assert_eq!(system(&mut d, "Cleared match host"), Some(BanchoEvent::HostCleared));
    }

    #[test]
    fn test_room_name() {
        let mut d = LineDecoder::new();
        let event = system(&mut d, "Room name: 4-5* | o!RL | Auto map select, History: https://osu.ppy.sh/mp/108732790");
        assert_eq!(
            event,
            Some(BanchoEvent::RoomName {
                name: "4-5* | o!RL | Auto map select".to_string(),
                match_id: 108732790
            })
        );
    }

    #[test]
    fn test_beatmap_lines() {
        let mut d = LineDecoder::new();
        assert_eq!(
            system(&mut d, "Beatmap: https://osu.ppy.sh/b/75 peppy - test [Normal]"),
            Some(BanchoEvent::BeatmapAnnounced {
                map_id: 75,
                title: "peppy - test [Normal]".to_string()
            })
        );
        assert_eq!(
            system(&mut d, "Changed beatmap to https://osu.ppy.sh/b/75 peppy - test [Normal]"),
            Some(BanchoEvent::RefChangedBeatmap {
                map_id: 75,
                title: "peppy - test [Normal]".to_string()
            })
        );
        assert_eq!(
            system(&mut d, "Beatmap changed to: peppy - test [Normal] (https://osu.ppy.sh/b/75)"),
            Some(BanchoEvent::PlayerChangedBeatmap {
                map_id: 75,
                title: "peppy - test [Normal]".to_string()
            })
        );
    }

    #[test]
    fn test_join_and_leave() {
        let mut d = LineDecoder::new();
        assert_eq!(
            system(&mut d, "Some Player joined in slot 3."),
            Some(BanchoEvent::PlayerJoined {
                username: "Some Player".to_string(),
                slot: 3
            })
        );
        assert_eq!(
            system(&mut d, "Some Player left the game."),
            Some(BanchoEvent::PlayerLeft {
                username: "Some Player".to_string()
            })
        );
    }

    #[test]
    fn test_slot_burst_consolidates() {
        let mut d = LineDecoder::new();
        assert_eq!(system(&mut d, "Players: 2"), None);
        assert_eq!(
            system(&mut d, "Slot 1  Not Ready https://osu.ppy.sh/u/123 alice            [Host / Hidden]"),
            None
        );
        let event = system(&mut d, "Slot 2  No Map    https://osu.ppy.sh/u/456 bob");
        let Some(BanchoEvent::RosterReady { slots }) = event else {
            panic!("expected roster, got {event:?}");
        };
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].user_id, 123);
        assert_eq!(slots[0].username, "alice");
        assert!(slots[0].is_host);
        assert_eq!(slots[0].state, "Not Ready");
        assert_eq!(slots[1].user_id, 456);
        assert_eq!(slots[1].username, "bob");
        assert!(!slots[1].is_host);
    }

    #[test]
    fn test_empty_roster_is_immediate() {
        let mut d = LineDecoder::new();
        assert_eq!(system(&mut d, "Players: 0"), Some(BanchoEvent::RosterReady { slots: vec![] }));
    }

    #[test]
    fn test_garbled_slot_line_is_dropped_from_snapshot() {
        let mut d = LineDecoder::new();
        assert_eq!(system(&mut d, "Players: 2"), None);
        assert_eq!(system(&mut d, "Slot 1  Not Ready https://osu.ppy.sh/u/123 alice"), None);
        let event = system(&mut d, "Slot 2  Not Ready https://osu.ppy.sh/u/garbage bob");
        let Some(BanchoEvent::RosterReady { slots }) = event else {
            panic!("expected roster, got {event:?}");
        };
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].username, "alice");
    }

    #[test]
    fn test_unmatched_line_is_chat() {
        let mut d = LineDecoder::new();
        assert_eq!(
            system(&mut d, "Good luck, have fun!"),
            Some(BanchoEvent::ChatMessage {
                sender: "BanchoBot".to_string(),
                text: "Good luck, have fun!".to_string()
            })
        );
    }

    #[test]
    fn test_player_chat_bypasses_templates() {
        let mut d = LineDecoder::new();
        assert_eq!(
            d.decode("alice", "The match has started!"),
            Some(BanchoEvent::ChatMessage {
                sender: "alice".to_string(),
                text: "The match has started!".to_string()
            })
        );
    }

    #[test]
    fn test_score_line() {
        let mut d = LineDecoder::new();
        assert_eq!(
            system(&mut d, "alice finished playing (Score: 123456, PASSED)."),
            Some(BanchoEvent::PlayerScored {
                username: "alice".to_string(),
                score: 123456,
                passed: true
            })
        );
        assert_eq!(
            system(&mut d, "bob finished playing (Score: 0, FAILED)."),
            Some(BanchoEvent::PlayerScored {
                username: "bob".to_string(),
                score: 0,
                passed: false
            })
        );
    }

    #[test]
    fn test_referee_changes() {
        let mut d = LineDecoder::new();
        assert_eq!(
            system(&mut d, "Added ranking bot to the match referees"),
            Some(BanchoEvent::RefereeAdded {
                username: "ranking bot".to_string()
            })
        );
        assert_eq!(
            system(&mut d, "Removed ranking bot from the match referees"),
            Some(BanchoEvent::RefereeRemoved {
                username: "ranking bot".to_string()
            })
        );
    }
}
