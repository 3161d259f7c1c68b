/// Where a chat message arrived from, which decides which commands apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    /// Direct message to the bot.
    Dm,
    /// Joined lobby that has not been configured yet.
    Fresh,
    Collection,
    Ranked
}

impl Context {
    fn is_lobby(self) -> bool {
        self != Context::Dm
    }
}

/// A fully parsed command, ready for the session to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join { match_id: i64 },
    Collection { collection_id: i64 },
    Ranked { ruleset_text: String },
    About,
    Discord,
    Rank { username: Option<String> },
    Abort,
    Start,
    Wait,
    Ban { target: String },
    Skip
}

/// Dispatch decision. Matching is final: a matched pattern never falls
/// through to a later entry, whatever the context or authorization says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Run(Command),
    /// Creator-only command from someone who is neither creator nor host.
    Unauthorized,
    /// Direct-message-only command sent inside a lobby.
    RedirectToDm,
    /// Lobby-only command sent as a direct message.
    RedirectToLobby,
    /// Matched, but not meaningful in this context; swallow it.
    Ignore,
    NotACommand
}

#[derive(Debug, Clone, Copy)]
enum Pattern {
    Exact(&'static str),
    Prefix(&'static str)
}

impl Pattern {
    /// Returns the argument remainder on a match.
    fn matches<'t>(&self, text: &'t str) -> Option<&'t str> {
        match self {
            Pattern::Exact(p) => (text == *p).then_some(""),
            Pattern::Prefix(p) => text.strip_prefix(p)
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Join,
    Collection,
    Ranked,
    About,
    Discord,
    Rank,
    Abort,
    Start,
    Wait,
    Ban,
    Skip
}

struct CommandSpec {
    pattern: Pattern,
    contexts: &'static [Context],
    creator_only: bool,
    kind: Kind
}

const EVERYWHERE: &[Context] = &[Context::Dm, Context::Fresh, Context::Collection, Context::Ranked];
const IN_GAME: &[Context] = &[Context::Collection, Context::Ranked];

/// Ordered: first match wins, so `!ranked` must sit above `!rank`.
const TABLE: &[CommandSpec] = &[
    CommandSpec {
        pattern: Pattern::Prefix("!join "),
        contexts: &[Context::Dm],
        creator_only: false,
        kind: Kind::Join
    },
    CommandSpec {
        pattern: Pattern::Prefix("!collection "),
        contexts: &[Context::Fresh, Context::Collection],
        creator_only: true,
        kind: Kind::Collection
    },
    CommandSpec {
        pattern: Pattern::Prefix("!ranked "),
        contexts: &[Context::Fresh],
        creator_only: true,
        kind: Kind::Ranked
    },
    CommandSpec {
        pattern: Pattern::Exact("!about"),
        contexts: EVERYWHERE,
        creator_only: false,
        kind: Kind::About
    },
    CommandSpec {
        pattern: Pattern::Prefix("!info"),
        contexts: EVERYWHERE,
        creator_only: false,
        kind: Kind::About
    },
    CommandSpec {
        pattern: Pattern::Exact("!help"),
        contexts: EVERYWHERE,
        creator_only: false,
        kind: Kind::About
    },
    CommandSpec {
        pattern: Pattern::Exact("!discord"),
        contexts: EVERYWHERE,
        creator_only: false,
        kind: Kind::Discord
    },
    CommandSpec {
        pattern: Pattern::Prefix("!rank"),
        contexts: EVERYWHERE,
        creator_only: false,
        kind: Kind::Rank
    },
    CommandSpec {
        pattern: Pattern::Exact("!abort"),
        contexts: IN_GAME,
        creator_only: false,
        kind: Kind::Abort
    },
    CommandSpec {
        pattern: Pattern::Exact("!start"),
        contexts: IN_GAME,
        creator_only: false,
        kind: Kind::Start
    },
    CommandSpec {
        pattern: Pattern::Exact("!wait"),
        contexts: IN_GAME,
        creator_only: false,
        kind: Kind::Wait
    },
    CommandSpec {
        pattern: Pattern::Exact("!stop"),
        contexts: IN_GAME,
        creator_only: false,
        kind: Kind::Wait
    },
    CommandSpec {
        pattern: Pattern::Prefix("!ban"),
        contexts: &[Context::Ranked],
        creator_only: false,
        kind: Kind::Ban
    },
    CommandSpec {
        pattern: Pattern::Prefix("!kick"),
        contexts: &[Context::Ranked],
        creator_only: false,
        kind: Kind::Ban
    },
    CommandSpec {
        pattern: Pattern::Exact("!skip"),
        contexts: IN_GAME,
        creator_only: false,
        kind: Kind::Skip
    },
];

fn build(kind: Kind, args: &str) -> Option<Command> {
    let args = args.trim();
    Some(match kind {
        Kind::Join => Command::Join {
            match_id: args.parse().ok()?
        },
        Kind::Collection => Command::Collection {
            collection_id: args.parse().ok()?
        },
        Kind::Ranked => Command::Ranked {
            ruleset_text: args.to_string()
        },
        Kind::About => Command::About,
        Kind::Discord => Command::Discord,
        Kind::Rank => Command::Rank {
            username: (!args.is_empty()).then(|| args.to_string())
        },
        Kind::Abort => Command::Abort,
        Kind::Start => Command::Start,
        Kind::Wait => Command::Wait,
        Kind::Ban => {
            if args.is_empty() {
                return None;
            }
            Command::Ban {
                target: args.to_string()
            }
        }
        Kind::Skip => Command::Skip
    })
}

/// Matches `text` against the ordered command table.
/// `is_privileged` means the sender is the lobby creator or current host.
pub fn dispatch(text: &str, context: Context, is_privileged: bool) -> Dispatch {
    for spec in TABLE {
        let Some(args) = spec.pattern.matches(text.trim()) else {
            continue;
        };

        if !spec.contexts.contains(&context) {
            // Matched but out of place. Commands sent on the wrong side of
            // the DM boundary get a pointer to the right place, the rest
            // are dropped.
            if spec.contexts == [Context::Dm] && context.is_lobby() {
                return Dispatch::RedirectToDm;
            }
            if context == Context::Dm {
                return Dispatch::RedirectToLobby;
            }
            return Dispatch::Ignore;
        }

        if spec.creator_only && !is_privileged {
            return Dispatch::Unauthorized;
        }

        return match build(spec.kind, args) {
            Some(command) => Dispatch::Run(command),
            None => Dispatch::Ignore
        };
    }

    Dispatch::NotACommand
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_only_in_dm() {
        assert_eq!(
            dispatch("!join 12345", Context::Dm, false),
            Dispatch::Run(Command::Join { match_id: 12345 })
        );
        assert_eq!(dispatch("!join 12345", Context::Ranked, false), Dispatch::RedirectToDm);
    }

    #[test]
    fn test_ranked_is_creator_only() {
        assert_eq!(
            dispatch("!ranked osu", Context::Fresh, true),
            Dispatch::Run(Command::Ranked {
                ruleset_text: "osu".to_string()
            })
        );
        assert_eq!(dispatch("!ranked osu", Context::Fresh, false), Dispatch::Unauthorized);
    }

    #[test]
    fn test_first_match_wins_ranked_before_rank() {
        // In a fresh lobby "!ranked" hits its own entry, not "!rank"
        assert!(matches!(
            dispatch("!ranked mania", Context::Fresh, true),
            Dispatch::Run(Command::Ranked { .. })
        ));
        // Bare "!rank" still works everywhere
        assert_eq!(
            dispatch("!rank", Context::Ranked, false),
            Dispatch::Run(Command::Rank { username: None })
        );
        assert_eq!(
            dispatch("!rank somebody", Context::Dm, false),
            Dispatch::Run(Command::Rank {
                username: Some("somebody".to_string())
            })
        );
    }

    #[test]
    fn test_lobby_command_in_dm_redirects() {
        assert_eq!(dispatch("!start", Context::Dm, false), Dispatch::RedirectToLobby);
        assert_eq!(dispatch("!abort", Context::Dm, false), Dispatch::RedirectToLobby);
    }

    #[test]
    fn test_matched_but_wrong_context_does_not_fall_through() {
        // "!collection" in a ranked lobby is matched and swallowed; it must
        // not be treated as free text or a different command
        assert_eq!(dispatch("!collection 99", Context::Ranked, true), Dispatch::Ignore);
    }

    #[test]
    fn test_ban_requires_target() {
        assert_eq!(dispatch("!ban", Context::Ranked, false), Dispatch::Ignore);
        assert_eq!(
            dispatch("!kick somebody", Context::Ranked, false),
            Dispatch::Run(Command::Ban {
                target: "somebody".to_string()
            })
        );
    }

    #[test]
    fn test_plain_chat_is_not_a_command() {
        assert_eq!(dispatch("gl hf", Context::Ranked, false), Dispatch::NotACommand);
        assert_eq!(dispatch("!unknown", Context::Ranked, false), Dispatch::NotACommand);
    }

    #[test]
    fn test_abort_not_available_in_fresh_lobby() {
        assert_eq!(dispatch("!abort", Context::Fresh, false), Dispatch::Ignore);
    }
}
