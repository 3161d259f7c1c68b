use std::collections::{HashMap, HashSet};

/// Votes needed to abort an in-progress match.
pub fn abort_threshold(player_count: usize) -> usize {
    player_count.div_ceil(4)
}

/// Votes needed to kick a player. The floor of 2 keeps a lone player from
/// votekicking everyone who joins.
pub fn kick_threshold(player_count: usize) -> usize {
    player_count.div_ceil(2).max(2)
}

/// Distinct-voter tallies for one match attempt. Abort votes reset on
/// every match start; kick tallies are per target and become irrelevant
/// once the target leaves.
#[derive(Debug, Default)]
pub struct VoteBox {
    abort_voters: HashSet<i64>,
    kick_voters: HashMap<String, HashSet<i64>>
}

impl VoteBox {
    pub fn new() -> VoteBox {
        VoteBox::default()
    }

    /// Records an abort vote and reports (tally, threshold, passed).
    pub fn vote_abort(&mut self, voter_id: i64, player_count: usize) -> (usize, usize, bool) {
        self.abort_voters.insert(voter_id);
        let tally = self.abort_voters.len();
        let needed = abort_threshold(player_count);
        (tally, needed, tally >= needed)
    }

    pub fn vote_kick(&mut self, voter_id: i64, target: &str, player_count: usize) -> (usize, usize, bool) {
        let voters = self.kick_voters.entry(target.to_lowercase()).or_default();
        voters.insert(voter_id);
        let tally = voters.len();
        let needed = kick_threshold(player_count);
        (tally, needed, tally >= needed)
    }

    pub fn clear_abort(&mut self) {
        self.abort_voters.clear();
    }

    pub fn clear_kick(&mut self, target: &str) {
        self.kick_voters.remove(&target.to_lowercase());
    }

    pub fn clear_all(&mut self) {
        self.abort_voters.clear();
        self.kick_voters.clear();
    }
}

/// What the AFK watchdog should do when its timer fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AfkAction {
    /// Exactly one participant never scored: kick them and drop them from
    /// the participant set so the forced kick is not also booked as a
    /// dodge.
    Kick { user_id: i64 },
    /// More than one non-scorer; too ambiguous to act, check again later.
    Rearm,
    /// Everyone has a score.
    Nothing
}

/// Decides the watchdog action from the current attempt's participants
/// and the set of players with a recorded non-zero score.
pub fn afk_check(participants: &[i64], scorers: &HashSet<i64>) -> AfkAction {
    let idle: Vec<i64> = participants.iter().copied().filter(|p| !scorers.contains(p)).collect();
    match idle.as_slice() {
        [] => AfkAction::Nothing,
        [user_id] => AfkAction::Kick { user_id: *user_id },
        _ => AfkAction::Rearm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_thresholds() {
        for (n, expected) in [(1, 1), (4, 1), (5, 2), (8, 2)] {
            assert_eq!(abort_threshold(n), expected, "n={n}");
        }
    }

    #[test]
    fn test_kick_thresholds() {
        for (n, expected) in [(1, 2), (2, 2), (3, 2), (4, 2), (5, 3), (8, 4)] {
            assert_eq!(kick_threshold(n), expected, "n={n}");
        }
    }

    #[test]
    fn test_abort_vote_counts_distinct_voters() {
        let mut votes = VoteBox::new();
        let (tally, needed, passed) = votes.vote_abort(1, 8);
        assert_eq!((tally, needed, passed), (1, 2, false));

        // Same voter again does not advance the tally
        let (tally, _, passed) = votes.vote_abort(1, 8);
        assert_eq!((tally, passed), (1, false));

        let (tally, _, passed) = votes.vote_abort(2, 8);
        assert_eq!((tally, passed), (2, true));
    }

    #[test]
    fn test_kick_votes_are_per_target() {
        let mut votes = VoteBox::new();
        votes.vote_kick(1, "alice", 4);
        let (tally, _, passed) = votes.vote_kick(2, "Bob", 4);
        assert_eq!((tally, passed), (1, false));

        // Target names are case-insensitive
        let (tally, _, passed) = votes.vote_kick(3, "bob", 4);
        assert_eq!((tally, passed), (2, true));
    }

    #[test]
    fn test_afk_check_single_idler_is_kicked() {
        let scorers: HashSet<i64> = [1, 2, 3].into_iter().collect();
        assert_eq!(afk_check(&[1, 2, 3, 4], &scorers), AfkAction::Kick { user_id: 4 });
    }

    #[test]
    fn test_afk_check_two_idlers_rearms() {
        let scorers: HashSet<i64> = [1, 2].into_iter().collect();
        assert_eq!(afk_check(&[1, 2, 3, 4], &scorers), AfkAction::Rearm);
    }

    #[test]
    fn test_afk_check_all_scored_is_noop() {
        let scorers: HashSet<i64> = [1, 2].into_iter().collect();
        assert_eq!(afk_check(&[1, 2], &scorers), AfkAction::Nothing);
    }
}
