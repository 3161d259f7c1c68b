use crate::model::structures::ruleset::Ruleset;
use rand::{distr::Alphanumeric, Rng};

/// Bancho silently drops a repeated tournament command with identical
/// text; the nonce suffix keeps retries distinct.
fn nonce() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

pub fn start() -> String {
    format!("!mp start .{}", nonce())
}

pub fn abort() -> String {
    format!("!mp abort {}", nonce())
}

pub fn settings() -> String {
    format!("!mp settings {}", nonce())
}

pub fn rename(title: &str) -> String {
    format!("!mp name {title}")
}

pub fn kick(username: &str) -> String {
    format!("!mp kick {username}")
}

pub fn ban(username: &str) -> String {
    format!("!mp ban {username}")
}

pub fn clear_host() -> String {
    "!mp clearhost".to_string()
}

pub fn clear_password() -> String {
    "!mp password".to_string()
}

pub fn freemod() -> String {
    "!mp mods freemod".to_string()
}

/// Head to head, score v2 off, 16 slots.
pub fn default_settings() -> String {
    "!mp set 0 0 16".to_string()
}

pub fn change_map(map_id: i64, ruleset: Ruleset) -> String {
    format!("!mp map {map_id} {}", ruleset as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_carries_a_nonce() {
        let a = start();
        let b = start();
        assert!(a.starts_with("!mp start ."));
        assert_eq!(a.len(), "!mp start .".len() + 4);
        // Two consecutive starts should not be byte-identical
        assert_ne!(a, b);
    }

    #[test]
    fn test_change_map_includes_ruleset() {
        assert_eq!(change_map(75, Ruleset::Mania), "!mp map 75 3");
    }
}
