use std::fmt;

/// Legacy osu! mod bitmask, as delivered by the v1 match results endpoint
/// and stored on game/score rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mods(pub i64);

impl Mods {
    pub const NONE: i64 = 0;
    pub const NO_FAIL: i64 = 1;
    pub const EASY: i64 = 1 << 1;
    pub const TOUCH_DEVICE: i64 = 1 << 2;
    pub const HIDDEN: i64 = 1 << 3;
    pub const HARD_ROCK: i64 = 1 << 4;
    pub const SUDDEN_DEATH: i64 = 1 << 5;
    pub const DOUBLE_TIME: i64 = 1 << 6;
    pub const RELAX: i64 = 1 << 7;
    pub const HALF_TIME: i64 = 1 << 8;
    pub const NIGHTCORE: i64 = 1 << 9;
    pub const FLASHLIGHT: i64 = 1 << 10;
    pub const SPUN_OUT: i64 = 1 << 12;
    pub const PERFECT: i64 = 1 << 14;
    pub const FADE_IN: i64 = 1 << 20;
    pub const MIRROR: i64 = 1 << 30;

    /// Mods that keep a score eligible as rating evidence:
    /// HD, HR, SD, PF, DT, NC, FI, FL, MR.
    pub const RATING_ALLOWED: i64 = Self::HIDDEN
        | Self::HARD_ROCK
        | Self::SUDDEN_DEATH
        | Self::PERFECT
        | Self::DOUBLE_TIME
        | Self::NIGHTCORE
        | Self::FADE_IN
        | Self::FLASHLIGHT
        | Self::MIRROR;

    pub fn contains(&self, bit: i64) -> bool {
        self.0 & bit == bit
    }

    /// A score counts toward ratings only when every enabled mod is on the
    /// allow-list. Nomod passes trivially.
    pub fn is_rating_eligible(&self) -> bool {
        self.0 & !Self::RATING_ALLOWED == 0
    }
}

impl fmt::Display for Mods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: &[(i64, &str)] = &[
            (Mods::HIDDEN, "HD"),
            (Mods::HARD_ROCK, "HR"),
            (Mods::SUDDEN_DEATH, "SD"),
            (Mods::PERFECT, "PF"),
            (Mods::DOUBLE_TIME, "DT"),
            (Mods::NIGHTCORE, "NC"),
            (Mods::FADE_IN, "FI"),
            (Mods::FLASHLIGHT, "FL"),
            (Mods::MIRROR, "MR"),
            (Mods::NO_FAIL, "NF"),
            (Mods::EASY, "EZ"),
            (Mods::HALF_TIME, "HT"),
            (Mods::RELAX, "RX"),
            (Mods::SPUN_OUT, "SO"),
        ];

        if self.0 == Mods::NONE {
            return write!(f, "None");
        }

        let mut first = true;
        for (bit, name) in NAMES {
            if self.contains(*bit) {
                if !first {
                    write!(f, ",")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Mods;

    #[test]
    fn test_nomod_is_eligible() {
        assert!(Mods(Mods::NONE).is_rating_eligible());
    }

    #[test]
    fn test_allowed_combo_is_eligible() {
        let hdhr = Mods(Mods::HIDDEN | Mods::HARD_ROCK);
        assert!(hdhr.is_rating_eligible());

        let hddtnc = Mods(Mods::HIDDEN | Mods::DOUBLE_TIME | Mods::NIGHTCORE);
        assert!(hddtnc.is_rating_eligible());
    }

    #[test]
    fn test_disallowed_mod_is_skipped() {
        assert!(!Mods(Mods::RELAX).is_rating_eligible());
        assert!(!Mods(Mods::HALF_TIME).is_rating_eligible());
        // One disallowed mod poisons the whole combination
        assert!(!Mods(Mods::HIDDEN | Mods::NO_FAIL).is_rating_eligible());
    }

    #[test]
    fn test_display() {
        assert_eq!(Mods(Mods::NONE).to_string(), "None");
        assert_eq!(Mods(Mods::HIDDEN | Mods::DOUBLE_TIME).to_string(), "HD,DT");
    }
}
