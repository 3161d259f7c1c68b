use serde_repr::{Deserialize_repr, Serialize_repr};
use std::convert::TryFrom;
use strum_macros::EnumIter;

#[derive(Deserialize_repr, Serialize_repr, Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Default)]
#[repr(u8)]
pub enum Ruleset {
    #[default]
    Osu = 0,
    Taiko = 1,
    Catch = 2,
    Mania = 3
}

impl Ruleset {
    /// Name of the player table column holding this ruleset's rating FK.
    pub fn rating_column(&self) -> &'static str {
        match self {
            Ruleset::Osu => "osu_rating_id",
            Ruleset::Taiko => "taiko_rating_id",
            Ruleset::Catch => "catch_rating_id",
            Ruleset::Mania => "mania_rating_id"
        }
    }

    pub fn division_column(&self) -> &'static str {
        match self {
            Ruleset::Osu => "osu_division",
            Ruleset::Taiko => "taiko_division",
            Ruleset::Catch => "catch_division",
            Ruleset::Mania => "mania_division"
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Ruleset::Osu => "osu",
            Ruleset::Taiko => "taiko",
            Ruleset::Catch => "catch",
            Ruleset::Mania => "mania"
        }
    }

    /// Parses the ruleset names players type in chat.
    pub fn from_user_input(input: &str) -> Option<Ruleset> {
        match input.trim().to_lowercase().as_str() {
            "osu" | "std" | "standard" => Some(Ruleset::Osu),
            "taiko" => Some(Ruleset::Taiko),
            "catch" | "fruits" | "ctb" => Some(Ruleset::Catch),
            "mania" | "4k" => Some(Ruleset::Mania),
            _ => None
        }
    }
}

impl TryFrom<i32> for Ruleset {
    type Error = ();

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Ruleset::Osu),
            1 => Ok(Ruleset::Taiko),
            2 => Ok(Ruleset::Catch),
            3 => Ok(Ruleset::Mania),
            _ => Err(())
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::model::structures::ruleset::Ruleset;
    use strum::IntoEnumIterator;

    #[test]
    fn test_convert_from_i32() {
        assert_eq!(Ruleset::try_from(0), Ok(Ruleset::Osu));
        assert_eq!(Ruleset::try_from(1), Ok(Ruleset::Taiko));
        assert_eq!(Ruleset::try_from(2), Ok(Ruleset::Catch));
        assert_eq!(Ruleset::try_from(3), Ok(Ruleset::Mania));
        assert_eq!(Ruleset::try_from(4), Err(()));
    }

    #[test]
    fn test_enumerate() {
        let rulesets = Ruleset::iter().collect::<Vec<_>>();
        assert_eq!(
            rulesets,
            vec![Ruleset::Osu, Ruleset::Taiko, Ruleset::Catch, Ruleset::Mania]
        );
    }

    #[test]
    fn test_user_input_aliases() {
        assert_eq!(Ruleset::from_user_input("osu"), Some(Ruleset::Osu));
        assert_eq!(Ruleset::from_user_input("Fruits"), Some(Ruleset::Catch));
        assert_eq!(Ruleset::from_user_input("4k"), Some(Ruleset::Mania));
        assert_eq!(Ruleset::from_user_input("bongo"), None);
    }
}
