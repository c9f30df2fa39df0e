// Phase table and the pure transition functions over it.
//
// A turn is a walk through an ordered list of subphases grouped into three major phases.
// `PHASE_TABLE` is the only place the order is written down; everything else (commit and
// reveal windows, the server's advancement, the client's gate) asks this module.
//
// Keys travel as `major.sub` strings. Parsing is strict, but `label_for` and
// `PhaseKey::parse_lenient` never fail so display code can run against half-loaded state.

use crate::constants::UNKNOWN_LABEL;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Raw key the server reports once the game has reached its result state.
pub const GAME_OVER_KEY: &str = "game_over";

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MajorPhase {
    Setup,
    Build,
    Battle,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SubPhase {
    SpeciesSelection,
    SpeciesReveal,
    DiceRoll,
    LineGeneration,
    ShipsThatBuild,
    Drawing,
    EndOfBuild,
    Reveal,
    FirstStrike,
    ChargeDeclaration,
    ChargeResponse,
    EndOfTurnResolution,
}

pub static PHASE_TABLE: [(MajorPhase, &[SubPhase]); 3] = [
    (
        MajorPhase::Setup,
        &[SubPhase::SpeciesSelection, SubPhase::SpeciesReveal],
    ),
    (
        MajorPhase::Build,
        &[
            SubPhase::DiceRoll,
            SubPhase::LineGeneration,
            SubPhase::ShipsThatBuild,
            SubPhase::Drawing,
            SubPhase::EndOfBuild,
        ],
    ),
    (
        MajorPhase::Battle,
        &[
            SubPhase::Reveal,
            SubPhase::FirstStrike,
            SubPhase::ChargeDeclaration,
            SubPhase::ChargeResponse,
            SubPhase::EndOfTurnResolution,
        ],
    ),
];

pub const TOTAL_SUBPHASES: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhaseParseError {
    #[error("empty phase key")]
    Empty,
    #[error("phase key {0:?} is not of the form major.sub")]
    Malformed(String),
    #[error("unknown major phase {0:?}")]
    UnknownMajor(String),
    #[error("unknown subphase {0:?}")]
    UnknownSub(String),
    #[error("subphase {sub} does not belong to {major}")]
    Mismatched { major: String, sub: String },
}

impl MajorPhase {
    pub const ALL: [MajorPhase; 3] = [MajorPhase::Setup, MajorPhase::Build, MajorPhase::Battle];

    pub fn as_str(&self) -> &'static str {
        match self {
            MajorPhase::Setup => "setup",
            MajorPhase::Build => "build",
            MajorPhase::Battle => "battle",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MajorPhase::Setup => "Setup",
            MajorPhase::Build => "Build",
            MajorPhase::Battle => "Battle",
        }
    }

    pub fn subphases(&self) -> &'static [SubPhase] {
        PHASE_TABLE
            .iter()
            .find(|(major, _)| major == self)
            .map(|(_, subs)| *subs)
            .unwrap_or(&[])
    }

    fn from_name(name: &str) -> Option<MajorPhase> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }
}

impl SubPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubPhase::SpeciesSelection => "species_selection",
            SubPhase::SpeciesReveal => "species_reveal",
            SubPhase::DiceRoll => "dice_roll",
            SubPhase::LineGeneration => "line_generation",
            SubPhase::ShipsThatBuild => "ships_that_build",
            SubPhase::Drawing => "drawing",
            SubPhase::EndOfBuild => "end_of_build",
            SubPhase::Reveal => "reveal",
            SubPhase::FirstStrike => "first_strike",
            SubPhase::ChargeDeclaration => "charge_declaration",
            SubPhase::ChargeResponse => "charge_response",
            SubPhase::EndOfTurnResolution => "end_of_turn_resolution",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SubPhase::SpeciesSelection => "Species Selection",
            SubPhase::SpeciesReveal => "Species Reveal",
            SubPhase::DiceRoll => "Dice Roll",
            SubPhase::LineGeneration => "Line Generation",
            SubPhase::ShipsThatBuild => "Ships That Build",
            SubPhase::Drawing => "Drawing",
            SubPhase::EndOfBuild => "End of Build",
            SubPhase::Reveal => "Reveal",
            SubPhase::FirstStrike => "First Strike",
            SubPhase::ChargeDeclaration => "Charge Declaration",
            SubPhase::ChargeResponse => "Charge Response",
            SubPhase::EndOfTurnResolution => "End of Turn Resolution",
        }
    }

    fn from_name(name: &str) -> Option<SubPhase> {
        PHASE_TABLE
            .iter()
            .flat_map(|(_, subs)| subs.iter().copied())
            .find(|s| s.as_str() == name)
    }
}

/// `major.sub` identifier of one step of a turn. Only table-valid pairs can be built.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct PhaseKey {
    major: MajorPhase,
    sub: SubPhase,
}

/// Game-level successor of a phase key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Successor {
    /// Next subphase within the same turn.
    Phase(PhaseKey),
    /// The turn is over; play continues on the next turn at this key.
    NewTurn(PhaseKey),
    /// The game-over condition held at the end of the turn.
    GameOver,
}

impl PhaseKey {
    pub const INITIAL: PhaseKey = PhaseKey {
        major: MajorPhase::Setup,
        sub: SubPhase::SpeciesSelection,
    };

    /// First key of every turn after the first.
    pub const TURN_START: PhaseKey = PhaseKey {
        major: MajorPhase::Build,
        sub: SubPhase::DiceRoll,
    };

    pub const LAST: PhaseKey = PhaseKey {
        major: MajorPhase::Battle,
        sub: SubPhase::EndOfTurnResolution,
    };

    // Callers inside the crate only pass pairs taken from the table.
    pub(crate) const fn new(major: MajorPhase, sub: SubPhase) -> PhaseKey {
        PhaseKey { major, sub }
    }

    pub fn try_new(major: MajorPhase, sub: SubPhase) -> Result<PhaseKey, PhaseParseError> {
        if major.subphases().contains(&sub) {
            Ok(PhaseKey { major, sub })
        } else {
            Err(PhaseParseError::Mismatched {
                major: major.as_str().to_string(),
                sub: sub.as_str().to_string(),
            })
        }
    }

    pub fn major(&self) -> MajorPhase {
        self.major
    }

    pub fn sub(&self) -> SubPhase {
        self.sub
    }

    /// Every key in table order.
    pub fn all() -> impl Iterator<Item = PhaseKey> {
        PHASE_TABLE.iter().flat_map(|(major, subs)| {
            subs.iter().map(move |sub| PhaseKey {
                major: *major,
                sub: *sub,
            })
        })
    }

    /// Zero-based ordinal of this key in the total order.
    pub fn position(&self) -> usize {
        Self::all().position(|k| k == *self).unwrap_or(0)
    }

    /// Table walk: the key after this one, or `None` past the last subphase of battle.
    pub fn next(&self) -> Option<PhaseKey> {
        Self::all().nth(self.position() + 1)
    }

    /// Game-level transition. Wraps to the next turn's build phase, or ends the game when
    /// `game_over` holds at the end of the turn.
    pub fn successor(&self, game_over: bool) -> Successor {
        match self.next() {
            Some(key) => Successor::Phase(key),
            None if game_over => Successor::GameOver,
            None => Successor::NewTurn(PhaseKey::TURN_START),
        }
    }

    /// Parses a key reported by the server, degrading anything unrecognized to `None`.
    pub fn parse_lenient(raw: &str) -> Option<PhaseKey> {
        raw.trim().parse().ok()
    }

    pub fn is_battle(&self) -> bool {
        self.major == MajorPhase::Battle
    }
}

impl fmt::Display for PhaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major.as_str(), self.sub.as_str())
    }
}

impl FromStr for PhaseKey {
    type Err = PhaseParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.is_empty() {
            return Err(PhaseParseError::Empty);
        }
        let (major, sub) = raw
            .split_once('.')
            .ok_or_else(|| PhaseParseError::Malformed(raw.to_string()))?;
        let major = MajorPhase::from_name(major)
            .ok_or_else(|| PhaseParseError::UnknownMajor(major.to_string()))?;
        let sub =
            SubPhase::from_name(sub).ok_or_else(|| PhaseParseError::UnknownSub(sub.to_string()))?;
        PhaseKey::try_new(major, sub)
    }
}

impl TryFrom<String> for PhaseKey {
    type Error = PhaseParseError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<PhaseKey> for String {
    fn from(key: PhaseKey) -> Self {
        key.to_string()
    }
}

/// Human-readable labels for the phase indicator.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PhaseLabel {
    pub phase: String,
    pub subphase: String,
}

impl PhaseLabel {
    pub fn unknown() -> Self {
        Self {
            phase: UNKNOWN_LABEL.to_string(),
            subphase: UNKNOWN_LABEL.to_string(),
        }
    }
}

pub fn label_for(raw: &str) -> PhaseLabel {
    if raw.trim() == GAME_OVER_KEY {
        return PhaseLabel {
            phase: "Game Over".to_string(),
            subphase: String::new(),
        };
    }
    match PhaseKey::parse_lenient(raw) {
        Some(key) => PhaseLabel {
            phase: key.major.label().to_string(),
            subphase: key.sub.label().to_string(),
        },
        None => PhaseLabel::unknown(),
    }
}
