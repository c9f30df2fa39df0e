use crate::constants::{BUILD_PREFIX, CHARGE_PREFIX, SPECIES_PREFIX};
use crate::phase::{MajorPhase, PhaseKey, SubPhase};
use serde::{Deserialize, Serialize};

// Shared data types for players, ships, commitments and the payloads players commit to.
// They are plain data; the server owns all mutation and the client only projects them.

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Player,
    Spectator,
    #[default]
    #[serde(other)]
    Unknown,
}

/// One entry of the server's raw player list.
///
/// Upstream may alias the identifier (`id` vs `sessionId`) and key readiness by a third
/// field (`playerId`), so all of them are carried as-is.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: Role,
}

impl Player {
    /// Key used by the server's per-player maps (readiness, commitments, fleets).
    pub fn ready_key(&self) -> &str {
        self.player_id.as_deref().unwrap_or(&self.id)
    }

    pub fn matches_session(&self, session_id: &str) -> bool {
        self.id == session_id || self.session_id.as_deref() == Some(session_id)
    }

    pub fn is_player(&self) -> bool {
        self.role == Role::Player
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShipEntry {
    pub ship_id: String,
    pub owner_id: String,
    pub ship_def_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_turn: Option<u32>,
}

/// Server-recorded commitment of one player for one phase instance.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Commitment {
    pub commit_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reveal_payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revealed_at: Option<u64>,
}

impl Commitment {
    pub fn new(commit_hash: String) -> Self {
        Self {
            commit_hash,
            reveal_payload: None,
            revealed_at: None,
        }
    }

    pub fn is_revealed(&self) -> bool {
        self.revealed_at.is_some()
    }
}

/// The kinds of hidden decision a player commits to. Each kind has its own turn-scoped
/// instance key and its own commit and reveal windows in the phase table.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InstanceKind {
    Species,
    Build,
    Charge,
}

impl InstanceKind {
    pub const ALL: [InstanceKind; 3] = [
        InstanceKind::Species,
        InstanceKind::Build,
        InstanceKind::Charge,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            InstanceKind::Species => SPECIES_PREFIX,
            InstanceKind::Build => BUILD_PREFIX,
            InstanceKind::Charge => CHARGE_PREFIX,
        }
    }

    pub fn instance_key(&self, turn: u32) -> String {
        format!("{}_{}", self.prefix(), turn)
    }

    /// Subphase during which the server accepts commits for this kind.
    pub fn commit_window(&self) -> PhaseKey {
        match self {
            InstanceKind::Species => PhaseKey::new(MajorPhase::Setup, SubPhase::SpeciesSelection),
            InstanceKind::Build => PhaseKey::new(MajorPhase::Build, SubPhase::Drawing),
            InstanceKind::Charge => {
                PhaseKey::new(MajorPhase::Battle, SubPhase::ChargeDeclaration)
            }
        }
    }

    /// Subphase during which reveals for this kind are accepted (and auto-submitted).
    pub fn reveal_window(&self) -> PhaseKey {
        match self {
            InstanceKind::Species => PhaseKey::new(MajorPhase::Setup, SubPhase::SpeciesReveal),
            InstanceKind::Build => PhaseKey::new(MajorPhase::Battle, SubPhase::Reveal),
            InstanceKind::Charge => PhaseKey::new(MajorPhase::Battle, SubPhase::ChargeResponse),
        }
    }

    pub fn for_commit_window(key: PhaseKey) -> Option<InstanceKind> {
        Self::ALL.into_iter().find(|k| k.commit_window() == key)
    }

    pub fn for_reveal_window(key: PhaseKey) -> Option<InstanceKind> {
        Self::ALL.into_iter().find(|k| k.reveal_window() == key)
    }
}

/// Splits `BUILD_3` into its kind and turn. Anything else is `None`.
pub fn parse_instance_key(key: &str) -> Option<(InstanceKind, u32)> {
    let (prefix, turn) = key.rsplit_once('_')?;
    let kind = InstanceKind::ALL
        .into_iter()
        .find(|k| k.prefix() == prefix)?;
    let turn = turn.parse().ok()?;
    Some((kind, turn))
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SpeciesChoice {
    pub species: String,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShipOrder {
    pub ship_def_id: String,
    pub count: u32,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BuildOrder {
    pub ships: Vec<ShipOrder>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChargeDeclaration {
    pub ship_ids: Vec<String>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameResult {
    pub winner: Option<String>,
    pub turns_played: u32,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct StateHash {
    pub turn: u32,
    pub hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_keys_are_turn_scoped() {
        assert_eq!(InstanceKind::Build.instance_key(3), "BUILD_3");
        assert_eq!(parse_instance_key("BUILD_3"), Some((InstanceKind::Build, 3)));
        assert_eq!(parse_instance_key("CHARGE_12"), Some((InstanceKind::Charge, 12)));
        assert_eq!(parse_instance_key("BUILD_"), None);
        assert_eq!(parse_instance_key("DRAFT_1"), None);
        assert_eq!(parse_instance_key(""), None);
    }

    #[test]
    fn windows_are_distinct_table_keys() {
        for kind in InstanceKind::ALL {
            assert_ne!(kind.commit_window(), kind.reveal_window());
            assert_eq!(InstanceKind::for_commit_window(kind.commit_window()), Some(kind));
            assert_eq!(InstanceKind::for_reveal_window(kind.reveal_window()), Some(kind));
        }
    }

    #[test]
    fn unknown_role_deserializes() {
        let player: Player =
            serde_json::from_str(r#"{"id":"a","role":"referee"}"#).unwrap();
        assert_eq!(player.role, Role::Unknown);
        let player: Player = serde_json::from_str(r#"{"id":"a"}"#).unwrap();
        assert_eq!(player.role, Role::Unknown);
        assert_eq!(player.ready_key(), "a");
    }
}
