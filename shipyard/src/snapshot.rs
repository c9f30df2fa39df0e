use crate::crypto::{canonical_digest, CanonicalError};
use crate::phase::PhaseKey;
use crate::types::{Commitment, GameResult, Player, ShipEntry, StateHash};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// Read model the server publishes after every change. Clients treat it as the only source of
// truth: every gate and derivation re-reads it instead of keeping its own copy of turn or phase.
// Every field defaults so a half-loaded snapshot still deserializes.

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct GameSnapshot {
    pub phase_key: String,
    pub turn_number: u32,
    pub players: Vec<Player>,
    /// `instanceKey -> playerKey -> commitment`.
    pub commitments: BTreeMap<String, BTreeMap<String, Commitment>>,
    /// `ownerKey -> ships`.
    pub ships: BTreeMap<String, Vec<ShipEntry>>,
    pub ready: BTreeMap<String, bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_roll: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<GameResult>,
}

impl GameSnapshot {
    /// Current phase, or `None` when the key is missing, malformed or the game is over.
    pub fn phase(&self) -> Option<PhaseKey> {
        PhaseKey::parse_lenient(&self.phase_key)
    }

    pub fn commitment(&self, instance_key: &str, player_key: &str) -> Option<&Commitment> {
        self.commitments
            .get(instance_key)
            .and_then(|by_player| by_player.get(player_key))
    }

    pub fn is_ready(&self, player_key: &str) -> bool {
        self.ready.get(player_key).copied().unwrap_or(false)
    }

    pub fn is_over(&self) -> bool {
        self.result.is_some()
    }

    pub fn state_hash(&self) -> Result<StateHash, CanonicalError> {
        Ok(StateHash {
            turn: self.turn_number,
            hash: canonical_digest(self)?,
        })
    }
}
