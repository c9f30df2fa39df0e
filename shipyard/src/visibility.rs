// Hidden-information rule for fleets.
//
// Ships the opponent builds this turn stay hidden until the battle phase starts, the same
// secrecy the build commit protects. Missing data fails open: a ship without `createdTurn` is
// treated as old, and a phase key that does not parse (including `game_over`) does not hide
// anything.

use crate::identity::PlayerIdentity;
use crate::phase::PhaseKey;
use crate::snapshot::GameSnapshot;
use crate::types::ShipEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ship definition id -> count.
pub type FleetCounts = BTreeMap<String, u32>;

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FleetView {
    pub my_fleet: FleetCounts,
    pub opponent_fleet: FleetCounts,
}

pub fn is_visible_to_opponent(ship: &ShipEntry, current_turn: u32, phase: Option<PhaseKey>) -> bool {
    match ship.created_turn {
        None => true,
        Some(created) if created < current_turn => true,
        Some(created) if created == current_turn => phase.map(|p| p.is_battle()).unwrap_or(true),
        Some(_) => false,
    }
}

pub fn visible_opponent_ships(
    ships: &[ShipEntry],
    current_turn: u32,
    phase: Option<PhaseKey>,
) -> Vec<&ShipEntry> {
    ships
        .iter()
        .filter(|ship| is_visible_to_opponent(ship, current_turn, phase))
        .collect()
}

pub fn aggregate<'a>(ships: impl IntoIterator<Item = &'a ShipEntry>) -> FleetCounts {
    let mut counts = FleetCounts::new();
    for ship in ships {
        *counts.entry(ship.ship_def_id.clone()).or_insert(0) += 1;
    }
    counts
}

fn ships_for<'a>(snapshot: &'a GameSnapshot, key: Option<&str>, id: Option<&str>) -> &'a [ShipEntry] {
    key.and_then(|k| snapshot.ships.get(k))
        .or_else(|| id.and_then(|i| snapshot.ships.get(i)))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Both sides' fleets as the local player may see them.
pub fn derive_fleets(snapshot: &GameSnapshot, identity: &PlayerIdentity) -> FleetView {
    let phase = snapshot.phase();
    let mine = ships_for(
        snapshot,
        identity.me_ready_key.as_deref(),
        identity.me.as_ref().map(|p| p.id.as_str()),
    );
    let theirs = ships_for(
        snapshot,
        identity.opponent_ready_key.as_deref(),
        identity.opponent.as_ref().map(|p| p.id.as_str()),
    );
    FleetView {
        my_fleet: aggregate(mine),
        opponent_fleet: aggregate(visible_opponent_ships(theirs, snapshot.turn_number, phase)),
    }
}
