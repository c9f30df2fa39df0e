use crate::net::{IntentReceipt, IntentRequest, RejectReason, Rejection};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shipyard::catalog::{check_build_order, check_charge_declaration, check_species_choice};
use shipyard::constants::FIRST_TURN;
use shipyard::crypto::{check_nonce, validate_reveal, CanonicalError};
use shipyard::phase::{PhaseKey, SubPhase, Successor, GAME_OVER_KEY};
use shipyard::rng::DiceSource;
use shipyard::types::{
    parse_instance_key, BuildOrder, ChargeDeclaration, Commitment, GameResult, InstanceKind,
    Player, ShipEntry, SpeciesChoice, StateHash,
};
use shipyard::visibility::is_visible_to_opponent;
use shipyard::GameSnapshot;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};

// Authoritative match state. The server is the only writer: intents are checked against the
// current turn, phase window and commitment store, and the phase machine only moves once
// every seat has acted in the current window.

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
    #[error("a match needs exactly two seated players, got {0}")]
    SeatCount(usize),
    #[error("two players share the key {0}")]
    DuplicateKey(String),
    #[error("turn limit must be at least 1")]
    NoTurns,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub species: Option<String>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub players: Vec<Player>,
    pub seats: Vec<Seat>,
    pub turn: u32,
    pub phase: PhaseKey,
    pub max_turns: u32,
    pub commitments: BTreeMap<String, BTreeMap<String, Commitment>>,
    pub ships: BTreeMap<String, Vec<ShipEntry>>,
    pub ready: BTreeMap<String, bool>,
    /// Ships each seat declared as charging this turn.
    pub charges: BTreeMap<String, Vec<String>>,
    pub last_roll: Option<u8>,
    pub result: Option<GameResult>,
    pub next_ship: u64,
}

enum RevealEffect {
    Species(String),
    Build(BuildOrder),
    Charge(Vec<String>),
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn is_commit_hash(hash: &str) -> bool {
    hash.len() == 64 && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

impl GameState {
    pub fn new(players: Vec<Player>, max_turns: u32) -> Result<Self, SetupError> {
        if max_turns == 0 {
            return Err(SetupError::NoTurns);
        }
        let seated: Vec<&Player> = players.iter().filter(|p| p.is_player()).collect();
        if seated.len() != 2 {
            return Err(SetupError::SeatCount(seated.len()));
        }
        if seated[0].ready_key() == seated[1].ready_key() {
            return Err(SetupError::DuplicateKey(seated[0].ready_key().to_string()));
        }
        let seats: Vec<Seat> = seated
            .iter()
            .map(|p| Seat {
                key: p.ready_key().to_string(),
                species: None,
            })
            .collect();
        let ready = seats.iter().map(|s| (s.key.clone(), false)).collect();
        let ships = seats.iter().map(|s| (s.key.clone(), Vec::new())).collect();
        Ok(Self {
            players,
            seats,
            turn: FIRST_TURN,
            phase: PhaseKey::INITIAL,
            max_turns,
            commitments: BTreeMap::new(),
            ships,
            ready,
            charges: BTreeMap::new(),
            last_roll: None,
            result: None,
            next_ship: 1,
        })
    }

    pub fn seat(&self, key: &str) -> Option<&Seat> {
        self.seats.iter().find(|s| s.key == key)
    }

    pub fn commitment(&self, instance_key: &str, player_key: &str) -> Option<&Commitment> {
        self.commitments
            .get(instance_key)
            .and_then(|by_player| by_player.get(player_key))
    }

    pub fn is_over(&self) -> bool {
        self.result.is_some()
    }

    pub fn phase_key(&self) -> String {
        if self.is_over() {
            GAME_OVER_KEY.to_string()
        } else {
            self.phase.to_string()
        }
    }

    fn reject(&self, reason: RejectReason, message: impl Into<String>) -> Rejection {
        Rejection::new(reason, message, self.turn)
    }

    /// Checks shared by commits and reveals; returns the kind named by the instance key.
    fn check_intent(&self, request: &IntentRequest) -> Result<InstanceKind, Rejection> {
        if self.is_over() {
            return Err(self.reject(RejectReason::GameOver, "game is over"));
        }
        if self.seat(&request.player_id).is_none() {
            return Err(self.reject(
                RejectReason::UnknownPlayer,
                format!("{} holds no seat", request.player_id),
            ));
        }
        if request.turn_number != self.turn {
            return Err(self.reject(
                RejectReason::BadTurn,
                format!("intent for turn {}, game is on turn {}", request.turn_number, self.turn),
            ));
        }
        let (kind, turn) = parse_instance_key(&request.instance_key).ok_or_else(|| {
            self.reject(
                RejectReason::UnknownInstance,
                format!("unknown instance {}", request.instance_key),
            )
        })?;
        if turn != self.turn {
            return Err(self.reject(
                RejectReason::BadTurn,
                format!("instance {} is not on turn {}", request.instance_key, self.turn),
            ));
        }
        Ok(kind)
    }

    pub fn record_commit(&mut self, request: &IntentRequest) -> Result<IntentReceipt, Rejection> {
        let kind = self.check_intent(request)?;
        if self.phase != kind.commit_window() {
            return Err(self.reject(
                RejectReason::WrongPhase,
                format!("{} commits are not open during {}", kind.prefix(), self.phase),
            ));
        }
        let hash = request
            .commit_hash
            .as_deref()
            .filter(|h| is_commit_hash(h))
            .ok_or_else(|| {
                self.reject(RejectReason::MalformedIntent, "commit hash must be 64 hex characters")
            })?;
        if self.commitment(&request.instance_key, &request.player_id).is_some() {
            return Err(self.reject(
                RejectReason::AlreadyCommitted,
                format!("{} already committed to {}", request.player_id, request.instance_key),
            ));
        }
        let commitment = Commitment::new(hash.to_string());
        self.commitments
            .entry(request.instance_key.clone())
            .or_default()
            .insert(request.player_id.clone(), commitment.clone());
        self.ready.insert(request.player_id.clone(), true);
        info!(
            instance = %request.instance_key,
            player = %request.player_id,
            turn = self.turn,
            "commit recorded"
        );
        Ok(IntentReceipt {
            instance_key: request.instance_key.clone(),
            player_id: request.player_id.clone(),
            commitment,
            turn_number: self.turn,
        })
    }

    pub fn record_reveal(&mut self, request: &IntentRequest) -> Result<IntentReceipt, Rejection> {
        let kind = self.check_intent(request)?;
        if self.phase != kind.reveal_window() {
            return Err(self.reject(
                RejectReason::WrongPhase,
                format!("{} reveals are not open during {}", kind.prefix(), self.phase),
            ));
        }
        let (payload, nonce) = match (&request.payload, &request.nonce) {
            (Some(payload), Some(nonce)) => (payload, nonce),
            _ => {
                return Err(self.reject(
                    RejectReason::MalformedIntent,
                    "reveal needs a payload and a nonce",
                ))
            }
        };
        check_nonce(nonce).map_err(|e| self.reject(RejectReason::MalformedIntent, e.to_string()))?;
        let commitment = self
            .commitment(&request.instance_key, &request.player_id)
            .cloned()
            .ok_or_else(|| {
                self.reject(
                    RejectReason::NotCommitted,
                    format!("{} has no commitment for {}", request.player_id, request.instance_key),
                )
            })?;
        if commitment.is_revealed() {
            return Err(self.reject(
                RejectReason::AlreadyRevealed,
                format!("{} already revealed {}", request.player_id, request.instance_key),
            ));
        }
        if !validate_reveal(payload, nonce, &commitment.commit_hash) {
            return Err(self.reject(
                RejectReason::HashMismatch,
                "payload and nonce do not match the commitment",
            ));
        }
        let effect = self.decode_reveal(kind, &request.player_id, payload)?;
        self.apply_reveal(effect, &request.player_id);

        let revealed = Commitment {
            commit_hash: commitment.commit_hash,
            reveal_payload: Some(payload.clone()),
            revealed_at: Some(now_millis()),
        };
        self.commitments
            .entry(request.instance_key.clone())
            .or_default()
            .insert(request.player_id.clone(), revealed.clone());
        self.ready.insert(request.player_id.clone(), true);
        info!(
            instance = %request.instance_key,
            player = %request.player_id,
            turn = self.turn,
            "reveal accepted"
        );
        Ok(IntentReceipt {
            instance_key: request.instance_key.clone(),
            player_id: request.player_id.clone(),
            commitment: revealed,
            turn_number: self.turn,
        })
    }

    fn decode_reveal(
        &self,
        kind: InstanceKind,
        player: &str,
        payload: &Value,
    ) -> Result<RevealEffect, Rejection> {
        let malformed = |message: String| self.reject(RejectReason::MalformedIntent, message);
        match kind {
            InstanceKind::Species => {
                let choice: SpeciesChoice =
                    serde_json::from_value(payload.clone()).map_err(|e| malformed(e.to_string()))?;
                check_species_choice(&choice).map_err(|e| malformed(e.to_string()))?;
                Ok(RevealEffect::Species(choice.species))
            }
            InstanceKind::Build => {
                let order: BuildOrder =
                    serde_json::from_value(payload.clone()).map_err(|e| malformed(e.to_string()))?;
                let species = self.seat(player).and_then(|s| s.species.as_deref());
                check_build_order(&order, species).map_err(|e| malformed(e.to_string()))?;
                Ok(RevealEffect::Build(order))
            }
            InstanceKind::Charge => {
                let declaration: ChargeDeclaration =
                    serde_json::from_value(payload.clone()).map_err(|e| malformed(e.to_string()))?;
                check_charge_declaration(&declaration).map_err(|e| malformed(e.to_string()))?;
                let fleet = self.ships.get(player).map(Vec::as_slice).unwrap_or(&[]);
                if let Some(stray) = declaration
                    .ship_ids
                    .iter()
                    .find(|id| !fleet.iter().any(|s| &s.ship_id == *id))
                {
                    return Err(malformed(format!("ship {} is not in the fleet of {}", stray, player)));
                }
                Ok(RevealEffect::Charge(declaration.ship_ids))
            }
        }
    }

    fn apply_reveal(&mut self, effect: RevealEffect, player: &str) {
        match effect {
            RevealEffect::Species(species) => {
                if let Some(seat) = self.seats.iter_mut().find(|s| s.key == player) {
                    seat.species = Some(species);
                }
            }
            RevealEffect::Build(order) => {
                let turn = self.turn;
                let mut built = Vec::new();
                for entry in order.ships.iter() {
                    for _ in 0..entry.count {
                        built.push(ShipEntry {
                            ship_id: format!("ship-{}", self.next_ship),
                            owner_id: player.to_string(),
                            ship_def_id: entry.ship_def_id.clone(),
                            created_turn: Some(turn),
                        });
                        self.next_ship += 1;
                    }
                }
                debug!(player, count = built.len(), turn, "ships materialized");
                self.ships.entry(player.to_string()).or_default().extend(built);
            }
            RevealEffect::Charge(ship_ids) => {
                self.charges.insert(player.to_string(), ship_ids);
            }
        }
    }

    /// Whether every seat has acted in the current window. Automatic subphases are always
    /// settled.
    pub fn window_settled(&self) -> bool {
        let instance = |kind: InstanceKind| kind.instance_key(self.turn);
        if let Some(kind) = InstanceKind::for_commit_window(self.phase) {
            let key = instance(kind);
            return self.seats.iter().all(|s| self.commitment(&key, &s.key).is_some());
        }
        if let Some(kind) = InstanceKind::for_reveal_window(self.phase) {
            let key = instance(kind);
            return self.seats.iter().all(|s| {
                self.commitment(&key, &s.key)
                    .map(Commitment::is_revealed)
                    .unwrap_or(false)
            });
        }
        true
    }

    /// Advances through every settled window and returns the keys entered, in order. Stops at
    /// the first window still waiting on a player, or when the game ends.
    pub fn settle<R: RngCore>(&mut self, dice: &mut DiceSource<R>) -> Vec<PhaseKey> {
        let mut entered = Vec::new();
        while !self.is_over() && self.window_settled() {
            match self.phase.successor(self.turn >= self.max_turns) {
                Successor::Phase(next) => self.enter(next, dice),
                Successor::NewTurn(start) => {
                    self.turn += 1;
                    info!(turn = self.turn, "turn started");
                    self.enter(start, dice);
                }
                Successor::GameOver => {
                    self.finish();
                    break;
                }
            }
            entered.push(self.phase);
        }
        entered
    }

    fn enter<R: RngCore>(&mut self, next: PhaseKey, dice: &mut DiceSource<R>) {
        self.phase = next;
        for flag in self.ready.values_mut() {
            *flag = false;
        }
        match next.sub() {
            SubPhase::DiceRoll => {
                let roll = dice.roll();
                self.last_roll = Some(roll);
                debug!(turn = self.turn, roll, "die rolled");
            }
            SubPhase::ChargeDeclaration => self.charges.clear(),
            _ => {}
        }
        debug!(phase = %next, turn = self.turn, "phase entered");
    }

    fn finish(&mut self) {
        let mut sizes: Vec<(usize, &str)> = self
            .seats
            .iter()
            .map(|s| (self.ships.get(&s.key).map(Vec::len).unwrap_or(0), s.key.as_str()))
            .collect();
        sizes.sort();
        let winner = match sizes.as_slice() {
            [(low, _), (high, key)] if high > low => Some(key.to_string()),
            _ => None,
        };
        info!(turns = self.turn, winner = ?winner, "game over");
        self.result = Some(GameResult {
            winner,
            turns_played: self.turn,
        });
    }

    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            phase_key: self.phase_key(),
            turn_number: self.turn,
            players: self.players.clone(),
            commitments: self.commitments.clone(),
            ships: self.ships.clone(),
            ready: self.ready.clone(),
            last_roll: self.last_roll,
            result: self.result.clone(),
        }
    }

    /// Snapshot as `viewer` may see it: fleets other than the viewer's own pass through the
    /// visibility rule. Spectators and unknown viewers see every fleet filtered.
    pub fn snapshot_for(&self, viewer: Option<&str>) -> GameSnapshot {
        let mut snapshot = self.snapshot();
        let phase = snapshot.phase();
        for (owner, ships) in snapshot.ships.iter_mut() {
            if Some(owner.as_str()) != viewer {
                ships.retain(|ship| is_visible_to_opponent(ship, self.turn, phase));
            }
        }
        snapshot
    }

    pub fn state_hash(&self) -> Result<StateHash, CanonicalError> {
        self.snapshot().state_hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shipyard::crypto::{generate_nonce, make_commit_hash};
    use shipyard::types::Role;

    fn player(id: &str) -> Player {
        Player {
            id: id.to_string(),
            session_id: None,
            player_id: None,
            name: id.to_uppercase(),
            role: Role::Player,
        }
    }

    fn new_game(max_turns: u32) -> GameState {
        GameState::new(vec![player("a"), player("b")], max_turns).unwrap()
    }

    fn commit(game: &mut GameState, who: &str, kind: InstanceKind, payload: &Value) -> Result<String, Rejection> {
        let nonce = generate_nonce();
        let hash = make_commit_hash(payload, &nonce).unwrap();
        let request =
            IntentRequest::commit(kind.instance_key(game.turn), who.to_string(), hash, game.turn);
        game.record_commit(&request).map(|_| nonce)
    }

    fn reveal(
        game: &mut GameState,
        who: &str,
        kind: InstanceKind,
        payload: &Value,
        nonce: &str,
    ) -> Result<IntentReceipt, Rejection> {
        let request = IntentRequest::reveal(
            kind.instance_key(game.turn),
            who.to_string(),
            payload.clone(),
            nonce.to_string(),
            game.turn,
        );
        game.record_reveal(&request)
    }

    /// Commits and reveals the same payloads for both seats, settling after each window.
    fn play_window(
        game: &mut GameState,
        dice: &mut DiceSource<rand_pcg::Pcg64Mcg>,
        kind: InstanceKind,
        a: Value,
        b: Value,
    ) {
        let nonce_a = commit(game, "a", kind, &a).unwrap();
        let nonce_b = commit(game, "b", kind, &b).unwrap();
        game.settle(dice);
        assert_eq!(game.phase, kind.reveal_window());
        reveal(game, "a", kind, &a, &nonce_a).unwrap();
        reveal(game, "b", kind, &b, &nonce_b).unwrap();
        game.settle(dice);
    }

    fn play_setup(game: &mut GameState, dice: &mut DiceSource<rand_pcg::Pcg64Mcg>) {
        play_window(
            game,
            dice,
            InstanceKind::Species,
            json!({"species": "terran"}),
            json!({"species": "xenite"}),
        );
    }

    #[test]
    fn needs_two_distinct_seats() {
        assert_eq!(
            GameState::new(vec![player("a")], 3).unwrap_err(),
            SetupError::SeatCount(1)
        );
        assert_eq!(
            GameState::new(vec![player("a"), player("a")], 3).unwrap_err(),
            SetupError::DuplicateKey("a".into())
        );
        assert_eq!(
            GameState::new(vec![player("a"), player("b")], 0).unwrap_err(),
            SetupError::NoTurns
        );
    }

    #[test]
    fn setup_flows_into_build_drawing() {
        let mut game = new_game(3);
        let mut dice = DiceSource::seeded(7);
        assert_eq!(game.phase_key(), "setup.species_selection");
        play_setup(&mut game, &mut dice);
        assert_eq!(game.phase_key(), "build.drawing");
        assert_eq!(game.turn, 1);
        assert!(game.last_roll.is_some());
        assert_eq!(game.seat("a").unwrap().species.as_deref(), Some("terran"));
        assert_eq!(game.seat("b").unwrap().species.as_deref(), Some("xenite"));
    }

    #[test]
    fn settle_waits_for_both_commits() {
        let mut game = new_game(3);
        let mut dice = DiceSource::seeded(1);
        commit(&mut game, "a", InstanceKind::Species, &json!({"species": "terran"})).unwrap();
        assert!(game.settle(&mut dice).is_empty());
        assert_eq!(game.phase, PhaseKey::INITIAL);
        assert!(game.ready["a"]);
        assert!(!game.ready["b"]);
    }

    #[test]
    fn commit_rejections() {
        let mut game = new_game(3);
        let payload = json!({"species": "terran"});

        let err = commit(&mut game, "a", InstanceKind::Build, &payload).unwrap_err();
        assert_eq!(err.reason, RejectReason::WrongPhase);

        let err = commit(&mut game, "zed", InstanceKind::Species, &payload).unwrap_err();
        assert_eq!(err.reason, RejectReason::UnknownPlayer);

        let stale = IntentRequest::commit("SPECIES_1".into(), "a".into(), "ab".repeat(32), 0);
        assert_eq!(game.record_commit(&stale).unwrap_err().reason, RejectReason::BadTurn);

        let future = IntentRequest::commit("SPECIES_2".into(), "a".into(), "ab".repeat(32), 1);
        assert_eq!(game.record_commit(&future).unwrap_err().reason, RejectReason::BadTurn);

        let unknown = IntentRequest::commit("TRADE_1".into(), "a".into(), "ab".repeat(32), 1);
        assert_eq!(
            game.record_commit(&unknown).unwrap_err().reason,
            RejectReason::UnknownInstance
        );

        let short = IntentRequest::commit("SPECIES_1".into(), "a".into(), "abc".into(), 1);
        assert_eq!(
            game.record_commit(&short).unwrap_err().reason,
            RejectReason::MalformedIntent
        );

        commit(&mut game, "a", InstanceKind::Species, &payload).unwrap();
        let err = commit(&mut game, "a", InstanceKind::Species, &payload).unwrap_err();
        assert_eq!(err.reason, RejectReason::AlreadyCommitted);
        assert_eq!(err.turn_number, 1);
    }

    #[test]
    fn reveal_rejections() {
        let mut game = new_game(3);
        let mut dice = DiceSource::seeded(2);
        let terran = json!({"species": "terran"});
        let nonce_a = commit(&mut game, "a", InstanceKind::Species, &terran).unwrap();

        let err = reveal(&mut game, "a", InstanceKind::Species, &terran, &nonce_a).unwrap_err();
        assert_eq!(err.reason, RejectReason::WrongPhase);

        commit(&mut game, "b", InstanceKind::Species, &json!({"species": "ancient"})).unwrap();
        game.settle(&mut dice);

        let err = reveal(&mut game, "a", InstanceKind::Species, &json!({"species": "xenite"}), &nonce_a)
            .unwrap_err();
        assert_eq!(err.reason, RejectReason::HashMismatch);

        let err = reveal(&mut game, "a", InstanceKind::Species, &terran, "xyz").unwrap_err();
        assert_eq!(err.reason, RejectReason::MalformedIntent);

        let receipt = reveal(&mut game, "a", InstanceKind::Species, &terran, &nonce_a).unwrap();
        assert!(receipt.commitment.is_revealed());
        assert_eq!(receipt.commitment.reveal_payload, Some(terran.clone()));

        let err = reveal(&mut game, "a", InstanceKind::Species, &terran, &nonce_a).unwrap_err();
        assert_eq!(err.reason, RejectReason::AlreadyRevealed);
        assert_eq!(game.phase_key(), "setup.species_reveal");
    }

    #[test]
    fn reveal_without_commit_is_rejected() {
        let mut game = new_game(3);
        let mut dice = DiceSource::seeded(3);
        play_setup(&mut game, &mut dice);
        let order = json!({"ships": [{"shipDefId": "te-fighter", "count": 1}]});
        commit(&mut game, "b", InstanceKind::Build, &json!({"ships": []})).unwrap();
        // a never commits, so the window stays open and the reveal has nothing to match
        game.phase = InstanceKind::Build.reveal_window();
        let err = reveal(&mut game, "a", InstanceKind::Build, &order, &generate_nonce()).unwrap_err();
        assert_eq!(err.reason, RejectReason::NotCommitted);
    }

    #[test]
    fn build_reveal_materializes_ships() {
        let mut game = new_game(3);
        let mut dice = DiceSource::seeded(4);
        play_setup(&mut game, &mut dice);
        play_window(
            &mut game,
            &mut dice,
            InstanceKind::Build,
            json!({"ships": [{"shipDefId": "te-fighter", "count": 2}]}),
            json!({"ships": [{"shipDefId": "xe-larva", "count": 1}]}),
        );
        assert_eq!(game.phase_key(), "battle.charge_declaration");
        assert_eq!(game.ships["a"].len(), 2);
        assert_eq!(game.ships["b"].len(), 1);
        assert!(game.ships["a"].iter().all(|s| s.created_turn == Some(1) && s.owner_id == "a"));
        assert_ne!(game.ships["a"][0].ship_id, game.ships["a"][1].ship_id);
    }

    #[test]
    fn off_species_build_is_malformed() {
        let mut game = new_game(3);
        let mut dice = DiceSource::seeded(5);
        play_setup(&mut game, &mut dice);
        let order = json!({"ships": [{"shipDefId": "xe-hive", "count": 1}]});
        let nonce = commit(&mut game, "a", InstanceKind::Build, &order).unwrap();
        commit(&mut game, "b", InstanceKind::Build, &json!({"ships": []})).unwrap();
        game.settle(&mut dice);
        let err = reveal(&mut game, "a", InstanceKind::Build, &order, &nonce).unwrap_err();
        assert_eq!(err.reason, RejectReason::MalformedIntent);
        assert!(!game.commitment("BUILD_1", "a").unwrap().is_revealed());
    }

    #[test]
    fn full_turn_wraps_to_next_build() {
        let mut game = new_game(3);
        let mut dice = DiceSource::seeded(6);
        play_setup(&mut game, &mut dice);
        play_window(
            &mut game,
            &mut dice,
            InstanceKind::Build,
            json!({"ships": [{"shipDefId": "te-fighter", "count": 1}]}),
            json!({"ships": []}),
        );
        let charging = game.ships["a"][0].ship_id.clone();
        play_window(
            &mut game,
            &mut dice,
            InstanceKind::Charge,
            json!({"shipIds": [charging]}),
            json!({"shipIds": []}),
        );
        assert_eq!(game.turn, 2);
        assert_eq!(game.phase_key(), "build.drawing");
        assert!(game.ready.values().all(|r| !r));
    }

    #[test]
    fn charge_must_name_own_ships() {
        let mut game = new_game(3);
        let mut dice = DiceSource::seeded(8);
        play_setup(&mut game, &mut dice);
        play_window(
            &mut game,
            &mut dice,
            InstanceKind::Build,
            json!({"ships": []}),
            json!({"ships": [{"shipDefId": "xe-larva", "count": 1}]}),
        );
        let theirs = game.ships["b"][0].ship_id.clone();
        let declaration = json!({"shipIds": [theirs]});
        let nonce = commit(&mut game, "a", InstanceKind::Charge, &declaration).unwrap();
        commit(&mut game, "b", InstanceKind::Charge, &json!({"shipIds": []})).unwrap();
        game.settle(&mut dice);
        let err = reveal(&mut game, "a", InstanceKind::Charge, &declaration, &nonce).unwrap_err();
        assert_eq!(err.reason, RejectReason::MalformedIntent);
    }

    #[test]
    fn turn_limit_ends_the_game() {
        let mut game = new_game(1);
        let mut dice = DiceSource::seeded(9);
        play_setup(&mut game, &mut dice);
        play_window(
            &mut game,
            &mut dice,
            InstanceKind::Build,
            json!({"ships": [{"shipDefId": "te-carrier", "count": 1}]}),
            json!({"ships": []}),
        );
        play_window(
            &mut game,
            &mut dice,
            InstanceKind::Charge,
            json!({"shipIds": []}),
            json!({"shipIds": []}),
        );
        assert!(game.is_over());
        assert_eq!(game.phase_key(), GAME_OVER_KEY);
        let result = game.result.clone().unwrap();
        assert_eq!(result.winner.as_deref(), Some("a"));
        assert_eq!(result.turns_played, 1);

        let err = commit(&mut game, "a", InstanceKind::Build, &json!({"ships": []})).unwrap_err();
        assert_eq!(err.reason, RejectReason::GameOver);
        assert!(game.settle(&mut dice).is_empty());
    }

    #[test]
    fn snapshot_hides_fresh_enemy_ships_outside_battle() {
        let mut game = new_game(3);
        let mut dice = DiceSource::seeded(10);
        play_setup(&mut game, &mut dice);
        game.ships.get_mut("b").unwrap().push(ShipEntry {
            ship_id: "ship-99".into(),
            owner_id: "b".into(),
            ship_def_id: "xe-hive".into(),
            created_turn: Some(1),
        });
        assert!(game.snapshot_for(Some("a")).ships["b"].is_empty());
        assert_eq!(game.snapshot_for(Some("b")).ships["b"].len(), 1);
        assert!(game.snapshot_for(None).ships["b"].is_empty());
        assert_eq!(game.snapshot().ships["b"].len(), 1);
    }

    #[test]
    fn seeded_games_hash_identically() {
        let mut left = new_game(3);
        let mut right = new_game(3);
        let mut dice_left = DiceSource::seeded(11);
        let mut dice_right = DiceSource::seeded(11);
        play_setup(&mut left, &mut dice_left);
        play_setup(&mut right, &mut dice_right);
        assert_eq!(left.last_roll, right.last_roll);
        // nonces and reveal timestamps differ between the two runs
        left.commitments.clear();
        right.commitments.clear();
        assert_eq!(left.state_hash().unwrap(), right.state_hash().unwrap());
    }
}
