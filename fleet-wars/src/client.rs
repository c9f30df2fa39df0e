use crate::cache::CommitCacheEntry;
use crate::channel::{ChannelError, IntentChannel};
use crate::net::{IntentReceipt, IntentRequest, RejectReason};
use crate::orchestrator::{AutoRevealer, Evaluation, RevealError};
use serde::Serialize;
use serde_json::Value;
use shipyard::catalog::{check_build_order, check_charge_declaration, check_species_choice, PayloadError};
use shipyard::constants::FIRST_TURN;
use shipyard::crypto::{generate_nonce, make_commit_hash, CanonicalError};
use shipyard::types::{BuildOrder, ChargeDeclaration, InstanceKind, SpeciesChoice};
use shipyard::visibility::{derive_fleets, FleetView};
use shipyard::{label_for, resolve_identity, GameSnapshot, PhaseLabel};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no snapshot received yet")]
    NoSnapshot,
    #[error("session {0} holds no seat in this game")]
    NotSeated(String),
    #[error("{kind:?} commits are not open during {phase}")]
    WrongPhase { kind: InstanceKind, phase: String },
    #[error("ship {0} is not in this fleet")]
    UnknownShip(String),
    #[error(transparent)]
    InvalidPayload(#[from] PayloadError),
    #[error(transparent)]
    Canonical(#[from] CanonicalError),
    #[error("payload could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Reveal(#[from] RevealError),
}

/// A hidden decision, typed by the instance kind it commits to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitPayload {
    Species(SpeciesChoice),
    Build(BuildOrder),
    Charge(ChargeDeclaration),
}

impl CommitPayload {
    pub fn kind(&self) -> InstanceKind {
        match self {
            CommitPayload::Species(_) => InstanceKind::Species,
            CommitPayload::Build(_) => InstanceKind::Build,
            CommitPayload::Charge(_) => InstanceKind::Charge,
        }
    }

    fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            CommitPayload::Species(choice) => serde_json::to_value(choice),
            CommitPayload::Build(order) => serde_json::to_value(order),
            CommitPayload::Charge(declaration) => serde_json::to_value(declaration),
        }
    }
}

/// What the local player sees after a refresh.
#[derive(Clone, Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientView {
    pub turn_number: u32,
    pub phase: PhaseLabel,
    pub fleets: FleetView,
    /// Set for exactly one refresh when the opponent's ready flag turns on.
    pub ready_flash: bool,
    pub me: Option<String>,
    pub opponent: Option<String>,
}

pub struct Refresh {
    pub view: ClientView,
    pub reveal: Result<Evaluation, RevealError>,
}

#[derive(Default)]
struct SessionState {
    latest: Option<GameSnapshot>,
    view: Option<ClientView>,
    opponent_ready: bool,
}

/// Species this seat revealed during setup, read from the server's commitment store.
fn revealed_species(snapshot: &GameSnapshot, me: &str) -> Option<String> {
    let payload = snapshot
        .commitment(&InstanceKind::Species.instance_key(FIRST_TURN), me)?
        .reveal_payload
        .clone()?;
    serde_json::from_value::<SpeciesChoice>(payload)
        .ok()
        .map(|choice| choice.species)
}

pub struct ClientSession<C> {
    revealer: AutoRevealer<C>,
    state: Mutex<SessionState>,
}

impl<C: IntentChannel> ClientSession<C> {
    pub fn new(channel: C, session_id: impl Into<String>, retry_budget: u32) -> Self {
        Self {
            revealer: AutoRevealer::new(channel, session_id, retry_budget),
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn session_id(&self) -> &str {
        self.revealer.session_id()
    }

    pub fn revealer(&self) -> &AutoRevealer<C> {
        &self.revealer
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn latest(&self) -> Option<GameSnapshot> {
        self.state().latest.clone()
    }

    pub fn view(&self) -> Option<ClientView> {
        self.state().view.clone()
    }

    /// Takes in a new server snapshot: re-derives the view, then lets the orchestrator decide
    /// whether a reveal is due.
    pub async fn refresh(&self, snapshot: GameSnapshot) -> Refresh {
        let view = {
            let mut state = self.state();
            let identity = resolve_identity(&snapshot.players, Some(self.session_id()));
            let opponent_ready = identity
                .opponent_ready_key
                .as_deref()
                .map(|key| snapshot.is_ready(key))
                .unwrap_or(false);
            let view = ClientView {
                turn_number: snapshot.turn_number,
                phase: label_for(&snapshot.phase_key),
                fleets: derive_fleets(&snapshot, &identity),
                ready_flash: opponent_ready && !state.opponent_ready,
                me: identity.me.as_ref().map(|p| p.name.clone()),
                opponent: identity.opponent.as_ref().map(|p| p.name.clone()),
            };
            state.opponent_ready = opponent_ready;
            state.view = Some(view.clone());
            state.latest = Some(snapshot.clone());
            view
        };
        let reveal = self.revealer.evaluate(&snapshot).await;
        Refresh { view, reveal }
    }

    /// Commits `payload` for the instance open in the latest snapshot. The payload and nonce
    /// are cached before submitting so the reveal can be produced later; a retried commit of
    /// the same payload reuses the cached nonce and therefore the same hash.
    pub async fn commit(&self, payload: CommitPayload) -> Result<IntentReceipt, ClientError> {
        let snapshot = self.latest().ok_or(ClientError::NoSnapshot)?;
        let identity = resolve_identity(&snapshot.players, Some(self.session_id()));
        let me = match identity.me_ready_key.as_deref() {
            Some(key) if identity.is_seated() => key.to_string(),
            _ => return Err(ClientError::NotSeated(self.session_id().to_string())),
        };
        let kind = payload.kind();
        if snapshot.phase() != Some(kind.commit_window()) {
            return Err(ClientError::WrongPhase {
                kind,
                phase: snapshot.phase_key.clone(),
            });
        }
        match &payload {
            CommitPayload::Species(choice) => check_species_choice(choice)?,
            CommitPayload::Build(order) => {
                check_build_order(order, revealed_species(&snapshot, &me).as_deref())?
            }
            CommitPayload::Charge(declaration) => {
                check_charge_declaration(declaration)?;
                let fleet = snapshot.ships.get(&me).map(Vec::as_slice).unwrap_or(&[]);
                if let Some(stray) = declaration
                    .ship_ids
                    .iter()
                    .find(|id| !fleet.iter().any(|s| &s.ship_id == *id))
                {
                    return Err(ClientError::UnknownShip(stray.clone()));
                }
            }
        }

        let value = payload.to_value()?;
        let turn = snapshot.turn_number;
        let key = kind.instance_key(turn);
        let previous = self.revealer.cached(&key);
        let nonce = previous
            .as_ref()
            .filter(|entry| entry.payload == value)
            .map(|entry| entry.nonce.clone())
            .unwrap_or_else(generate_nonce);
        let hash = make_commit_hash(&value, &nonce)?;
        self.revealer.remember(CommitCacheEntry {
            key: key.clone(),
            payload: value,
            nonce,
        });

        let request = IntentRequest::commit(key.clone(), me, hash, turn);
        match self.revealer.channel().submit(request).await {
            Ok(receipt) => {
                info!(instance = %key, turn, "commit accepted");
                Ok(receipt)
            }
            Err(ChannelError::Rejected(rejection))
                if rejection.reason == RejectReason::AlreadyCommitted =>
            {
                // The server keeps the first commitment; so must the cache.
                match previous {
                    Some(entry) => self.revealer.remember(entry),
                    None => {
                        self.revealer.forget(&key);
                    }
                }
                warn!(instance = %key, "commit refused, earlier commitment stands");
                Err(ClientError::Channel(ChannelError::Rejected(rejection)))
            }
            Err(ChannelError::Rejected(rejection)) => {
                warn!(instance = %key, reason = ?rejection.reason, "commit refused");
                self.revealer.forget(&key);
                Err(ClientError::Channel(ChannelError::Rejected(rejection)))
            }
            Err(e) => {
                // The server may hold this commit already; keep the nonce for the reveal.
                debug!(instance = %key, error = %e, "commit not confirmed, payload kept");
                Err(e.into())
            }
        }
    }

    /// Manual reveal. Runs the same gate as the automatic path against the latest snapshot.
    pub async fn reveal(&self) -> Result<Evaluation, ClientError> {
        let snapshot = self.latest().ok_or(ClientError::NoSnapshot)?;
        Ok(self.revealer.evaluate(&snapshot).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::LocalChannel;
    use crate::game::GameState;
    use crate::net::Rejection;
    use crate::orchestrator::SkipReason;
    use crate::{match_dice, GameServer};
    use shipyard::types::{Player, Role, ShipOrder};
    use std::sync::Arc;

    fn player(id: &str) -> Player {
        Player {
            id: id.to_string(),
            session_id: None,
            player_id: None,
            name: id.to_uppercase(),
            role: Role::Player,
        }
    }

    fn table(max_turns: u32) -> (Arc<GameServer>, ClientSession<LocalChannel>, ClientSession<LocalChannel>) {
        let game = GameState::new(vec![player("a"), player("b")], max_turns).unwrap();
        let server = Arc::new(GameServer::new(game, match_dice(Some(21))));
        let a = ClientSession::new(LocalChannel::new(server.clone(), "a"), "a", 5);
        let b = ClientSession::new(LocalChannel::new(server.clone(), "b"), "b", 5);
        (server, a, b)
    }

    async fn sync(session: &ClientSession<LocalChannel>) -> Refresh {
        let snapshot = session.revealer().channel().snapshot().await;
        session.refresh(snapshot).await
    }

    fn species(id: &str) -> CommitPayload {
        CommitPayload::Species(SpeciesChoice { species: id.into() })
    }

    fn build(def: &str, count: u32) -> CommitPayload {
        CommitPayload::Build(BuildOrder {
            ships: vec![ShipOrder {
                ship_def_id: def.into(),
                count,
            }],
        })
    }

    async fn through_setup(a: &ClientSession<LocalChannel>, b: &ClientSession<LocalChannel>) {
        sync(a).await;
        sync(b).await;
        a.commit(species("terran")).await.unwrap();
        b.commit(species("xenite")).await.unwrap();
        assert!(matches!(sync(a).await.reveal, Ok(Evaluation::Submitted { .. })));
        assert!(matches!(sync(b).await.reveal, Ok(Evaluation::Submitted { .. })));
    }

    #[tokio::test]
    async fn commit_needs_a_snapshot() {
        let (_, a, _) = table(2);
        assert!(matches!(
            a.commit(species("terran")).await.unwrap_err(),
            ClientError::NoSnapshot
        ));
        assert!(matches!(a.reveal().await.unwrap_err(), ClientError::NoSnapshot));
    }

    #[tokio::test]
    async fn setup_reveals_automatically() {
        let (server, a, b) = table(2);
        through_setup(&a, &b).await;
        let snapshot = server.snapshot_for(Some("a")).await;
        assert_eq!(snapshot.phase_key, "build.drawing");
        assert!(a.revealer().cache().is_empty());
        assert!(a.revealer().tracker(InstanceKind::Species).contains(1));
    }

    #[tokio::test]
    async fn local_checks_run_before_submitting() {
        let (_, a, b) = table(2);
        sync(&a).await;
        assert!(matches!(
            a.commit(build("te-fighter", 1)).await.unwrap_err(),
            ClientError::WrongPhase { kind: InstanceKind::Build, .. }
        ));
        assert!(matches!(
            a.commit(species("martian")).await.unwrap_err(),
            ClientError::InvalidPayload(PayloadError::UnknownSpecies(_))
        ));
        through_setup(&a, &b).await;
        sync(&a).await;
        assert!(matches!(
            a.commit(build("xe-hive", 1)).await.unwrap_err(),
            ClientError::InvalidPayload(PayloadError::WrongSpecies { .. })
        ));
        assert!(matches!(
            a.commit(CommitPayload::Charge(ChargeDeclaration::default()))
                .await
                .unwrap_err(),
            ClientError::WrongPhase { .. }
        ));
        assert!(a.revealer().cache().is_empty());
    }

    #[tokio::test]
    async fn spectators_cannot_commit() {
        let mut players = vec![player("a"), player("b")];
        players.push(Player {
            role: Role::Spectator,
            ..player("w")
        });
        let game = GameState::new(players, 2).unwrap();
        let server = Arc::new(GameServer::new(game, match_dice(Some(2))));
        let watcher = ClientSession::new(LocalChannel::new(server, "w"), "w", 5);
        let refresh = sync(&watcher).await;
        assert_eq!(refresh.reveal.unwrap(), Evaluation::Skipped(SkipReason::NotSeated));
        assert!(matches!(
            watcher.commit(species("terran")).await.unwrap_err(),
            ClientError::NotSeated(_)
        ));
    }

    #[tokio::test]
    async fn duplicate_commit_keeps_the_cached_nonce() {
        let (_, a, _) = table(2);
        sync(&a).await;
        a.commit(species("ancient")).await.unwrap();
        let nonce = a.revealer().cached("SPECIES_1").unwrap().nonce;
        let err = a.commit(species("ancient")).await.unwrap_err();
        match err {
            ClientError::Channel(ChannelError::Rejected(Rejection { reason, .. })) => {
                assert_eq!(reason, RejectReason::AlreadyCommitted)
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(a.revealer().cached("SPECIES_1").unwrap().nonce, nonce);
    }

    #[tokio::test]
    async fn changed_recommit_keeps_the_first_payload() {
        let (server, a, b) = table(2);
        sync(&a).await;
        sync(&b).await;
        a.commit(species("terran")).await.unwrap();
        let first = a.revealer().cached("SPECIES_1").unwrap();
        assert!(matches!(
            a.commit(species("ancient")).await.unwrap_err(),
            ClientError::Channel(ChannelError::Rejected(Rejection {
                reason: RejectReason::AlreadyCommitted,
                ..
            }))
        ));
        assert_eq!(a.revealer().cached("SPECIES_1").unwrap(), first);

        b.commit(species("xenite")).await.unwrap();
        assert!(matches!(sync(&a).await.reveal, Ok(Evaluation::Submitted { .. })));
        let snapshot = server.snapshot_for(Some("a")).await;
        let revealed = snapshot.commitment("SPECIES_1", "a").unwrap();
        assert_eq!(revealed.reveal_payload, Some(serde_json::json!({"species": "terran"})));
    }

    #[tokio::test]
    async fn recommit_without_a_cached_payload_is_not_cached() {
        let (server, a, b) = table(2);
        // another client bound to the same seat made the first commitment
        let twin = ClientSession::new(LocalChannel::new(server.clone(), "a"), "a", 5);
        sync(&twin).await;
        twin.commit(species("terran")).await.unwrap();

        sync(&a).await;
        assert!(a.commit(species("ancient")).await.is_err());
        assert!(a.revealer().cached("SPECIES_1").is_none());

        sync(&b).await;
        b.commit(species("xenite")).await.unwrap();
        assert_eq!(
            sync(&a).await.reveal.unwrap(),
            Evaluation::Blocked {
                instance_key: "SPECIES_1".into()
            }
        );
    }

    #[tokio::test]
    async fn ready_flash_fires_once() {
        let (_, a, b) = table(2);
        assert!(!sync(&a).await.view.ready_flash);
        sync(&b).await;
        b.commit(species("xenite")).await.unwrap();
        let first = sync(&a).await.view;
        assert!(first.ready_flash);
        assert_eq!(first.opponent.as_deref(), Some("B"));
        assert!(!sync(&a).await.view.ready_flash);
        assert_eq!(a.view().unwrap().phase.phase, "Setup");
    }

    #[tokio::test]
    async fn build_three_turns_and_hide_fresh_ships() {
        let (server, a, b) = table(3);
        through_setup(&a, &b).await;

        for turn in 1..=3u32 {
            sync(&a).await;
            sync(&b).await;
            a.commit(build("te-fighter", 1)).await.unwrap();
            b.commit(build("xe-larva", 2)).await.unwrap();

            // both commits are in, so the server is already waiting in battle.reveal
            let view = sync(&a).await;
            assert!(matches!(view.reveal, Ok(Evaluation::Submitted { turn: t, .. }) if t == turn));
            let view = sync(&b).await;
            assert!(matches!(view.reveal, Ok(Evaluation::Submitted { .. })));

            let refresh = sync(&a).await;
            assert_eq!(refresh.view.phase.subphase, "Charge Declaration");
            assert_eq!(refresh.view.fleets.opponent_fleet["xe-larva"], 2 * turn);
            assert_eq!(refresh.view.fleets.my_fleet["te-fighter"], turn);

            let charge = CommitPayload::Charge(ChargeDeclaration::default());
            a.commit(charge.clone()).await.unwrap();
            sync(&b).await;
            b.commit(charge).await.unwrap();
            sync(&a).await;
            sync(&b).await;
        }

        let finished = server.snapshot_for(Some("a")).await;
        assert!(finished.is_over());
        assert_eq!(finished.result.unwrap().winner.as_deref(), Some("b"));
        assert!(a.revealer().tracker(InstanceKind::Build).contains(3));
        assert!(a.revealer().tracker(InstanceKind::Charge).contains(3));
    }

    #[tokio::test]
    async fn previous_turn_ships_stay_visible() {
        let (server, a, b) = table(3);
        through_setup(&a, &b).await;
        sync(&a).await;
        sync(&b).await;
        a.commit(build("te-fighter", 1)).await.unwrap();
        b.commit(build("xe-stinger", 1)).await.unwrap();
        sync(&a).await;
        sync(&b).await;
        let charge = CommitPayload::Charge(ChargeDeclaration::default());
        a.commit(charge.clone()).await.unwrap();
        sync(&b).await;
        b.commit(charge).await.unwrap();
        sync(&a).await;
        sync(&b).await;

        // turn 2 drawing: turn-1 ships are old news
        let refresh = sync(&a).await;
        assert_eq!(refresh.view.turn_number, 2);
        assert_eq!(refresh.view.fleets.opponent_fleet["xe-stinger"], 1);
        let hash = server.state_hash().await.unwrap();
        assert_eq!(hash.turn, 2);
    }
}
