use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::json;
use shipyard::crypto::CanonicalError;
use shipyard::rng::{derive_seed, pcg_from_seed, DiceSource};
use shipyard::types::StateHash;
use shipyard::{resolve_identity, GameSnapshot};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub mod cache;
pub mod channel;
pub mod client;
pub mod config;
pub mod game;
pub mod net;
pub mod orchestrator;
pub mod tracker;

use game::GameState;
use net::{
    ClientMessage, Envelope, IntentReply, IntentRequest, IntentType, RejectReason, Rejection,
    ServerMessage,
};

pub type BoxedDice = DiceSource<Box<dyn RngCore + Send>>;

/// Dice for a match: replayable when a seed is given, OS-backed otherwise.
pub fn match_dice(seed: Option<u64>) -> BoxedDice {
    let rng: Box<dyn RngCore + Send> = match seed {
        Some(seed) => Box::new(pcg_from_seed(derive_seed(seed, "dice"))),
        None => Box::new(OsRng),
    };
    DiceSource::from_rng(rng)
}

struct ServerState {
    game: GameState,
    dice: BoxedDice,
}

/// Authoritative side of a match. Every intent runs under one lock, so commits, reveals and
/// phase advancement are serialized even when sessions submit concurrently.
pub struct GameServer {
    inner: Mutex<ServerState>,
}

impl GameServer {
    pub fn new(game: GameState, dice: BoxedDice) -> Self {
        Self {
            inner: Mutex::new(ServerState { game, dice }),
        }
    }

    pub async fn handle_intent(&self, request: IntentRequest) -> IntentReply {
        let mut state = self.inner.lock().await;
        let ServerState { game, dice } = &mut *state;
        let result = match request.kind {
            IntentType::Commit => game.record_commit(&request),
            IntentType::Reveal => game.record_reveal(&request),
        };
        match &result {
            Ok(_) => {
                let entered = game.settle(dice);
                if !entered.is_empty() {
                    info!(phase = %game.phase_key(), turn = game.turn, steps = entered.len(), "phase advanced");
                }
            }
            Err(rejection) => warn!(
                instance = %request.instance_key,
                player = %request.player_id,
                reason = ?rejection.reason,
                "intent rejected: {}",
                rejection.message
            ),
        }
        result.into()
    }

    /// Snapshot filtered for the seat bound to `session`.
    pub async fn snapshot_for(&self, session: Option<&str>) -> GameSnapshot {
        let state = self.inner.lock().await;
        let identity = resolve_identity(&state.game.players, session);
        state.game.snapshot_for(identity.me_ready_key.as_deref())
    }

    pub async fn state_hash(&self) -> Result<StateHash, CanonicalError> {
        self.inner.lock().await.game.state_hash()
    }

    pub async fn is_over(&self) -> bool {
        self.inner.lock().await.game.is_over()
    }

    pub async fn handle_message(&self, envelope: Envelope<ClientMessage>) -> Envelope<ServerMessage> {
        let session = envelope.session;
        let message = match envelope.message {
            ClientMessage::GetSnapshot => {
                ServerMessage::Snapshot(self.snapshot_for(session.as_deref()).await)
            }
            ClientMessage::RequestStateHash => match self.state_hash().await {
                Ok(hash) => ServerMessage::StateHash(hash),
                Err(e) => ServerMessage::Error(e.to_string()),
            },
            ClientMessage::Intent(request) => match self.seat_mismatch(session.as_deref(), &request).await {
                Some(rejection) => ServerMessage::Intent(IntentReply::Rejected(rejection)),
                None => ServerMessage::Intent(self.handle_intent(request).await),
            },
        };
        Envelope { session, message }
    }

    // A session may only act for its own seat.
    async fn seat_mismatch(&self, session: Option<&str>, request: &IntentRequest) -> Option<Rejection> {
        let session = session?;
        let state = self.inner.lock().await;
        let identity = resolve_identity(&state.game.players, Some(session));
        if identity.me_ready_key.as_deref() == Some(request.player_id.as_str()) {
            return None;
        }
        Some(Rejection::new(
            RejectReason::UnknownPlayer,
            format!("session {} does not hold seat {}", session, request.player_id),
            state.game.turn,
        ))
    }

    /// JSON entry point used by transports.
    pub async fn handle_raw(&self, raw: &str) -> String {
        let reply = match serde_json::from_str::<Envelope<ClientMessage>>(raw) {
            Ok(envelope) => self.handle_message(envelope).await,
            Err(e) => {
                debug!(error = %e, "undecodable client message");
                Envelope {
                    session: None,
                    message: ServerMessage::Error(format!("bad request: {}", e)),
                }
            }
        };
        serde_json::to_string(&reply).unwrap_or_else(|e| {
            json!({"message": {"type": "Error", "data": e.to_string()}}).to_string()
        })
    }
}
