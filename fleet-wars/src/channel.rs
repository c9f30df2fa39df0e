use crate::net::{ClientMessage, Envelope, IntentReceipt, IntentRequest, Rejection, ServerMessage};
use crate::GameServer;
use shipyard::GameSnapshot;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

// Transport seam between a client session and the authoritative server. The orchestrator
// only needs "submit an intent, get a receipt or a reason", so anything that can carry an
// `IntentRequest` (websocket, HTTP, in-process) plugs in here.

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("rejected by server: {0}")]
    Rejected(#[from] Rejection),
}

impl ChannelError {
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            ChannelError::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }
}

pub trait IntentChannel: Send + Sync {
    fn submit(
        &self,
        intent: IntentRequest,
    ) -> impl Future<Output = Result<IntentReceipt, ChannelError>> + Send;
}

/// In-process channel that still goes through the JSON envelope, so the wire shapes are
/// exercised exactly as a remote transport would see them.
#[derive(Clone)]
pub struct LocalChannel {
    server: Arc<GameServer>,
    session: String,
}

impl LocalChannel {
    pub fn new(server: Arc<GameServer>, session: impl Into<String>) -> Self {
        Self {
            server,
            session: session.into(),
        }
    }

    pub async fn snapshot(&self) -> GameSnapshot {
        self.server.snapshot_for(Some(self.session.as_str())).await
    }
}

impl IntentChannel for LocalChannel {
    async fn submit(&self, intent: IntentRequest) -> Result<IntentReceipt, ChannelError> {
        let raw = serde_json::to_string(&Envelope {
            session: Some(self.session.clone()),
            message: ClientMessage::Intent(intent),
        })?;
        let reply: Envelope<ServerMessage> = serde_json::from_str(&self.server.handle_raw(&raw).await)?;
        match reply.message {
            ServerMessage::Intent(reply) => Ok(reply.into_result()?),
            ServerMessage::Error(message) => Err(ChannelError::Transport(message)),
            other => Err(ChannelError::Transport(format!(
                "unexpected reply to an intent: {:?}",
                other
            ))),
        }
    }
}
