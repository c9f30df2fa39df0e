use serde::{Deserialize, Serialize};
use serde_json::Value;
use shipyard::types::{Commitment, StateHash};
use shipyard::GameSnapshot;
use thiserror::Error;

// Wire-level shapes for intents and the session envelope. Field names follow the JSON the
// transport carries (camelCase keys, SCREAMING_SNAKE_CASE rejection codes).

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IntentType {
    Commit,
    Reveal,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntentRequest {
    #[serde(rename = "type")]
    pub kind: IntentType,
    pub instance_key: String,
    pub player_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    pub turn_number: u32,
}

impl IntentRequest {
    pub fn commit(instance_key: String, player_id: String, commit_hash: String, turn_number: u32) -> Self {
        Self {
            kind: IntentType::Commit,
            instance_key,
            player_id,
            commit_hash: Some(commit_hash),
            payload: None,
            nonce: None,
            turn_number,
        }
    }

    pub fn reveal(
        instance_key: String,
        player_id: String,
        payload: Value,
        nonce: String,
        turn_number: u32,
    ) -> Self {
        Self {
            kind: IntentType::Reveal,
            instance_key,
            player_id,
            commit_hash: None,
            payload: Some(payload),
            nonce: Some(nonce),
            turn_number,
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    BadTurn,
    WrongPhase,
    AlreadyCommitted,
    NotCommitted,
    AlreadyRevealed,
    HashMismatch,
    MalformedIntent,
    UnknownPlayer,
    UnknownInstance,
    GameOver,
}

impl RejectReason {
    /// The request was built against an older turn or phase. Resubmitting against a fresh
    /// snapshot may succeed.
    pub fn is_stale(&self) -> bool {
        matches!(self, RejectReason::BadTurn | RejectReason::WrongPhase)
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Error)]
#[serde(rename_all = "camelCase")]
#[error("{reason:?}: {message}")]
pub struct Rejection {
    pub reason: RejectReason,
    pub message: String,
    pub turn_number: u32,
}

impl Rejection {
    pub fn new(reason: RejectReason, message: impl Into<String>, turn_number: u32) -> Self {
        Self {
            reason,
            message: message.into(),
            turn_number,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntentReceipt {
    pub instance_key: String,
    pub player_id: String,
    pub commitment: Commitment,
    pub turn_number: u32,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum IntentReply {
    Accepted(IntentReceipt),
    Rejected(Rejection),
}

impl IntentReply {
    pub fn turn_number(&self) -> u32 {
        match self {
            IntentReply::Accepted(receipt) => receipt.turn_number,
            IntentReply::Rejected(rejection) => rejection.turn_number,
        }
    }

    pub fn into_result(self) -> Result<IntentReceipt, Rejection> {
        match self {
            IntentReply::Accepted(receipt) => Ok(receipt),
            IntentReply::Rejected(rejection) => Err(rejection),
        }
    }
}

impl From<Result<IntentReceipt, Rejection>> for IntentReply {
    fn from(result: Result<IntentReceipt, Rejection>) -> Self {
        match result {
            Ok(receipt) => IntentReply::Accepted(receipt),
            Err(rejection) => IntentReply::Rejected(rejection),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    GetSnapshot,
    Intent(IntentRequest),
    RequestStateHash,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    Snapshot(GameSnapshot),
    Intent(IntentReply),
    StateHash(StateHash),
    Error(String),
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Envelope<T> {
    /// Session that sent the message (requests) or that the message is addressed to
    /// (replies). Snapshots are filtered for this session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    pub message: T,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commit_request_wire_shape() {
        let request = IntentRequest::commit("BUILD_3".into(), "a".into(), "ab".repeat(32), 3);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "commit");
        assert_eq!(value["instanceKey"], "BUILD_3");
        assert_eq!(value["playerId"], "a");
        assert_eq!(value["turnNumber"], 3);
        assert!(value.get("payload").is_none());
        assert!(value.get("nonce").is_none());
    }

    #[test]
    fn reveal_request_parses() {
        let raw = json!({
            "type": "reveal",
            "instanceKey": "BUILD_3",
            "playerId": "a",
            "payload": {"ships": []},
            "nonce": "00".repeat(16),
            "turnNumber": 3
        });
        let request: IntentRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(request.kind, IntentType::Reveal);
        assert!(request.commit_hash.is_none());
        assert_eq!(request.payload, Some(json!({"ships": []})));
    }

    #[test]
    fn rejection_codes_are_screaming_snake() {
        let reply = IntentReply::Rejected(Rejection::new(RejectReason::BadTurn, "turn moved on", 4));
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["status"], "rejected");
        assert_eq!(value["reason"], "BAD_TURN");
        assert_eq!(value["turnNumber"], 4);
        let back: IntentReply = serde_json::from_value(value).unwrap();
        assert_eq!(back.turn_number(), 4);
        assert_eq!(back.into_result().unwrap_err().reason, RejectReason::BadTurn);
    }

    #[test]
    fn accepted_reply_carries_commitment() {
        let reply = IntentReply::Accepted(IntentReceipt {
            instance_key: "SPECIES_1".into(),
            player_id: "b".into(),
            commitment: Commitment::new("cd".repeat(32)),
            turn_number: 1,
        });
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["status"], "accepted");
        assert_eq!(value["commitment"]["commitHash"], "cd".repeat(32));
        let receipt = serde_json::from_value::<IntentReply>(value)
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(receipt.player_id, "b");
    }

    #[test]
    fn only_turn_and_phase_are_stale() {
        assert!(RejectReason::BadTurn.is_stale());
        assert!(RejectReason::WrongPhase.is_stale());
        assert!(!RejectReason::HashMismatch.is_stale());
        assert!(!RejectReason::AlreadyRevealed.is_stale());
    }

    #[test]
    fn envelope_nests_tagged_messages() {
        let envelope = Envelope {
            session: Some("a".to_string()),
            message: ClientMessage::GetSnapshot,
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["message"]["type"], "GetSnapshot");
        let back: Envelope<ClientMessage> = serde_json::from_value(value).unwrap();
        assert_eq!(back, envelope);
    }
}
