use crate::constants::{NONCE_BYTES, NONCE_HEX_LEN};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

// Commit/reveal hashing. The client commit path and the server reveal path both go through
// `make_commit_hash`, so the canonical encoding below is the only one in the system.
//
// Canonical JSON: compact, object keys sorted by byte order at every depth, strings escaped
// by serde_json, numbers restricted to integers. Floats are refused rather than formatted.

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CanonicalError {
    #[error("payload could not be converted to JSON: {0}")]
    Serialize(String),
    #[error("payload contains a non-integer number {0}")]
    NonIntegerNumber(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NonceError {
    #[error("nonce must be {expected} hex characters, got {got}")]
    Length { expected: usize, got: usize },
    #[error("nonce must be lowercase hex")]
    NotHex,
}

pub fn canonical_json<T: Serialize>(payload: &T) -> Result<String, CanonicalError> {
    let value =
        serde_json::to_value(payload).map_err(|e| CanonicalError::Serialize(e.to_string()))?;
    let mut out = String::new();
    write_canonical(&value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut String) -> Result<(), CanonicalError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.push_str(&i.to_string());
            } else if let Some(u) = n.as_u64() {
                out.push_str(&u.to_string());
            } else {
                return Err(CanonicalError::NonIntegerNumber(n.to_string()));
            }
        }
        Value::String(s) => out.push_str(&escape(s)?),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&escape(key)?);
                out.push(':');
                write_canonical(item, out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn escape(s: &str) -> Result<String, CanonicalError> {
    serde_json::to_string(s).map_err(|e| CanonicalError::Serialize(e.to_string()))
}

/// `sha256(canonical_json(payload) || nonce)` as lowercase hex.
pub fn make_commit_hash<T: Serialize>(payload: &T, nonce: &str) -> Result<String, CanonicalError> {
    let canonical = canonical_json(payload)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hasher.update(nonce.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// True iff the payload and nonce hash to `commit_hash`. Payloads that cannot be
/// canonicalized never validate.
pub fn validate_reveal<T: Serialize>(payload: &T, nonce: &str, commit_hash: &str) -> bool {
    match make_commit_hash(payload, nonce) {
        Ok(expected) => expected == commit_hash,
        Err(_) => false,
    }
}

/// Fresh 128-bit nonce from the OS CSPRNG.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn check_nonce(nonce: &str) -> Result<(), NonceError> {
    if nonce.len() != NONCE_HEX_LEN {
        return Err(NonceError::Length {
            expected: NONCE_HEX_LEN,
            got: nonce.len(),
        });
    }
    if !nonce
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return Err(NonceError::NotHex);
    }
    Ok(())
}

/// Hash of an arbitrary serializable value under the same canonical encoding. Used to compare
/// two peers' views of the game.
pub fn canonical_digest<T: Serialize>(value: &T) -> Result<String, CanonicalError> {
    let canonical = canonical_json(value)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}
