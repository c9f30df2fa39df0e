// Shared protocol pieces for Fleet Wars: the phase table, commit/reveal hashing, dice,
// identity resolution, fleet visibility and the snapshot read model.
//
// Everything here is pure or owns only local state, so the authoritative server and the
// client session link the same code and cannot disagree on hashing or phase order.

pub mod catalog;
pub mod constants;
pub mod crypto;
pub mod identity;
pub mod phase;
pub mod rng;
pub mod snapshot;
pub mod types;
pub mod visibility;

pub use crypto::{make_commit_hash, validate_reveal};
pub use identity::{resolve_identity, PlayerIdentity};
pub use phase::{label_for, PhaseKey, PhaseLabel};
pub use snapshot::GameSnapshot;
