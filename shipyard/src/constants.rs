// Protocol tuning and size constants. Kept in one place so the server, the client session
// and the orchestrator agree on them without duplication.
pub const GAME_NAME: &str = "Fleet Wars";

/// Turn on which a fresh game starts (setup is played on this turn only).
pub const FIRST_TURN: u32 = 1;

/// Bytes of CSPRNG output behind every commit nonce (128 bits).
pub const NONCE_BYTES: usize = 16;
pub const NONCE_HEX_LEN: usize = NONCE_BYTES * 2;

pub const DIE_FACES: u8 = 6;
/// Largest multiple of six that fits in a byte; raw bytes at or above it are rejected.
pub const DIE_REJECT_THRESHOLD: u8 = 252;

pub const SPECIES_PREFIX: &str = "SPECIES";
pub const BUILD_PREFIX: &str = "BUILD";
pub const CHARGE_PREFIX: &str = "CHARGE";

pub const UNKNOWN_LABEL: &str = "Unknown";

pub const DEFAULT_RETRY_BUDGET: u32 = 5;
pub const DEFAULT_MAX_TURNS: u32 = 8;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;
