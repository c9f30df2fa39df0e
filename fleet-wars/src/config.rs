use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use shipyard::catalog::find_species;
use shipyard::constants::{DEFAULT_MAX_TURNS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_RETRY_BUDGET};
use shipyard::types::{Player, Role};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::Level;

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct PlayerConfig {
    pub session_id: String,
    pub name: String,
    /// Species the scripted player picks during setup.
    pub species: String,
}

/// Settings for a local match.
///
/// Every field has a default, so a config file only needs the values it changes.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    /// Consecutive failed reveal attempts per instance before giving up.
    pub retry_budget: u32,
    pub max_turns: u32,
    pub poll_interval_ms: u64,
    /// Replayable dice when set; OS randomness otherwise.
    pub dice_seed: Option<u64>,
    pub players: Vec<PlayerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            retry_budget: DEFAULT_RETRY_BUDGET,
            max_turns: DEFAULT_MAX_TURNS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            dice_seed: None,
            players: vec![
                PlayerConfig {
                    session_id: "alice".to_string(),
                    name: "Alice".to_string(),
                    species: "terran".to_string(),
                },
                PlayerConfig {
                    session_id: "bob".to_string(),
                    name: "Bob".to_string(),
                    species: "xenite".to_string(),
                },
            ],
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = Self::from_yaml(&raw)
            .with_context(|| format!("failed to load config {}", path.display()))?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(raw).context("invalid YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.retry_budget >= 1, "retry_budget must be at least 1");
        ensure!(self.max_turns >= 1, "max_turns must be at least 1");
        ensure!(
            self.players.len() == 2,
            "a match needs exactly two players, got {}",
            self.players.len()
        );
        let sessions: BTreeSet<&str> = self.players.iter().map(|p| p.session_id.as_str()).collect();
        ensure!(sessions.len() == 2, "player session ids must differ");
        for player in self.players.iter() {
            ensure!(!player.session_id.is_empty(), "player session id must not be empty");
            ensure!(
                find_species(&player.species).is_some(),
                "unknown species {} for {}",
                player.species,
                player.session_id
            );
        }
        self.level()?;
        Ok(())
    }

    pub fn level(&self) -> Result<Level> {
        self.log_level
            .parse::<Level>()
            .with_context(|| format!("invalid log_level {}", self.log_level))
    }

    pub fn seated_players(&self) -> Vec<Player> {
        self.players
            .iter()
            .map(|p| Player {
                id: p.session_id.clone(),
                session_id: None,
                player_id: None,
                name: p.name.clone(),
                role: Role::Player,
            })
            .collect()
    }
}
