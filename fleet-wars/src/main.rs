use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, Command};
use fleet_wars::channel::{ChannelError, LocalChannel};
use fleet_wars::client::{ClientError, ClientSession, CommitPayload, Refresh};
use fleet_wars::config::{Config, PlayerConfig};
use fleet_wars::game::GameState;
use fleet_wars::orchestrator::Evaluation;
use fleet_wars::{match_dice, GameServer};
use shipyard::catalog::ships_of;
use shipyard::constants::GAME_NAME;
use shipyard::types::{BuildOrder, ChargeDeclaration, InstanceKind, ShipOrder, SpeciesChoice};
use shipyard::{resolve_identity, GameSnapshot};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

// Rounds of polling allowed per turn before the match counts as stalled.
const ROUNDS_PER_TURN: u32 = 64;

/// Scripted decision for whatever commit window `snapshot` has open, if this seat still owes
/// one.
fn scripted_move(player: &PlayerConfig, snapshot: &GameSnapshot) -> Option<CommitPayload> {
    let identity = resolve_identity(&snapshot.players, Some(player.session_id.as_str()));
    let me = identity.me_ready_key?;
    let kind = snapshot.phase().and_then(InstanceKind::for_commit_window)?;
    if snapshot
        .commitment(&kind.instance_key(snapshot.turn_number), &me)
        .is_some()
    {
        return None;
    }
    let roll = snapshot.last_roll.unwrap_or(1);
    let payload = match kind {
        InstanceKind::Species => CommitPayload::Species(SpeciesChoice {
            species: player.species.clone(),
        }),
        InstanceKind::Build => {
            let options = ships_of(&player.species);
            let pick = options.get(roll as usize % options.len().max(1))?;
            CommitPayload::Build(BuildOrder {
                ships: vec![ShipOrder {
                    ship_def_id: pick.id.clone(),
                    count: 1 + u32::from(roll % 2),
                }],
            })
        }
        InstanceKind::Charge => {
            // veterans charge, fresh ships hold back
            let ship_ids = snapshot
                .ships
                .get(&me)
                .map(|ships| {
                    ships
                        .iter()
                        .filter(|s| s.created_turn.map(|t| t < snapshot.turn_number).unwrap_or(true))
                        .map(|s| s.ship_id.clone())
                        .collect()
                })
                .unwrap_or_default();
            CommitPayload::Charge(ChargeDeclaration { ship_ids })
        }
    };
    Some(payload)
}

fn report(player: &PlayerConfig, refresh: &Refresh) -> Result<()> {
    let view = &refresh.view;
    if view.ready_flash {
        info!(player = %player.name, "opponent is ready");
    }
    match &refresh.reveal {
        Ok(Evaluation::Submitted { instance_key, .. }) => {
            info!(
                player = %player.name,
                instance = %instance_key,
                turn = view.turn_number,
                phase = %view.phase.phase,
                subphase = %view.phase.subphase,
                my_fleet = ?view.fleets.my_fleet,
                opponent_fleet = ?view.fleets.opponent_fleet,
                "revealed"
            );
        }
        Ok(Evaluation::Blocked { instance_key }) => {
            bail!("{} has no cached payload for {}", player.name, instance_key)
        }
        Ok(other) => debug!(player = %player.name, evaluation = ?other, "no reveal"),
        Err(e) => bail!("{}: {}", player.name, e),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("fleet-wars")
        .about("Plays a local Fleet Wars match between two scripted sessions.")
        .arg(
            Arg::new("config")
                .long("config")
                .required(false)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("turns")
                .long("turns")
                .required(false)
                .value_parser(value_parser!(u32)),
        )
        .get_matches();

    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(turns) = matches.get_one::<u32>("turns") {
        config.max_turns = *turns;
    }
    config.validate()?;

    tracing_subscriber::fmt()
        .with_max_level(config.level()?)
        .init();
    info!(
        max_turns = config.max_turns,
        retry_budget = config.retry_budget,
        seeded = config.dice_seed.is_some(),
        "starting {} match",
        GAME_NAME
    );

    let game = GameState::new(config.seated_players(), config.max_turns).context("failed to set up match")?;
    let server = Arc::new(GameServer::new(game, match_dice(config.dice_seed)));
    let sessions: Vec<(&PlayerConfig, ClientSession<LocalChannel>)> = config
        .players
        .iter()
        .map(|p| {
            let channel = LocalChannel::new(server.clone(), p.session_id.clone());
            (p, ClientSession::new(channel, p.session_id.clone(), config.retry_budget))
        })
        .collect();

    let mut ticker = tokio::time::interval(Duration::from_millis(config.poll_interval_ms));
    let max_rounds = config.max_turns.saturating_mul(ROUNDS_PER_TURN);
    let mut rounds = 0u32;
    while !server.is_over().await {
        rounds += 1;
        if rounds > max_rounds {
            bail!("match stalled after {} rounds", max_rounds);
        }
        ticker.tick().await;
        for (player, session) in sessions.iter() {
            let snapshot = session.revealer().channel().snapshot().await;
            let refresh = session.refresh(snapshot.clone()).await;
            report(player, &refresh)?;
            let Some(payload) = scripted_move(player, &snapshot) else {
                continue;
            };
            match session.commit(payload).await {
                Ok(receipt) => debug!(player = %player.name, instance = %receipt.instance_key, "committed"),
                Err(ClientError::Channel(ChannelError::Rejected(rejection))) if rejection.reason.is_stale() => {
                    debug!(player = %player.name, reason = ?rejection.reason, "commit raced a phase change")
                }
                Err(e) => return Err(e).with_context(|| format!("{} failed to commit", player.name)),
            }
        }
    }

    let Some((player, session)) = sessions.first() else {
        bail!("no sessions to report on");
    };
    let last = session.refresh(server.snapshot_for(Some(player.session_id.as_str())).await).await;
    let hash = server.state_hash().await?;
    let result = server.snapshot_for(None).await.result;
    let winner = result
        .as_ref()
        .and_then(|r| r.winner.clone())
        .and_then(|key| config.players.iter().find(|p| p.session_id == key))
        .map(|p| p.name.clone())
        .unwrap_or_else(|| "nobody".to_string());
    info!(
        winner = %winner,
        turns = result.map(|r| r.turns_played).unwrap_or(0),
        my_fleet = ?last.view.fleets.my_fleet,
        opponent_fleet = ?last.view.fleets.opponent_fleet,
        state_hash = %hash.hash,
        "match over"
    );
    Ok(())
}
