use std::time::Duration;

use anyhow::Context;
use lockstep::arbitrate::{Arbitrator, Roster, StartupState};
use lockstep::clock::{SystemClock, TICRATE};
use lockstep::config::{load_config, CONFIG_NAME};
use lockstep::demo::DemoSim;
use lockstep::fields;
use lockstep::logger::init_logger;
use lockstep::pacer::TicOutcome;
use lockstep::session::Session;
use lockstep::transport::UdpTransport;
use tokio::net::UdpSocket;
use tracing::{error, info};

const SETUP_INTERVAL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config();
    init_logger(config.tracing.log_format(), config.tracing.log_level())?;

    let net = config.net;
    net.validate().context("invalid [net] configuration")?;
    let port = net.bind_port()?;

    info!(
        { fields::CONFIG_SOURCE } = CONFIG_NAME,
        { fields::PORT } = port,
        { fields::PLAYER } = net.console_player,
        { fields::NUM_NODES } = net.players.len().max(1),
        tracing_format = config.tracing.format.as_str(),
        tracing_level = config.tracing.level.as_str(),
        "Node configuration loaded"
    );

    let socket = UdpSocket::bind(format!("0.0.0.0:{}", port))
        .await
        .map_err(|e| {
            error!(
                { fields::PORT } = port,
                { fields::ERROR } = %e,
                "Failed to bind socket"
            );
            e
        })?;
    let mut transport = UdpTransport::new(socket, net.peer_addrs()?)?;

    let roster = if net.is_solo() {
        Roster::solo(net.user_info(), net.game_info())
    } else {
        let game_info = (net.console_player == 0).then(|| net.game_info());
        let mut arbitrator = Arbitrator::new(
            net.console_player,
            net.players.len(),
            net.user_info(),
            game_info,
        )?;

        let mut interval = tokio::time::interval(SETUP_INTERVAL);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if arbitrator.poll(&mut transport)? == StartupState::Ready {
                        break;
                    }
                }
                _ = &mut ctrl_c => {
                    info!("Startup aborted");
                    return Ok(());
                }
            }
        }
        info!(rounds = arbitrator.rounds(), "All nodes ready");
        arbitrator.into_roster().context("startup handshake did not finish")?
    };

    info!(
        { fields::MAP } = %roster.game_info.map,
        { fields::RNG_SEED } = roster.game_info.rng_seed,
        { fields::NUM_NODES } = roster.num_nodes(),
        "Starting game"
    );

    let mut sim = DemoSim::new(
        roster.console_player,
        roster.game_info.rng_seed,
        roster.node_players.clone(),
    );
    let mut session = Session::new(transport, SystemClock::new(), net.session_config(), roster)?;

    let mut frames = tokio::time::interval(Duration::from_micros(1_000_000 / TICRATE));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    'game: loop {
        tokio::select! {
            _ = frames.tick() => {}
            _ = &mut ctrl_c => break 'game,
        }

        loop {
            match session.try_run_tics(&mut sim)? {
                TicOutcome::Waiting => tokio::time::sleep(Duration::from_millis(1)).await,
                TicOutcome::Ran(_) | TicOutcome::Stalled => break,
            }
        }

        if net.max_tics.is_some_and(|max| session.gametic() >= max) {
            break;
        }
    }

    let stats = session.stats();
    info!(
        { fields::GAMETIC } = session.gametic(),
        { fields::DESYNCS } = stats.desyncs,
        { fields::DROPPED_PACKETS } = stats.dropped_packets,
        { fields::STALLS } = stats.stalls,
        "Leaving game"
    );
    session.quit()?;
    Ok(())
}
