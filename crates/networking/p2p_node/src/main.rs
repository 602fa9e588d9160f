use std::{
    cell::RefCell,
    path::PathBuf,
    rc::Rc,
    thread,
    time::{Duration, Instant},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lobby::{CoordinatorEvent, CoordinatorState, Destination, MembershipCoordinator};
use shared::{
    steam::SteamAppId,
    transport::{LoopbackLobbyService, LoopbackNetwork, LoopbackSubstrate},
    ConnId, LobbyId, LobbyService, P2pSubstrate, PeerId, SessionConfig, TransportEvent,
};
use steam_backend::SteamSdk;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "p2p_node", version, about = "Two-peer P2P session with lobby host migration")]
struct Cli {
    /// Session configuration (TOML). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run two peers in-process: invite, exchange data, migrate the host
    Simulate,
    /// Run a live session through Steam
    Steam {
        /// Join this lobby instead of hosting
        #[arg(long)]
        join: Option<u64>,
        /// Advertise the lobby through rich presence once it exists
        #[arg(long)]
        invite: bool,
        /// Stop after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => SessionConfig::default(),
    };

    match cli.cmd {
        Cmd::Simulate => simulate(config),
        Cmd::Steam {
            join,
            invite,
            duration_secs,
        } => steam(config, join.map(LobbyId::new), invite, duration_secs),
    }
}

type Received = Rc<RefCell<Vec<(Option<ConnId>, String)>>>;

/// Logs coordinator events under `label` and collects received payloads.
fn observe<S: P2pSubstrate, L: LobbyService>(
    coordinator: &mut MembershipCoordinator<S, L>,
    label: &'static str,
) -> Received {
    coordinator.on_coordinator_event(move |event| match event {
        CoordinatorEvent::StateChanged { from, to } => info!("[{label}] {from:?} -> {to:?}"),
        other => info!("[{label}] {other:?}"),
    });

    let received: Received = Rc::default();
    let sink = Rc::clone(&received);
    coordinator.on_transport_event(move |event| {
        if let TransportEvent::DataReceived { conn, payload } = event {
            let text = String::from_utf8_lossy(payload).into_owned();
            info!("[{label}] received {text:?}");
            sink.borrow_mut().push((*conn, text));
        }
    });
    received
}

type LoopbackCoordinator = MembershipCoordinator<LoopbackSubstrate, LoopbackLobbyService>;

struct Simulation {
    clock: Instant,
    step: Duration,
}

impl Simulation {
    /// Ticks both peers on a virtual clock until `done` holds.
    fn run_until(
        &mut self,
        peers: [&mut LoopbackCoordinator; 2],
        limit: Duration,
        what: &str,
        done: impl Fn(&LoopbackCoordinator, &LoopbackCoordinator) -> bool,
    ) -> Result<()> {
        let [first, second] = peers;
        let deadline = self.clock + limit;
        while !done(first, second) {
            if self.clock >= deadline {
                bail!("simulation timed out waiting for {what}");
            }
            self.clock += self.step;
            first.tick(self.clock);
            second.tick(self.clock);
        }
        info!("simulation: {what}");
        Ok(())
    }
}

fn simulate(config: SessionConfig) -> Result<()> {
    let network = LoopbackNetwork::new();
    let alice_id = PeerId::new(76561198000000001);
    let bob_id = PeerId::new(76561198000000002);

    let (substrate, lobby) = network.attach(alice_id, "Alice")?;
    let mut alice = MembershipCoordinator::new(config.clone(), substrate, lobby)?;
    let (substrate, lobby) = network.attach(bob_id, "Bob")?;
    let mut bob = MembershipCoordinator::new(config.clone(), substrate, lobby)?;

    let alice_inbox = observe(&mut alice, "alice");
    let bob_inbox = observe(&mut bob, "bob");

    let mut sim = Simulation {
        clock: Instant::now(),
        step: config.tick_interval(),
    };
    let settle = config.initial_host_delay() + Duration::from_secs(1);

    alice.activate(sim.clock);
    bob.activate(sim.clock);
    sim.run_until([&mut alice, &mut bob], settle, "both peers host", |a, b| {
        a.current_lobby().is_some() && b.current_lobby().is_some()
    })?;

    let lobby = alice.publish_invite()?;
    network.invite(bob_id, lobby, alice_id);
    sim.run_until([&mut alice, &mut bob], settle, "bob joined alice", |a, b| {
        b.state() == CoordinatorState::ConnectedAsClient && a.transport().connection_count() == 1
    })?;

    if !bob.send(Destination::Host, b"hello from bob") {
        bail!("bob could not reach the host");
    }
    sim.run_until([&mut alice, &mut bob], settle, "alice received data", |_, _| {
        !alice_inbox.borrow().is_empty()
    })?;

    let reply_to = alice_inbox.borrow().first().and_then(|(conn, _)| *conn);
    match reply_to {
        Some(conn) if alice.send(Destination::Conn(conn), b"hello from alice") => {}
        _ => bail!("alice could not answer"),
    }
    sim.run_until([&mut alice, &mut bob], settle, "bob received data", |_, _| {
        !bob_inbox.borrow().is_empty()
    })?;

    alice.shutdown();
    let migration =
        config.migration_delay() + config.session_restart_delay() + Duration::from_secs(1);
    sim.run_until([&mut alice, &mut bob], migration, "bob took over hosting", |_, b| {
        b.state() == CoordinatorState::Hosting && b.current_lobby().is_some_and(|l| l != lobby)
    })?;

    info!(
        "simulation finished: bob hosts lobby {:?} in epoch {}",
        bob.current_lobby(),
        bob.epoch()
    );
    Ok(())
}

fn steam(
    config: SessionConfig,
    join: Option<LobbyId>,
    invite: bool,
    duration_secs: Option<u64>,
) -> Result<()> {
    let sdk = SteamSdk::init(SteamAppId(config.app_id)).context("starting steamworks")?;
    let (p2p, lobbies) = sdk.into_parts();
    let tick = config.tick_interval();
    let mut coordinator = MembershipCoordinator::new(config, p2p, lobbies)?;
    let inbox = observe(&mut coordinator, "steam");

    let started = Instant::now();
    match join {
        Some(lobby) => coordinator.join(lobby),
        None => coordinator.activate(started),
    }

    let mut invited = None;
    loop {
        let now = Instant::now();
        if duration_secs.is_some_and(|secs| now.duration_since(started) >= Duration::from_secs(secs)) {
            break;
        }
        coordinator.tick(now);

        if invite && coordinator.current_lobby().is_some() && invited != coordinator.current_lobby() {
            match coordinator.publish_invite() {
                Ok(lobby) => invited = Some(lobby),
                Err(err) => warn!("could not publish invite: {err}"),
            }
        }

        for (conn, text) in inbox.borrow_mut().drain(..) {
            if text.starts_with("echo: ") {
                continue;
            }
            let destination = conn.map_or(Destination::Host, Destination::Conn);
            let echo = format!("echo: {text}");
            coordinator.send(destination, echo.as_bytes());
        }

        thread::sleep(tick);
    }

    coordinator.shutdown();
    Ok(())
}
