//! Hangman integration test harness.
//!
//! Each test starts its own coordinator in-process on 127.0.0.1:0 and drives
//! real TCP handshakes against it. Gameplay runs over an in-process
//! `LocalHub` so loss can be injected deterministically.
//!
//!   cargo test --test integration

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use hangman_core::config::{default_channels, HangmanConfig};
use hangman_player::{
    ActiveSession, GameTransport, GuesserEngine, GuesserEvent, GuesserInput, GuesserOutcome,
    HandshakeEvent, LocalHub, MasterCommand, MasterEngine, MasterEvent, MasterOutcome, PeerSession, Role,
};
use hangmand::ServerContext;

mod gameplay;
mod handshake;

/// Upper bound on any single wait in these tests.
pub const STEP: Duration = Duration::from_secs(5);

// ── Coordinator ───────────────────────────────────────────────────────────────

/// Short timers, one channel per match slot.
pub fn test_config(max_matches: usize) -> HangmanConfig {
    let mut config = HangmanConfig::default();
    config.server.max_matches = max_matches;
    config.channels = default_channels(max_matches);
    config.game.match_secs = 30;
    config.game.formation_secs = 10;
    config.game.ack_millis = 30;
    config.game.release_grace_secs = 0;
    config
}

pub struct Daemon {
    pub addr: SocketAddr,
    pub ctx: Arc<ServerContext>,
    pub config: HangmanConfig,
    shutdown: broadcast::Sender<()>,
}

impl Daemon {
    pub async fn start(config: HangmanConfig) -> Daemon {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ctx = ServerContext::new(&config);
        let (shutdown, rx) = broadcast::channel(1);
        tokio::spawn(hangmand::serve(listener, Arc::clone(&ctx), rx));
        Daemon {
            addr,
            ctx,
            config,
            shutdown,
        }
    }

    pub async fn connect(&self, identity: &str, role: Role) -> PeerSession {
        PeerSession::connect(self.addr, identity, role, self.config.game.formation_duration())
            .await
            .unwrap()
    }

    pub async fn master(&self, identity: &str, capacity: usize) -> PeerSession {
        self.connect(identity, Role::Master { capacity }).await
    }

    pub async fn guesser(&self, identity: &str, master: &str) -> PeerSession {
        let role = Role::Guesser {
            master: master.to_string(),
        };
        self.connect(identity, role).await
    }

    /// Channels currently leased by the coordinator.
    pub fn channels_in_use(&self) -> usize {
        self.ctx.registry.allocator().in_use()
    }

    pub async fn wait_for_channels_in_use(&self, n: usize) {
        wait_until("channel leases to settle", move || async move {
            self.channels_in_use() == n
        })
        .await
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

/// Next handshake event that is not a listing push.
pub async fn next_event(session: &mut PeerSession) -> HandshakeEvent {
    tokio::time::timeout(STEP, async {
        loop {
            match session.next_event().await.unwrap() {
                HandshakeEvent::Listing(_) => continue,
                event => return event,
            }
        }
    })
    .await
    .expect("handshake stalled")
}

/// Poll `check` until it holds.
pub async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + STEP;
    while !check().await {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Host a match for `guessers`, fill it, and hand everyone off.
pub async fn form_match(
    daemon: &Daemon,
    master: &str,
    guessers: &[&str],
) -> (ActiveSession, Vec<ActiveSession>) {
    let mut host = daemon.master(master, guessers.len()).await;
    let HandshakeEvent::MatchCreated(channel) = next_event(&mut host).await else {
        panic!("match not created");
    };

    let mut joined = Vec::new();
    for id in guessers {
        let mut g = daemon.guesser(id, master).await;
        assert_eq!(next_event(&mut g).await, HandshakeEvent::AddedToMatch);
        joined.push(g);
    }

    assert_eq!(next_event(&mut host).await, HandshakeEvent::Start(channel.clone()));
    let host = host.handoff(channel.clone()).await.unwrap();

    let mut active = Vec::new();
    for mut g in joined {
        assert_eq!(next_event(&mut g).await, HandshakeEvent::Start(channel.clone()));
        active.push(g.handoff(channel.clone()).await.unwrap());
    }
    (host, active)
}

// ── Players ───────────────────────────────────────────────────────────────────

pub struct MasterPlayer {
    pub addr: SocketAddr,
    pub commands: mpsc::Sender<MasterCommand>,
    pub events: mpsc::UnboundedReceiver<MasterEvent>,
    pub task: JoinHandle<Result<MasterOutcome>>,
}

impl MasterPlayer {
    pub fn spawn(session: ActiveSession, hub: &LocalHub, word: &str, config: &HangmanConfig) -> Self {
        let transport = hub.join();
        let addr = transport.local_addr().unwrap();
        let (_, channel) = session.attach(transport);
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let engine = MasterEngine::new(channel, word, &config.game, cmd_rx, ev_tx);
        MasterPlayer {
            addr,
            commands: cmd_tx,
            events: ev_rx,
            task: tokio::spawn(engine.run()),
        }
    }

    /// Next accepted guess as (guesser, letter, pattern, trials left).
    pub async fn next_accepted(&mut self) -> (String, char, String, u32) {
        tokio::time::timeout(STEP, async {
            loop {
                if let MasterEvent::Accepted {
                    guesser,
                    letter,
                    pattern,
                    trials_left,
                } = self.events.recv().await.unwrap()
                {
                    return (guesser, letter, pattern, trials_left);
                }
            }
        })
        .await
        .expect("master accepted nothing")
    }

    pub async fn outcome(self) -> MasterOutcome {
        tokio::time::timeout(STEP, self.task)
            .await
            .expect("master did not finish")
            .unwrap()
            .unwrap()
    }
}

pub struct GuesserPlayer {
    pub addr: SocketAddr,
    pub inputs: mpsc::Sender<GuesserInput>,
    pub events: mpsc::UnboundedReceiver<GuesserEvent>,
    pub task: JoinHandle<Result<GuesserOutcome>>,
}

impl GuesserPlayer {
    pub fn spawn(session: ActiveSession, hub: &LocalHub, config: &HangmanConfig) -> Self {
        let transport = hub.join();
        let addr = transport.local_addr().unwrap();
        let (identity, channel) = session.attach(transport);
        let (in_tx, in_rx) = mpsc::channel(4);
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let engine = GuesserEngine::new(channel, &identity, &config.game, in_rx, ev_tx);
        GuesserPlayer {
            addr,
            inputs: in_tx,
            events: ev_rx,
            task: tokio::spawn(engine.run()),
        }
    }

    pub async fn guess(&self, letter: char) {
        self.inputs.send(GuesserInput::Guess(letter)).await.unwrap();
    }

    /// Wait for the first event `pick` accepts.
    pub async fn until<T>(&mut self, mut pick: impl FnMut(GuesserEvent) -> Option<T>) -> T {
        tokio::time::timeout(STEP, async {
            loop {
                if let Some(found) = pick(self.events.recv().await.unwrap()) {
                    return found;
                }
            }
        })
        .await
        .expect("guesser event never came")
    }

    pub async fn acknowledged(&mut self, pkt: u64) {
        self.until(|e| match e {
            GuesserEvent::Acknowledged { pkt_number } if pkt_number == pkt => Some(()),
            _ => None,
        })
        .await
    }

    pub async fn outcome(self) -> GuesserOutcome {
        tokio::time::timeout(STEP, self.task)
            .await
            .expect("guesser did not finish")
            .unwrap()
            .unwrap()
    }
}
