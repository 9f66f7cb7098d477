//! hangman-player: play one match from the terminal.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use hangman_core::config::HangmanConfig;
use hangman_core::wire::ChannelInfo;
use hangman_core::word::is_valid_word;
use hangman_player::{
    GuesserEngine, GuesserEvent, GuesserInput, HandshakeEvent, MasterCommand, MasterEngine,
    MasterEvent, MulticastTransport, PeerSession, Role,
};

// ── Handshake ─────────────────────────────────────────────────────────────────

/// Drive the handshake until the match starts. `None` means the session
/// ended without a match.
async fn await_start(
    session: &mut PeerSession,
    stdin: &mut mpsc::Receiver<String>,
) -> Result<Option<ChannelInfo>> {
    let is_master = matches!(session.role(), Role::Master { .. });

    loop {
        tokio::select! {
            event = session.next_event() => match event? {
                HandshakeEvent::Listing(matches) => {
                    println!("── open matches ({}) ──", matches.len());
                    for m in &matches {
                        println!("  {m}");
                    }
                }
                HandshakeEvent::MatchCreated(_) => {
                    println!("Match created. Waiting for guessers; type 'start' to begin now.");
                }
                HandshakeEvent::AddedToMatch => println!("Joined. Waiting for the match to start."),
                HandshakeEvent::Start(channel) => return Ok(Some(channel)),
                HandshakeEvent::Refused(r) => {
                    println!("Refused: {r}.");
                    return Ok(None);
                }
                HandshakeEvent::MatchClosed => {
                    println!("The master left; the match is closed.");
                    return Ok(None);
                }
                HandshakeEvent::FormationTimeout => {
                    println!("The match did not start in time.");
                    return Ok(None);
                }
                HandshakeEvent::ServerGone => {
                    println!("The server closed the connection.");
                    return Ok(None);
                }
            },

            Some(line) = stdin.recv() => match line.trim() {
                "exit" => {
                    session.exit().await?;
                    return Ok(None);
                }
                "start" if is_master => match session.channel() {
                    Some(channel) => return Ok(Some(channel.clone())),
                    None => println!("The match is not created yet."),
                },
                _ => println!("Waiting for the match to start."),
            },
        }
    }
}

async fn connect(config: &HangmanConfig, identity: &str, role: Role) -> Result<PeerSession> {
    let server: SocketAddr = config
        .player
        .server_addr
        .parse()
        .with_context(|| format!("bad server address {:?}", config.player.server_addr))?;
    PeerSession::connect(server, identity, role, config.game.formation_duration()).await
}

// ── Roles ─────────────────────────────────────────────────────────────────────

async fn cmd_master(
    config: &HangmanConfig,
    identity: &str,
    capacity: &str,
    word: &str,
    mut stdin: mpsc::Receiver<String>,
) -> Result<()> {
    let capacity: usize = capacity.parse().context("capacity must be a number")?;
    if capacity == 0 {
        anyhow::bail!("capacity must be at least 1");
    }
    if !is_valid_word(word) {
        anyhow::bail!("the word must be ASCII letters only");
    }

    let mut session = connect(config, identity, Role::Master { capacity }).await?;
    let Some(channel) = await_start(&mut session, &mut stdin).await? else {
        return Ok(());
    };
    let active = session.handoff(channel).await?;
    let transport = MulticastTransport::join(&active.channel, config.player.interface)?;
    let (_, channel) = active.attach(transport);

    let (cmd_tx, cmd_rx) = mpsc::channel(4);
    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();
    let mut game = tokio::spawn(MasterEngine::new(channel, word, &config.game, cmd_rx, ev_tx).run());
    println!("Game on. Type 'exit' to end it.");

    loop {
        tokio::select! {
            Some(event) = ev_rx.recv() => match event {
                MasterEvent::Accepted { guesser, letter, pattern, trials_left } => {
                    println!("{guesser} tried '{letter}': {pattern} ({trials_left} trials left)");
                }
                MasterEvent::GoOn { guesser, pkt_number } => {
                    println!("{guesser} keeps resending #{pkt_number}; sent GO_ON");
                }
            },

            Some(line) = stdin.recv() => {
                if line.trim() == "exit" {
                    let _ = cmd_tx.send(MasterCommand::Abort).await;
                }
            }

            result = &mut game => {
                let outcome = result.context("master engine panicked")??;
                println!("Game over: {outcome:?}");
                return Ok(());
            }
        }
    }
}

async fn cmd_guesser(
    config: &HangmanConfig,
    identity: &str,
    master: &str,
    mut stdin: mpsc::Receiver<String>,
) -> Result<()> {
    let role = Role::Guesser {
        master: master.to_string(),
    };
    let mut session = connect(config, identity, role).await?;
    let Some(channel) = await_start(&mut session, &mut stdin).await? else {
        return Ok(());
    };
    let active = session.handoff(channel).await?;
    let transport = MulticastTransport::join(&active.channel, config.player.interface)?;
    let (identity, channel) = active.attach(transport);

    let (in_tx, in_rx) = mpsc::channel(4);
    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();
    let mut game =
        tokio::spawn(GuesserEngine::new(channel, &identity, &config.game, in_rx, ev_tx).run());
    println!("Game on. Type one letter per line, or 'exit'.");

    loop {
        tokio::select! {
            Some(event) = ev_rx.recv() => match event {
                GuesserEvent::Sent { letter, pkt_number } => println!("sent '{letter}' (#{pkt_number})"),
                GuesserEvent::Acknowledged { .. } => {}
                GuesserEvent::Retransmit { pkt_number } => tracing::debug!(pkt_number, "resending"),
                GuesserEvent::Rejected(r) => println!("{r}"),
                GuesserEvent::Progress { guesser, letter, pattern, missed } => {
                    println!("{guesser} tried '{letter}': {pattern}  missed: [{missed}]");
                }
            },

            Some(line) = stdin.recv() => {
                let line = line.trim();
                let input = if line == "exit" {
                    GuesserInput::Quit
                } else {
                    let mut chars = line.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => GuesserInput::Guess(c),
                        _ => {
                            println!("Type a single letter.");
                            continue;
                        }
                    }
                };
                let _ = in_tx.send(input).await;
            }

            result = &mut game => {
                let outcome = result.context("guesser engine panicked")??;
                println!("Game over: {outcome:?}");
                return Ok(());
            }
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn print_usage() {
    println!("Usage: hangman-player [--server <addr>] <command>");
    println!();
    println!("Commands:");
    println!("  master <id> <capacity> <word>   Host a match");
    println!("  guesser <id> <master-id>        Join a master's match");
    println!();
    println!("While waiting: 'start' (master) begins early, 'exit' leaves.");
    println!();
    println!("Options:");
    println!("  --server <addr>   Coordinator address (default: from config)");
}

/// Forward stdin lines to a channel both game phases can read.
fn spawn_stdin() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
    rx
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut config = HangmanConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        HangmanConfig::default()
    });

    // Parse --server option
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--server" {
            i += 1;
            config.player.server_addr = args.get(i).context("--server requires a value")?.clone();
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["master", id, capacity, word] => {
            cmd_master(&config, id, capacity, word, spawn_stdin()).await
        }
        ["guesser", id, master] => cmd_guesser(&config, id, master, spawn_stdin()).await,
        ["help"] | ["--help"] | ["-h"] | [] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
