//! Master role engine.
//!
//! Owns the secret word, the trial budget and the game timer. Guesses are
//! applied in the order they are received; per-guesser sequence numbers
//! suppress retransmissions and reordered duplicates.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

use anyhow::Result;
use tokio::sync::mpsc;

use hangman_core::config::GameConfig;
use hangman_core::{GameMessage, WordTracker};

use crate::peer::GameChannel;
use crate::timer::Deadline;
use crate::transport::GameTransport;

/// Reliability bookkeeping for one guesser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuesserInfo {
    pub last_pkt: u64,
    pub stale: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEnd {
    Solved,
    OutOfTrials,
}

/// What the master does with one NEW_LETTER.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Sequence number already seen. `go_on` is set once the guesser has
    /// retransmitted past the threshold and should be unicast GO_ON for
    /// that number.
    Stale { go_on: Option<u64> },
    Accepted {
        letter: char,
        found: bool,
        pattern: String,
        end: Option<GameEnd>,
    },
}

/// Pure game state. No I/O, no timers.
#[derive(Debug)]
pub struct MasterGame {
    word: WordTracker,
    used: HashSet<char>,
    trials_left: u32,
    max_trials: u32,
    stale_threshold: u32,
    guessers: HashMap<String, GuesserInfo>,
}

impl MasterGame {
    pub fn new(word: &str, max_trials: u32, stale_threshold: u32) -> Self {
        Self {
            word: WordTracker::new(word),
            used: HashSet::new(),
            trials_left: max_trials,
            max_trials,
            stale_threshold,
            guessers: HashMap::new(),
        }
    }

    pub fn on_guess(&mut self, guesser: &str, letter: char, pkt_number: u64) -> Verdict {
        let info = self.guessers.entry(guesser.to_string()).or_default();

        if pkt_number <= info.last_pkt {
            if info.stale == self.stale_threshold {
                return Verdict::Stale {
                    go_on: Some(info.last_pkt),
                };
            }
            info.stale += 1;
            return Verdict::Stale { go_on: None };
        }
        info.last_pkt = pkt_number;
        info.stale = 0;

        let letter = letter.to_ascii_lowercase();
        let first_use = self.used.insert(letter);
        let found = self.word.apply_letter(letter);
        if first_use && !found {
            self.trials_left = self.trials_left.saturating_sub(1);
        }

        let end = if self.word.is_solved() {
            Some(GameEnd::Solved)
        } else if self.trials_left == 0 {
            Some(GameEnd::OutOfTrials)
        } else {
            None
        };

        Verdict::Accepted {
            letter,
            found,
            pattern: self.word.revealed_pattern(),
            end,
        }
    }

    pub fn pattern(&self) -> String {
        self.word.revealed_pattern()
    }

    pub fn word(&self) -> String {
        self.word.full_word()
    }

    pub fn trials_left(&self) -> u32 {
        self.trials_left
    }

    pub fn max_trials(&self) -> u32 {
        self.max_trials
    }

    pub fn guesser(&self, identity: &str) -> Option<GuesserInfo> {
        self.guessers.get(identity).copied()
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterCommand {
    /// End the game now. Guessers get END_GAME.
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterEvent {
    Accepted {
        guesser: String,
        letter: char,
        pattern: String,
        trials_left: u32,
    },
    GoOn {
        guesser: String,
        pkt_number: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterOutcome {
    GuesserWin { guesser: String, word: String },
    EndOfTrials,
    Timeout,
    Abandoned,
}

pub struct MasterEngine<T> {
    channel: GameChannel<T>,
    game: MasterGame,
    game_timer: Deadline,
    commands: mpsc::Receiver<MasterCommand>,
    events: mpsc::UnboundedSender<MasterEvent>,
}

impl<T: GameTransport> MasterEngine<T> {
    pub fn new(
        channel: GameChannel<T>,
        word: &str,
        config: &GameConfig,
        commands: mpsc::Receiver<MasterCommand>,
        events: mpsc::UnboundedSender<MasterEvent>,
    ) -> Self {
        Self {
            channel,
            game: MasterGame::new(word, config.max_trials, config.stale_threshold),
            game_timer: Deadline::new(config.match_duration()),
            commands,
            events,
        }
    }

    /// Play until the word is solved, the trials run out, the game timer
    /// fires, or an abort arrives.
    pub async fn run(mut self) -> Result<MasterOutcome> {
        self.game_timer.arm();
        tracing::info!(
            pattern = %self.game.pattern(),
            trials = self.game.max_trials(),
            secs = self.game_timer.period().as_secs(),
            "game started"
        );

        let result = self.play().await;

        self.game_timer.stop();
        self.channel.leave();
        match &result {
            Ok(outcome) => tracing::info!(?outcome, "game over"),
            Err(e) => tracing::warn!(error = %e, "game aborted"),
        }
        result
    }

    async fn play(&mut self) -> Result<MasterOutcome> {
        loop {
            tokio::select! {
                _ = self.game_timer.expired() => {
                    self.announce(&GameMessage::Timeout).await?;
                    return Ok(MasterOutcome::Timeout);
                }

                Some(MasterCommand::Abort) = self.commands.recv() => {
                    self.announce(&GameMessage::EndGame).await?;
                    return Ok(MasterOutcome::Abandoned);
                }

                received = self.channel.recv() => {
                    let (msg, from) = match received {
                        Ok(r) => r,
                        Err(e) => {
                            // Best effort: the channel is already failing.
                            let _ = self.channel.broadcast(&GameMessage::EndGame).await;
                            return Err(anyhow::Error::new(e).context("gameplay receive failed"));
                        }
                    };
                    if let Some(outcome) = self.on_message(msg, from).await? {
                        return Ok(outcome);
                    }
                }
            }
        }
    }

    async fn on_message(
        &mut self,
        msg: GameMessage,
        from: SocketAddr,
    ) -> Result<Option<MasterOutcome>> {
        let (letter, guesser, pkt_number) = match msg {
            GameMessage::NewLetter {
                letter,
                guesser,
                pkt_number,
            } => (letter, guesser, pkt_number),
            other => {
                tracing::trace!(kind = ?other.message_type(), "non-guess message ignored");
                return Ok(None);
            }
        };

        match self.game.on_guess(&guesser, letter, pkt_number) {
            Verdict::Stale { go_on: None } => {
                tracing::debug!(%guesser, pkt_number, "stale guess discarded");
                Ok(None)
            }
            Verdict::Stale {
                go_on: Some(last),
            } => {
                tracing::debug!(%guesser, pkt_number = last, %from, "sending GO_ON");
                let go_on = GameMessage::GoOn {
                    guesser: guesser.clone(),
                    pkt_number: last,
                };
                if let Err(e) = self.channel.send_to(&go_on, from).await {
                    tracing::warn!(error = %e, "GO_ON not sent");
                }
                let _ = self.events.send(MasterEvent::GoOn {
                    guesser,
                    pkt_number: last,
                });
                Ok(None)
            }
            Verdict::Accepted {
                letter,
                found,
                pattern,
                end,
            } => {
                tracing::debug!(%guesser, %letter, found, %pattern, trials_left = self.game.trials_left(), "guess applied");
                let result = GameMessage::PartialResult {
                    letter,
                    guesser: guesser.clone(),
                    word: pattern.clone(),
                    pkt_number,
                };
                if let Err(e) = self.channel.broadcast(&result).await {
                    tracing::warn!(error = %e, "PARTIAL_RESULT not sent");
                }
                let _ = self.events.send(MasterEvent::Accepted {
                    guesser: guesser.clone(),
                    letter,
                    pattern,
                    trials_left: self.game.trials_left(),
                });

                match end {
                    Some(GameEnd::Solved) => {
                        self.game_timer.stop();
                        let word = self.game.word();
                        self.announce(&GameMessage::GuesserWin {
                            guesser: guesser.clone(),
                            word: word.clone(),
                        })
                        .await?;
                        Ok(Some(MasterOutcome::GuesserWin { guesser, word }))
                    }
                    Some(GameEnd::OutOfTrials) => {
                        self.game_timer.stop();
                        self.announce(&GameMessage::EndOfTrials).await?;
                        Ok(Some(MasterOutcome::EndOfTrials))
                    }
                    None => Ok(None),
                }
            }
        }
    }

    /// Broadcast a game-ending message.
    async fn announce(&self, msg: &GameMessage) -> Result<()> {
        self.channel.broadcast(msg).await
    }
}
