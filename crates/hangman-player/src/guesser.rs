//! Guesser role engine.
//!
//! One guess may be outstanding at a time. It is retransmitted unchanged
//! whenever the acknowledgement timer fires, until the master's
//! PARTIAL_RESULT (or a GO_ON) for that sequence number comes back.

use std::collections::BTreeSet;
use std::net::SocketAddr;

use anyhow::Result;
use thiserror::Error;
use tokio::sync::mpsc;

use hangman_core::config::GameConfig;
use hangman_core::GameMessage;

use crate::peer::GameChannel;
use crate::timer::Deadline;
use crate::transport::GameTransport;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum GuessRejected {
    #[error("{0:?} is not a letter")]
    NotALetter(char),
    #[error("wait for the response to your last guess")]
    Outstanding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuesserInput {
    Guess(char),
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuesserEvent {
    Sent { letter: char, pkt_number: u64 },
    Retransmit { pkt_number: u64 },
    Acknowledged { pkt_number: u64 },
    Rejected(GuessRejected),
    Progress {
        guesser: String,
        letter: char,
        pattern: String,
        missed: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuesserOutcome {
    Timeout,
    EndOfTrials,
    GuesserWin { guesser: String, word: String },
    EndGame,
    Quit,
}

/// What this guesser currently knows about the word.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuessView {
    pub pattern: String,
    pub missed: BTreeSet<char>,
}

impl GuessView {
    /// Fold one PARTIAL_RESULT in. Results can arrive out of order, so a
    /// revealed position is never hidden again.
    fn apply(&mut self, letter: char, pattern: &str) {
        if !pattern.contains(letter) {
            self.missed.insert(letter);
        }
        if self.pattern.chars().count() != pattern.chars().count() {
            self.pattern = pattern.to_string();
            return;
        }
        self.pattern = self
            .pattern
            .chars()
            .zip(pattern.chars())
            .map(|(old, new)| if new == '_' { old } else { new })
            .collect();
    }

    pub fn missed_letters(&self) -> String {
        self.missed.iter().collect()
    }
}

/// Lowercased letter, or why it cannot be sent.
pub fn validate_letter(letter: char) -> Result<char, GuessRejected> {
    if letter.is_ascii_alphabetic() {
        Ok(letter.to_ascii_lowercase())
    } else {
        Err(GuessRejected::NotALetter(letter))
    }
}

pub struct GuesserEngine<T> {
    channel: GameChannel<T>,
    identity: String,
    can_send: bool,
    next_pkt: u64,
    /// Sequence number and sealed bytes of the unacknowledged guess.
    outstanding: Option<(u64, Vec<u8>)>,
    ack_timer: Deadline,
    view: GuessView,
    inputs: mpsc::Receiver<GuesserInput>,
    events: mpsc::UnboundedSender<GuesserEvent>,
}

impl<T: GameTransport> GuesserEngine<T> {
    pub fn new(
        channel: GameChannel<T>,
        identity: &str,
        config: &GameConfig,
        inputs: mpsc::Receiver<GuesserInput>,
        events: mpsc::UnboundedSender<GuesserEvent>,
    ) -> Self {
        Self {
            channel,
            identity: identity.to_string(),
            can_send: true,
            next_pkt: 1,
            outstanding: None,
            ack_timer: Deadline::new(config.ack_timeout()),
            view: GuessView::default(),
            inputs,
            events,
        }
    }

    pub async fn run(mut self) -> Result<GuesserOutcome> {
        tracing::info!(identity = %self.identity, "guessing started");
        let result = self.play().await;

        self.ack_timer.stop();
        self.channel.leave();
        match &result {
            Ok(outcome) => tracing::info!(identity = %self.identity, ?outcome, "game over"),
            Err(e) => tracing::warn!(identity = %self.identity, error = %e, "game aborted"),
        }
        result
    }

    async fn play(&mut self) -> Result<GuesserOutcome> {
        loop {
            tokio::select! {
                _ = self.ack_timer.expired() => self.retransmit().await,

                input = self.inputs.recv() => match input {
                    Some(GuesserInput::Guess(letter)) => self.guess(letter).await?,
                    Some(GuesserInput::Quit) | None => return Ok(GuesserOutcome::Quit),
                },

                received = self.channel.recv() => {
                    let (msg, from) = received?;
                    if let Some(outcome) = self.on_message(msg, from) {
                        return Ok(outcome);
                    }
                }
            }
        }
    }

    async fn guess(&mut self, letter: char) -> Result<()> {
        let letter = match validate_letter(letter) {
            Ok(letter) if self.can_send => letter,
            Ok(_) => return self.reject(GuessRejected::Outstanding),
            Err(rejected) => return self.reject(rejected),
        };

        let pkt_number = self.next_pkt;
        let datagram = self.channel.seal(&GameMessage::NewLetter {
            letter,
            guesser: self.identity.clone(),
            pkt_number,
        })?;
        // A failed first send is recovered by the retransmission below.
        if let Err(e) = self.channel.broadcast_sealed(&datagram).await {
            tracing::warn!(error = %e, pkt_number, "guess not sent");
        }

        self.can_send = false;
        self.outstanding = Some((pkt_number, datagram));
        self.ack_timer.arm();
        self.next_pkt += 1;

        tracing::debug!(identity = %self.identity, %letter, pkt_number, "guess sent");
        let _ = self.events.send(GuesserEvent::Sent { letter, pkt_number });
        Ok(())
    }

    fn reject(&self, rejected: GuessRejected) -> Result<()> {
        tracing::debug!(reason = %rejected, "guess rejected");
        let _ = self.events.send(GuesserEvent::Rejected(rejected));
        Ok(())
    }

    async fn retransmit(&mut self) {
        let Some((pkt_number, datagram)) = &self.outstanding else {
            return;
        };
        let pkt_number = *pkt_number;
        if let Err(e) = self.channel.broadcast_sealed(datagram).await {
            tracing::warn!(error = %e, pkt_number, "retransmission not sent");
        }
        self.ack_timer.arm();
        tracing::debug!(identity = %self.identity, pkt_number, "guess retransmitted");
        let _ = self.events.send(GuesserEvent::Retransmit { pkt_number });
    }

    /// Clear the outstanding guess if `pkt_number` acknowledges it.
    fn acknowledge(&mut self, pkt_number: u64) {
        if !self.ack_timer.is_running() {
            return;
        }
        match self.outstanding {
            Some((outstanding, _)) if outstanding == pkt_number => {}
            _ => return,
        }
        self.ack_timer.stop();
        self.outstanding = None;
        self.can_send = true;
        let _ = self.events.send(GuesserEvent::Acknowledged { pkt_number });
    }

    fn on_message(&mut self, msg: GameMessage, from: SocketAddr) -> Option<GuesserOutcome> {
        match msg {
            GameMessage::PartialResult {
                letter,
                guesser,
                word,
                pkt_number,
            } => {
                self.view.apply(letter, &word);
                if guesser == self.identity {
                    self.acknowledge(pkt_number);
                }
                let _ = self.events.send(GuesserEvent::Progress {
                    guesser,
                    letter,
                    pattern: self.view.pattern.clone(),
                    missed: self.view.missed_letters(),
                });
                None
            }
            GameMessage::GoOn {
                guesser,
                pkt_number,
            } => {
                if guesser == self.identity {
                    tracing::debug!(%from, pkt_number, "GO_ON received");
                    self.acknowledge(pkt_number);
                }
                None
            }
            GameMessage::Timeout => Some(GuesserOutcome::Timeout),
            GameMessage::EndOfTrials => Some(GuesserOutcome::EndOfTrials),
            GameMessage::GuesserWin { guesser, word } => {
                Some(GuesserOutcome::GuesserWin { guesser, word })
            }
            GameMessage::EndGame => Some(GuesserOutcome::EndGame),
            GameMessage::NewLetter { .. } => None,
        }
    }
}
