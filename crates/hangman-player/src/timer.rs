//! One-shot deadline for use inside a `select!` loop.
//!
//! The engine that owns a `Deadline` is the only thing that touches it, so
//! arming, stopping and firing never race. Stopping a stopped deadline does
//! nothing, and a stopped deadline never fires.

use std::future::pending;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};

#[derive(Debug)]
pub struct Deadline {
    period: Duration,
    at: Option<Instant>,
}

impl Deadline {
    pub fn new(period: Duration) -> Self {
        Self { period, at: None }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start, or restart, a full period from now.
    pub fn arm(&mut self) {
        self.at = Some(Instant::now() + self.period);
    }

    pub fn stop(&mut self) {
        self.at = None;
    }

    pub fn is_running(&self) -> bool {
        self.at.is_some()
    }

    /// Resolves when the armed deadline passes, then disarms it. Never
    /// resolves while stopped. Cancel-safe.
    pub async fn expired(&mut self) {
        match self.at {
            Some(at) => {
                sleep_until(at).await;
                self.at = None;
            }
            None => pending::<()>().await,
        }
    }
}
