//! Outbound rate limiting
//!
//! Twitch drops (and historically banned) clients that send too many lines
//! in a rolling window. Every outbound chat message and moderation command
//! must pass `check()` before sending and `consume()` one unit after.

use crate::{Error, Result};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Parse a "<lines>/<seconds>" allowance string
pub fn parse_rate(spec: &str) -> Result<(usize, Duration)> {
    let (lines, seconds) = spec
        .split_once('/')
        .ok_or_else(|| Error::Config(format!("Invalid rate spec: {}", spec)))?;
    let lines: usize = lines
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("Invalid rate spec: {}", spec)))?;
    let seconds: u64 = seconds
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("Invalid rate spec: {}", spec)))?;
    if lines == 0 || seconds == 0 {
        return Err(Error::Config(format!("Invalid rate spec: {}", spec)));
    }
    Ok((lines, Duration::from_secs(seconds)))
}

/// Leaky-bucket limiter bounding outbound command/message frequency
#[derive(Debug)]
pub struct RateGate {
    /// Maximum sends within the window
    limit: usize,
    /// Rolling window length
    window: Duration,
    /// Timestamps of recent sends, oldest first
    sends: VecDeque<Instant>,
}

impl RateGate {
    /// Create a gate allowing `limit` sends per `window`
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            sends: VecDeque::new(),
        }
    }

    /// Create a gate from a "<lines>/<seconds>" spec string
    pub fn from_spec(spec: &str) -> Result<Self> {
        let (limit, window) = parse_rate(spec)?;
        Ok(Self::new(limit, window))
    }

    /// Whether one more send would stay within the allowance.
    ///
    /// Pure query: does not debit and does not mutate the window state.
    pub fn check(&self) -> bool {
        let cutoff = Instant::now() - self.window;
        let recent = self.sends.iter().filter(|&&t| t > cutoff).count();
        recent < self.limit
    }

    /// Debit one unit for a send that was just issued
    pub fn consume(&mut self) {
        let cutoff = Instant::now() - self.window;
        while let Some(&front) = self.sends.front() {
            if front <= cutoff {
                self.sends.pop_front();
            } else {
                break;
            }
        }
        self.sends.push_back(Instant::now());
    }

    /// Forget all recorded sends
    pub fn reset(&mut self) {
        self.sends.clear();
    }
}
