//! Outbound command issuance
//!
//! All chat messages and moderation commands leave through here, behind the
//! rate gate. A declined send is dropped and reported, never queued. The gate
//! also drives periodic moderator-list discovery, one channel per tick, so
//! rejoining a large set of channels does not burst `.mods` requests.

use crate::connection::OutboundSink;
use crate::correlator::MetadataCorrelator;
use crate::event::SessionEvent;
use crate::rate_gate::RateGate;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Rate-gated issuer of chat messages and moderation commands
pub struct CommandGate {
    gate: Mutex<RateGate>,
    /// Channels already given an automatic moderator-list request
    auto_requested: Mutex<HashSet<String>>,
    outbound: OutboundSink,
    correlator: Arc<MetadataCorrelator>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl CommandGate {
    /// Create a command gate over the given rate allowance
    pub fn new(
        gate: RateGate,
        outbound: OutboundSink,
        correlator: Arc<MetadataCorrelator>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            gate: Mutex::new(gate),
            auto_requested: Mutex::new(HashSet::new()),
            outbound,
            correlator,
            events,
        }
    }

    /// Send a chat message to a channel
    pub fn send_message(&self, channel: &str, text: &str) -> Result<()> {
        self.send_gated(&format!("PRIVMSG {} :{}", channel, text), true)
    }

    /// Permanently ban a user from a channel
    pub fn ban(&self, channel: &str, name: &str) -> Result<()> {
        self.command(channel, &format!(".ban {}", name))
    }

    /// Lift a ban
    pub fn unban(&self, channel: &str, name: &str) -> Result<()> {
        self.command(channel, &format!(".unban {}", name))
    }

    /// Time a user out, with the server default duration if none is given
    pub fn timeout(&self, channel: &str, name: &str, seconds: Option<u64>) -> Result<()> {
        match seconds {
            Some(seconds) => self.command(channel, &format!(".timeout {} {}", name, seconds)),
            None => self.command(channel, &format!(".timeout {}", name)),
        }
    }

    /// Grant moderator status
    pub fn grant_mod(&self, channel: &str, name: &str) -> Result<()> {
        self.command(channel, &format!(".mod {}", name))
    }

    /// Revoke moderator status
    pub fn revoke_mod(&self, channel: &str, name: &str) -> Result<()> {
        self.command(channel, &format!(".unmod {}", name))
    }

    /// Enable slow mode, with the server default delay if none is given
    pub fn slow(&self, channel: &str, seconds: Option<u64>) -> Result<()> {
        match seconds {
            Some(seconds) => self.command(channel, &format!(".slow {}", seconds)),
            None => self.command(channel, ".slow"),
        }
    }

    /// Disable slow mode
    pub fn slow_off(&self, channel: &str) -> Result<()> {
        self.command(channel, ".slowoff")
    }

    /// Clear the channel's chat
    pub fn clear_chat(&self, channel: &str) -> Result<()> {
        self.command(channel, ".clear")
    }

    /// Request the moderator list for a channel. A silent request suppresses
    /// the informational echo; the response is attributed either way.
    pub fn request_mods(&self, channel: &str, silent: bool) -> Result<()> {
        self.send_gated(&format!("PRIVMSG {} :.mods", channel), !silent)?;
        self.correlator.record_mods_request(channel);
        if !silent {
            self.emit(SessionEvent::Notice {
                text: format!("Requesting moderator list for {}", channel),
            });
        }
        Ok(())
    }

    /// One tick of automatic moderator-list discovery: pick at most one
    /// joined channel that has not been auto-requested this session.
    pub fn auto_request_tick(&self, joined: &HashSet<String>) {
        let next = {
            let requested = self.auto_requested.lock();
            joined
                .iter()
                .find(|channel| !requested.contains(*channel))
                .cloned()
        };
        if let Some(channel) = next {
            if self.request_mods(&channel, true).is_ok() {
                self.auto_requested.lock().insert(channel);
            } else {
                debug!("Deferring automatic moderator request for {}", channel);
            }
        }
    }

    /// Forget the auto-request mark for a channel (on part), so it can be
    /// requested again after a rejoin
    pub fn forget_channel(&self, channel: &str) {
        self.auto_requested.lock().remove(channel);
    }

    /// Reset per-connection state (on disconnect)
    pub fn reset(&self) {
        self.auto_requested.lock().clear();
        self.gate.lock().reset();
    }

    fn command(&self, channel: &str, command: &str) -> Result<()> {
        self.send_gated(&format!("PRIVMSG {} :{}", channel, command), true)
    }

    /// Pass a line through the rate gate: check before sending, consume
    /// after. A declined line is dropped, never queued or retried.
    fn send_gated(&self, line: &str, notify_drop: bool) -> Result<()> {
        let mut gate = self.gate.lock();
        if !gate.check() {
            debug!("Rate gate declined: {}", line);
            if notify_drop {
                self.emit(SessionEvent::Notice {
                    text: "Message not sent to prevent ban".to_string(),
                });
            }
            return Err(Error::RateLimited("Message allowance exhausted".to_string()));
        }
        self.outbound.send_line(line);
        gate.consume();
        Ok(())
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}
