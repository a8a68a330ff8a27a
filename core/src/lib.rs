//! Twitch Chat Client Core
//!
//! This crate provides the session engine for a desktop client speaking
//! Twitch's legacy IRC-based chat protocol: connection lifecycle with
//! reconnect backoff, the per-channel user directory, correlation of
//! channel-less metadata messages, and rate-gated command issuance.

pub mod command_gate;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod directory;
pub mod error;
pub mod event;
pub mod join_supervisor;
pub mod message;
pub mod protocol;
pub mod rate_gate;
pub mod session;
pub mod user;
pub mod utils;


pub use command_gate::CommandGate;
pub use config::Config;
pub use connection::OutboundSink;
pub use correlator::{EmoteSetResolver, MetadataCorrelator, ModListUpdate, StaticEmoteSetMap};
pub use directory::{SharedUser, UserDirectory};
pub use error::{Error, Result};
pub use event::{ChatEvent, DisconnectReason, Metadata, SessionEvent, SpecialStatus};
pub use join_supervisor::JoinSupervisor;
pub use message::{Message, MessageType, Prefix};
pub use rate_gate::RateGate;
pub use session::{reconnect_delay, ChatSession, ConnectionState};
pub use user::{HistoryEntry, User, UserFlag};

/// Re-exports for convenience
pub use serde::{Deserialize, Serialize};
pub use tracing::{debug, error, info, warn};
