//! Typed events exchanged with the protocol layer and the presentation layer

use crate::session::ConnectionState;
use std::collections::HashSet;
use std::fmt;

/// User status carried by a SPECIALUSER metadata message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialStatus {
    Subscriber,
    Turbo,
    Admin,
    Staff,
}

impl SpecialStatus {
    /// Decode the status word used on the wire
    pub fn from_wire(word: &str) -> Option<Self> {
        match word {
            "subscriber" => Some(SpecialStatus::Subscriber),
            "turbo" => Some(SpecialStatus::Turbo),
            "admin" => Some(SpecialStatus::Admin),
            "staff" => Some(SpecialStatus::Staff),
            _ => None,
        }
    }
}

/// Out-of-band metadata, decoded once at the protocol boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metadata {
    /// USERCOLOR: a user's chat color
    UserColor { name: String, color: String },
    /// CLEARCHAT: a user's messages were removed (ban/timeout)
    ClearChat { name: Option<String> },
    /// SPECIALUSER: a user's status flag
    SpecialUser { name: String, status: SpecialStatus },
    /// EMOTESET: the emote sets a user is entitled to
    EmoteSets { name: String, sets: HashSet<u32> },
}

/// Why a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The user asked to disconnect
    Requested,
    /// The server hostname could not be resolved
    UnknownHost,
    /// The socket closed or errored
    ConnectionClosed,
    /// The connect attempt timed out
    Timeout,
    /// Login was rejected during registration
    RegistrationFailed,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisconnectReason::Requested => "requested",
            DisconnectReason::UnknownHost => "unknown host",
            DisconnectReason::ConnectionClosed => "connection closed",
            DisconnectReason::Timeout => "connection timeout",
            DisconnectReason::RegistrationFailed => "registration failed",
        };
        write!(f, "{}", s)
    }
}

/// Event produced by the protocol decoder and consumed by the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Registration completed (numeric 001)
    Registered,
    /// Server keepalive probe
    Ping { token: String },
    /// A user joined a channel
    Join { channel: String, nick: String },
    /// A user left a channel
    Part { channel: String, nick: String },
    /// A channel mode changed for a user (+o / -o)
    Mode {
        channel: String,
        nick: String,
        added: bool,
        mode: char,
    },
    /// NAMES reply listing users present in a channel
    Names { channel: String, nicks: Vec<String> },
    /// A regular chat message in a channel
    ChannelMessage {
        channel: String,
        nick: String,
        text: String,
    },
    /// A server notice, channel-scoped or not
    Notice {
        channel: Option<String>,
        text: String,
    },
    /// Out-of-band metadata, with channel context when the server supplied one
    Metadata {
        channel: Option<String>,
        data: Metadata,
    },
    /// Moderator-list reply; channel is absent under protocol variants
    /// that deliver it without context
    ModeratorList {
        channel: Option<String>,
        names: Vec<String>,
    },
    /// Login was rejected by the server
    LoginFailed,
}

/// Event emitted to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The connection state machine moved
    StateChanged(ConnectionState),
    /// The local user's join to a channel was confirmed
    ChannelJoined { channel: String },
    /// The local user left a channel
    ChannelParted { channel: String },
    /// A user was first seen in a channel
    UserAdded { channel: String, name: String },
    /// A user's attributes changed
    UserUpdated { channel: String, name: String },
    /// A user went offline in a channel
    UserOffline { channel: String, name: String },
    /// A resolved moderator list was applied; names are the changed users
    ModeratorsChanged { channel: String, names: Vec<String> },
    /// A user was confirmed as a subscriber
    SubscriberConfirmed { channel: String, name: String },
    /// A user's chat was cleared (ban/timeout)
    UserBanned { channel: String, name: String },
    /// A chat message for display
    ChannelMessage {
        channel: String,
        name: String,
        text: String,
    },
    /// User-visible informational text (rate-limit refusals, reconnect reports)
    Notice { text: String },
}
