//! IRC wire message parsing and formatting
//!
//! Twitch's legacy chat protocol is line-oriented IRC as defined in RFC 1459,
//! with server-side extensions delivered as regular PRIVMSG/NOTICE text.

use serde::{Deserialize, Serialize};
use std::fmt;

/// IRC message prefix (server or user)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Prefix {
    /// Server name
    Server(String),
    /// User prefix (nick!user@host)
    User {
        nick: String,
        user: String,
        host: String,
    },
}

impl Prefix {
    /// The nickname of a user prefix, if this is one
    pub fn nick(&self) -> Option<&str> {
        match self {
            Prefix::User { nick, .. } => Some(nick),
            Prefix::Server(_) => None,
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prefix::Server(name) => write!(f, "{}", name),
            Prefix::User { nick, user, host } => write!(f, "{}!{}@{}", nick, user, host),
        }
    }
}

/// Commands used by the legacy Twitch chat protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    // Connection registration
    Password,
    Nick,
    Quit,

    // Channel operations
    Join,
    Part,
    Mode,

    // Messaging
    PrivMsg,
    Notice,

    // Keepalive
    Ping,
    Pong,

    /// Enables the out-of-band metadata messages (TWITCHCLIENT)
    TwitchClient,

    // Numerics and anything else
    Custom(String),
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageType::Password => "PASS",
            MessageType::Nick => "NICK",
            MessageType::Quit => "QUIT",
            MessageType::Join => "JOIN",
            MessageType::Part => "PART",
            MessageType::Mode => "MODE",
            MessageType::PrivMsg => "PRIVMSG",
            MessageType::Notice => "NOTICE",
            MessageType::Ping => "PING",
            MessageType::Pong => "PONG",
            MessageType::TwitchClient => "TWITCHCLIENT",
            MessageType::Custom(cmd) => cmd,
        };
        write!(f, "{}", s)
    }
}

impl From<&str> for MessageType {
    fn from(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "PASS" => MessageType::Password,
            "NICK" => MessageType::Nick,
            "QUIT" => MessageType::Quit,
            "JOIN" => MessageType::Join,
            "PART" => MessageType::Part,
            "MODE" => MessageType::Mode,
            "PRIVMSG" => MessageType::PrivMsg,
            "NOTICE" => MessageType::Notice,
            "PING" => MessageType::Ping,
            "PONG" => MessageType::Pong,
            "TWITCHCLIENT" => MessageType::TwitchClient,
            _ => MessageType::Custom(s.to_string()),
        }
    }
}

/// IRC message as defined in RFC 1459
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Optional prefix (server or user)
    pub prefix: Option<Prefix>,
    /// Message command/type
    pub command: MessageType,
    /// Message parameters
    pub params: Vec<String>,
}

impl Message {
    /// Create a new message
    pub fn new(command: MessageType, params: Vec<String>) -> Self {
        Self {
            prefix: None,
            command,
            params,
        }
    }

    /// Create a new message with prefix
    pub fn with_prefix(prefix: Prefix, command: MessageType, params: Vec<String>) -> Self {
        Self {
            prefix: Some(prefix),
            command,
            params,
        }
    }

    /// Parse an IRC message from a raw line
    pub fn parse(input: &str) -> crate::Result<Self> {
        let mut rest = input.trim_end_matches(['\r', '\n']).trim();
        if rest.is_empty() {
            return Err(crate::Error::MessageParse("Empty message".to_string()));
        }

        let prefix = if let Some(stripped) = rest.strip_prefix(':') {
            let (prefix_str, remainder) = match stripped.split_once(' ') {
                Some((p, r)) => (p, r),
                None => {
                    return Err(crate::Error::MessageParse(
                        "Prefix without command".to_string(),
                    ))
                }
            };
            rest = remainder.trim_start();
            Some(Self::parse_prefix(prefix_str)?)
        } else {
            None
        };

        // Split off the trailing parameter before tokenizing the rest
        let (middle, trailing) = match rest.split_once(" :") {
            Some((m, t)) => (m, Some(t.to_string())),
            None => (rest, None),
        };

        let mut tokens = middle.split_whitespace();
        let command_str = tokens
            .next()
            .ok_or_else(|| crate::Error::MessageParse("No command found".to_string()))?;
        let command = MessageType::from(command_str);

        let mut params: Vec<String> = tokens.map(|t| t.to_string()).collect();
        if let Some(trailing) = trailing {
            params.push(trailing);
        }

        Ok(Message {
            prefix,
            command,
            params,
        })
    }

    fn parse_prefix(prefix_str: &str) -> crate::Result<Prefix> {
        if let Some((nick, user_host)) = prefix_str.split_once('!') {
            let (user, host) = user_host.split_once('@').ok_or_else(|| {
                crate::Error::MessageParse("Invalid user prefix format".to_string())
            })?;
            Ok(Prefix::User {
                nick: nick.to_string(),
                user: user.to_string(),
                host: host.to_string(),
            })
        } else {
            Ok(Prefix::Server(prefix_str.to_string()))
        }
    }

    /// Serialize the message to a wire line, including the trailing CRLF
    pub fn to_line(&self) -> String {
        let mut result = String::new();

        if let Some(ref prefix) = self.prefix {
            result.push(':');
            result.push_str(&prefix.to_string());
            result.push(' ');
        }

        result.push_str(&self.command.to_string());

        for (i, param) in self.params.iter().enumerate() {
            result.push(' ');
            if i == self.params.len() - 1 && (param.contains(' ') || param.is_empty()) {
                result.push(':');
            }
            result.push_str(param);
        }

        result.push_str("\r\n");
        result
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_line().trim_end())
    }
}
