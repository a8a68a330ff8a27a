//! Translation of wire messages into typed engine events
//!
//! The legacy server delivers its out-of-band extensions as ordinary chat
//! text from the pseudo-user "jtv": either to a channel (channel context
//! available) or directly to the client (no context — attribution is the
//! correlator's problem). Everything is decoded here, once, into the closed
//! `ChatEvent`/`Metadata` enums; nothing downstream dispatches on strings.

use crate::event::{ChatEvent, Metadata, SpecialStatus};
use crate::message::{Message, MessageType};
use std::collections::HashSet;
use tracing::debug;

/// Prefix of the textual moderator-list reply
const MODS_REPLY_PREFIX: &str = "The moderators of this room are: ";

/// Decode a parsed wire message into an engine event.
///
/// Returns None for messages the engine does not consume (numerics other
/// than registration/names, capability chatter, unknown jtv lines).
pub fn decode(msg: &Message) -> Option<ChatEvent> {
    match &msg.command {
        MessageType::Custom(numeric) if numeric == "001" => Some(ChatEvent::Registered),
        MessageType::Custom(numeric) if numeric == "353" => decode_names(msg),
        MessageType::Ping => Some(ChatEvent::Ping {
            token: msg.params.first().cloned().unwrap_or_default(),
        }),
        MessageType::Join => {
            let nick = msg.prefix.as_ref()?.nick()?;
            Some(ChatEvent::Join {
                channel: msg.params.first()?.clone(),
                nick: nick.to_string(),
            })
        }
        MessageType::Part => {
            let nick = msg.prefix.as_ref()?.nick()?;
            Some(ChatEvent::Part {
                channel: msg.params.first()?.clone(),
                nick: nick.to_string(),
            })
        }
        MessageType::Mode => decode_mode(msg),
        MessageType::PrivMsg => {
            let target = msg.params.first()?;
            let text = msg.params.get(1)?;
            let nick = msg.prefix.as_ref()?.nick()?;
            if nick == "jtv" {
                decode_jtv(target, text)
            } else if target.starts_with('#') {
                Some(ChatEvent::ChannelMessage {
                    channel: target.clone(),
                    nick: nick.to_string(),
                    text: text.clone(),
                })
            } else {
                None
            }
        }
        MessageType::Notice => {
            let target = msg.params.first()?;
            let text = msg.params.get(1)?;
            let channel = target.starts_with('#').then(|| target.clone());
            if let Some(names) = parse_mods_reply(text) {
                Some(ChatEvent::ModeratorList { channel, names })
            } else if is_login_failure(text) {
                Some(ChatEvent::LoginFailed)
            } else {
                Some(ChatEvent::Notice {
                    channel,
                    text: text.clone(),
                })
            }
        }
        _ => None,
    }
}

fn decode_names(msg: &Message) -> Option<ChatEvent> {
    // :srv 353 <me> = <channel> :<nick> <nick> ...
    let channel = msg.params.get(2)?;
    let nicks = msg
        .params
        .get(3)?
        .split_whitespace()
        .map(|n| n.to_string())
        .collect();
    Some(ChatEvent::Names {
        channel: channel.clone(),
        nicks,
    })
}

fn decode_mode(msg: &Message) -> Option<ChatEvent> {
    // MODE <channel> +o <nick>
    let channel = msg.params.first()?;
    let change = msg.params.get(1)?;
    let nick = msg.params.get(2)?;
    let added = match change.chars().next()? {
        '+' => true,
        '-' => false,
        _ => return None,
    };
    let mode = change.chars().nth(1)?;
    Some(ChatEvent::Mode {
        channel: channel.clone(),
        nick: nick.clone(),
        added,
        mode,
    })
}

/// Decode a metadata line from the "jtv" pseudo-user. The channel context
/// is present only when jtv spoke inside a channel.
fn decode_jtv(target: &str, text: &str) -> Option<ChatEvent> {
    let channel = target.starts_with('#').then(|| target.to_string());

    if let Some(names) = parse_mods_reply(text) {
        return Some(ChatEvent::ModeratorList { channel, names });
    }

    let mut words = text.split_whitespace();
    let keyword = words.next()?;
    let data = match keyword {
        "SPECIALUSER" => {
            let name = words.next()?;
            let status_word = words.next()?;
            match SpecialStatus::from_wire(status_word) {
                Some(status) => Metadata::SpecialUser {
                    name: name.to_string(),
                    status,
                },
                None => {
                    debug!("Unknown SPECIALUSER status: {}", status_word);
                    return None;
                }
            }
        }
        "USERCOLOR" => Metadata::UserColor {
            name: words.next()?.to_string(),
            color: words.next()?.to_string(),
        },
        "EMOTESET" => Metadata::EmoteSets {
            name: words.next()?.to_string(),
            sets: parse_emote_sets(words.next()?),
        },
        "CLEARCHAT" => Metadata::ClearChat {
            name: words.next().map(|n| n.to_string()),
        },
        _ => {
            debug!("Ignoring jtv line: {}", text);
            return None;
        }
    };
    Some(ChatEvent::Metadata { channel, data })
}

/// Parse an "[20,224]"-shaped emote-set list; malformed entries are skipped
fn parse_emote_sets(raw: &str) -> HashSet<u32> {
    raw.trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}

/// Extract the names from a textual moderator-list reply
fn parse_mods_reply(text: &str) -> Option<Vec<String>> {
    let list = text.strip_prefix(MODS_REPLY_PREFIX)?;
    Some(
        list.split(',')
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect(),
    )
}

fn is_login_failure(text: &str) -> bool {
    text.contains("Login authentication failed") || text.contains("Error logging in")
}
