//! Utility functions for name and channel handling

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Twitch account names: word characters only, bounded length
    static ref NAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_]{1,25}$").unwrap();
}

/// String utilities
pub mod string {
    use super::*;

    /// Check if a string is a valid Twitch user/channel name (without the '#')
    pub fn is_valid_name(name: &str) -> bool {
        NAME_RE.is_match(name)
    }

    /// Check if a string is a valid channel name ('#' followed by a valid name)
    pub fn is_valid_channel(channel: &str) -> bool {
        match channel.strip_prefix('#') {
            Some(rest) => is_valid_name(rest),
            None => false,
        }
    }

    /// Normalize a channel name to its canonical form: leading '#', lowercase
    pub fn normalize_channel(channel: &str) -> String {
        let trimmed = channel.trim();
        if let Some(rest) = trimmed.strip_prefix('#') {
            format!("#{}", rest.to_lowercase())
        } else {
            format!("#{}", trimmed.to_lowercase())
        }
    }

    /// The account name a channel belongs to ("#cohhcarnage" -> "cohhcarnage")
    pub fn channel_owner(channel: &str) -> &str {
        channel.strip_prefix('#').unwrap_or(channel)
    }
}
