//! Per-channel user state and recent-event history

use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use uuid::Uuid;

/// Role and status flags a user can carry.
///
/// Moderator, Broadcaster and Subscriber are scoped to the channel the user
/// object belongs to; Turbo, Admin and Staff are account-wide and mirrored
/// into a global cache by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserFlag {
    Moderator,
    Broadcaster,
    Admin,
    Staff,
    Subscriber,
    Turbo,
}

/// A recent event attributed to a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEntry {
    /// A chat message the user sent
    Message { text: String, at: DateTime<Utc> },
    /// The user's chat was cleared (ban or timeout)
    Ban { at: DateTime<Utc> },
}

/// A user as seen in one channel
#[derive(Debug, Clone)]
pub struct User {
    /// Unique user ID
    pub id: Uuid,
    /// Channel this user object belongs to
    pub channel: String,
    /// Lowercase account name (lookup key)
    pub name: String,
    /// Nick as last seen on the wire, original casing preserved
    pub display_nick: String,
    /// Role and status flags
    pub flags: HashSet<UserFlag>,
    /// Correlated-but-unconfirmed subscriber signals seen so far
    pub probable_subscriber: u8,
    /// Emote sets the user is entitled to
    pub emote_sets: HashSet<u32>,
    /// Chat color, if known
    pub color: Option<String>,
    /// Whether the user is currently present in the channel
    pub online: bool,
    /// Recent message/ban events, oldest evicted at capacity
    history: VecDeque<HistoryEntry>,
    /// History capacity
    history_capacity: usize,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a new user for a channel.
    ///
    /// `nick` keeps its original casing for display; the lookup name is
    /// lowercased. The broadcaster flag is derived from the channel name.
    pub fn new(channel: &str, nick: &str, history_capacity: usize) -> Self {
        let name = nick.to_lowercase();
        let mut flags = HashSet::new();
        if crate::utils::string::channel_owner(channel) == name {
            flags.insert(UserFlag::Broadcaster);
        }
        Self {
            id: Uuid::new_v4(),
            channel: channel.to_string(),
            name,
            display_nick: nick.to_string(),
            flags,
            probable_subscriber: 0,
            emote_sets: HashSet::new(),
            color: None,
            online: false,
            history: VecDeque::new(),
            history_capacity,
            created_at: Utc::now(),
        }
    }

    /// Check whether the user has a flag
    pub fn has_flag(&self, flag: UserFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// Set or clear a flag; returns true if anything changed
    pub fn set_flag(&mut self, flag: UserFlag, on: bool) -> bool {
        if on {
            self.flags.insert(flag)
        } else {
            self.flags.remove(&flag)
        }
    }

    /// Check if the user is a moderator of this channel
    pub fn is_moderator(&self) -> bool {
        self.has_flag(UserFlag::Moderator)
    }

    /// Check if the user is the broadcaster of this channel
    pub fn is_broadcaster(&self) -> bool {
        self.has_flag(UserFlag::Broadcaster)
    }

    /// Check if the user is a confirmed subscriber of this channel
    pub fn is_subscriber(&self) -> bool {
        self.has_flag(UserFlag::Subscriber)
    }

    /// Update the display nick if the wire casing differs
    pub fn update_display_nick(&mut self, nick: &str) {
        if self.display_nick != nick {
            self.display_nick = nick.to_string();
        }
    }

    /// Record a chat message in the history
    pub fn record_message(&mut self, text: String) {
        self.push_history(HistoryEntry::Message {
            text,
            at: Utc::now(),
        });
    }

    /// Record a ban/clear event in the history
    pub fn record_ban(&mut self) {
        self.push_history(HistoryEntry::Ban { at: Utc::now() });
    }

    fn push_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(entry);
    }

    /// Recent message/ban events, oldest first
    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    /// Number of recorded history entries
    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}
