//! Attribution of channel-less metadata messages
//!
//! The legacy protocol reports subscriber status, moderator lists and some
//! other user state without naming the channel they apply to. This module
//! resolves those messages against the user directory using bounded
//! wall-clock windows. All pending tables are pruned lazily at query time;
//! nothing here schedules its own expiry.

use crate::config::CorrelationConfig;
use crate::directory::{SharedUser, UserDirectory};
use crate::user::UserFlag;
use crate::utils::string;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Maps emote sets to the channel whose subscription grants them.
///
/// Implemented by the emoticon subsystem; the engine only needs the lookup.
pub trait EmoteSetResolver: Send + Sync {
    /// Account name of the channel this emote set belongs to, if known
    fn channel_for_set(&self, set: u32) -> Option<String>;
}

/// Emote-set mapping backed by a fixed table, loadable from a JSON file
/// of `{"<set id>": "<channel name>"}` entries
#[derive(Debug, Default)]
pub struct StaticEmoteSetMap {
    sets: FxHashMap<u32, String>,
}

impl StaticEmoteSetMap {
    /// Load the mapping from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let raw: std::collections::HashMap<String, String> = serde_json::from_str(&content)?;
        let mut sets = FxHashMap::default();
        for (set, channel) in raw {
            match set.parse::<u32>() {
                Ok(id) => {
                    sets.insert(id, channel.to_lowercase());
                }
                Err(_) => {
                    debug!("Skipping non-numeric emote set key: {}", set);
                }
            }
        }
        Ok(Self { sets })
    }

    /// Add a single mapping
    pub fn insert(&mut self, set: u32, channel: &str) {
        self.sets.insert(set, channel.to_lowercase());
    }
}

impl EmoteSetResolver for StaticEmoteSetMap {
    fn channel_for_set(&self, set: u32) -> Option<String> {
        self.sets.get(&set).cloned()
    }
}

/// A resolved moderator-list update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModListUpdate {
    /// Channel the list was attributed to
    pub channel: String,
    /// Display nicks whose moderator status changed
    pub changed: Vec<String>,
}

#[derive(Default)]
struct CorrelatorState {
    /// Channel-less subscriber signals awaiting a chat message: name -> seen at
    sub_candidates: FxHashMap<String, Instant>,
    /// Recently confirmed local joins: channel -> joined at
    recent_joins: FxHashMap<String, Instant>,
    /// Outstanding moderator-list requests: channel -> requested at
    mod_requests: FxHashMap<String, Instant>,
}

/// Resolves ambiguous server messages to a user/channel
pub struct MetadataCorrelator {
    directory: Arc<UserDirectory>,
    emote_sets: Box<dyn EmoteSetResolver>,
    buffer_window: Duration,
    mods_valid: Duration,
    mods_tracked: Duration,
    promote_threshold: u8,
    state: Mutex<CorrelatorState>,
}

impl MetadataCorrelator {
    /// Create a correlator over the given directory
    pub fn new(
        directory: Arc<UserDirectory>,
        emote_sets: Box<dyn EmoteSetResolver>,
        config: &CorrelationConfig,
    ) -> Self {
        Self {
            directory,
            emote_sets,
            buffer_window: Duration::from_millis(config.buffer_window_ms),
            mods_valid: Duration::from_secs(config.mods_valid_seconds),
            mods_tracked: Duration::from_secs(config.mods_tracked_seconds),
            promote_threshold: config.subscriber_promote_threshold,
            state: Mutex::new(CorrelatorState::default()),
        }
    }

    // --- Subscriber detection ---

    /// Handle a subscriber-status signal.
    ///
    /// With an explicit channel the user is marked immediately. Without one
    /// the name is recorded as a candidate and paired against the next chat
    /// message from that name within the buffer window. Returns the user
    /// when it was newly marked subscriber.
    pub fn subscriber_signal(&self, channel: Option<&str>, name: &str) -> Option<SharedUser> {
        match channel {
            Some(channel) => {
                let (user, _) = self.directory.get_or_create(channel, name);
                let changed = user.write().set_flag(UserFlag::Subscriber, true);
                changed.then_some(user)
            }
            None => {
                let mut state = self.state.lock();
                state
                    .sub_candidates
                    .insert(name.to_lowercase(), Instant::now());
                None
            }
        }
    }

    /// Pair a chat message against a pending subscriber candidate.
    ///
    /// A fresh candidate is consumed and counted; only the configured number
    /// of correlated pairs promotes the user to confirmed subscriber, which
    /// guards against a single coincidental timing match. Returns the user
    /// when this message promoted them.
    pub fn observe_message(&self, channel: &str, name: &str) -> Option<SharedUser> {
        let key = name.to_lowercase();
        let fresh = {
            let mut state = self.state.lock();
            let cutoff = Instant::now() - self.buffer_window;
            state.sub_candidates.retain(|_, &mut seen| seen > cutoff);
            state.sub_candidates.remove(&key).is_some()
        };
        if !fresh {
            return None;
        }

        let (user, _) = self.directory.get_or_create(channel, name);
        let mut guard = user.write();
        guard.probable_subscriber = guard.probable_subscriber.saturating_add(1);
        if guard.probable_subscriber >= self.promote_threshold
            && guard.set_flag(UserFlag::Subscriber, true)
        {
            drop(guard);
            return Some(user);
        }
        None
    }

    /// Apply a user's emote sets. A set mapped to the channel a user is in
    /// is an authoritative subscription signal for that channel. Returns
    /// (users whose sets changed, users newly promoted to subscriber).
    pub fn observe_emote_sets(
        &self,
        name: &str,
        sets: &HashSet<u32>,
    ) -> (Vec<SharedUser>, Vec<SharedUser>) {
        let updated = self.directory.set_emote_sets(name, sets);

        let owners: HashSet<String> = sets
            .iter()
            .filter_map(|&set| self.emote_sets.channel_for_set(set))
            .collect();
        if owners.is_empty() {
            return (updated, Vec::new());
        }

        let mut promoted = Vec::new();
        for user in self.directory.find_by_name(name) {
            let mut guard = user.write();
            let owner = string::channel_owner(&guard.channel).to_string();
            if owners.contains(&owner) && guard.set_flag(UserFlag::Subscriber, true) {
                drop(guard);
                promoted.push(user);
            }
        }
        (updated, promoted)
    }

    // --- Local-user channel inference ---

    /// Record a confirmed join of the local user
    pub fn note_channel_join(&self, channel: &str) {
        self.state
            .lock()
            .recent_joins
            .insert(channel.to_string(), Instant::now());
    }

    /// Resolve the channel a channel-less message about the local user
    /// applies to. If exactly one channel was joined within the buffer
    /// window it is authoritative over the caller-supplied channel.
    pub fn infer_local_channel(&self, supplied: Option<&str>) -> Option<String> {
        let mut state = self.state.lock();
        let cutoff = Instant::now() - self.buffer_window;
        state.recent_joins.retain(|_, &mut at| at > cutoff);
        if state.recent_joins.len() == 1 {
            return state.recent_joins.keys().next().cloned();
        }
        supplied.map(|c| c.to_string())
    }

    // --- Moderator-list attribution ---

    /// Record an outgoing moderator-list request for a channel
    pub fn record_mods_request(&self, channel: &str) {
        self.state
            .lock()
            .mod_requests
            .insert(channel.to_string(), Instant::now());
    }

    /// Attribute and apply a moderator-list response.
    ///
    /// With an explicit channel the list is applied directly. Without one,
    /// requests older than the tracked window are dropped from the table;
    /// the response is attributed only when exactly one request remains and
    /// it is still within the valid window. Unattributable responses are
    /// dropped with a diagnostic log.
    pub fn resolve_mods(&self, channel: Option<&str>, names: &[String]) -> Option<ModListUpdate> {
        let channel = match channel {
            Some(channel) => channel.to_string(),
            None => {
                let mut state = self.state.lock();
                let now = Instant::now();
                state
                    .mod_requests
                    .retain(|_, &mut at| now - at < self.mods_tracked);
                if state.mod_requests.len() != 1 {
                    debug!(
                        "Dropping moderator list: {} requests outstanding",
                        state.mod_requests.len()
                    );
                    return None;
                }
                let (channel, &requested_at) = state.mod_requests.iter().next().unwrap();
                if now - requested_at >= self.mods_valid {
                    debug!(
                        "Dropping moderator list: request for {} no longer valid",
                        channel
                    );
                    return None;
                }
                channel.clone()
            }
        };
        Some(self.apply_mod_list(&channel, names))
    }

    /// Replace a channel's moderator set with the given list. Names that are
    /// not channel-name-shaped are skipped individually.
    fn apply_mod_list(&self, channel: &str, names: &[String]) -> ModListUpdate {
        let valid: Vec<&String> = names
            .iter()
            .filter(|name| {
                let ok = string::is_valid_name(name);
                if !ok {
                    debug!("Skipping malformed moderator name: {:?}", name);
                }
                ok
            })
            .collect();
        let new_set: HashSet<String> = valid.iter().map(|name| name.to_lowercase()).collect();

        let mut changed = Vec::new();
        for user in self.directory.users_in_channel(channel) {
            let mut guard = user.write();
            if guard.is_moderator() && !new_set.contains(&guard.name) {
                guard.set_flag(UserFlag::Moderator, false);
                changed.push(guard.display_nick.clone());
            }
        }
        for name in valid {
            let (user, _) = self.directory.get_or_create(channel, name);
            let mut guard = user.write();
            if guard.set_flag(UserFlag::Moderator, true) {
                changed.push(guard.display_nick.clone());
            }
        }

        ModListUpdate {
            channel: channel.to_string(),
            changed,
        }
    }
}
