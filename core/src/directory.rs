//! Per-channel user registry with global attribute caches
//!
//! Users are keyed by (channel, lowercase name). Turbo/admin/staff status,
//! chat color and emote sets are reported by the server without channel
//! context, so they are additionally cached account-wide by name and used to
//! seed newly constructed users; a re-joining user keeps what was learned
//! about the account earlier in the session.

use crate::user::{User, UserFlag};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::HashSet;
use std::sync::Arc;

/// Shared handle to a user; identity is stable until the directory is cleared
pub type SharedUser = Arc<RwLock<User>>;

/// Registry of users across all joined channels
pub struct UserDirectory {
    state: RwLock<DirectoryState>,
    history_capacity: usize,
}

#[derive(Default)]
struct DirectoryState {
    /// channel -> lowercase name -> user
    users: FxHashMap<String, FxHashMap<String, SharedUser>>,
    /// Account-wide attribute caches, keyed by lowercase name
    colors: FxHashMap<String, String>,
    turbo: FxHashSet<String>,
    admins: FxHashSet<String>,
    staff: FxHashSet<String>,
    emote_sets: FxHashMap<String, HashSet<u32>>,
}

impl UserDirectory {
    /// Create an empty directory
    pub fn new(history_capacity: usize) -> Self {
        Self {
            state: RwLock::new(DirectoryState::default()),
            history_capacity,
        }
    }

    /// Get the user for (channel, name), creating it on first reference.
    ///
    /// The lookup key is the lowercased name; the original casing is kept
    /// for display. New users are seeded from the global attribute caches.
    /// Returns the shared handle and whether the user was just created.
    pub fn get_or_create(&self, channel: &str, nick: &str) -> (SharedUser, bool) {
        let name = nick.to_lowercase();
        let mut state = self.state.write();

        if let Some(user) = state
            .users
            .get(channel)
            .and_then(|channel_users| channel_users.get(&name))
        {
            let user = user.clone();
            user.write().update_display_nick(nick);
            return (user, false);
        }

        let mut user = User::new(channel, nick, self.history_capacity);
        if let Some(color) = state.colors.get(&name) {
            user.color = Some(color.clone());
        }
        if state.turbo.contains(&name) {
            user.set_flag(UserFlag::Turbo, true);
        }
        if state.admins.contains(&name) {
            user.set_flag(UserFlag::Admin, true);
        }
        if state.staff.contains(&name) {
            user.set_flag(UserFlag::Staff, true);
        }
        if let Some(sets) = state.emote_sets.get(&name) {
            user.emote_sets = sets.clone();
        }

        let user = Arc::new(RwLock::new(user));
        state
            .users
            .entry(channel.to_string())
            .or_default()
            .insert(name, user.clone());
        (user, true)
    }

    /// Look up an existing user without creating one
    pub fn get(&self, channel: &str, name: &str) -> Option<SharedUser> {
        let name = name.to_lowercase();
        self.state
            .read()
            .users
            .get(channel)
            .and_then(|channel_users| channel_users.get(&name))
            .cloned()
    }

    /// Mark a user offline; returns true if the user existed and was online.
    /// The user object and its history are kept.
    pub fn set_offline(&self, channel: &str, name: &str) -> bool {
        if let Some(user) = self.get(channel, name) {
            let mut user = user.write();
            if user.online {
                user.online = false;
                return true;
            }
        }
        false
    }

    /// All users sharing an account name, one per channel
    pub fn find_by_name(&self, name: &str) -> Vec<SharedUser> {
        let name = name.to_lowercase();
        self.state
            .read()
            .users
            .values()
            .filter_map(|channel_users| channel_users.get(&name))
            .cloned()
            .collect()
    }

    /// All users known in a channel
    pub fn users_in_channel(&self, channel: &str) -> Vec<SharedUser> {
        self.state
            .read()
            .users
            .get(channel)
            .map(|channel_users| channel_users.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Cache a user's chat color and apply it to every user with that name
    pub fn set_color(&self, name: &str, color: &str) -> Vec<SharedUser> {
        let name = name.to_lowercase();
        let mut state = self.state.write();
        state.colors.insert(name.clone(), color.to_string());
        Self::update_named(&state, &name, |user| {
            if user.color.as_deref() != Some(color) {
                user.color = Some(color.to_string());
                true
            } else {
                false
            }
        })
    }

    /// Cache an account-wide status flag and apply it to every user with
    /// that name
    pub fn set_account_flag(&self, name: &str, flag: UserFlag) -> Vec<SharedUser> {
        let name = name.to_lowercase();
        let mut state = self.state.write();
        match flag {
            UserFlag::Turbo => {
                state.turbo.insert(name.clone());
            }
            UserFlag::Admin => {
                state.admins.insert(name.clone());
            }
            UserFlag::Staff => {
                state.staff.insert(name.clone());
            }
            // Channel-scoped flags are not cached account-wide
            _ => {
                tracing::warn!("Flag {:?} is not account-wide, ignoring", flag);
                return Vec::new();
            }
        }
        Self::update_named(&state, &name, |user| user.set_flag(flag, true))
    }

    /// Cache a user's emote sets and apply them to every user with that name
    pub fn set_emote_sets(&self, name: &str, sets: &HashSet<u32>) -> Vec<SharedUser> {
        let name = name.to_lowercase();
        let mut state = self.state.write();
        state.emote_sets.insert(name.clone(), sets.clone());
        Self::update_named(&state, &name, |user| {
            if &user.emote_sets != sets {
                user.emote_sets = sets.clone();
                true
            } else {
                false
            }
        })
    }

    /// Apply a mutation to every user with the given name; returns the
    /// users that actually changed
    fn update_named<F>(state: &DirectoryState, name: &str, mut apply: F) -> Vec<SharedUser>
    where
        F: FnMut(&mut User) -> bool,
    {
        let mut changed = Vec::new();
        for channel_users in state.users.values() {
            if let Some(user) = channel_users.get(name) {
                if apply(&mut user.write()) {
                    changed.push(user.clone());
                }
            }
        }
        changed
    }

    /// Drop all users in one channel; global caches are kept
    pub fn clear_channel(&self, channel: &str) {
        self.state.write().users.remove(channel);
    }

    /// Drop all users. Global attribute caches survive so state learned this
    /// session is re-applied after a reconnect.
    pub fn clear(&self) {
        self.state.write().users.clear();
    }

    /// Total number of user objects across all channels
    pub fn len(&self) -> usize {
        self.state
            .read()
            .users
            .values()
            .map(|channel_users| channel_users.len())
            .sum()
    }

    /// Whether no users are known
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> UserDirectory {
        UserDirectory::new(100)
    }

    #[test]
    fn test_get_or_create_identity_is_stable() {
        let dir = directory();
        let (first, created) = dir.get_or_create("#channel", "Alice");
        assert!(created);
        let (second, created) = dir.get_or_create("#channel", "alice");
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));

        // Different channel means a different user object
        let (other, created) = dir.get_or_create("#elsewhere", "alice");
        assert!(created);
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[test]
    fn test_identity_resets_after_clear() {
        let dir = directory();
        let (first, _) = dir.get_or_create("#channel", "alice");
        dir.clear();
        let (second, created) = dir.get_or_create("#channel", "alice");
        assert!(created);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_display_nick_updated_on_lookup() {
        let dir = directory();
        let (user, _) = dir.get_or_create("#channel", "alice");
        assert_eq!(user.read().display_nick, "alice");
        dir.get_or_create("#channel", "AliCe");
        assert_eq!(user.read().display_nick, "AliCe");
        assert_eq!(user.read().name, "alice");
    }

    #[test]
    fn test_account_flag_propagates_to_existing_users() {
        let dir = directory();
        let (a, _) = dir.get_or_create("#one", "alice");
        let (b, _) = dir.get_or_create("#two", "alice");
        let (other, _) = dir.get_or_create("#one", "bob");

        let changed = dir.set_account_flag("alice", UserFlag::Turbo);
        assert_eq!(changed.len(), 2);
        assert!(a.read().has_flag(UserFlag::Turbo));
        assert!(b.read().has_flag(UserFlag::Turbo));
        assert!(!other.read().has_flag(UserFlag::Turbo));
    }

    #[test]
    fn test_account_flag_seeds_future_users() {
        let dir = directory();
        dir.set_account_flag("alice", UserFlag::Admin);
        let (user, created) = dir.get_or_create("#channel", "alice");
        assert!(created);
        assert!(user.read().has_flag(UserFlag::Admin));
    }

    #[test]
    fn test_color_cache_survives_clear() {
        let dir = directory();
        dir.get_or_create("#channel", "alice");
        dir.set_color("alice", "#FF0000");
        dir.clear();

        let (user, _) = dir.get_or_create("#channel", "alice");
        assert_eq!(user.read().color.as_deref(), Some("#FF0000"));
    }

    #[test]
    fn test_emote_sets_propagate() {
        let dir = directory();
        let (user, _) = dir.get_or_create("#channel", "alice");
        let sets: HashSet<u32> = [3, 17].into_iter().collect();
        let changed = dir.set_emote_sets("alice", &sets);
        assert_eq!(changed.len(), 1);
        assert_eq!(user.read().emote_sets, sets);
    }

    #[test]
    fn test_channel_scoped_flag_not_cached() {
        let dir = directory();
        assert!(dir.set_account_flag("alice", UserFlag::Moderator).is_empty());
        let (user, _) = dir.get_or_create("#channel", "alice");
        assert!(!user.read().is_moderator());
    }

    #[test]
    fn test_set_offline_keeps_history() {
        let dir = directory();
        let (user, _) = dir.get_or_create("#channel", "alice");
        {
            let mut user = user.write();
            user.online = true;
            user.record_message("hello".to_string());
        }
        assert!(dir.set_offline("#channel", "alice"));
        assert!(!dir.set_offline("#channel", "alice"));
        assert_eq!(user.read().history_len(), 1);
        assert!(dir.get("#channel", "alice").is_some());
    }

    #[test]
    fn test_find_by_name_spans_channels() {
        let dir = directory();
        dir.get_or_create("#one", "alice");
        dir.get_or_create("#two", "alice");
        dir.get_or_create("#one", "bob");
        assert_eq!(dir.find_by_name("alice").len(), 2);
        assert_eq!(dir.find_by_name("carol").len(), 0);
    }

    #[test]
    fn test_clear_channel_keeps_others() {
        let dir = directory();
        dir.get_or_create("#one", "alice");
        dir.get_or_create("#two", "alice");
        dir.clear_channel("#one");
        assert!(dir.get("#one", "alice").is_none());
        assert!(dir.get("#two", "alice").is_some());
    }
}
