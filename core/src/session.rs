//! Chat session: connection lifecycle and event handling
//!
//! Owns the state machine `Offline -> Connecting -> Connected -> Registered`
//! with `Reconnecting` reachable from any non-offline state, the user
//! directory, the correlator and the command gate. Protocol events arrive on
//! the transport's read task; timers (join retry, reconnect backoff,
//! automatic moderator requests) run as separate tokio tasks. Every shared
//! table sits behind its own lock, so the two may interleave freely.

use crate::command_gate::CommandGate;
use crate::config::{Config, ConnectionConfig};
use crate::connection::{self, OutboundSink};
use crate::correlator::{EmoteSetResolver, MetadataCorrelator, StaticEmoteSetMap};
use crate::directory::UserDirectory;
use crate::event::{ChatEvent, DisconnectReason, Metadata, SessionEvent, SpecialStatus};
use crate::join_supervisor::JoinSupervisor;
use crate::message::Message;
use crate::protocol;
use crate::rate_gate::RateGate;
use crate::user::UserFlag;
use crate::utils::string;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reconnection delays in seconds, indexed by attempt count and clamped to
/// the last entry
const RECONNECT_DELAYS: [u64; 6] = [1, 5, 5, 10, 10, 60];

/// Delay before a reconnection attempt
pub fn reconnect_delay(attempt: u32) -> Duration {
    let index = (attempt as usize).min(RECONNECT_DELAYS.len() - 1);
    Duration::from_secs(RECONNECT_DELAYS[index])
}

/// The maximum backoff delay, used unconditionally for unknown-host failures
pub fn max_reconnect_delay() -> Duration {
    Duration::from_secs(RECONNECT_DELAYS[RECONNECT_DELAYS.len() - 1])
}

/// Connection state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Offline,
    Connecting,
    Connected,
    Registered,
    Reconnecting,
}

struct LifecycleState {
    connection: ConnectionState,
    reconnect_attempts: u32,
    server_index: usize,
    /// Channels the user intends to be in
    open_channels: HashSet<String>,
    /// Channels the server has confirmed
    joined_channels: HashSet<String>,
    /// Channels to join on a fresh connect
    auto_join: Vec<String>,
    requested_disconnect: bool,
    reconnect_timer: Option<JoinHandle<()>>,
    transport: Option<JoinHandle<()>>,
    auto_mods_started: bool,
}

/// The chat session engine
pub struct ChatSession {
    config: Config,
    /// Local account name, lowercase
    nick: String,
    state: Mutex<LifecycleState>,
    directory: Arc<UserDirectory>,
    correlator: Arc<MetadataCorrelator>,
    joins: JoinSupervisor,
    commands: Arc<CommandGate>,
    outbound: OutboundSink,
    events: mpsc::UnboundedSender<SessionEvent>,
    /// Handle to self for the timer tasks
    weak_self: Weak<ChatSession>,
}

impl ChatSession {
    /// Create a session from configuration, loading the emote-set mapping
    /// file when one is configured
    pub fn new(config: Config) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>)> {
        let resolver: Box<dyn EmoteSetResolver> = match &config.correlation.emote_sets_file {
            Some(path) => Box::new(StaticEmoteSetMap::from_file(path)?),
            None => Box::new(StaticEmoteSetMap::default()),
        };
        Self::with_resolver(config, resolver)
    }

    /// Create a session with an explicit emote-set resolver
    pub fn with_resolver(
        config: Config,
        resolver: Box<dyn EmoteSetResolver>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>)> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let directory = Arc::new(UserDirectory::new(config.limits.user_history_capacity));
        let correlator = Arc::new(MetadataCorrelator::new(
            directory.clone(),
            resolver,
            &config.correlation,
        ));
        let outbound = OutboundSink::new();
        let gate = RateGate::from_spec(&config.limits.message_rate)?;
        let commands = Arc::new(CommandGate::new(
            gate,
            outbound.clone(),
            correlator.clone(),
            events_tx.clone(),
        ));
        let joins = JoinSupervisor::new(Duration::from_secs(config.connection.join_retry_seconds));
        let nick = config.credentials.nick.to_lowercase();

        let session = Arc::new_cyclic(|weak| Self {
            config,
            nick,
            state: Mutex::new(LifecycleState {
                connection: ConnectionState::Offline,
                reconnect_attempts: 0,
                server_index: 0,
                open_channels: HashSet::new(),
                joined_channels: HashSet::new(),
                auto_join: Vec::new(),
                requested_disconnect: false,
                reconnect_timer: None,
                transport: None,
                auto_mods_started: false,
            }),
            directory,
            correlator,
            joins,
            commands,
            outbound,
            events: events_tx,
            weak_self: weak.clone(),
        });
        Ok((session, events_rx))
    }

    /// Strong handle to self for spawned tasks. The session is always
    /// behind an Arc, so this cannot fail while a method is running.
    fn strong(&self) -> Arc<Self> {
        self.weak_self.upgrade().expect("session dropped")
    }

    // --- Connection control ---

    /// Validate credentials/channels/servers, record the auto-join list and
    /// open the socket. Must be called from within a tokio runtime.
    pub fn prepare_connection(&self, channels: &[String]) -> Result<()> {
        if self.config.credentials.nick.trim().is_empty()
            || self.config.credentials.token.trim().is_empty()
        {
            return Err(Error::Config("Credentials are not set".to_string()));
        }
        if channels.is_empty() {
            return Err(Error::Config("No channels to join".to_string()));
        }
        if self.config.server.servers.is_empty() || self.config.server.ports.is_empty() {
            return Err(Error::Config("No server configured".to_string()));
        }

        let normalized: Vec<String> = channels
            .iter()
            .map(|channel| string::normalize_channel(channel))
            .collect();
        {
            let mut state = self.state.lock();
            state.auto_join = normalized.clone();
            state.open_channels = normalized.into_iter().collect();
            state.requested_disconnect = false;
        }
        self.start_auto_mods_timer();
        self.connect_now();
        Ok(())
    }

    /// Cancel any pending reconnect timer and retry immediately
    pub fn reconnect(&self) {
        {
            let mut state = self.state.lock();
            if let Some(timer) = state.reconnect_timer.take() {
                timer.abort();
            }
            state.requested_disconnect = false;
        }
        self.emit(SessionEvent::Notice {
            text: "Reconnecting...".to_string(),
        });
        self.connect_now();
    }

    /// Disconnect at the user's request; no reconnection is scheduled
    pub fn disconnect(&self) {
        {
            let mut state = self.state.lock();
            state.requested_disconnect = true;
            if let Some(timer) = state.reconnect_timer.take() {
                timer.abort();
            }
        }
        self.outbound.send_line("QUIT");
        {
            let mut state = self.state.lock();
            if let Some(transport) = state.transport.take() {
                transport.abort();
            }
        }
        self.outbound.unbind();
        self.on_disconnect(DisconnectReason::Requested);
    }

    fn connect_now(&self) {
        let mut state = self.state.lock();
        if let Some(timer) = state.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(transport) = state.transport.take() {
            transport.abort();
        }
        state.transport = Some(tokio::spawn(connection::run_transport(self.strong())));
    }

    /// Host, ports and connection settings for the next attempt
    pub(crate) fn connect_params(&self) -> (String, Vec<u16>, ConnectionConfig) {
        let state = self.state.lock();
        let servers = &self.config.server.servers;
        let host = servers[state.server_index % servers.len()].clone();
        (
            host,
            self.config.server.ports.clone(),
            self.config.connection.clone(),
        )
    }

    pub(crate) fn outbound(&self) -> &OutboundSink {
        &self.outbound
    }

    /// Send the login sequence on a freshly opened socket
    pub(crate) fn send_login(&self) {
        self.outbound
            .send_line(&format!("PASS {}", self.config.credentials.token));
        self.outbound.send_line(&format!("NICK {}", self.nick));
    }

    // --- Channel control ---

    /// Mark a channel as open and join it if registered
    pub fn join_channel(&self, channel: &str) {
        let channel = string::normalize_channel(channel);
        let registered = {
            let mut state = self.state.lock();
            state.open_channels.insert(channel.clone());
            state.connection == ConnectionState::Registered
        };
        if registered {
            self.issue_join(&channel);
        }
    }

    /// Leave a channel and drop it from the open set
    pub fn part_channel(&self, channel: &str) {
        let channel = string::normalize_channel(channel);
        self.state.lock().open_channels.remove(&channel);
        self.outbound.send_line(&format!("PART {}", channel));
    }

    fn issue_join(&self, channel: &str) {
        self.outbound.send_line(&format!("JOIN {}", channel));
        self.on_join_attempt(channel);
    }

    // --- Event contract (driven by the protocol decoder or directly) ---

    /// A connection attempt is starting
    pub fn on_connect_attempt(&self, host: &str) {
        info!("Connecting to {}", host);
        let mut state = self.state.lock();
        self.transition(&mut state, ConnectionState::Connecting);
    }

    /// The socket is open
    pub fn on_connect(&self) {
        let mut state = self.state.lock();
        self.transition(&mut state, ConnectionState::Connected);
    }

    /// Registration completed; rejoin the open set (reconnect) or the
    /// auto-join list (fresh connect)
    pub fn on_registered(&self) {
        let channels: Vec<String> = {
            let mut state = self.state.lock();
            state.reconnect_attempts = 0;
            self.transition(&mut state, ConnectionState::Registered);
            if state.open_channels.is_empty() {
                state.auto_join.clone()
            } else {
                state.open_channels.iter().cloned().collect()
            }
        };
        // Ask the server for the out-of-band metadata stream
        self.outbound.send_line("TWITCHCLIENT 2");
        for channel in channels {
            self.issue_join(&channel);
        }
    }

    /// A join was issued; start the retry timer
    pub fn on_join_attempt(&self, channel: &str) {
        self.joins.watch(channel, self.outbound.clone());
    }

    /// A user (possibly the local one) joined a channel
    pub fn on_join(&self, channel: &str, nick: &str) {
        if nick.eq_ignore_ascii_case(&self.nick) {
            self.state
                .lock()
                .joined_channels
                .insert(channel.to_string());
            self.joins.confirm(channel);
            self.correlator.note_channel_join(channel);
            self.emit(SessionEvent::ChannelJoined {
                channel: channel.to_string(),
            });
        }
        let (user, created) = self.directory.get_or_create(channel, nick);
        user.write().online = true;
        self.emit_user(channel, nick, created);
    }

    /// A user left a channel
    pub fn on_part(&self, channel: &str, nick: &str) {
        if nick.eq_ignore_ascii_case(&self.nick) {
            self.state.lock().joined_channels.remove(channel);
            self.commands.forget_channel(channel);
            self.emit(SessionEvent::ChannelParted {
                channel: channel.to_string(),
            });
        }
        if self.directory.set_offline(channel, nick) {
            self.emit(SessionEvent::UserOffline {
                channel: channel.to_string(),
                name: nick.to_lowercase(),
            });
        }
    }

    /// A channel mode changed; only +o/-o is meaningful here
    pub fn on_mode_change(&self, channel: &str, nick: &str, added: bool, mode: char) {
        if mode != 'o' {
            debug!(
                "Ignoring mode {}{} on {}",
                if added { '+' } else { '-' },
                mode,
                channel
            );
            return;
        }
        let (user, created) = self.directory.get_or_create(channel, nick);
        let changed = user.write().set_flag(UserFlag::Moderator, added);
        if changed || created {
            self.emit_user(channel, nick, created);
        }
    }

    /// A chat message arrived in a channel
    pub fn on_channel_message(&self, channel: &str, nick: &str, text: &str) {
        let (user, created) = self.directory.get_or_create(channel, nick);
        {
            let mut user = user.write();
            user.online = true;
            user.record_message(text.to_string());
        }
        if created {
            self.emit_user(channel, nick, true);
        }
        self.emit(SessionEvent::ChannelMessage {
            channel: channel.to_string(),
            name: nick.to_lowercase(),
            text: text.to_string(),
        });

        if let Some(promoted) = self.correlator.observe_message(channel, nick) {
            let name = promoted.read().name.clone();
            self.emit(SessionEvent::SubscriberConfirmed {
                channel: channel.to_string(),
                name,
            });
        }
    }

    /// An out-of-band metadata message arrived
    pub fn on_metadata(&self, channel: Option<&str>, data: Metadata) {
        match data {
            Metadata::UserColor { name, color } => {
                for user in self.directory.set_color(&name, &color) {
                    self.emit_updated(&user);
                }
            }
            Metadata::ClearChat { name } => self.on_clear_chat(channel, name),
            Metadata::SpecialUser { name, status } => self.on_special_user(channel, &name, status),
            Metadata::EmoteSets { name, sets } => {
                let (updated, promoted) = self.correlator.observe_emote_sets(&name, &sets);
                for user in updated {
                    self.emit_updated(&user);
                }
                for user in promoted {
                    let (channel, name) = {
                        let user = user.read();
                        (user.channel.clone(), user.name.clone())
                    };
                    self.emit(SessionEvent::SubscriberConfirmed { channel, name });
                }
            }
        }
    }

    fn on_special_user(&self, channel: Option<&str>, name: &str, status: SpecialStatus) {
        match status {
            SpecialStatus::Subscriber => {
                // A stale channel for the local user is overridden by a lone
                // just-joined channel
                let channel = if name.eq_ignore_ascii_case(&self.nick) {
                    self.correlator.infer_local_channel(channel)
                } else {
                    channel.map(|c| c.to_string())
                };
                if let Some(user) = self.correlator.subscriber_signal(channel.as_deref(), name) {
                    let (channel, name) = {
                        let user = user.read();
                        (user.channel.clone(), user.name.clone())
                    };
                    self.emit(SessionEvent::SubscriberConfirmed { channel, name });
                }
            }
            SpecialStatus::Turbo | SpecialStatus::Admin | SpecialStatus::Staff => {
                let flag = match status {
                    SpecialStatus::Turbo => UserFlag::Turbo,
                    SpecialStatus::Admin => UserFlag::Admin,
                    _ => UserFlag::Staff,
                };
                for user in self.directory.set_account_flag(name, flag) {
                    self.emit_updated(&user);
                }
            }
        }
    }

    fn on_clear_chat(&self, channel: Option<&str>, name: Option<String>) {
        let Some(name) = name else {
            self.emit(SessionEvent::Notice {
                text: "Chat was cleared by a moderator".to_string(),
            });
            return;
        };
        match channel {
            Some(channel) => {
                let (user, _) = self.directory.get_or_create(channel, &name);
                user.write().record_ban();
                self.emit(SessionEvent::UserBanned {
                    channel: channel.to_string(),
                    name: name.to_lowercase(),
                });
            }
            None => {
                // No channel context: apply to every channel the name is in
                for user in self.directory.find_by_name(&name) {
                    let channel = {
                        let mut user = user.write();
                        user.record_ban();
                        user.channel.clone()
                    };
                    self.emit(SessionEvent::UserBanned {
                        channel,
                        name: name.to_lowercase(),
                    });
                }
            }
        }
    }

    /// The connection ended. Clears per-connection state and schedules a
    /// reconnect with backoff unless the disconnect was user-requested.
    pub fn on_disconnect(&self, reason: DisconnectReason) {
        let mut state = self.state.lock();

        // Per-connection state goes regardless of why the connection ended
        state.joined_channels.clear();
        self.joins.clear();
        self.commands.reset();
        self.directory.clear();
        self.outbound.unbind();

        let requested = state.requested_disconnect || reason == DisconnectReason::Requested;
        if requested {
            self.transition(&mut state, ConnectionState::Offline);
            drop(state);
            self.emit(SessionEvent::Notice {
                text: "Disconnected".to_string(),
            });
            return;
        }

        // A pending timer means this disconnect was already handled
        if state.reconnect_timer.is_some() || state.connection == ConnectionState::Offline {
            return;
        }

        let servers = self.config.server.servers.len().max(1);
        if reason == DisconnectReason::UnknownHost {
            // Try the next server in the list on the following attempt
            state.server_index = (state.server_index + 1) % servers;
        }

        let max_attempts = self.config.connection.max_reconnect_attempts;
        if state.reconnect_attempts >= max_attempts {
            warn!("Giving up after {} reconnection attempts", max_attempts);
            self.transition(&mut state, ConnectionState::Offline);
            drop(state);
            self.emit(SessionEvent::Notice {
                text: format!(
                    "Could not reconnect after {} attempts, use reconnect to retry",
                    max_attempts
                ),
            });
            return;
        }

        let delay = if reason == DisconnectReason::UnknownHost {
            max_reconnect_delay()
        } else {
            reconnect_delay(state.reconnect_attempts)
        };
        state.reconnect_attempts += 1;
        let attempt = state.reconnect_attempts;
        self.transition(&mut state, ConnectionState::Reconnecting);

        let session = self.strong();
        state.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            session.state.lock().reconnect_timer = None;
            session.connect_now();
        }));
        drop(state);

        self.emit(SessionEvent::Notice {
            text: format!(
                "Disconnected ({}). Reconnecting in {}s (attempt {}/{})",
                reason,
                delay.as_secs(),
                attempt,
                max_attempts
            ),
        });
    }

    // --- Wiring ---

    /// Parse and dispatch one raw line from the transport
    pub fn handle_line(&self, line: &str) {
        match Message::parse(line) {
            Ok(msg) => match protocol::decode(&msg) {
                Some(event) => self.handle_event(event),
                None => debug!("Ignoring: {}", line),
            },
            Err(e) => debug!("Unparseable line ({}): {}", e, line),
        }
    }

    /// Dispatch one decoded protocol event
    pub fn handle_event(&self, event: ChatEvent) {
        match event {
            ChatEvent::Registered => self.on_registered(),
            ChatEvent::Ping { token } => {
                self.outbound.send_line(&format!("PONG :{}", token));
            }
            ChatEvent::Join { channel, nick } => self.on_join(&channel, &nick),
            ChatEvent::Part { channel, nick } => self.on_part(&channel, &nick),
            ChatEvent::Mode {
                channel,
                nick,
                added,
                mode,
            } => self.on_mode_change(&channel, &nick, added, mode),
            ChatEvent::Names { channel, nicks } => {
                for nick in nicks {
                    let (user, created) = self.directory.get_or_create(&channel, &nick);
                    user.write().online = true;
                    self.emit_user(&channel, &nick, created);
                }
            }
            ChatEvent::ChannelMessage {
                channel,
                nick,
                text,
            } => self.on_channel_message(&channel, &nick, &text),
            ChatEvent::Notice { text, .. } => {
                self.emit(SessionEvent::Notice { text });
            }
            ChatEvent::Metadata { channel, data } => self.on_metadata(channel.as_deref(), data),
            ChatEvent::ModeratorList { channel, names } => {
                if let Some(update) = self.correlator.resolve_mods(channel.as_deref(), &names) {
                    self.emit(SessionEvent::ModeratorsChanged {
                        channel: update.channel,
                        names: update.changed,
                    });
                }
            }
            ChatEvent::LoginFailed => {
                warn!("Login rejected by server");
                self.on_disconnect(DisconnectReason::RegistrationFailed);
            }
        }
    }

    // --- Commands ---

    /// Rate-gated command issuance
    pub fn commands(&self) -> &Arc<CommandGate> {
        &self.commands
    }

    /// Send a chat message through the rate gate
    pub fn send_message(&self, channel: &str, text: &str) -> Result<()> {
        self.commands.send_message(channel, text)
    }

    /// Request the moderator list for a channel, with the usual echo
    pub fn request_mods(&self, channel: &str) -> Result<()> {
        self.commands.request_mods(channel, false)
    }

    // --- Accessors ---

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.state.lock().connection
    }

    /// Reconnection attempts since the last successful registration
    pub fn reconnect_attempts(&self) -> u32 {
        self.state.lock().reconnect_attempts
    }

    /// Index of the server the next attempt will target
    pub fn server_index(&self) -> usize {
        self.state.lock().server_index
    }

    /// Channels confirmed by the server
    pub fn joined_channels(&self) -> HashSet<String> {
        self.state.lock().joined_channels.clone()
    }

    /// Channels the user intends to be in
    pub fn open_channels(&self) -> HashSet<String> {
        self.state.lock().open_channels.clone()
    }

    /// The user directory
    pub fn directory(&self) -> &Arc<UserDirectory> {
        &self.directory
    }

    /// The metadata correlator
    pub fn correlator(&self) -> &Arc<MetadataCorrelator> {
        &self.correlator
    }

    // --- Internals ---

    fn start_auto_mods_timer(&self) {
        if !self.config.moderation.auto_request_mods {
            return;
        }
        {
            let mut state = self.state.lock();
            if state.auto_mods_started {
                return;
            }
            state.auto_mods_started = true;
        }
        let weak = self.weak_self.clone();
        let interval = Duration::from_secs(self.config.moderation.auto_request_interval_seconds);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick would race the initial joins
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(session) = weak.upgrade() else { break };
                let joined = session.joined_channels();
                session.commands.auto_request_tick(&joined);
            }
        });
    }

    fn transition(&self, state: &mut LifecycleState, to: ConnectionState) {
        if state.connection != to {
            debug!("Connection state: {:?} -> {:?}", state.connection, to);
            state.connection = to;
            self.emit(SessionEvent::StateChanged(to));
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn emit_user(&self, channel: &str, nick: &str, created: bool) {
        let event = if created {
            SessionEvent::UserAdded {
                channel: channel.to_string(),
                name: nick.to_lowercase(),
            }
        } else {
            SessionEvent::UserUpdated {
                channel: channel.to_string(),
                name: nick.to_lowercase(),
            }
        };
        self.emit(event);
    }

    fn emit_updated(&self, user: &crate::directory::SharedUser) {
        let (channel, name) = {
            let user = user.read();
            (user.channel.clone(), user.name.clone())
        };
        self.emit(SessionEvent::UserUpdated { channel, name });
    }
}
