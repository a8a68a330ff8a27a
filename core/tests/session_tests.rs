//! Tests for the connection lifecycle and user state handling

use rustwitch_core::*;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;

fn test_config() -> Config {
    let mut config = Config::default();
    config.credentials.nick = "testuser".to_string();
    config.credentials.token = "oauth:secret".to_string();
    config
}

async fn next_line(
    lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
) -> String {
    tokio::time::timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("timed out waiting for a line")
        .expect("read error")
        .expect("connection closed")
}

fn drain(events: &mut UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}

#[test]
fn test_backoff_delay_table() {
    let expected = [1, 5, 5, 10, 10, 60, 60];
    for (attempt, &seconds) in expected.iter().enumerate() {
        assert_eq!(
            reconnect_delay(attempt as u32),
            Duration::from_secs(seconds),
            "attempt {}",
            attempt
        );
    }
}

#[tokio::test]
async fn test_unknown_host_rotates_server_and_uses_max_delay() {
    let mut config = test_config();
    config.server.servers = vec!["one.example.com".to_string(), "two.example.com".to_string()];
    let (session, mut events) = ChatSession::new(config).unwrap();

    session.on_connect();
    session.on_disconnect(DisconnectReason::UnknownHost);

    assert_eq!(session.connection_state(), ConnectionState::Reconnecting);
    assert_eq!(session.server_index(), 1);
    assert_eq!(session.reconnect_attempts(), 1);

    let notices: Vec<String> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::Notice { text } => Some(text),
            _ => None,
        })
        .collect();
    assert!(
        notices.iter().any(|text| text.contains("60s")),
        "unknown host should always use the maximum delay: {:?}",
        notices
    );

    // A second report while the timer is pending is ignored
    session.on_disconnect(DisconnectReason::UnknownHost);
    assert_eq!(session.server_index(), 1);
    assert_eq!(session.reconnect_attempts(), 1);
}

#[tokio::test]
async fn test_requested_disconnect_goes_offline_without_retry() {
    let (session, mut events) = ChatSession::new(test_config()).unwrap();

    session.on_connect();
    session.disconnect();

    assert_eq!(session.connection_state(), ConnectionState::Offline);
    assert_eq!(session.reconnect_attempts(), 0);
    let states: Vec<ConnectionState> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::StateChanged(state) => Some(state),
            _ => None,
        })
        .collect();
    assert!(!states.contains(&ConnectionState::Reconnecting));
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let mut config = test_config();
    config.connection.max_reconnect_attempts = 0;
    let (session, mut events) = ChatSession::new(config).unwrap();

    session.on_connect();
    session.on_disconnect(DisconnectReason::ConnectionClosed);

    assert_eq!(session.connection_state(), ConnectionState::Offline);
    let notices: Vec<String> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::Notice { text } => Some(text),
            _ => None,
        })
        .collect();
    assert!(notices.iter().any(|text| text.contains("Could not reconnect")));
}

#[tokio::test]
async fn test_registration_resets_attempt_counter() {
    let (session, _events) = ChatSession::new(test_config()).unwrap();

    session.on_connect();
    session.on_disconnect(DisconnectReason::ConnectionClosed);
    assert_eq!(session.reconnect_attempts(), 1);

    session.on_connect();
    session.on_registered();
    assert_eq!(session.reconnect_attempts(), 0);
    assert_eq!(session.connection_state(), ConnectionState::Registered);
}

#[tokio::test]
async fn test_join_and_mode_change_update_directory() {
    let (session, mut events) = ChatSession::new(test_config()).unwrap();

    session.on_join("#channel", "Alice");
    let user = session.directory().get("#channel", "alice").unwrap();
    assert!(user.read().online);
    assert_eq!(user.read().display_nick, "Alice");

    session.on_mode_change("#channel", "alice", true, 'o');
    assert!(user.read().is_moderator());
    session.on_mode_change("#channel", "alice", false, 'o');
    assert!(!user.read().is_moderator());

    let seen = drain(&mut events);
    assert!(seen
        .iter()
        .any(|event| matches!(event, SessionEvent::UserAdded { name, .. } if name == "alice")));
}

#[tokio::test]
async fn test_part_marks_offline_but_keeps_history() {
    let (session, _events) = ChatSession::new(test_config()).unwrap();

    session.on_join("#channel", "alice");
    session.on_channel_message("#channel", "alice", "hello");
    session.on_part("#channel", "alice");

    let user = session.directory().get("#channel", "alice").unwrap();
    assert!(!user.read().online);
    assert_eq!(user.read().history_len(), 1);
}

#[tokio::test]
async fn test_local_join_and_part_track_joined_set() {
    let (session, mut events) = ChatSession::new(test_config()).unwrap();

    session.on_join("#channel", "testuser");
    assert!(session.joined_channels().contains("#channel"));
    assert!(drain(&mut events)
        .iter()
        .any(|event| matches!(event, SessionEvent::ChannelJoined { .. })));

    session.on_part("#channel", "testuser");
    assert!(!session.joined_channels().contains("#channel"));
}

#[tokio::test]
async fn test_disconnect_clears_directory_and_joined_channels() {
    let (session, _events) = ChatSession::new(test_config()).unwrap();

    session.on_join("#channel", "testuser");
    session.on_join("#channel", "alice");
    assert!(!session.directory().is_empty());

    session.on_disconnect(DisconnectReason::ConnectionClosed);
    assert!(session.directory().is_empty());
    assert!(session.joined_channels().is_empty());
}

#[tokio::test]
async fn test_moderator_list_event_applies_and_reports() {
    let (session, mut events) = ChatSession::new(test_config()).unwrap();

    session.handle_event(ChatEvent::ModeratorList {
        channel: Some("#channel".to_string()),
        names: vec!["alice".to_string(), "bob".to_string()],
    });

    let update = drain(&mut events)
        .into_iter()
        .find_map(|event| match event {
            SessionEvent::ModeratorsChanged { channel, names } => Some((channel, names)),
            _ => None,
        })
        .expect("moderator list should be applied");
    assert_eq!(update.0, "#channel");
    assert_eq!(update.1.len(), 2);
    assert!(session
        .directory()
        .get("#channel", "alice")
        .unwrap()
        .read()
        .is_moderator());
}

#[tokio::test]
async fn test_clear_chat_records_ban() {
    let (session, mut events) = ChatSession::new(test_config()).unwrap();

    session.on_join("#channel", "alice");
    session.on_metadata(
        Some("#channel"),
        Metadata::ClearChat {
            name: Some("alice".to_string()),
        },
    );

    let user = session.directory().get("#channel", "alice").unwrap();
    assert_eq!(user.read().history_len(), 1);
    assert!(drain(&mut events)
        .iter()
        .any(|event| matches!(event, SessionEvent::UserBanned { name, .. } if name == "alice")));
}

#[tokio::test]
async fn test_end_to_end_registration_and_join() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut config = test_config();
    config.server.servers = vec!["127.0.0.1".to_string()];
    config.server.ports = vec![port];
    let (session, mut events) = ChatSession::new(config).unwrap();
    session
        .prepare_connection(&["#somewhere".to_string()])
        .unwrap();

    let (stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .unwrap()
        .unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    assert_eq!(next_line(&mut lines).await, "PASS oauth:secret");
    assert_eq!(next_line(&mut lines).await, "NICK testuser");

    write_half
        .write_all(b":tmi.twitch.tv 001 testuser :Welcome, GLHF!\r\n")
        .await
        .unwrap();

    assert_eq!(next_line(&mut lines).await, "TWITCHCLIENT 2");
    assert_eq!(next_line(&mut lines).await, "JOIN #somewhere");

    write_half
        .write_all(b":testuser!testuser@testuser.tmi.twitch.tv JOIN #somewhere\r\n")
        .await
        .unwrap();

    // Wait for the join confirmation to round-trip
    let joined = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Some(SessionEvent::ChannelJoined { channel }) => break channel,
                Some(_) => continue,
                None => panic!("event stream closed"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(joined, "#somewhere");
    assert_eq!(session.connection_state(), ConnectionState::Registered);
    assert!(session.joined_channels().contains("#somewhere"));

    session.disconnect();
    assert_eq!(session.connection_state(), ConnectionState::Offline);
}
