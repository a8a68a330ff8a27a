//! End-to-end tests for metadata attribution through the session

use rustwitch_core::*;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

fn test_config() -> Config {
    let mut config = Config::default();
    config.credentials.nick = "foo".to_string();
    config.credentials.token = "oauth:secret".to_string();
    config
}

fn drain(events: &mut UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}

fn subscriber_confirmations(events: &mut UnboundedReceiver<SessionEvent>) -> Vec<(String, String)> {
    drain(events)
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::SubscriberConfirmed { channel, name } => Some((channel, name)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_recent_join_resolves_channel_less_subscriber_status() {
    let (session, mut events) = ChatSession::new(test_config()).unwrap();

    // The local user joins #foo; shortly after, a channel-less subscriber
    // status for the local user arrives. The lone recent join resolves it.
    session.on_join("#foo", "foo");
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.on_metadata(
        None,
        Metadata::SpecialUser {
            name: "foo".to_string(),
            status: SpecialStatus::Subscriber,
        },
    );

    let user = session.directory().get("#foo", "foo").unwrap();
    assert!(user.read().is_subscriber());
    assert_eq!(
        subscriber_confirmations(&mut events),
        vec![("#foo".to_string(), "foo".to_string())]
    );
}

#[tokio::test]
async fn test_channel_less_subscriber_for_other_user_needs_two_correlations() {
    let (session, mut events) = ChatSession::new(test_config()).unwrap();
    session.on_join("#channel", "foo");
    drain(&mut events);

    // First pair: candidate recorded, message correlates, no promotion yet
    session.on_metadata(
        None,
        Metadata::SpecialUser {
            name: "alice".to_string(),
            status: SpecialStatus::Subscriber,
        },
    );
    session.on_channel_message("#channel", "alice", "hi");
    let user = session.directory().get("#channel", "alice").unwrap();
    assert!(!user.read().is_subscriber());
    assert_eq!(user.read().probable_subscriber, 1);
    assert!(subscriber_confirmations(&mut events).is_empty());

    // Second pair promotes
    session.on_metadata(
        None,
        Metadata::SpecialUser {
            name: "alice".to_string(),
            status: SpecialStatus::Subscriber,
        },
    );
    session.on_channel_message("#channel", "alice", "hi again");
    assert!(user.read().is_subscriber());
    assert_eq!(
        subscriber_confirmations(&mut events),
        vec![("#channel".to_string(), "alice".to_string())]
    );
}

#[tokio::test]
async fn test_correlation_outside_window_does_not_count() {
    let mut config = test_config();
    config.correlation.buffer_window_ms = 50;
    let (session, _events) = ChatSession::new(config).unwrap();

    session.on_metadata(
        None,
        Metadata::SpecialUser {
            name: "alice".to_string(),
            status: SpecialStatus::Subscriber,
        },
    );
    tokio::time::sleep(Duration::from_millis(80)).await;
    session.on_channel_message("#channel", "alice", "late");

    let user = session.directory().get("#channel", "alice").unwrap();
    assert_eq!(user.read().probable_subscriber, 0);
    assert!(!user.read().is_subscriber());
}

#[tokio::test]
async fn test_emote_set_membership_promotes_immediately() {
    let mut resolver = StaticEmoteSetMap::default();
    resolver.insert(42, "somechannel");
    let (session, mut events) =
        ChatSession::with_resolver(test_config(), Box::new(resolver)).unwrap();

    session.on_join("#somechannel", "alice");
    drain(&mut events);

    let sets: HashSet<u32> = [42].into_iter().collect();
    session.on_metadata(None, Metadata::EmoteSets {
        name: "alice".to_string(),
        sets,
    });

    let user = session.directory().get("#somechannel", "alice").unwrap();
    assert!(user.read().is_subscriber());
    assert_eq!(
        subscriber_confirmations(&mut events),
        vec![("#somechannel".to_string(), "alice".to_string())]
    );
}

#[tokio::test]
async fn test_mods_response_attributed_within_valid_window() {
    let mut config = test_config();
    config.correlation.mods_valid_seconds = 1;
    config.correlation.mods_tracked_seconds = 15;
    let (session, mut events) = ChatSession::new(config).unwrap();

    session.request_mods("#bar").unwrap();
    drain(&mut events);

    // Response with no channel arrives while the request is still valid
    session.handle_event(ChatEvent::ModeratorList {
        channel: None,
        names: vec!["alice".to_string()],
    });
    let update = drain(&mut events)
        .into_iter()
        .find_map(|event| match event {
            SessionEvent::ModeratorsChanged { channel, names } => Some((channel, names)),
            _ => None,
        })
        .expect("response should be attributed");
    assert_eq!(update.0, "#bar");

    // An identical response after the valid window has elapsed is dropped
    tokio::time::sleep(Duration::from_millis(1100)).await;
    session.handle_event(ChatEvent::ModeratorList {
        channel: None,
        names: vec!["alice".to_string(), "bob".to_string()],
    });
    assert!(drain(&mut events)
        .iter()
        .all(|event| !matches!(event, SessionEvent::ModeratorsChanged { .. })));
}

#[tokio::test]
async fn test_mods_response_dropped_with_competing_requests() {
    let (session, mut events) = ChatSession::new(test_config()).unwrap();

    session.request_mods("#one").unwrap();
    session.request_mods("#two").unwrap();
    drain(&mut events);

    session.handle_event(ChatEvent::ModeratorList {
        channel: None,
        names: vec!["alice".to_string()],
    });
    assert!(drain(&mut events)
        .iter()
        .all(|event| !matches!(event, SessionEvent::ModeratorsChanged { .. })));
}

#[tokio::test]
async fn test_account_flags_propagate_across_channels() {
    let (session, mut events) = ChatSession::new(test_config()).unwrap();

    session.on_join("#one", "alice");
    session.on_join("#two", "alice");
    drain(&mut events);

    session.on_metadata(
        None,
        Metadata::SpecialUser {
            name: "alice".to_string(),
            status: SpecialStatus::Turbo,
        },
    );

    for channel in ["#one", "#two"] {
        let user = session.directory().get(channel, "alice").unwrap();
        assert!(user.read().has_flag(UserFlag::Turbo));
    }
    let updated = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, SessionEvent::UserUpdated { .. }))
        .count();
    assert_eq!(updated, 2);
}

#[tokio::test]
async fn test_color_applies_to_future_user_objects() {
    let (session, _events) = ChatSession::new(test_config()).unwrap();

    session.on_metadata(
        None,
        Metadata::UserColor {
            name: "alice".to_string(),
            color: "#1E90FF".to_string(),
        },
    );
    // Alice is seen for the first time afterwards
    session.on_channel_message("#channel", "alice", "hello");

    let user = session.directory().get("#channel", "alice").unwrap();
    assert_eq!(user.read().color.as_deref(), Some("#1E90FF"));
}
