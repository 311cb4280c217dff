//! Send, acknowledgement and listen integration tests.

mod common;

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use common::{create_test_config, Harness};
use tether_socket::{Direction, MessageCallback};

fn collector() -> (MessageCallback, Arc<Mutex<Vec<Value>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (Arc::new(move |payload| sink.lock().unwrap().push(payload)), seen)
}

// ---- Send ----

#[tokio::test]
async fn send_when_connected_emits_and_logs() {
    let h = Harness::connected(create_test_config()).await;

    assert!(h.manager.send("chat", json!({"text": "hi"})).await);

    assert_eq!(
        h.network.latest().emits(),
        vec![("chat".to_string(), json!({"text": "hi"}))]
    );
    let log = h.manager.event_log().await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].direction, Direction::Send);
    assert_eq!(log[0].event, "chat");
    assert_eq!(log[0].payload, r#"{"text": "hi"}"#);
}

#[tokio::test]
async fn send_with_ack_when_not_connected_never_emits() {
    let h = Harness::new(create_test_config()).await;
    h.manager.start().await;
    let fired = Arc::new(Mutex::new(false));
    let flag = fired.clone();

    let sent = h
        .manager
        .send_with_ack(
            "joinGame",
            json!({"table": 4}),
            Some(Box::new(move |_| *flag.lock().unwrap() = true)),
        )
        .await;
    h.settle().await;

    assert!(!sent);
    assert!(h.network.latest().emits().is_empty());
    assert!(!h.network.latest().answer_ack(json!("ok")));
    assert!(!*fired.lock().unwrap());
    assert!(h.manager.event_log().await.unwrap().is_empty());
}

#[tokio::test]
async fn ack_is_logged_and_forwarded_once() {
    let h = Harness::connected(create_test_config()).await;
    let replies = Arc::new(Mutex::new(Vec::new()));
    let sink = replies.clone();

    assert!(
        h.manager
            .send_with_ack(
                "joinGame",
                json!({"table": 4}),
                Some(Box::new(move |reply| sink.lock().unwrap().push(reply))),
            )
            .await
    );
    assert!(h.network.latest().answer_ack(json!({"seat": 2})));
    assert!(!h.network.latest().answer_ack(json!({"seat": 3})));
    h.settle().await;

    assert_eq!(*replies.lock().unwrap(), vec![json!({"seat": 2})]);
    let log = h.manager.event_log().await.unwrap();
    let directions: Vec<Direction> = log.iter().map(|e| e.direction).collect();
    assert_eq!(directions, vec![Direction::Send, Direction::Ack]);
    assert_eq!(log[1].event, "joinGame");
}

#[tokio::test]
async fn ack_without_callback_is_still_logged() {
    let h = Harness::connected(create_test_config()).await;

    assert!(h.manager.send_with_ack("ping", Value::Null, None).await);
    h.network.latest().answer_ack(json!("pong"));
    h.settle().await;

    let log = h.manager.event_log().await.unwrap();
    assert_eq!(log.last().unwrap().direction, Direction::Ack);
    assert_eq!(log.last().unwrap().payload, r#""pong""#);
}

#[tokio::test]
async fn send_after_disconnect_is_rejected() {
    let h = Harness::connected(create_test_config()).await;
    h.manager.disconnect_manually().await;

    assert!(!h.manager.send("chat", json!("late")).await);
    assert!(h.network.latest().emits().is_empty());
}

// ---- Listen ----

#[tokio::test]
async fn listen_without_transport_fails() {
    let h = Harness::new(create_test_config()).await;
    let (callback, _) = collector();
    assert!(!h.manager.listen("chat", callback).await);
}

#[tokio::test]
async fn listen_records_and_forwards() {
    let h = Harness::connected(create_test_config()).await;
    let (first, seen_first) = collector();
    let (second, seen_second) = collector();

    assert!(h.manager.listen("chat", first).await);
    assert!(h.manager.listen("chat", second).await);
    assert!(h.network.latest().deliver("chat", json!({"text": "yo"})));
    h.settle().await;

    assert_eq!(*seen_first.lock().unwrap(), vec![json!({"text": "yo"})]);
    assert_eq!(*seen_second.lock().unwrap(), vec![json!({"text": "yo"})]);
    let log = h.manager.event_log().await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].direction, Direction::Recv);
}

#[tokio::test]
async fn listen_replace_drops_earlier_callbacks() {
    let h = Harness::connected(create_test_config()).await;
    let (first, seen_first) = collector();
    let (second, seen_second) = collector();

    h.manager.listen("chat", first).await;
    assert!(h.manager.listen_replace("chat", second).await);
    h.network.latest().deliver("chat", json!(1));
    h.settle().await;

    assert!(seen_first.lock().unwrap().is_empty());
    assert_eq!(*seen_second.lock().unwrap(), vec![json!(1)]);
    assert_eq!(h.network.latest().off_calls(), vec!["chat".to_string()]);
}

#[tokio::test]
async fn unlisten_absent_event_is_harmless() {
    let h = Harness::connected(create_test_config()).await;

    h.manager.unlisten("never-subscribed").await;
    h.manager.unlisten("never-subscribed").await;
    let status = h.settle().await;

    assert_eq!(status.active_auto_listeners.len(), 3);
    assert_eq!(h.network.latest().off_calls().len(), 2);
}

#[tokio::test]
async fn unlisten_stops_delivery() {
    let h = Harness::connected(create_test_config()).await;
    let (callback, seen) = collector();

    h.manager.listen("chat", callback).await;
    h.manager.unlisten("chat").await;

    assert!(!h.network.latest().deliver("chat", json!(1)));
    h.settle().await;
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn received_events_are_broadcast() {
    let h = Harness::connected(create_test_config()).await;
    let mut events = h.manager.events();

    h.network.latest().deliver("playerJoined", json!({"name": "ana"}));
    let event = events.recv().await.unwrap();

    assert_eq!(event.event, "playerJoined");
    assert_eq!(event.payload, json!({"name": "ana"}));
}

// ---- Game start ----

#[tokio::test]
async fn game_start_latches_case_insensitively() {
    let mut config = create_test_config();
    config.auto_listen_events = vec!["GAMESTART".to_string()];
    let h = Harness::connected(config).await;
    assert!(!h.settle().await.has_received_game_start);

    h.network.latest().deliver("GAMESTART", json!({}));

    assert!(h.settle().await.has_received_game_start);
}

#[tokio::test]
async fn game_start_ignored_when_not_connected() {
    let h = Harness::new(create_test_config()).await;
    h.manager.start().await;
    let (callback, seen) = collector();
    assert!(h.manager.listen("gameStart", callback).await);

    h.network.latest().deliver("gameStart", json!({}));
    let status = h.settle().await;

    assert!(!status.has_received_game_start);
    assert_eq!(seen.lock().unwrap().len(), 1);
}

// ---- Event log ----

#[tokio::test]
async fn event_log_keeps_most_recent_entries() {
    let mut config = create_test_config();
    config.max_log_entries = 3;
    let h = Harness::connected(config).await;

    for i in 0..5 {
        h.manager.send("tick", json!(i)).await;
    }

    let payloads: Vec<String> = h
        .manager
        .event_log()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.payload)
        .collect();
    assert_eq!(payloads, vec!["2", "3", "4"]);
}
