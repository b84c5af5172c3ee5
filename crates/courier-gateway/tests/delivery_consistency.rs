//! Consistency between the push channel and the durable log: whatever a
//! connected client saw pushed must equal what an offline client later
//! pulls from history, and a reconnect must never lose presence.

use std::sync::Arc;

use uuid::Uuid;

use courier_db::Database;
use courier_gateway::coordinator::Coordinator;
use courier_gateway::registry::PresenceRegistry;
use courier_types::DELETED_TOMBSTONE;
use courier_types::events::ServerEvent;

const ALICE: Uuid = Uuid::from_u128(0xa11ce);
const BOB: Uuid = Uuid::from_u128(0xb0b);

fn setup() -> Coordinator {
    let db = Database::open_in_memory().unwrap();
    db.create_user(&ALICE.to_string(), "alice", "hash-a").unwrap();
    db.create_user(&BOB.to_string(), "bob", "hash-b").unwrap();
    Coordinator::new(Arc::new(db), PresenceRegistry::new())
}

#[tokio::test]
async fn pushed_rows_match_pulled_history_exactly() {
    let coordinator = setup();
    let (_conn, mut bob_rx) = coordinator.registry().bind(BOB).await;

    let m1 = coordinator.send(ALICE, BOB, "one".into()).await.unwrap();
    let m2 = coordinator.send(ALICE, BOB, "two".into()).await.unwrap();
    coordinator.edit(m2.id, "two, edited".into(), ALICE).await.unwrap();
    coordinator.delete(m1.id, ALICE).await.unwrap();

    // Bob's pushed view, in coordinator issue order.
    let mut pushed = Vec::new();
    while let Ok(event) = bob_rx.try_recv() {
        match event {
            ServerEvent::MessageNew(m)
            | ServerEvent::MessageEdited(m)
            | ServerEvent::MessageDeleted(m) => pushed.push(m),
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(pushed.len(), 4);

    // The final pushed state of each message equals the durable log.
    let history = coordinator.db().conversation(BOB, ALICE).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, m1.id);
    assert!(history[0].deleted);
    assert_eq!(history[0].text, DELETED_TOMBSTONE);
    assert_eq!(history[1].id, m2.id);
    assert!(history[1].edited);
    assert_eq!(history[1].text, "two, edited");

    let last_m1 = pushed.iter().rfind(|m| m.id == m1.id).unwrap();
    let last_m2 = pushed.iter().rfind(|m| m.id == m2.id).unwrap();
    assert_eq!(last_m1, &history[0]);
    assert_eq!(last_m2, &history[1]);
}

#[tokio::test]
async fn events_arrive_in_coordinator_issue_order() {
    let coordinator = setup();
    let (_conn, mut bob_rx) = coordinator.registry().bind(BOB).await;

    for i in 0..5 {
        coordinator
            .send(ALICE, BOB, format!("msg {i}"))
            .await
            .unwrap();
    }

    let mut texts = Vec::new();
    while let Ok(ServerEvent::MessageNew(m)) = bob_rx.try_recv() {
        texts.push(m.text);
    }
    assert_eq!(texts, ["msg 0", "msg 1", "msg 2", "msg 3", "msg 4"]);
}

#[tokio::test]
async fn reconnect_keeps_receiving_while_stale_close_is_ignored() {
    let coordinator = setup();
    let registry = coordinator.registry();

    // Bob reconnects before the old connection notices it is dead.
    let (old_conn, _old_rx) = registry.bind(BOB).await;
    let (_new_conn, mut new_rx) = registry.bind(BOB).await;
    assert!(!registry.unbind(BOB, old_conn).await);
    assert!(registry.is_online(BOB).await);

    // Delivery lands on the new connection.
    let sent = coordinator.send(ALICE, BOB, "still here?".into()).await.unwrap();
    match new_rx.try_recv().unwrap() {
        ServerEvent::MessageNew(m) => assert_eq!(m.id, sent.id),
        other => panic!("expected message:new, got {other:?}"),
    }
}

#[tokio::test]
async fn rest_fallback_and_push_share_one_durable_write() {
    let coordinator = setup();

    // A degraded client with no push channel: the coordinator call is the
    // REST path's whole implementation and returns the persisted row.
    let row = coordinator.send(ALICE, BOB, "offline send".into()).await.unwrap();
    assert!(row.delivered);

    // Exactly one row exists, identical to the synchronous response.
    let history = coordinator.db().conversation(ALICE, BOB).unwrap();
    assert_eq!(history, vec![row]);
}
