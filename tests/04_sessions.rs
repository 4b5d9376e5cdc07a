mod support;

use std::time::Duration;

use shardgate::GatewayError;
use shardgate::shared_types::{SessionId, TabletType};
use support::{Call, FakeCluster};

#[tokio::test]
async fn concurrent_call_on_a_leased_session_is_busy() {
    let cluster = FakeCluster::new().with_rows("s1", 1).with_rows("s2", 1);
    let gate = cluster.gate("s1");
    let gateway = support::gateway(&cluster, &["s1", "s2"], Default::default());
    let session = gateway.open_session(TabletType::Replica).unwrap();
    let other = gateway.open_session(TabletType::Replica).unwrap();

    let first = tokio::spawn({
        let gateway = gateway.clone();
        async move {
            gateway
                .execute(support::query(session, "select 1", &["s1"]))
                .await
        }
    });
    gate.entered.notified().await;

    let err = gateway
        .execute(support::query(session, "select 2", &["s1"]))
        .await
        .unwrap_err();
    assert!(matches!(
        err.kind(),
        GatewayError::SessionBusy {
            purpose: "execute",
            ..
        }
    ));
    assert!(err.to_string().contains("busy"), "{err}");

    assert_eq!(gateway.stats().leased, 1);

    // Other sessions are unaffected.
    gateway
        .execute(support::query(other, "select 3", &["s2"]))
        .await
        .unwrap();

    gate.release.notify_one();
    first.await.unwrap().unwrap();

    assert_eq!(gateway.stats().leased, 0);
    gateway
        .execute(support::query(session, "select 4", &["s1"]))
        .await
        .expect("released session can be leased again");
}

#[tokio::test]
async fn closing_a_busy_session_finishes_when_the_call_returns() {
    let cluster = FakeCluster::new().with_rows("s1", 1);
    let gateway = support::gateway(&cluster, &["s1"], Default::default());
    let session = gateway.open_session(TabletType::Primary).unwrap();
    gateway.begin(session).await.unwrap();

    let gate = cluster.gate("s1");
    let first = tokio::spawn({
        let gateway = gateway.clone();
        async move {
            gateway
                .execute(support::query(session, "update t set n = 1", &["s1"]))
                .await
        }
    });
    gate.entered.notified().await;

    gateway.close_session(session).await.unwrap();
    assert_eq!(gateway.stats().registered, 0);
    gateway.close_session(session).await.unwrap();

    let err = gateway
        .execute(support::query(session, "select 2", &["s1"]))
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), GatewayError::SessionNotFound(_)));
    assert_eq!(cluster.count("s1", |c| *c == Call::Close), 0);

    gate.release.notify_one();
    first.await.unwrap().unwrap();

    // The in-flight call handed the session over for teardown.
    assert_eq!(cluster.count("s1", |c| matches!(c, Call::Rollback(_))), 1);
    assert_eq!(cluster.count("s1", |c| *c == Call::Close), 1);
    assert_eq!(gateway.stats().registered, 0);
}

#[tokio::test]
async fn close_is_idempotent() {
    let cluster = FakeCluster::new().with_rows("s1", 1);
    let gateway = support::gateway(&cluster, &["s1"], Default::default());
    let session = gateway.open_session(TabletType::Replica).unwrap();

    gateway
        .execute(support::query(session, "select 1", &["s1"]))
        .await
        .unwrap();

    gateway.close_session(session).await.unwrap();
    gateway.close_session(session).await.unwrap();

    assert_eq!(cluster.count("s1", |c| *c == Call::Close), 1);
    assert_eq!(gateway.stats().registered, 0);
}

#[tokio::test]
async fn closing_an_unknown_session_succeeds() {
    let cluster = FakeCluster::new();
    let gateway = support::gateway(&cluster, &["s1"], Default::default());

    gateway.close_session(SessionId::new(42)).await.unwrap();
}

#[tokio::test]
async fn calls_on_closed_sessions_are_not_found() {
    let cluster = FakeCluster::new().with_rows("s1", 1);
    let gateway = support::gateway(&cluster, &["s1"], Default::default());
    let session = gateway.open_session(TabletType::Replica).unwrap();
    gateway.close_session(session).await.unwrap();

    let err = gateway
        .execute(support::query(session, "select 1", &["s1"]))
        .await
        .unwrap_err();

    assert!(matches!(err.kind(), GatewayError::SessionNotFound(id) if *id == session));
    assert_eq!(
        err.to_string(),
        format!("query: select 1, session {session}: session not found")
    );

    let err = gateway.begin(session).await.unwrap_err();
    assert_eq!(err.to_string(), format!("session {session}: session not found"));
}

#[tokio::test]
async fn session_ids_are_unique() {
    let cluster = FakeCluster::new();
    let gateway = support::gateway(&cluster, &["s1"], Default::default());

    let mut ids: Vec<SessionId> = (0..16)
        .map(|_| gateway.open_session(TabletType::Replica).unwrap())
        .collect();
    let opened = ids.len();
    ids.sort();
    ids.dedup();

    assert_eq!(ids.len(), opened);
    assert_eq!(gateway.stats().registered, opened);
}

#[tokio::test]
async fn session_cap_is_enforced() {
    let cluster = FakeCluster::new();
    let mut settings = support::settings(Duration::from_millis(1), 1);
    settings.max_sessions = Some(2);
    let gateway = support::gateway(&cluster, &["s1"], settings);

    let first = gateway.open_session(TabletType::Replica).unwrap();
    gateway.open_session(TabletType::Replica).unwrap();

    let err = gateway.open_session(TabletType::Replica).unwrap_err();
    assert!(matches!(err.kind(), GatewayError::TooManySessions { limit: 2 }));

    gateway.close_session(first).await.unwrap();
    gateway.open_session(TabletType::Replica).unwrap();
}

#[tokio::test(start_paused = true)]
async fn idle_sessions_are_reaped() {
    let cluster = FakeCluster::new().with_rows("s1", 1);
    let gateway = support::gateway(&cluster, &["s1"], Default::default());
    let idle = gateway.open_session(TabletType::Replica).unwrap();
    let busy = gateway.open_session(TabletType::Replica).unwrap();

    gateway
        .execute(support::query(idle, "select 1", &["s1"]))
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(40)).await;
    gateway
        .execute(support::query(busy, "select 1", &["s1"]))
        .await
        .unwrap();

    let reaped = gateway.reap_idle_sessions(Duration::from_secs(30)).await;
    assert_eq!(reaped, 1);
    assert_eq!(gateway.stats().registered, 1);

    let err = gateway
        .execute(support::query(idle, "select 1", &["s1"]))
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), GatewayError::SessionNotFound(_)));
    assert_eq!(cluster.count("s1", |c| *c == Call::Close), 1);

    gateway
        .execute(support::query(busy, "select 2", &["s1"]))
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn background_reaper_closes_idle_sessions() {
    let cluster = FakeCluster::new();
    let gateway = support::gateway(&cluster, &["s1"], Default::default());
    let reaper = gateway.spawn_idle_reaper(Duration::from_secs(10), Duration::from_secs(30));

    gateway.open_session(TabletType::Replica).unwrap();
    gateway.open_session(TabletType::Replica).unwrap();
    assert_eq!(gateway.stats().registered, 2);

    tokio::time::sleep(Duration::from_secs(45)).await;
    assert_eq!(gateway.stats().registered, 0);

    reaper.abort();
}

#[tokio::test(start_paused = true)]
async fn configured_timeout_starts_the_reaper() {
    let cluster = FakeCluster::new();
    let mut settings = support::settings(Duration::from_millis(1), 1);
    settings.session_timeout = Some(Duration::from_secs(8));
    let gateway = support::gateway(&cluster, &["s1"], settings);

    let reaper = gateway.start_idle_reaper().expect("timeout configured");
    gateway.open_session(TabletType::Replica).unwrap();

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(gateway.stats().registered, 0);
    reaper.abort();

    let unbounded = support::gateway(&cluster, &["s1"], Default::default());
    assert!(unbounded.start_idle_reaper().is_none());
}
