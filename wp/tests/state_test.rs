//! Session state integration tests

mod common;

use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::json;
use tokio::sync::oneshot;
use waypoint::{ContainerRef, ContextFragment, Session, SessionStatus};

use common::{Behavior, data, fixture};

fn arb_session() -> impl Strategy<Value = Session> {
    (
        "[a-z][a-z0-9-]{0,15}",
        "[a-z][a-z0-9_]{0,15}",
        "[a-z ]{0,20}",
        prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..5),
        prop::option::of("[a-f0-9]{12}"),
        prop::collection::vec(
            (prop::sample::select(vec!["system", "user", "assistant", "tool"]), ".{0,40}"),
            0..6,
        ),
    )
        .prop_map(|(session_id, task_id, step, progress, container, context)| {
            let mut session = Session::with_id(session_id, task_id);
            session.set_step(step);
            for (key, value) in progress {
                session.set_progress(key, json!(value));
            }
            if let Some(container_id) = container {
                session = session.with_container(ContainerRef::new(container_id));
            }
            for (role, content) in context {
                session.push_context(ContextFragment::new(role, content));
            }
            session
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_save_then_load_round_trips(session in arb_session()) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let f = fixture();
            let id = session.session_id.clone();
            let saved = f.waypoint.state.save_session_state(&id, session.clone()).await.unwrap();
            let loaded = f.waypoint.state.load_session_state(&id).await.unwrap();

            prop_assert!(loaded.same_content(&session));
            prop_assert_eq!(&loaded, &saved);
            prop_assert_eq!(loaded.revision, 1);
            Ok(())
        })?;
    }
}

#[tokio::test]
async fn test_identical_save_writes_nothing() {
    let f = fixture();
    let mut session = Session::with_id("s1", "t1");
    session.set_step("plan");
    let saved = f.waypoint.state.save_session_state("s1", session).await.unwrap();
    let before = f.store.raw("sessions/s1").unwrap();
    let index_before = f.store.raw("index/active").unwrap();

    let again = f.waypoint.state.save_session_state("s1", saved.clone()).await.unwrap();

    assert_eq!(again, saved);
    assert_eq!(f.store.raw("sessions/s1").unwrap(), before);
    assert_eq!(f.store.raw("index/active").unwrap(), index_before);
    assert_eq!(f.waypoint.tracker.list_active().await.unwrap(), vec!["s1".to_string()]);
}

#[tokio::test]
async fn test_immutable_fields_are_protected() {
    let f = fixture();
    let saved = f
        .waypoint
        .state
        .save_session_state("s1", Session::with_id("s1", "t1"))
        .await
        .unwrap();

    let mut moved = saved.clone();
    moved.task_id = "t2".to_string();
    assert!(f.waypoint.state.save_session_state("s1", moved).await.is_err());

    let err = f
        .waypoint
        .state
        .save_session_state("s2", saved)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("mismatch"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_session_saves_are_ordered_by_revision() {
    let f = fixture();
    f.waypoint
        .state
        .save_session_state("s1", Session::with_id("s1", "t1"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for n in 0..10 {
        let state = f.waypoint.state.clone();
        handles.push(tokio::spawn(async move {
            state
                .update_session("s1", |s| s.set_progress(format!("k{}", n), json!(n)))
                .await
                .unwrap()
                .revision
        }));
    }

    let mut revisions = Vec::new();
    for handle in handles {
        revisions.push(handle.await.unwrap());
    }
    revisions.sort_unstable();
    assert_eq!(revisions, (2..=11).collect::<Vec<u64>>());

    let session = f.waypoint.state.load_session_state("s1").await.unwrap();
    assert_eq!(session.revision, 11);
    assert_eq!(session.progress.len(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_different_sessions_do_not_serialize() {
    let f = fixture();
    let state = f.waypoint.state.clone();
    state.save_session_state("s1", Session::with_id("s1", "t1")).await.unwrap();

    let (started_tx, started_rx) = oneshot::channel();
    let (release_tx, release_rx) = std_mpsc::channel::<()>();
    let held = tokio::spawn({
        let state = state.clone();
        async move {
            state
                .update_session("s1", move |s| {
                    let _ = started_tx.send(());
                    let _ = release_rx.recv_timeout(Duration::from_secs(5));
                    s.set_step("released");
                })
                .await
        }
    });

    // s1's lock is held until released
    started_rx.await.unwrap();
    let other = tokio::time::timeout(
        Duration::from_secs(1),
        state.save_session_state("s2", Session::with_id("s2", "t2")),
    )
    .await;
    release_tx.send(()).unwrap();

    assert!(other.expect("save of s2 waited on s1").is_ok());
    assert_eq!(held.await.unwrap().unwrap().current_step, "released");
}

#[tokio::test]
async fn test_stale_cleanup_keeps_checkpoints() {
    let f = fixture();
    f.containers.set("alive", Behavior::Running);
    f.containers.set("flaky", Behavior::Fail("docker daemon restarting".to_string()));

    f.resumable("gone", "t1", None).await;
    f.resumable("alive", "t2", Some("alive")).await;
    f.resumable("flaky", "t3", Some("flaky")).await;
    f.resumable("fresh", "t4", None).await;
    for id in ["gone", "alive", "flaky"] {
        f.backdate(id, Duration::from_secs(2 * 3600));
    }

    let archived = f
        .waypoint
        .tracker
        .cleanup_stale_sessions(Duration::from_secs(3600))
        .await
        .unwrap();

    assert_eq!(archived, vec!["gone".to_string()]);
    assert_eq!(
        f.waypoint.state.load_session_state("gone").await.unwrap().status,
        SessionStatus::Archived
    );
    assert_eq!(
        f.waypoint.tracker.list_active().await.unwrap(),
        vec!["alive".to_string(), "flaky".to_string(), "fresh".to_string()]
    );

    let checkpoint = f.waypoint.checkpoints.latest_recoverable("t1").await.unwrap();
    let restored = f
        .waypoint
        .checkpoints
        .restore_from_checkpoint(&checkpoint.checkpoint_id)
        .await
        .unwrap();
    assert_eq!(restored, data(1));
}

#[tokio::test]
async fn test_closed_session_leaves_active_set() {
    let f = fixture();
    let session = f.waypoint.state.create_session("t1").await.unwrap();
    let id = session.session_id.clone();
    assert_eq!(f.waypoint.tracker.list_active().await.unwrap(), vec![id.clone()]);

    let closed = f.waypoint.state.close_session(&id, SessionStatus::Completed).await.unwrap();
    assert_eq!(closed.revision, 2);
    assert!(f.waypoint.tracker.list_active().await.unwrap().is_empty());

    let err = f
        .waypoint
        .state
        .close_session(&id, SessionStatus::Active)
        .await
        .unwrap_err();
    assert!(matches!(err, waypoint::StateError::PolicyViolation(_)));
}
