use std::time::Duration;

use sqlite_bridge::prelude::*;
use tokio::sync::broadcast;
use tokio::time::timeout;

const GIVE_UP: Duration = Duration::from_secs(10);

async fn next_matching(
    events: &mut broadcast::Receiver<WorkerEvent>,
    wanted: impl Fn(&WorkerEvent) -> bool,
) -> WorkerEvent {
    timeout(GIVE_UP, async {
        loop {
            match events.recv().await {
                Ok(event) if wanted(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for worker event")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn crash_rejects_every_pending_request() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let bridge = BridgeClient::builder(dir.path().join("crash.db"))
        .build()
        .await?;
    let mut events = bridge.subscribe_events();

    bridge.simulate_crash_for_tests(Duration::from_millis(200))?;
    let waiters: Vec<_> = (0..8_i64)
        .map(|i| {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.get("SELECT ? AS v", vec![i.into()]).await })
        })
        .collect();

    for waiter in waiters {
        let result = timeout(GIVE_UP, waiter).await??;
        let err = result.unwrap_err();
        assert!(err.is_connection_lost(), "expected ConnectionLost, got {err}");
    }
    assert_eq!(bridge.pending(), 0);

    let exited = next_matching(&mut events, |e| matches!(e, WorkerEvent::Exited { .. })).await;
    let WorkerEvent::Exited { incarnation, exit, .. } = exited else {
        unreachable!()
    };
    assert_eq!(incarnation, 1);
    assert!(matches!(exit, WorkerExit::Failed(_)), "{exit}");

    // No restart policy: the bridge stays down.
    timeout(GIVE_UP, bridge.closed()).await?;
    assert!(!bridge.is_connected());
    assert_eq!(bridge.executor_state(), ExecutorState::Terminated);
    let err = bridge.get("SELECT 1", vec![]).await.unwrap_err();
    assert!(err.is_connection_lost());
    assert_eq!(bridge.restarts(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bounded_policy_respawns_then_gives_up() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let bridge = BridgeClient::builder(dir.path().join("respawn.db"))
        .restart(RestartPolicy::Bounded {
            max_restarts: 1,
            backoff: Duration::from_millis(10),
        })
        .build()
        .await?;
    bridge
        .exec("CREATE TABLE games (id INTEGER PRIMARY KEY, title TEXT NOT NULL)")
        .await?;
    bridge
        .run("INSERT INTO games(title) VALUES (?)", vec!["Survivor".into()])
        .await?;
    let mut events = bridge.subscribe_events();

    bridge.simulate_crash_for_tests(Duration::from_millis(50))?;
    next_matching(&mut events, |e| {
        matches!(e, WorkerEvent::Started { incarnation: 2 })
    })
    .await;
    assert_eq!(bridge.restarts(), 1);

    // The fresh worker reopens the same file.
    let row = bridge
        .get("SELECT title FROM games", vec![])
        .await?
        .expect("row written before the crash");
    assert_eq!(row.get("title").and_then(SqlValue::as_text), Some("Survivor"));
    assert!(bridge.is_connected());

    bridge.simulate_crash_for_tests(Duration::ZERO)?;
    let stopped = next_matching(&mut events, |e| matches!(e, WorkerEvent::Stopped { .. })).await;
    let WorkerEvent::Stopped { reason } = stopped else {
        unreachable!()
    };
    assert!(reason.contains("gave up"), "{reason}");

    timeout(GIVE_UP, bridge.closed()).await?;
    let err = bridge.run("DELETE FROM games", vec![]).await.unwrap_err();
    assert!(err.is_connection_lost());
    assert_eq!(bridge.restarts(), 1);
    Ok(())
}
