mod common;

use cncbridge_core::{LinkState, SerialStatus};
use common::{bench, fast_config, next_message, settle, DRIVE_PORT, MOTION_PORT, WAIT};
use serde_json::Value;
use std::time::Duration;

fn parse(text: &str) -> Value {
    serde_json::from_str(text).unwrap()
}

#[tokio::test]
async fn test_session_greeting_with_healthy_motion_link() {
    let bench = bench(fast_config(), false).await;
    assert!(bench.supervisor.motion().is_open());
    assert!(bench.supervisor.drive().is_none());

    let (_, mut rx) = bench.supervisor.connect_session().await.unwrap();
    assert_eq!(
        next_message(&mut rx).await,
        r#"{"type":"bridge_status","serial":"connected"}"#
    );

    // a new session triggers one status request
    settle().await;
    assert_eq!(bench.motion.writes().last(), Some(&vec![b'?']));

    bench.supervisor.shutdown().await;
}

#[tokio::test]
async fn test_greeting_includes_drive_snapshot() {
    let bench = bench(fast_config(), true).await;
    let drive = bench.supervisor.drive().expect("drive link");
    assert_eq!(drive.address().as_deref(), Some(DRIVE_PORT));

    let (_, mut rx) = bench.supervisor.connect_session().await.unwrap();
    let first = parse(&next_message(&mut rx).await);
    let second = parse(&next_message(&mut rx).await);
    assert_eq!(first["type"], "bridge_status");
    assert_eq!(second["type"], "vfd_status");
    assert_eq!(second["online"], false);

    bench.supervisor.shutdown().await;
}

#[tokio::test]
async fn test_permitted_realtime_byte_written_once_unframed() {
    let bench = bench(fast_config(), false).await;
    let (session, _rx) = bench.supervisor.connect_session().await.unwrap();
    bench.motion.clear_writes();

    bench
        .supervisor
        .handle_inbound(session, r#"{"type":"realtime","char":"!"}"#)
        .await;

    assert_eq!(bench.motion.writes(), vec![vec![0x21]]);
    assert_eq!(bench.motion.written_bytes(), vec![0x21]);

    bench.supervisor.shutdown().await;
}

#[tokio::test]
async fn test_forbidden_realtime_byte_never_reaches_link() {
    let bench = bench(fast_config(), false).await;
    let (session, mut rx) = bench.supervisor.connect_session().await.unwrap();
    next_message(&mut rx).await;
    bench.motion.clear_writes();

    bench
        .supervisor
        .handle_inbound(session, r#"{"type":"realtime","char":"A"}"#)
        .await;

    assert!(bench.motion.writes().is_empty());
    assert!(bench.supervisor.registry().contains(session));

    // the session still works afterwards
    bench
        .supervisor
        .handle_inbound(session, r#"{"type":"gcode","command":"G0 X1"}"#)
        .await;
    assert_eq!(bench.motion.writes(), vec![b"G0 X1\n".to_vec()]);

    bench.supervisor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_eleventh_session_is_refused() {
    let bench = bench(fast_config(), false).await;

    let attempts: Vec<_> = (0..11)
        .map(|_| {
            let supervisor = bench.supervisor.clone();
            tokio::spawn(async move { supervisor.connect_session().await })
        })
        .collect();

    let mut admitted = Vec::new();
    let mut refused = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(session) => admitted.push(session),
            Err(e) => {
                assert_eq!(e.max, 10);
                refused += 1;
            }
        }
    }
    assert_eq!(admitted.len(), 10);
    assert_eq!(refused, 1);
    assert_eq!(bench.supervisor.registry().len(), 10);

    // a slot opens up once a session leaves
    let (id, _) = admitted.pop().unwrap();
    bench.supervisor.disconnect_session(id);
    assert!(bench.supervisor.connect_session().await.is_ok());

    bench.supervisor.shutdown().await;
}

#[tokio::test]
async fn test_motion_failure_reports_reconnecting_then_connected() {
    let bench = bench(fast_config(), false).await;
    let (_, mut rx) = bench.supervisor.connect_session().await.unwrap();
    next_message(&mut rx).await;
    let mut states = bench.supervisor.motion().subscribe_state();

    bench.motion.unplug();
    tokio::time::sleep(Duration::from_millis(40)).await;
    bench.motion.plug_in();

    let mut statuses = Vec::new();
    tokio::time::timeout(WAIT, async {
        loop {
            let message = next_message(&mut rx).await;
            let value = parse(&message);
            if value["type"] != "bridge_status" {
                continue;
            }
            let serial = value["serial"].as_str().unwrap_or_default().to_string();
            let done = serial == "connected";
            statuses.push(serial);
            if done {
                break;
            }
        }
    })
    .await
    .expect("motion link did not come back");

    let first_reconnecting = statuses.iter().position(|s| s == "reconnecting");
    assert!(first_reconnecting.is_some(), "statuses: {:?}", statuses);
    assert_eq!(statuses.last().map(String::as_str), Some("connected"));

    let mut delays = Vec::new();
    while let Ok(state) = states.try_recv() {
        if let LinkState::Reconnecting { attempt, delay } = state {
            delays.push((attempt, delay));
        }
    }
    assert!(!delays.is_empty());
    for (attempt, delay) in &delays {
        let expected_units = if *attempt > 10 {
            10
        } else {
            2u64.pow(*attempt).min(30)
        };
        assert_eq!(*delay, Duration::from_millis(expected_units));
    }
    let attempts: Vec<u32> = delays.iter().map(|(a, _)| *a).collect();
    let expected: Vec<u32> = (1..=attempts.len() as u32).collect();
    assert_eq!(attempts, expected);

    assert_eq!(
        bench.supervisor.motion().state().serial_status(),
        Some(SerialStatus::Connected)
    );
    assert_eq!(bench.supervisor.motion().address().as_deref(), Some(MOTION_PORT));

    bench.supervisor.shutdown().await;
}

#[tokio::test]
async fn test_motion_lines_reach_every_session() {
    let bench = bench(fast_config(), false).await;
    let (_, mut a) = bench.supervisor.connect_session().await.unwrap();
    let (_, mut b) = bench.supervisor.connect_session().await.unwrap();
    next_message(&mut a).await;
    next_message(&mut b).await;

    bench.motion.push_input(b"<Idle|MPos:0.000,0.000,0.000|FS:0,0>\r\n");
    assert_eq!(
        next_message(&mut a).await,
        "<Idle|MPos:0.000,0.000,0.000|FS:0,0>"
    );
    assert_eq!(
        next_message(&mut b).await,
        "<Idle|MPos:0.000,0.000,0.000|FS:0,0>"
    );

    bench.supervisor.shutdown().await;
}

#[tokio::test]
async fn test_drive_status_and_loss() {
    let bench = bench(fast_config(), true).await;
    let drive_device = bench.drive.clone().unwrap();
    let (session, mut rx) = bench.supervisor.connect_session().await.unwrap();
    next_message(&mut rx).await;
    next_message(&mut rx).await;

    drive_device.push_input(b"{\"vfd\":{\"online\":true,\"running\":true,\"setRpm\":18000}}\n");
    let status = parse(&next_message(&mut rx).await);
    assert_eq!(status["type"], "vfd_status");
    assert_eq!(status["setRpm"], 18000);
    assert!(bench.supervisor.drive_status().load().running);

    bench
        .supervisor
        .handle_inbound(session, r#"{"type":"vfd","command":"STOP"}"#)
        .await;
    assert!(drive_device.writes().contains(&b"STOP\n".to_vec()));

    drive_device.unplug();
    let offline = parse(&next_message(&mut rx).await);
    assert_eq!(offline["type"], "vfd_status");
    assert_eq!(offline["online"], false);
    assert_eq!(offline["running"], false);
    assert_eq!(offline["setRpm"], 18000);

    bench.supervisor.shutdown().await;
}

#[tokio::test]
async fn test_motion_controller_discovered_without_port() {
    let mut config = fast_config();
    config.motion.port = None;
    let bench = bench(config, false).await;
    assert!(bench.supervisor.motion().is_open());
    assert_eq!(
        bench.supervisor.motion().address().as_deref(),
        Some(MOTION_PORT)
    );

    bench.supervisor.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_links() {
    let bench = bench(fast_config(), true).await;
    bench.supervisor.shutdown().await;

    assert_eq!(bench.supervisor.motion().state(), LinkState::Shutdown);
    assert_eq!(
        bench.supervisor.drive().map(|d| d.state()),
        Some(LinkState::Shutdown)
    );
    let (session, _rx) = bench.supervisor.connect_session().await.unwrap();
    bench
        .supervisor
        .handle_inbound(session, r#"{"type":"gcode","command":"G0 X1"}"#)
        .await;
    assert!(!bench.motion.writes().contains(&b"G0 X1\n".to_vec()));
}
