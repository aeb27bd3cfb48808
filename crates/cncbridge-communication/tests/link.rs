use cncbridge_communication::{BackoffConfig, Link, LinkConfig, MockConnector, MockDevice};
use cncbridge_core::{LinkError, LinkRole, LinkState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn quick_config(role: LinkRole) -> LinkConfig {
    LinkConfig {
        settle: Duration::ZERO,
        post_handshake_drain: Some(Duration::from_millis(1)),
        backoff: BackoffConfig {
            unit: Duration::from_millis(1),
            ..BackoffConfig::default()
        },
        ..LinkConfig::for_role(role)
    }
}

fn motion_fixture() -> (Arc<Link>, MockDevice) {
    let device = MockDevice::new();
    let connector = Arc::new(MockConnector::new());
    connector.attach("/dev/ttyACM0", LinkRole::Motion, device.clone());
    let link = Link::new(LinkRole::Motion, quick_config(LinkRole::Motion), connector);
    (link, device)
}

async fn wait_for_open(link: &Link) {
    timeout(WAIT, async {
        while !link.is_open() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("link did not reopen");
}

async fn next_reconnecting(states: &mut broadcast::Receiver<LinkState>) -> (u32, Duration) {
    timeout(WAIT, async {
        loop {
            match states.recv().await {
                Ok(LinkState::Reconnecting { attempt, delay }) => return (attempt, delay),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("state channel closed"),
            }
        }
    })
    .await
    .expect("link never started reconnecting")
}

#[tokio::test]
async fn test_stale_input_is_drained_on_open() {
    let (link, device) = motion_fixture();
    device.push_input(b"Grbl 1.1f ['$' for help]\n<Idle|MPos:0,0,0>\n");

    let mut lines = link.lines();
    link.open("/dev/ttyACM0").await.unwrap();
    assert!(device.drain_count() >= 2);

    device.push_input(b"ok\n");
    let line = timeout(WAIT, lines.next()).await.unwrap();
    assert_eq!(line.as_deref(), Some("ok"));

    link.close().await;
}

#[tokio::test]
async fn test_partial_lines_are_joined() {
    let (link, device) = motion_fixture();
    let mut lines = link.lines();
    link.open("/dev/ttyACM0").await.unwrap();

    device.push_input(b"<Run|MPos:1.0");
    tokio::time::sleep(Duration::from_millis(20)).await;
    device.push_input(b"00,2.000,0.000>\r\nok\n");

    let first = timeout(WAIT, lines.next()).await.unwrap();
    let second = timeout(WAIT, lines.next()).await.unwrap();
    assert_eq!(first.as_deref(), Some("<Run|MPos:1.000,2.000,0.000>"));
    assert_eq!(second.as_deref(), Some("ok"));

    link.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writes_never_interleave() {
    let (link, device) = motion_fixture();
    link.open("/dev/ttyACM0").await.unwrap();
    device.clear_writes();

    let mut tasks = Vec::new();
    for writer in 0..16 {
        let link = Arc::clone(&link);
        tasks.push(tokio::spawn(async move {
            for n in 0..40 {
                let frame = format!("G1 X{} Y{} F{}\n", writer, n, writer * 1000 + n);
                link.write(frame.as_bytes()).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let writes = device.writes();
    assert_eq!(writes.len(), 16 * 40);
    for frame in &writes {
        assert!(frame.starts_with(b"G1 X"));
        assert_eq!(frame.iter().filter(|b| **b == b'\n').count(), 1);
        assert_eq!(frame.last(), Some(&b'\n'));
    }
    assert_eq!(device.written_bytes(), writes.concat());

    link.close().await;
}

#[tokio::test]
async fn test_reconnects_after_device_loss() {
    let (link, device) = motion_fixture();
    let mut states = link.subscribe_state();
    link.spawn_recovery();
    link.open("/dev/ttyACM0").await.unwrap();

    device.unplug();
    let degraded = timeout(WAIT, async {
        loop {
            if let Ok(LinkState::Degraded { .. }) = states.recv().await {
                break;
            }
        }
    })
    .await;
    assert!(degraded.is_ok());
    assert!(matches!(
        link.write(b"?").await,
        Err(LinkError::NotConnected { .. })
    ));

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!link.is_open());
    device.plug_in();
    wait_for_open(&link).await;

    assert_eq!(device.open_count(), 2);
    assert!(link.last_error().is_none());
    device.clear_writes();
    link.write(b"G0 X0\n").await.unwrap();
    assert_eq!(device.writes(), vec![b"G0 X0\n".to_vec()]);

    link.close().await;
    assert_eq!(link.state(), LinkState::Shutdown);
}

#[tokio::test]
async fn test_recovery_opens_a_link_that_never_opened() {
    let device = MockDevice::new();
    device.unplug();
    let connector = Arc::new(MockConnector::new());
    connector.attach("COM5", LinkRole::Drive, device.clone());
    let link = Link::new(LinkRole::Drive, quick_config(LinkRole::Drive), connector);

    assert!(link.open("COM5").await.is_err());
    link.spawn_recovery();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!link.is_open());

    device.plug_in();
    wait_for_open(&link).await;
    assert!(device.writes().contains(&b"STATUS\n".to_vec()));

    link.close().await;
}

#[tokio::test]
async fn test_rediscovery_skips_excluded_addresses() {
    let motion = MockDevice::new();
    let drive = MockDevice::new();
    let connector = Arc::new(MockConnector::new());
    connector.attach("/dev/ttyUSB0", LinkRole::Drive, motion.clone());
    connector.attach("/dev/ttyUSB1", LinkRole::Drive, drive.clone());

    let link = Link::new(LinkRole::Drive, quick_config(LinkRole::Drive), connector);
    link.exclude_address("/dev/ttyUSB0");
    link.spawn_recovery();
    wait_for_open(&link).await;

    assert_eq!(link.address().as_deref(), Some("/dev/ttyUSB1"));
    assert_eq!(motion.open_count(), 0);

    link.close().await;
}

#[tokio::test]
async fn test_stalled_write_keeps_link_open() {
    let (link, device) = motion_fixture();
    link.spawn_recovery();
    link.open("/dev/ttyACM0").await.unwrap();
    device.clear_writes();

    device.stall_writes(true);
    assert!(matches!(
        link.write(b"G1 X10 F500\n").await,
        Err(LinkError::Transport { .. })
    ));
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(link.is_open());
    assert_eq!(device.open_count(), 1);
    assert!(!device.written_bytes().contains(&0x18));

    device.stall_writes(false);
    link.write(b"G1 X10 F500\n").await.unwrap();
    assert_eq!(device.writes(), vec![b"G1 X10 F500\n".to_vec()]);

    link.close().await;
}

#[tokio::test]
async fn test_backoff_restarts_after_recovery() {
    let (link, device) = motion_fixture();
    let mut states = link.subscribe_state();
    link.spawn_recovery();
    link.open("/dev/ttyACM0").await.unwrap();

    device.unplug();
    assert_eq!(next_reconnecting(&mut states).await, (1, Duration::from_millis(2)));
    loop {
        let (attempt, _) = next_reconnecting(&mut states).await;
        if attempt >= 3 {
            break;
        }
    }
    device.plug_in();
    wait_for_open(&link).await;

    let mut states = link.subscribe_state();
    device.unplug();
    assert_eq!(next_reconnecting(&mut states).await, (1, Duration::from_millis(2)));
    assert_eq!(next_reconnecting(&mut states).await, (2, Duration::from_millis(4)));

    device.plug_in();
    wait_for_open(&link).await;
    link.close().await;
}
