#![allow(dead_code)]

use cncbridge_communication::{MockConnector, MockDevice};
use cncbridge_core::LinkRole;
use cncbridge_server::BridgeSupervisor;
use cncbridge_settings::BridgeConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const MOTION_PORT: &str = "/dev/ttyACM0";
pub const DRIVE_PORT: &str = "/dev/ttyUSB0";
pub const WAIT: Duration = Duration::from_secs(5);

pub struct Bench {
    pub supervisor: Arc<BridgeSupervisor>,
    pub motion: MockDevice,
    pub drive: Option<MockDevice>,
}

/// Configuration with millisecond timings and no real ports
pub fn fast_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.server.bind = "127.0.0.1".to_string();
    config.server.port = 0;
    for link in [&mut config.motion, &mut config.drive] {
        link.settle_ms = Some(0);
        link.drain_delay_ms = Some(0);
        link.read_timeout_ms = 5;
    }
    config.polling.motion_interval_ms = 60_000;
    config.polling.drive_interval_ms = 60_000;
    config.reconnect.unit_ms = 1;
    config
}

pub async fn bench(config: BridgeConfig, with_drive: bool) -> Bench {
    let motion = MockDevice::new();
    let connector = Arc::new(MockConnector::new());
    connector.attach(MOTION_PORT, LinkRole::Motion, motion.clone());

    let drive = with_drive.then(MockDevice::new);
    if let Some(drive) = &drive {
        connector.attach(DRIVE_PORT, LinkRole::Drive, drive.clone());
    }

    let supervisor = BridgeSupervisor::start(config, connector).await;
    Bench {
        supervisor,
        motion,
        drive,
    }
}

/// Next queued message for a session, failing the test after [`WAIT`]
pub async fn next_message(rx: &mut mpsc::Receiver<String>) -> String {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a session message")
        .expect("session queue closed")
}

pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}
