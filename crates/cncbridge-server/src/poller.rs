//! Periodic status requests
//!
//! The motion controller is asked for a status report only while someone
//! is watching. The drive controller is polled whenever its link is open,
//! so the drive snapshot stays current for sessions that join later.
//! Responses are not correlated with requests.

use crate::registry::ClientRegistry;
use cncbridge_communication::firmware::{drive::STATUS_REQUEST, grbl::STATUS_QUERY};
use cncbridge_communication::Link;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Interval whose first tick is one period out
fn ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Periodic status poller for both links
#[derive(Debug, Clone)]
pub struct StatusPoller {
    motion: Arc<Link>,
    drive: Option<Arc<Link>>,
    registry: Arc<ClientRegistry>,
    motion_interval: Duration,
    drive_interval: Duration,
}

impl StatusPoller {
    /// Create a poller
    pub fn new(
        motion: Arc<Link>,
        drive: Option<Arc<Link>>,
        registry: Arc<ClientRegistry>,
        motion_interval: Duration,
        drive_interval: Duration,
    ) -> Self {
        Self {
            motion,
            drive,
            registry,
            motion_interval,
            drive_interval,
        }
    }

    /// Start the polling tasks
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        let motion = Arc::clone(&self.motion);
        let registry = Arc::clone(&self.registry);
        let period = self.motion_interval;
        tasks.push(tokio::spawn(async move {
            let mut ticker = ticker(period);
            loop {
                ticker.tick().await;
                if registry.is_empty() || !motion.is_open() {
                    continue;
                }
                if let Err(e) = motion.write(&[STATUS_QUERY]).await {
                    tracing::debug!("Motion status poll skipped: {}", e);
                }
            }
        }));

        if let Some(drive) = &self.drive {
            let drive = Arc::clone(drive);
            let period = self.drive_interval;
            tasks.push(tokio::spawn(async move {
                let mut ticker = ticker(period);
                loop {
                    ticker.tick().await;
                    if !drive.is_open() {
                        continue;
                    }
                    if let Err(e) = drive.write(STATUS_REQUEST).await {
                        tracing::debug!("Drive status poll skipped: {}", e);
                    }
                }
            }));
        }

        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SessionHandle;
    use cncbridge_communication::{LinkConfig, MockConnector, MockDevice};
    use cncbridge_core::LinkRole;
    use tokio::sync::mpsc;

    async fn open_link(role: LinkRole, device: &MockDevice) -> Arc<Link> {
        let connector = Arc::new(MockConnector::new());
        connector.attach("port", role, device.clone());
        let config = LinkConfig {
            settle: Duration::ZERO,
            post_handshake_drain: None,
            ..LinkConfig::for_role(role)
        };
        let link = Link::new(role, config, connector);
        link.open("port").await.unwrap();
        device.clear_writes();
        link
    }

    #[tokio::test]
    async fn test_motion_poll_waits_for_sessions() {
        let device = MockDevice::new();
        let motion = open_link(LinkRole::Motion, &device).await;
        let registry = Arc::new(ClientRegistry::new(2));
        let poller = StatusPoller::new(
            Arc::clone(&motion),
            None,
            Arc::clone(&registry),
            Duration::from_millis(5),
            Duration::from_millis(5),
        );
        let tasks = poller.spawn();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(device.writes().is_empty());

        let (tx, _rx) = mpsc::channel(64);
        registry.register(SessionHandle::new(tx)).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let writes = device.writes();
        assert!(!writes.is_empty());
        assert!(writes.iter().all(|w| w == &vec![b'?']));

        for task in tasks {
            task.abort();
        }
        motion.close().await;
    }

    #[tokio::test]
    async fn test_drive_poll_runs_without_sessions() {
        let motion_device = MockDevice::new();
        let drive_device = MockDevice::new();
        let motion = open_link(LinkRole::Motion, &motion_device).await;
        let drive = open_link(LinkRole::Drive, &drive_device).await;
        let poller = StatusPoller::new(
            Arc::clone(&motion),
            Some(Arc::clone(&drive)),
            Arc::new(ClientRegistry::new(2)),
            Duration::from_millis(5),
            Duration::from_millis(5),
        );
        let tasks = poller.spawn();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(motion_device.writes().is_empty());
        let writes = drive_device.writes();
        assert!(!writes.is_empty());
        assert!(writes.iter().all(|w| w.as_slice() == b"STATUS\n"));

        for task in tasks {
            task.abort();
        }
        drive.close().await;
        motion.close().await;
    }
}
