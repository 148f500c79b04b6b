//! Compute-backed manager.
//!
//! The backend runs on a compute instance that may be powered off. Two
//! independent sources decide the state:
//! - the control plane's power state of the instance
//! - an application-level probe of the game port
//!
//! A powered-on instance says nothing about the server inside it, so a
//! failed probe is disambiguated with the remembered application state:
//!
//! | remembered         | probe fails | probe succeeds |
//! |--------------------|-------------|----------------|
//! | Stopped / Pending  | Pending     | Running        |
//! | Running            | Stopping    | Running        |
//! | Stopping           | Stopping    | Running        |
//! | Obscure            | Obscure     | Running        |
//!
//! All operations on one instance are serialized by a single lock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn, Instrument};

use super::control_plane::{ControlPlane, PowerState};
use super::{connect_timeout, probe, Manager, ManagerError, ManagerState};

/// How long a state observation may be reused by `dial`.
const OBSERVATION_TTL: Duration = Duration::from_secs(5);

/// Lower bound for the boot watcher interval.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Connection parameters for a compute-backed backend.
#[derive(Debug, Clone)]
pub struct ComputeSettings {
    /// Instance identifier at the control plane.
    pub instance_id: String,
    /// Game port on the instance.
    pub port: u16,
    /// Bound for dialing and for each reachability probe.
    pub timeout: Duration,
    /// Interval between boot watcher probes.
    pub poll_interval: Duration,
    /// Also run a status exchange when probing.
    pub validate_status: bool,
}

/// Mutable state guarded by the manager lock.
#[derive(Debug)]
struct Tracked {
    /// Last application-level state worth remembering.
    app_state: ManagerState,
    /// Backend host, known once the control plane reports it.
    address: Option<String>,
    /// Most recent result of a full state evaluation.
    observed: Option<(ManagerState, Instant)>,
    /// Boot watcher of the latest `start` call.
    watcher: Option<JoinHandle<()>>,
}

struct Shared {
    settings: ComputeSettings,
    control_plane: Arc<dyn ControlPlane>,
    tracked: Mutex<Tracked>,
}

/// Manager for a backend on a compute instance that can be powered on demand.
pub struct ComputeManager {
    shared: Arc<Shared>,
}

impl ComputeManager {
    pub fn new(mut settings: ComputeSettings, control_plane: Arc<dyn ControlPlane>) -> Self {
        settings.poll_interval = settings.poll_interval.max(MIN_POLL_INTERVAL);
        Self {
            shared: Arc::new(Shared {
                settings,
                control_plane,
                tracked: Mutex::new(Tracked {
                    app_state: ManagerState::Obscure,
                    address: None,
                    observed: None,
                    watcher: None,
                }),
            }),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.shared.settings.instance_id
    }
}

impl Shared {
    async fn probe(&self, host: &str) -> Result<(), ManagerError> {
        probe(
            host,
            self.settings.port,
            self.settings.timeout,
            self.settings.validate_status,
        )
        .await
    }

    /// Full evaluation: power state first, application probe when powered on.
    async fn observe(&self, tracked: &mut Tracked) -> Result<ManagerState, ManagerError> {
        let description = self
            .control_plane
            .describe_instance(&self.settings.instance_id)
            .await?;

        let state = match description.power {
            PowerState::Pending => ManagerState::Pending,
            PowerState::Running => {
                if let Some(address) = description.public_address {
                    tracked.address = Some(address);
                }
                self.check_application(tracked).await
            }
            PowerState::Stopping => ManagerState::Stopping,
            PowerState::Stopped => ManagerState::Stopped,
            PowerState::Unknown(code) => {
                debug!(
                    instance_id = %self.settings.instance_id,
                    code = code,
                    "Unrecognized power state"
                );
                ManagerState::Obscure
            }
        };

        tracked.observed = Some((state, Instant::now()));
        Ok(state)
    }

    async fn check_application(&self, tracked: &mut Tracked) -> ManagerState {
        let reachable = match tracked.address.as_deref() {
            Some(host) => match self.probe(host).await {
                Ok(()) => true,
                Err(e) => {
                    debug!(
                        instance_id = %self.settings.instance_id,
                        error = %e,
                        "Application probe failed"
                    );
                    false
                }
            },
            None => false,
        };

        if reachable {
            tracked.app_state = ManagerState::Running;
            return ManagerState::Running;
        }

        match tracked.app_state {
            ManagerState::Stopped | ManagerState::Pending => ManagerState::Pending,
            ManagerState::Running => {
                info!(
                    instance_id = %self.settings.instance_id,
                    "Application stopped answering"
                );
                tracked.app_state = ManagerState::Stopping;
                ManagerState::Stopping
            }
            ManagerState::Stopping => ManagerState::Stopping,
            ManagerState::Obscure => ManagerState::Obscure,
        }
    }

    /// Backend host, asking the control plane while it is unknown.
    async fn boot_address(&self) -> Option<String> {
        if let Some(address) = self.tracked.lock().await.address.clone() {
            return Some(address);
        }

        match self
            .control_plane
            .describe_instance(&self.settings.instance_id)
            .await
        {
            Ok(description) if description.power == PowerState::Running => {
                let address = description.public_address?;
                self.tracked.lock().await.address = Some(address.clone());
                Some(address)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(
                    instance_id = %self.settings.instance_id,
                    error = %e,
                    "Failed to describe booting instance"
                );
                None
            }
        }
    }

    /// Poll until the application answers once, then stop for good.
    async fn watch_boot(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempt: u64 = 0;

        loop {
            ticker.tick().await;
            attempt += 1;

            let reachable = match self.boot_address().await {
                Some(host) => self.probe(&host).await.is_ok(),
                None => false,
            };

            let mut tracked = self.tracked.lock().await;
            if matches!(
                tracked.app_state,
                ManagerState::Running | ManagerState::Stopping
            ) {
                // A state poll saw the application while this probe was in flight.
                debug!(attempt = attempt, "Backend already observed running");
                return;
            }
            if reachable {
                tracked.app_state = ManagerState::Running;
                info!(attempt = attempt, "Backend finished booting");
                return;
            }
            tracked.app_state = ManagerState::Pending;
            debug!(attempt = attempt, "Backend not reachable yet");
        }
    }
}

#[async_trait]
impl Manager for ComputeManager {
    async fn start(&self) -> Result<(), ManagerError> {
        let shared = &self.shared;
        let mut tracked = shared.tracked.lock().await;

        shared
            .control_plane
            .start_instance(&shared.settings.instance_id)
            .await?;

        // A fresh boot may come up on a different address.
        tracked.app_state = ManagerState::Stopped;
        tracked.address = None;
        tracked.observed = None;

        if let Some(previous) = tracked.watcher.take() {
            if !previous.is_finished() {
                debug!(
                    instance_id = %shared.settings.instance_id,
                    "Superseding running boot watcher"
                );
                previous.abort();
            }
        }

        let span = tracing::info_span!("boot_watcher", instance_id = %shared.settings.instance_id);
        tracked.watcher = Some(tokio::spawn(
            Arc::clone(shared).watch_boot().instrument(span),
        ));

        info!(instance_id = %shared.settings.instance_id, "Instance power-on requested");
        Ok(())
    }

    async fn state(&self) -> Result<ManagerState, ManagerError> {
        let mut tracked = self.shared.tracked.lock().await;
        self.shared.observe(&mut tracked).await
    }

    async fn dial(&self) -> Result<TcpStream, ManagerError> {
        let host = {
            let mut tracked = self.shared.tracked.lock().await;
            let state = match tracked.observed {
                Some((state, at)) if at.elapsed() < OBSERVATION_TTL => state,
                _ => self.shared.observe(&mut tracked).await?,
            };
            if state != ManagerState::Running {
                return Err(ManagerError::NotRunning(state));
            }
            tracked.address.clone().ok_or(ManagerError::AddressUnknown)?
        };

        connect_timeout(&host, self.shared.settings.port, self.shared.settings.timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::InstanceDescription;
    use mcfwd_packet::{serve_status, Chat, Handshake, StatusResponse};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::net::{TcpListener, TcpSocket};

    /// Scripted control plane.
    struct FakeControlPlane {
        power: std::sync::Mutex<PowerState>,
        address: std::sync::Mutex<Option<String>>,
        fail_start: AtomicBool,
        starts: AtomicUsize,
        describes: AtomicUsize,
    }

    impl FakeControlPlane {
        fn new(power: PowerState) -> Arc<Self> {
            Arc::new(Self {
                power: std::sync::Mutex::new(power),
                address: std::sync::Mutex::new(Some("127.0.0.1".to_string())),
                fail_start: AtomicBool::new(false),
                starts: AtomicUsize::new(0),
                describes: AtomicUsize::new(0),
            })
        }

        fn set_power(&self, power: PowerState) {
            *self.power.lock().unwrap() = power;
        }
    }

    #[async_trait]
    impl ControlPlane for FakeControlPlane {
        async fn describe_instance(
            &self,
            _instance_id: &str,
        ) -> Result<InstanceDescription, ManagerError> {
            self.describes.fetch_add(1, Ordering::SeqCst);
            Ok(InstanceDescription {
                power: *self.power.lock().unwrap(),
                public_address: self.address.lock().unwrap().clone(),
            })
        }

        async fn start_instance(&self, _instance_id: &str) -> Result<(), ManagerError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(ManagerError::ControlPlane("insufficient capacity".into()));
            }
            Ok(())
        }
    }

    /// Game port that accepts and counts connections.
    struct Backend {
        port: u16,
        accepted: Arc<AtomicUsize>,
    }

    async fn live_backend() -> Backend {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            while let Ok((_stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        Backend { port, accepted }
    }

    /// Game port that leaves its first connection hanging and answers
    /// status requests on every later one.
    async fn slow_first_status_backend() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((mut stream, _)) = listener.accept().await {
                if held.is_empty() {
                    held.push(stream);
                    continue;
                }
                tokio::spawn(async move {
                    let handshake = Handshake::read_from(&mut stream).await.unwrap();
                    let response = StatusResponse::placeholder(Chat::text("backend"));
                    serve_status(&mut stream, &handshake, &response).await.unwrap();
                });
            }
        });
        port
    }

    /// Listener whose accept queue is full, so new connects never complete.
    async fn saturated_port() -> (u16, TcpListener, Vec<TcpStream>) {
        let socket = TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = socket.listen(1).unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut queued = Vec::new();
        for _ in 0..64 {
            let connect = TcpStream::connect(("127.0.0.1", port));
            match tokio::time::timeout(Duration::from_millis(100), connect).await {
                Ok(stream) => queued.push(stream.unwrap()),
                Err(_) => return (port, listener, queued),
            }
        }
        panic!("accept queue never filled");
    }

    async fn dead_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn manager(port: u16, control_plane: Arc<FakeControlPlane>) -> ComputeManager {
        ComputeManager::new(
            ComputeSettings {
                instance_id: "i-0abc".to_string(),
                port,
                timeout: Duration::from_millis(500),
                poll_interval: Duration::from_millis(20),
                validate_status: false,
            },
            control_plane,
        )
    }

    async fn remember(manager: &ComputeManager, state: ManagerState) {
        manager.shared.tracked.lock().await.app_state = state;
    }

    async fn remembered(manager: &ComputeManager) -> ManagerState {
        manager.shared.tracked.lock().await.app_state
    }

    #[tokio::test]
    async fn test_booting_instance_is_pending_without_probe() {
        let backend = live_backend().await;
        let control_plane = FakeControlPlane::new(PowerState::Pending);
        let manager = manager(backend.port, control_plane);

        assert_eq!(manager.state().await.unwrap(), ManagerState::Pending);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.accepted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_power_states_map_directly() {
        let control_plane = FakeControlPlane::new(PowerState::Stopped);
        let manager = manager(dead_port().await, Arc::clone(&control_plane));
        assert_eq!(manager.state().await.unwrap(), ManagerState::Stopped);

        control_plane.set_power(PowerState::Stopping);
        assert_eq!(manager.state().await.unwrap(), ManagerState::Stopping);

        control_plane.set_power(PowerState::Unknown(48));
        assert_eq!(manager.state().await.unwrap(), ManagerState::Obscure);
    }

    #[tokio::test]
    async fn test_unreachable_after_stopped_is_pending() {
        let control_plane = FakeControlPlane::new(PowerState::Running);
        let manager = manager(dead_port().await, control_plane);

        for prior in [ManagerState::Stopped, ManagerState::Pending] {
            remember(&manager, prior).await;
            assert_eq!(manager.state().await.unwrap(), ManagerState::Pending);
            assert_eq!(remembered(&manager).await, prior);
        }
    }

    #[tokio::test]
    async fn test_unreachable_after_running_is_stopping() {
        let control_plane = FakeControlPlane::new(PowerState::Running);
        let manager = manager(dead_port().await, control_plane);

        remember(&manager, ManagerState::Running).await;
        assert_eq!(manager.state().await.unwrap(), ManagerState::Stopping);
        assert_eq!(remembered(&manager).await, ManagerState::Stopping);

        // Stays put on further failures.
        assert_eq!(manager.state().await.unwrap(), ManagerState::Stopping);
    }

    #[tokio::test]
    async fn test_unreachable_with_nothing_remembered_is_obscure() {
        let control_plane = FakeControlPlane::new(PowerState::Running);
        let manager = manager(dead_port().await, control_plane);

        assert_eq!(manager.state().await.unwrap(), ManagerState::Obscure);
    }

    #[tokio::test]
    async fn test_reachable_is_running_regardless_of_memory() {
        let backend = live_backend().await;
        let control_plane = FakeControlPlane::new(PowerState::Running);
        let manager = manager(backend.port, control_plane);

        for prior in [
            ManagerState::Obscure,
            ManagerState::Stopped,
            ManagerState::Pending,
            ManagerState::Running,
            ManagerState::Stopping,
        ] {
            remember(&manager, prior).await;
            assert_eq!(manager.state().await.unwrap(), ManagerState::Running);
            assert_eq!(remembered(&manager).await, ManagerState::Running);
        }
    }

    #[tokio::test]
    async fn test_start_watches_until_reachable() {
        let backend = live_backend().await;
        let control_plane = FakeControlPlane::new(PowerState::Running);
        let manager = manager(backend.port, Arc::clone(&control_plane));

        manager.start().await.unwrap();
        assert_eq!(control_plane.starts.load(Ordering::SeqCst), 1);

        let deadline = Instant::now() + Duration::from_secs(2);
        while remembered(&manager).await != ManagerState::Running {
            assert!(Instant::now() < deadline, "watcher never saw the backend");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // The watcher returns right after recording Running.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let tracked = manager.shared.tracked.lock().await;
        assert!(tracked.watcher.as_ref().unwrap().is_finished());
    }

    #[tokio::test]
    async fn test_watcher_marks_pending_while_booting() {
        let control_plane = FakeControlPlane::new(PowerState::Pending);
        let manager = manager(dead_port().await, Arc::clone(&control_plane));

        manager.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(remembered(&manager).await, ManagerState::Pending);

        // Instance powers on but the server is still loading.
        control_plane.set_power(PowerState::Running);
        assert_eq!(manager.state().await.unwrap(), ManagerState::Pending);
    }

    #[tokio::test]
    async fn test_failed_power_on_leaves_state_alone() {
        let control_plane = FakeControlPlane::new(PowerState::Stopped);
        control_plane.fail_start.store(true, Ordering::SeqCst);
        let manager = manager(dead_port().await, Arc::clone(&control_plane));
        remember(&manager, ManagerState::Stopping).await;

        assert!(matches!(
            manager.start().await,
            Err(ManagerError::ControlPlane(_))
        ));
        assert_eq!(remembered(&manager).await, ManagerState::Stopping);
        assert!(manager.shared.tracked.lock().await.watcher.is_none());
    }

    #[tokio::test]
    async fn test_second_start_supersedes_watcher() {
        let control_plane = FakeControlPlane::new(PowerState::Pending);
        let manager = manager(dead_port().await, Arc::clone(&control_plane));

        manager.start().await.unwrap();
        let first = manager
            .shared
            .tracked
            .lock()
            .await
            .watcher
            .as_ref()
            .unwrap()
            .abort_handle();

        manager.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(control_plane.starts.load(Ordering::SeqCst), 2);
        assert!(first.is_finished());
        assert!(!manager
            .shared
            .tracked
            .lock()
            .await
            .watcher
            .as_ref()
            .unwrap()
            .is_finished());
    }

    #[tokio::test]
    async fn test_dial_requires_running() {
        let control_plane = FakeControlPlane::new(PowerState::Stopped);
        let manager = manager(dead_port().await, control_plane);

        assert!(matches!(
            manager.dial().await,
            Err(ManagerError::NotRunning(ManagerState::Stopped))
        ));
    }

    #[tokio::test]
    async fn test_dial_reuses_fresh_observation() {
        let backend = live_backend().await;
        let control_plane = FakeControlPlane::new(PowerState::Running);
        let manager = manager(backend.port, Arc::clone(&control_plane));

        assert_eq!(manager.state().await.unwrap(), ManagerState::Running);
        let stream = manager.dial().await.unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), backend.port);

        assert_eq!(control_plane.describes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_watcher_keeps_running_seen_during_its_probe() {
        let port = slow_first_status_backend().await;
        let control_plane = FakeControlPlane::new(PowerState::Running);
        let manager = ComputeManager::new(
            ComputeSettings {
                instance_id: "i-0abc".to_string(),
                port,
                timeout: Duration::from_millis(300),
                poll_interval: Duration::from_secs(10),
                validate_status: true,
            },
            control_plane,
        );

        manager.start().await.unwrap();
        // Let the watcher's first probe reach the hanging connection.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.state().await.unwrap(), ManagerState::Running);

        // The watcher's probe times out afterwards and must not downgrade.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(remembered(&manager).await, ManagerState::Running);
        let tracked = manager.shared.tracked.lock().await;
        assert!(tracked.watcher.as_ref().unwrap().is_finished());
    }

    #[tokio::test]
    async fn test_zero_poll_interval_is_clamped() {
        let backend = live_backend().await;
        let control_plane = FakeControlPlane::new(PowerState::Running);
        let manager = ComputeManager::new(
            ComputeSettings {
                instance_id: "i-0abc".to_string(),
                port: backend.port,
                timeout: Duration::from_millis(500),
                poll_interval: Duration::ZERO,
                validate_status: false,
            },
            control_plane,
        );
        assert_eq!(manager.shared.settings.poll_interval, MIN_POLL_INTERVAL);

        manager.start().await.unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while remembered(&manager).await != ManagerState::Running {
            assert!(Instant::now() < deadline, "watcher never saw the backend");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_dial_times_out_on_stalled_connect() {
        let (port, _listener, _queued) = saturated_port().await;
        let control_plane = FakeControlPlane::new(PowerState::Running);
        let manager = ComputeManager::new(
            ComputeSettings {
                instance_id: "i-0abc".to_string(),
                port,
                timeout: Duration::from_millis(200),
                poll_interval: Duration::from_millis(20),
                validate_status: false,
            },
            control_plane,
        );
        {
            let mut tracked = manager.shared.tracked.lock().await;
            tracked.address = Some("127.0.0.1".to_string());
            tracked.observed = Some((ManagerState::Running, Instant::now()));
        }

        let err = manager.dial().await.unwrap_err();
        assert!(err.is_timeout(), "unexpected error: {err}");
        assert!(matches!(err, ManagerError::DialTimeout { .. }));
    }
}
