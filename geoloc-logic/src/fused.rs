use std::{fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::DropGuard;
use uuid::Uuid;

use crate::{
    client::{
        LocationClient, PositionCallback, RequestCode, ResolutionHost, ResolutionOutcome,
        spawn_pump,
    },
    diagnostics::{DiagnosticLog, DiagnosticProbe, PROBE_INTERVAL},
    error::ErrorCode,
    location::{Location, SatelliteSource},
    options::{LocationOptions, Priority},
    prelude::*,
};

const TAG: &str = "FusedLocationClient";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
/// Subscription request handed to the fused backend
pub struct FusedRequest {
    pub priority: Priority,
    pub interval: Duration,
    pub fastest_interval: Duration,
    /// Meters
    pub smallest_displacement: f32,
}

impl FusedRequest {
    pub fn from_options(options: &LocationOptions) -> Self {
        let interval = options.interval();
        Self {
            priority: options.accuracy.fused_priority(),
            interval,
            fastest_interval: interval / 2,
            smallest_displacement: options.distance_filter,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SettingsStates {
    pub gps_usable: bool,
    pub network_usable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Why the device settings can't satisfy a request
pub enum SettingsFailure {
    /// The user could fix this through a resolution prompt
    ResolutionRequired,
    /// The settings can't be changed on this device, updates may still work
    ChangeUnavailable,
    Failed(String),
}

impl fmt::Display for SettingsFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResolutionRequired => f.write_str("resolution required"),
            Self::ChangeUnavailable => f.write_str("settings change unavailable"),
            Self::Failed(why) => write!(f, "settings check failed: {why}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Pushed from the fused backend to a registered listener
pub enum FusedEvent {
    /// A batch of fixes, the last one is the backend's best
    Result(Vec<Location>),
    /// Whether the backend can currently produce fixes at all
    Availability(bool),
}

/// A push-based backend that does its own best-fix selection
pub trait FusedBackend: Send + Sync + 'static {
    /// Check the device settings against `request`, [None] checks that location is usable
    /// at all
    fn check_location_settings(
        &self,
        request: Option<&FusedRequest>,
    ) -> impl Future<Output = Result<SettingsStates, SettingsFailure>> + Send;

    fn request_location_updates(
        &self,
        listener: Uuid,
        request: &FusedRequest,
        events: mpsc::UnboundedSender<FusedEvent>,
    ) -> Result;

    /// Unregister `listener`, does nothing if it isn't registered
    fn remove_location_updates(&self, listener: Uuid);

    fn last_location(&self) -> impl Future<Output = Result<Option<Location>>> + Send;

    fn location_availability(&self) -> impl Future<Output = Result<bool>> + Send;

    /// Whether location is switched on for the whole device
    fn is_location_service_enabled(&self) -> bool;
}

#[derive(Default)]
struct FusedSession {
    callback: Option<Arc<dyn PositionCallback>>,
    probe: Option<DiagnosticProbe>,
    pump: Option<DropGuard>,
}

struct FusedShared<B: FusedBackend> {
    id: Uuid,
    request_code: RequestCode,
    backend: Arc<B>,
    satellites: Arc<dyn SatelliteSource>,
    options: LocationOptions,
    log: DiagnosticLog,
    session: Mutex<FusedSession>,
}

/// Client for a [FusedBackend], fixes are forwarded as the backend pushes them
pub struct FusedLocationClient<B: FusedBackend> {
    shared: Arc<FusedShared<B>>,
}

impl<B: FusedBackend> FusedLocationClient<B> {
    pub fn new(
        backend: Arc<B>,
        satellites: Arc<dyn SatelliteSource>,
        options: LocationOptions,
        log: DiagnosticLog,
    ) -> Self {
        Self {
            shared: Arc::new(FusedShared {
                id: Uuid::new_v4(),
                request_code: RequestCode::generate(),
                backend,
                satellites,
                options,
                log,
                session: Mutex::new(FusedSession::default()),
            }),
        }
    }

    pub fn request_code(&self) -> RequestCode {
        self.shared.request_code
    }

    pub fn options(&self) -> &LocationOptions {
        &self.shared.options
    }
}

impl<B: FusedBackend> FusedShared<B> {
    fn log(&self, message: impl AsRef<str>) {
        self.log.log(TAG, message);
    }

    fn spawn_probe(&self) -> DiagnosticProbe {
        let backend = self.backend.clone();
        let log = self.log.clone();
        DiagnosticProbe::spawn(PROBE_INTERVAL, move || {
            let backend = backend.clone();
            let log = log.clone();
            async move {
                log.log(TAG, "Checking backend state");
                match backend.location_availability().await {
                    Ok(available) => log.log(TAG, format!("Availability: {available}")),
                    Err(why) => log.log(TAG, format!("Availability check failed: {why:?}")),
                }
                if let Ok(Some(last)) = backend.last_location().await {
                    log.log(TAG, format!("Last location: {}", last.describe()));
                }
            }
        })
    }

    fn request_updates(self: &Arc<Self>, session: &mut FusedSession, request: &FusedRequest) {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Err(why) = self.backend.request_location_updates(self.id, request, tx) {
            self.log(format!("Failed to request location updates: {why:?}"));
            if let Some(callback) = &session.callback {
                callback.on_error(ErrorCode::ErrorWhileAcquiringPosition);
            }
            return;
        }

        self.satellites.start();

        session.pump = Some(spawn_pump(self, rx, |shared, event| async move {
            shared.handle_event(event).await;
        }));
    }

    async fn handle_event(&self, event: FusedEvent) {
        let mut session = self.session.lock().await;
        match event {
            FusedEvent::Result(locations) => {
                let callback = session.callback.clone();
                match (callback, locations.into_iter().last()) {
                    (Some(callback), Some(location)) => {
                        callback.on_position(location.enriched(self.satellites.as_ref()));
                        self.log("Position delivered");
                    }
                    (callback, _) => {
                        self.log("Received an empty result or no callback is registered");
                        self.backend.remove_location_updates(self.id);
                        session.pump = None;
                        if let Some(callback) = callback {
                            callback.on_error(ErrorCode::ErrorWhileAcquiringPosition);
                        }
                    }
                }
            }
            FusedEvent::Availability(available) => {
                if !available && !self.backend.is_location_service_enabled() {
                    if let Some(callback) = &session.callback {
                        callback.on_error(ErrorCode::LocationServicesDisabled);
                    }
                }
            }
        }
    }
}

impl<B: FusedBackend> LocationClient for FusedLocationClient<B> {
    fn id(&self) -> Uuid {
        self.shared.id
    }

    async fn is_location_service_enabled(&self) -> Result<bool, ErrorCode> {
        match self.shared.backend.check_location_settings(None).await {
            Ok(states) => Ok(states.gps_usable || states.network_usable),
            Err(why) => {
                self.shared.log(format!("Settings check failed: {why}"));
                Err(ErrorCode::LocationServicesDisabled)
            }
        }
    }

    async fn get_last_known_position(&self) -> Result<Option<Location>, ErrorCode> {
        self.shared.backend.last_location().await.map_err(|why| {
            self.shared
                .log(format!("Error getting the last known location: {why:?}"));
            ErrorCode::ErrorWhileAcquiringPosition
        })
    }

    async fn start_position_updates(
        &self,
        host: Option<Arc<dyn ResolutionHost>>,
        callback: Arc<dyn PositionCallback>,
    ) {
        let shared = &self.shared;
        let mut session = shared.session.lock().await;

        session.probe = Some(shared.spawn_probe());
        session.callback = Some(callback.clone());

        let request = FusedRequest::from_options(&shared.options);

        match shared.backend.check_location_settings(Some(&request)).await {
            Ok(_) => shared.request_updates(&mut session, &request),
            Err(failure) => {
                shared.log(format!("Location settings not satisfied: {failure}"));
                match failure {
                    SettingsFailure::ResolutionRequired => match host {
                        Some(host) => {
                            if let Err(why) = host.start_resolution(shared.request_code) {
                                shared.log(format!("Couldn't start resolution: {why:?}"));
                                callback.on_error(ErrorCode::LocationServicesDisabled);
                            }
                        }
                        None => callback.on_error(ErrorCode::LocationServicesDisabled),
                    },
                    SettingsFailure::ChangeUnavailable => {
                        shared.request_updates(&mut session, &request)
                    }
                    SettingsFailure::Failed(_) => {
                        callback.on_error(ErrorCode::LocationServicesDisabled)
                    }
                }
            }
        }
    }

    async fn stop_position_updates(&self) {
        let shared = &self.shared;
        let mut session = shared.session.lock().await;
        if let Some(probe) = session.probe.take() {
            probe.cancel();
        }
        shared.satellites.stop();
        shared.backend.remove_location_updates(shared.id);
        *session = FusedSession::default();
    }

    async fn on_resolution_result(
        &self,
        request_code: RequestCode,
        outcome: ResolutionOutcome,
    ) -> bool {
        let shared = &self.shared;
        if request_code != shared.request_code {
            return false;
        }

        let mut session = shared.session.lock().await;
        let Some(callback) = session.callback.clone() else {
            return false;
        };

        match outcome {
            ResolutionOutcome::Resolved if session.pump.is_some() => {
                shared.log("Already receiving updates, ignoring repeated resolution");
            }
            ResolutionOutcome::Resolved => {
                let request = FusedRequest::from_options(&shared.options);
                shared.request_updates(&mut session, &request);
            }
            ResolutionOutcome::Declined => {
                shared.log("User declined to resolve the location settings");
                callback.on_error(ErrorCode::LocationServicesDisabled);
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        options::LocationAccuracy,
        tests::{
            Delivery, MockFusedBackend, MockHost, MockSatellites, RecordingCallback, loc, settle,
        },
    };
    use tokio::test;

    fn mk_client(
        backend: &Arc<MockFusedBackend>,
        options: LocationOptions,
    ) -> FusedLocationClient<MockFusedBackend> {
        FusedLocationClient::new(
            backend.clone(),
            Arc::new(MockSatellites::default()),
            options,
            DiagnosticLog::default(),
        )
    }

    #[test]
    async fn test_request_from_options() {
        let options = LocationOptions {
            accuracy: LocationAccuracy::Low,
            time_interval: 10_000,
            distance_filter: 25.0,
            force_polling: false,
        };
        let req = FusedRequest::from_options(&options);
        assert_eq!(req.priority, Priority::LowPower);
        assert_eq!(req.interval, Duration::from_secs(10));
        assert_eq!(req.fastest_interval, Duration::from_secs(5));
        assert_eq!(req.smallest_displacement, 25.0);
    }

    #[test]
    async fn test_forwards_without_arbitration() {
        let backend = Arc::new(MockFusedBackend::default());
        let client = mk_client(&backend, LocationOptions::default());
        let (callback, record) = RecordingCallback::new();

        client.start_position_updates(None, callback).await;
        assert_eq!(backend.listener_count(), 1);

        let first = loc(1000, 5.0, "fused");
        // Much worse and older, the polling arbiter would reject this
        let second = loc(500, 900.0, "fused");

        backend.emit(FusedEvent::Result(vec![first.clone()]));
        backend.emit(FusedEvent::Result(vec![loc(0, 1.0, "fused"), second.clone()]));
        settle().await;

        let positions = record.positions();
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].timestamp(), first.timestamp());
        assert_eq!(positions[1].timestamp(), second.timestamp());
        assert!(
            positions.iter().all(|p| p.satellites().is_some()),
            "Positions weren't enriched"
        );
    }

    #[test]
    async fn test_empty_result_is_error() {
        let backend = Arc::new(MockFusedBackend::default());
        let client = mk_client(&backend, LocationOptions::default());
        let (callback, record) = RecordingCallback::new();

        client.start_position_updates(None, callback).await;
        backend.emit(FusedEvent::Result(vec![]));
        settle().await;

        assert_eq!(
            record.all(),
            vec![Delivery::Error(ErrorCode::ErrorWhileAcquiringPosition)]
        );
        assert_eq!(backend.listener_count(), 0, "Updates weren't removed");
    }

    #[test]
    async fn test_availability_loss() {
        let backend = Arc::new(MockFusedBackend::default());
        let client = mk_client(&backend, LocationOptions::default());
        let (callback, record) = RecordingCallback::new();

        client.start_position_updates(None, callback).await;

        // Service still on, nothing to report
        backend.emit(FusedEvent::Availability(false));
        settle().await;
        assert!(record.all().is_empty());

        backend.set_service_enabled(false);
        backend.emit(FusedEvent::Availability(true));
        settle().await;
        assert!(record.all().is_empty());

        backend.emit(FusedEvent::Availability(false));
        settle().await;
        assert_eq!(
            record.all(),
            vec![Delivery::Error(ErrorCode::LocationServicesDisabled)]
        );
        assert_eq!(backend.listener_count(), 1, "Errors must not stop updates");
    }

    #[test]
    async fn test_resolution_without_host() {
        let backend = Arc::new(MockFusedBackend::default());
        backend.set_settings(Err(SettingsFailure::ResolutionRequired));
        let client = mk_client(&backend, LocationOptions::default());
        let (callback, record) = RecordingCallback::new();

        client.start_position_updates(None, callback).await;

        assert_eq!(
            record.all(),
            vec![Delivery::Error(ErrorCode::LocationServicesDisabled)]
        );
        assert_eq!(backend.listener_count(), 0);
    }

    #[test]
    async fn test_resolution_accepted() {
        let backend = Arc::new(MockFusedBackend::default());
        backend.set_settings(Err(SettingsFailure::ResolutionRequired));
        let client = mk_client(&backend, LocationOptions::default());
        let host = Arc::new(MockHost::default());
        let (callback, record) = RecordingCallback::new();

        client
            .start_position_updates(Some(host.clone()), callback)
            .await;

        assert_eq!(host.requested(), vec![client.request_code()]);
        assert_eq!(backend.listener_count(), 0, "Requested before resolving");

        let other = RequestCode(client.request_code().0.wrapping_add(1) % (1 << 16));
        assert!(
            !client
                .on_resolution_result(other, ResolutionOutcome::Resolved)
                .await,
            "Claimed someone else's request code"
        );

        assert!(
            client
                .on_resolution_result(client.request_code(), ResolutionOutcome::Resolved)
                .await
        );
        assert_eq!(backend.listener_count(), 1);

        backend.emit(FusedEvent::Result(vec![loc(1, 3.0, "fused")]));
        settle().await;
        assert_eq!(record.positions().len(), 1);
        assert!(record.errors().is_empty());
    }

    #[test]
    async fn test_repeated_resolution_keeps_listener() {
        let backend = Arc::new(MockFusedBackend::default());
        backend.set_settings(Err(SettingsFailure::ResolutionRequired));
        let client = mk_client(&backend, LocationOptions::default());
        let host = Arc::new(MockHost::default());
        let (callback, record) = RecordingCallback::new();

        client.start_position_updates(Some(host), callback).await;
        for _ in 0..2 {
            assert!(
                client
                    .on_resolution_result(client.request_code(), ResolutionOutcome::Resolved)
                    .await
            );
        }

        assert_eq!(backend.registrations(), 1, "Re-registered while streaming");

        backend.emit(FusedEvent::Result(vec![loc(1, 3.0, "fused")]));
        settle().await;
        assert_eq!(record.positions().len(), 1);
    }

    #[test]
    async fn test_registration_failure_leaves_satellites_off() {
        let backend = Arc::new(MockFusedBackend::default());
        backend.fail_requests();
        let satellites = Arc::new(MockSatellites::default());
        let client = FusedLocationClient::new(
            backend.clone(),
            satellites.clone(),
            LocationOptions::default(),
            DiagnosticLog::default(),
        );
        let (callback, record) = RecordingCallback::new();

        client.start_position_updates(None, callback).await;

        assert_eq!(
            record.errors(),
            vec![ErrorCode::ErrorWhileAcquiringPosition]
        );
        assert!(!satellites.is_running(), "Satellites left running");
        assert_eq!(backend.listener_count(), 0);
    }

    #[test]
    async fn test_resolution_declined() {
        let backend = Arc::new(MockFusedBackend::default());
        backend.set_settings(Err(SettingsFailure::ResolutionRequired));
        let client = mk_client(&backend, LocationOptions::default());
        let host = Arc::new(MockHost::default());
        let (callback, record) = RecordingCallback::new();

        client.start_position_updates(Some(host), callback).await;
        assert!(
            client
                .on_resolution_result(client.request_code(), ResolutionOutcome::Declined)
                .await
        );

        assert_eq!(
            record.all(),
            vec![Delivery::Error(ErrorCode::LocationServicesDisabled)]
        );
        assert_eq!(backend.listener_count(), 0);
    }

    #[test]
    async fn test_host_failure() {
        let backend = Arc::new(MockFusedBackend::default());
        backend.set_settings(Err(SettingsFailure::ResolutionRequired));
        let client = mk_client(&backend, LocationOptions::default());
        let host = Arc::new(MockHost::failing());
        let (callback, record) = RecordingCallback::new();

        client.start_position_updates(Some(host), callback).await;
        assert_eq!(
            record.errors(),
            vec![ErrorCode::LocationServicesDisabled]
        );
    }

    #[test]
    async fn test_settings_change_unavailable_still_requests() {
        let backend = Arc::new(MockFusedBackend::default());
        backend.set_settings(Err(SettingsFailure::ChangeUnavailable));
        let client = mk_client(&backend, LocationOptions::default());
        let (callback, record) = RecordingCallback::new();

        client.start_position_updates(None, callback).await;
        assert_eq!(backend.listener_count(), 1);
        assert!(record.all().is_empty());
    }

    #[test]
    async fn test_settings_failure() {
        let backend = Arc::new(MockFusedBackend::default());
        backend.set_settings(Err(SettingsFailure::Failed("boom".to_string())));
        let client = mk_client(&backend, LocationOptions::default());
        let (callback, record) = RecordingCallback::new();

        client.start_position_updates(None, callback).await;
        assert_eq!(record.errors(), vec![ErrorCode::LocationServicesDisabled]);
        assert_eq!(backend.listener_count(), 0);
    }

    #[test]
    async fn test_last_known() {
        let backend = Arc::new(MockFusedBackend::default());
        let client = mk_client(&backend, LocationOptions::default());

        assert_eq!(client.get_last_known_position().await, Ok(None));

        let cached = loc(42, 7.0, "fused");
        backend.set_last_location(Ok(Some(cached.clone())));
        assert_eq!(client.get_last_known_position().await, Ok(Some(cached)));

        backend.set_last_location(Err("no connection".to_string()));
        assert_eq!(
            client.get_last_known_position().await,
            Err(ErrorCode::ErrorWhileAcquiringPosition)
        );
    }

    #[test]
    async fn test_service_enabled() {
        let backend = Arc::new(MockFusedBackend::default());
        let client = mk_client(&backend, LocationOptions::default());

        backend.set_settings(Ok(SettingsStates {
            gps_usable: false,
            network_usable: true,
        }));
        assert_eq!(client.is_location_service_enabled().await, Ok(true));

        backend.set_settings(Ok(SettingsStates::default()));
        assert_eq!(client.is_location_service_enabled().await, Ok(false));

        backend.set_settings(Err(SettingsFailure::Failed("nope".to_string())));
        assert_eq!(
            client.is_location_service_enabled().await,
            Err(ErrorCode::LocationServicesDisabled)
        );
    }

    #[test]
    async fn test_stop_idempotent() {
        let backend = Arc::new(MockFusedBackend::default());
        let client = mk_client(&backend, LocationOptions::default());
        let (callback, record) = RecordingCallback::new();

        // Stopping before starting is fine
        client.stop_position_updates().await;

        client.start_position_updates(None, callback).await;
        client.stop_position_updates().await;
        client.stop_position_updates().await;

        assert_eq!(backend.listener_count(), 0);
        backend.emit(FusedEvent::Result(vec![loc(1, 1.0, "fused")]));
        settle().await;
        assert!(record.all().is_empty());
        assert!(
            !client
                .on_resolution_result(client.request_code(), ResolutionOutcome::Resolved)
                .await,
            "A stopped client claimed a resolution"
        );
    }
}
