use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::DropGuard;
use uuid::Uuid;

use crate::{
    arbiter::compare_locations,
    client::{LocationClient, PositionCallback, ResolutionHost, spawn_pump},
    diagnostics::{DiagnosticLog, DiagnosticProbe, PROBE_INTERVAL},
    error::ErrorCode,
    location::{Location, SatelliteSource},
    options::{LocationOptions, ProviderCriteria},
    prelude::*,
};

const TAG: &str = "PollingLocationClient";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
/// Legacy per-provider status report
pub enum ProviderStatus {
    Available,
    TemporarilyUnavailable,
    OutOfService,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Callback from a polling backend to a registered listener
pub enum ProviderEvent {
    LocationChanged(Location),
    ProviderEnabled(String),
    ProviderDisabled(String),
    StatusChanged(String, ProviderStatus),
}

/// A backend with several named providers and no best-fix selection of its own
pub trait PollingBackend: Send + Sync + 'static {
    fn providers(&self, enabled_only: bool) -> Vec<String>;

    /// The provider that best matches `criteria`, [None] if nothing does
    fn best_provider(&self, criteria: &ProviderCriteria, enabled_only: bool) -> Option<String>;

    fn last_known_location(&self, provider: &str) -> Option<Location>;

    fn request_location_updates(
        &self,
        listener: Uuid,
        provider: &str,
        min_time: Duration,
        min_distance: f32,
        events: mpsc::UnboundedSender<ProviderEvent>,
    ) -> Result;

    /// Unregister `listener`, does nothing if it isn't registered
    fn remove_updates(&self, listener: Uuid);

    fn is_location_service_enabled(&self) -> bool;
}

#[derive(Default)]
struct PollingSession {
    callback: Option<Arc<dyn PositionCallback>>,
    current_best: Option<Location>,
    current_provider: Option<String>,
    listening: bool,
    probe: Option<DiagnosticProbe>,
    pump: Option<DropGuard>,
}

struct PollingShared<B: PollingBackend> {
    id: Uuid,
    backend: Arc<B>,
    satellites: Arc<dyn SatelliteSource>,
    options: LocationOptions,
    log: DiagnosticLog,
    session: Mutex<PollingSession>,
}

/// Client for a [PollingBackend], picks a provider and arbitrates every fix it reports.
///
/// A fix is only delivered if it beats the current best (see [compare_locations]) *and* its
/// accuracy is within [crate::LocationAccuracy::ceiling_meters] for the requested tier.
pub struct PollingLocationClient<B: PollingBackend> {
    shared: Arc<PollingShared<B>>,
}

impl<B: PollingBackend> PollingLocationClient<B> {
    pub fn new(
        backend: Arc<B>,
        satellites: Arc<dyn SatelliteSource>,
        options: LocationOptions,
        log: DiagnosticLog,
    ) -> Self {
        Self {
            shared: Arc::new(PollingShared {
                id: Uuid::new_v4(),
                backend,
                satellites,
                options,
                log,
                session: Mutex::new(PollingSession::default()),
            }),
        }
    }

    pub fn options(&self) -> &LocationOptions {
        &self.shared.options
    }

    /// The provider updates are currently coming from
    pub async fn current_provider(&self) -> Option<String> {
        self.shared.session.lock().await.current_provider.clone()
    }

    pub async fn current_best(&self) -> Option<Location> {
        self.shared.session.lock().await.current_best.clone()
    }

    pub async fn is_listening(&self) -> bool {
        self.shared.session.lock().await.listening
    }

    pub async fn on_location_changed(&self, location: Location) {
        self.shared.on_location_changed(location).await;
    }

    pub async fn on_provider_enabled(&self, provider: &str) {
        self.shared.on_provider_enabled(provider);
    }

    pub async fn on_provider_disabled(&self, provider: &str) {
        self.shared.on_provider_disabled(provider).await;
    }
}

impl<B: PollingBackend> PollingShared<B> {
    fn log(&self, message: impl AsRef<str>) {
        self.log.log(TAG, message);
    }

    fn select_provider(&self) -> Option<String> {
        let criteria = self.options.accuracy.provider_criteria();
        self.backend
            .best_provider(&criteria, true)
            .filter(|provider| !provider.trim().is_empty())
            .or_else(|| self.backend.providers(true).into_iter().next())
    }

    /// Run the arbiter, logging why a fix lost
    fn is_better(&self, candidate: &Location, best: Option<&Location>) -> bool {
        let verdict = compare_locations(candidate, best);
        if !verdict.is_better() {
            self.log(format!("Fix not better than current best: {verdict:?}"));
        }
        verdict.is_better()
    }

    fn spawn_probe(self: &Arc<Self>) -> DiagnosticProbe {
        let weak: Weak<Self> = Arc::downgrade(self);
        DiagnosticProbe::spawn(PROBE_INTERVAL, move || {
            let weak = weak.clone();
            async move {
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                shared.log("Checking current best");
                let session = shared.session.lock().await;
                match &session.current_best {
                    Some(best) => shared.log(format!("Current best: {}", best.describe())),
                    None => shared.log("No current best"),
                }
            }
        })
    }

    async fn handle_event(&self, event: ProviderEvent) {
        match event {
            ProviderEvent::LocationChanged(location) => self.on_location_changed(location).await,
            ProviderEvent::ProviderEnabled(provider) => self.on_provider_enabled(&provider),
            ProviderEvent::ProviderDisabled(provider) => {
                self.on_provider_disabled(&provider).await
            }
            ProviderEvent::StatusChanged(provider, status) => match status {
                ProviderStatus::Available => self.on_provider_enabled(&provider),
                ProviderStatus::OutOfService => self.on_provider_disabled(&provider).await,
                ProviderStatus::TemporarilyUnavailable => {}
            },
        }
    }

    async fn on_location_changed(&self, location: Location) {
        let mut session = self.session.lock().await;

        if session.current_provider.is_none() {
            self.log("Ignoring fix, no active provider");
            return;
        }

        let ceiling = self.options.accuracy.ceiling_meters();

        if self.is_better(&location, session.current_best.as_ref())
            && location.accuracy() <= ceiling
        {
            session.current_best = Some(location.clone());
            if let Some(callback) = &session.callback {
                callback.on_position(location.enriched(self.satellites.as_ref()));
                self.log("Position delivered");
            }
        } else {
            self.log(format!(
                "Position not better or not accurate enough. Accuracy: {} provider: {}",
                location.accuracy(),
                location.provider().unwrap_or("unknown")
            ));
        }
    }

    fn on_provider_enabled(&self, _provider: &str) {}

    async fn on_provider_disabled(&self, provider: &str) {
        let mut session = self.session.lock().await;
        self.log(format!("Provider disabled: {provider}"));

        if session.current_provider.as_deref() != Some(provider) {
            return;
        }

        if session.listening {
            self.log(format!("Removing updates for disabled provider {provider}"));
            self.backend.remove_updates(self.id);
            session.listening = false;
            session.pump = None;
        }

        if let Some(callback) = &session.callback {
            callback.on_error(ErrorCode::LocationServicesDisabled);
        }

        session.current_provider = None;
    }
}

impl<B: PollingBackend> LocationClient for PollingLocationClient<B> {
    fn id(&self) -> Uuid {
        self.shared.id
    }

    async fn is_location_service_enabled(&self) -> Result<bool, ErrorCode> {
        Ok(self.shared.backend.is_location_service_enabled())
    }

    async fn get_last_known_position(&self) -> Result<Option<Location>, ErrorCode> {
        let shared = &self.shared;
        let mut best: Option<Location> = None;

        for provider in shared.backend.providers(true) {
            if let Some(location) = shared.backend.last_known_location(&provider) {
                if shared.is_better(&location, best.as_ref()) {
                    best = Some(location);
                }
            }
        }

        Ok(best)
    }

    async fn start_position_updates(
        &self,
        _host: Option<Arc<dyn ResolutionHost>>,
        callback: Arc<dyn PositionCallback>,
    ) {
        let shared = &self.shared;

        if !shared.backend.is_location_service_enabled() {
            callback.on_error(ErrorCode::LocationServicesDisabled);
            return;
        }

        let mut session = shared.session.lock().await;
        session.callback = Some(callback.clone());

        let Some(provider) = shared.select_provider() else {
            shared.log("No location provider available");
            callback.on_error(ErrorCode::LocationServicesDisabled);
            return;
        };

        session.current_provider = Some(provider.clone());
        session.listening = true;
        shared.satellites.start();
        shared.log(format!("Start position updates with provider: {provider}"));

        let (tx, rx) = mpsc::unbounded_channel();
        let res = shared.backend.request_location_updates(
            shared.id,
            &provider,
            shared.options.interval(),
            shared.options.distance_filter,
            tx,
        );

        if let Err(why) = res {
            shared.log(format!("Failed to request updates from {provider}: {why:?}"));
            session.listening = false;
            session.current_provider = None;
            shared.satellites.stop();
            callback.on_error(ErrorCode::ErrorWhileAcquiringPosition);
            return;
        }

        session.pump = Some(spawn_pump(shared, rx, |shared, event| async move {
            shared.handle_event(event).await;
        }));
        session.probe = Some(shared.spawn_probe());
    }

    async fn stop_position_updates(&self) {
        let shared = &self.shared;
        let mut session = shared.session.lock().await;
        if let Some(probe) = session.probe.take() {
            probe.cancel();
        }
        session.listening = false;
        shared.satellites.stop();
        shared.backend.remove_updates(shared.id);
        *session = PollingSession::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        options::{HorizontalAccuracy, LocationAccuracy, PowerRequirement},
        tests::{Delivery, MockPollingBackend, MockSatellites, RecordingCallback, loc, settle},
    };
    use tokio::test;

    fn mk_client(
        backend: &Arc<MockPollingBackend>,
        accuracy: LocationAccuracy,
    ) -> PollingLocationClient<MockPollingBackend> {
        let options = LocationOptions {
            accuracy,
            ..Default::default()
        };
        PollingLocationClient::new(
            backend.clone(),
            Arc::new(MockSatellites::default()),
            options,
            DiagnosticLog::default(),
        )
    }

    fn gps_and_network() -> Arc<MockPollingBackend> {
        let backend = MockPollingBackend::default();
        backend.add_provider("network", HorizontalAccuracy::Medium, PowerRequirement::Low);
        backend.add_provider("gps", HorizontalAccuracy::High, PowerRequirement::High);
        Arc::new(backend)
    }

    #[test]
    async fn test_provider_selection() {
        let backend = gps_and_network();

        let precise = mk_client(&backend, LocationAccuracy::Best);
        let (callback, _record) = RecordingCallback::new();
        precise.start_position_updates(None, callback).await;
        assert_eq!(precise.current_provider().await.as_deref(), Some("gps"));

        let coarse = mk_client(&backend, LocationAccuracy::Medium);
        let (callback, _record) = RecordingCallback::new();
        coarse.start_position_updates(None, callback).await;
        assert_eq!(coarse.current_provider().await.as_deref(), Some("network"));

        assert_eq!(backend.listener_count(), 2);
    }

    #[test]
    async fn test_provider_fallback() {
        let backend = MockPollingBackend::default();
        // Nothing matches the "best" criteria, fall back to the first enabled provider
        backend.add_provider("passive", HorizontalAccuracy::Low, PowerRequirement::Low);
        let backend = Arc::new(backend);

        let client = mk_client(&backend, LocationAccuracy::Best);
        let (callback, record) = RecordingCallback::new();
        client.start_position_updates(None, callback).await;

        assert_eq!(client.current_provider().await.as_deref(), Some("passive"));
        assert!(record.all().is_empty());
    }

    #[test]
    async fn test_no_providers() {
        let backend = Arc::new(MockPollingBackend::default());
        let client = mk_client(&backend, LocationAccuracy::Best);
        let (callback, record) = RecordingCallback::new();

        client.start_position_updates(None, callback).await;

        assert_eq!(record.errors(), vec![ErrorCode::LocationServicesDisabled]);
        assert_eq!(backend.listener_count(), 0);
        assert!(!client.is_listening().await);
    }

    #[test]
    async fn test_service_disabled() {
        let backend = gps_and_network();
        backend.set_service_enabled(false);
        let client = mk_client(&backend, LocationAccuracy::Best);
        let (callback, record) = RecordingCallback::new();

        client.start_position_updates(None, callback).await;

        assert_eq!(record.errors(), vec![ErrorCode::LocationServicesDisabled]);
        assert_eq!(backend.listener_count(), 0);
        assert_eq!(client.is_location_service_enabled().await, Ok(false));
    }

    #[test]
    async fn test_request_failure() {
        let backend = gps_and_network();
        backend.fail_requests();
        let client = mk_client(&backend, LocationAccuracy::Best);
        let (callback, record) = RecordingCallback::new();

        client.start_position_updates(None, callback).await;

        assert_eq!(
            record.errors(),
            vec![ErrorCode::ErrorWhileAcquiringPosition]
        );
        assert!(!client.is_listening().await);
        assert_eq!(client.current_provider().await, None);
    }

    #[test]
    async fn test_arbitration_sequence() {
        let backend = gps_and_network();
        let client = mk_client(&backend, LocationAccuracy::Best);
        let (callback, record) = RecordingCallback::new();
        client.start_position_updates(None, callback).await;

        // First fix is always accepted
        backend.emit(ProviderEvent::LocationChanged(loc(1000, 10.0, "gps")));
        // Newer, a bit worse, same provider
        backend.emit(ProviderEvent::LocationChanged(loc(1500, 15.0, "gps")));
        // Newer, much worse, other provider
        backend.emit(ProviderEvent::LocationChanged(loc(2000, 300.0, "network")));
        // Older but more accurate
        backend.emit(ProviderEvent::LocationChanged(loc(1200, 4.0, "network")));
        settle().await;

        let delivered = record
            .positions()
            .iter()
            .map(|p| p.timestamp())
            .collect::<Vec<_>>();
        assert_eq!(delivered, vec![1000, 1500, 1200]);
        assert_eq!(
            client.current_best().await.map(|b| b.timestamp()),
            Some(1200)
        );
        assert!(
            record.positions().iter().all(|p| p.satellites().is_some()),
            "Delivered fixes weren't enriched"
        );
    }

    #[test]
    async fn test_ceiling_gate() {
        let backend = gps_and_network();
        let client = mk_client(&backend, LocationAccuracy::Best);
        let (callback, record) = RecordingCallback::new();
        client.start_position_updates(None, callback).await;

        // The arbiter would accept this (no previous best), the 50m ceiling does not
        client.on_location_changed(loc(1000, 50.5, "gps")).await;
        assert!(record.all().is_empty());
        assert_eq!(client.current_best().await, None, "Rejected fix became best");

        client.on_location_changed(loc(1100, 50.0, "gps")).await;
        assert_eq!(record.positions().len(), 1, "Fix at exactly the ceiling rejected");
    }

    #[test]
    async fn test_ceiling_per_tier() {
        let backend = gps_and_network();
        for (accuracy, ok, too_much) in [
            (LocationAccuracy::Lowest, 500.0, 501.0),
            (LocationAccuracy::Medium, 250.0, 251.0),
            (LocationAccuracy::High, 100.0, 100.5),
        ] {
            let client = mk_client(&backend, accuracy);
            let (callback, record) = RecordingCallback::new();
            client.start_position_updates(None, callback).await;

            client.on_location_changed(loc(1000, too_much, "gps")).await;
            client.on_location_changed(loc(1001, ok, "gps")).await;

            let delivered = record.positions();
            assert_eq!(delivered.len(), 1, "{accuracy:?}");
            assert_eq!(delivered[0].accuracy(), ok, "{accuracy:?}");
            client.stop_position_updates().await;
        }
    }

    #[test]
    async fn test_provider_disabled() {
        let backend = gps_and_network();
        let client = mk_client(&backend, LocationAccuracy::Best);
        let (callback, record) = RecordingCallback::new();
        client.start_position_updates(None, callback).await;
        client.on_location_changed(loc(1000, 10.0, "gps")).await;

        // Other providers going away doesn't matter
        client.on_provider_disabled("network").await;
        assert_eq!(client.current_provider().await.as_deref(), Some("gps"));

        client.on_provider_disabled("gps").await;
        assert_eq!(client.current_provider().await, None);
        assert!(!client.is_listening().await);
        assert_eq!(backend.listener_count(), 0, "Updates not removed");

        // Now ignored, even though it would otherwise be better
        client.on_location_changed(loc(2000, 5.0, "gps")).await;

        assert_eq!(
            record.all(),
            vec![
                Delivery::Position(record.positions()[0].clone()),
                Delivery::Error(ErrorCode::LocationServicesDisabled),
            ]
        );
    }

    #[test]
    async fn test_provider_events_through_backend() {
        let backend = gps_and_network();
        let client = mk_client(&backend, LocationAccuracy::Best);
        let (callback, record) = RecordingCallback::new();
        client.start_position_updates(None, callback).await;

        backend.emit(ProviderEvent::ProviderEnabled("gps".to_string()));
        backend.emit(ProviderEvent::StatusChanged(
            "gps".to_string(),
            ProviderStatus::TemporarilyUnavailable,
        ));
        backend.emit(ProviderEvent::StatusChanged(
            "gps".to_string(),
            ProviderStatus::Available,
        ));
        settle().await;
        assert!(record.all().is_empty());
        assert_eq!(client.current_provider().await.as_deref(), Some("gps"));

        backend.emit(ProviderEvent::StatusChanged(
            "gps".to_string(),
            ProviderStatus::OutOfService,
        ));
        settle().await;
        assert_eq!(record.errors(), vec![ErrorCode::LocationServicesDisabled]);
        assert_eq!(client.current_provider().await, None);
    }

    #[test]
    async fn test_last_known() {
        let backend = gps_and_network();
        let client = mk_client(&backend, LocationAccuracy::Best);

        assert_eq!(client.get_last_known_position().await, Ok(None));

        backend.set_last_known("network", Some(loc(1000, 800.0, "network")));
        backend.set_last_known("gps", Some(loc(1000, 20.0, "gps")));

        // No ceiling is applied to cached fixes
        let best = client.get_last_known_position().await;
        assert_eq!(best.map(|b| b.map(|b| b.accuracy())), Ok(Some(20.0)));

        backend.set_last_known("gps", Some(loc(-500_000, 1.0, "gps")));
        let best = client.get_last_known_position().await;
        assert_eq!(
            best.map(|b| b.map(|b| b.accuracy())),
            Ok(Some(800.0)),
            "Significantly older fix won"
        );
    }

    #[test]
    async fn test_last_known_skips_disabled() {
        let backend = gps_and_network();
        backend.set_last_known("gps", Some(loc(1000, 5.0, "gps")));
        backend.set_provider_enabled("gps", false);
        let client = mk_client(&backend, LocationAccuracy::Best);

        assert_eq!(client.get_last_known_position().await, Ok(None));
    }

    #[test]
    async fn test_stop_idempotent() {
        let backend = gps_and_network();
        let client = mk_client(&backend, LocationAccuracy::Best);
        let (callback, record) = RecordingCallback::new();

        client.stop_position_updates().await;

        client.start_position_updates(None, callback).await;
        client.on_location_changed(loc(1000, 10.0, "gps")).await;
        client.stop_position_updates().await;
        client.stop_position_updates().await;

        assert_eq!(backend.listener_count(), 0);
        assert!(!client.is_listening().await);
        assert_eq!(client.current_best().await, None, "Session not cleared");

        client.on_location_changed(loc(2000, 1.0, "gps")).await;
        assert_eq!(record.all().len(), 1, "Delivered after stop");
    }
}
