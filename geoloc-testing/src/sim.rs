use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use geoloc_logic::{
    FusedBackend, FusedEvent, FusedRequest, HorizontalAccuracy, Location, LocationOptions,
    MissingDependency, Platform, PollingBackend, PowerRequirement, ProviderCriteria,
    ProviderEvent, SatelliteInfo, SatelliteSource, ServiceAvailability, SettingsFailure,
    SettingsStates,
};
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::prelude::*;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
/// What the fused support service check reports
pub enum SimAvailability {
    #[default]
    Available,
    Unavailable(ServiceAvailability),
    MissingDependency(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
/// Outcome of every fused settings check
pub enum SimSettings {
    #[default]
    Satisfied,
    ResolutionRequired,
    ChangeUnavailable,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SimProvider {
    pub name: String,
    #[serde(default)]
    pub horizontal_accuracy: HorizontalAccuracy,
    #[serde(default)]
    pub power: PowerRequirement,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub last_known: Option<Location>,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
/// Initial state of a simulated device
pub struct PlatformSetup {
    pub fused_availability: SimAvailability,
    pub settings: SimSettings,
    pub service_enabled: bool,
    pub last_location: Option<Location>,
    pub providers: Vec<SimProvider>,
    pub satellites: Option<SatelliteInfo>,
}

impl Default for PlatformSetup {
    fn default() -> Self {
        Self {
            fused_availability: SimAvailability::default(),
            settings: SimSettings::default(),
            service_enabled: true,
            last_location: None,
            providers: vec![
                SimProvider {
                    name: "gps".to_string(),
                    horizontal_accuracy: HorizontalAccuracy::High,
                    power: PowerRequirement::High,
                    enabled: true,
                    last_known: None,
                },
                SimProvider {
                    name: "network".to_string(),
                    horizontal_accuracy: HorizontalAccuracy::Medium,
                    power: PowerRequirement::Low,
                    enabled: true,
                    last_known: None,
                },
            ],
            satellites: None,
        }
    }
}

/// Fused backend driven by the scenario instead of real hardware
pub struct SimFusedBackend {
    settings: SimSettings,
    last_location: Option<Location>,
    service_enabled: AtomicBool,
    listeners: Mutex<HashMap<Uuid, mpsc::UnboundedSender<FusedEvent>>>,
}

impl SimFusedBackend {
    pub fn set_service_enabled(&self, enabled: bool) {
        self.service_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn emit(&self, event: FusedEvent) {
        let listeners = lock(&self.listeners);
        debug!("Fused event to {} listener(s): {event:?}", listeners.len());
        for tx in listeners.values() {
            tx.send(event.clone()).ok();
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }
}

impl FusedBackend for SimFusedBackend {
    async fn check_location_settings(
        &self,
        _request: Option<&FusedRequest>,
    ) -> Result<SettingsStates, SettingsFailure> {
        let enabled = self.service_enabled.load(Ordering::SeqCst);
        match self.settings {
            SimSettings::Satisfied => Ok(SettingsStates {
                gps_usable: enabled,
                network_usable: enabled,
            }),
            SimSettings::ResolutionRequired => Err(SettingsFailure::ResolutionRequired),
            SimSettings::ChangeUnavailable => Err(SettingsFailure::ChangeUnavailable),
            SimSettings::Failed => Err(SettingsFailure::Failed(
                "simulated settings failure".to_string(),
            )),
        }
    }

    fn request_location_updates(
        &self,
        listener: Uuid,
        request: &FusedRequest,
        events: mpsc::UnboundedSender<FusedEvent>,
    ) -> Result {
        debug!("Fused listener {listener} registered with {request:?}");
        lock(&self.listeners).insert(listener, events);
        Ok(())
    }

    fn remove_location_updates(&self, listener: Uuid) {
        lock(&self.listeners).remove(&listener);
    }

    async fn last_location(&self) -> Result<Option<Location>> {
        Ok(self.last_location.clone())
    }

    async fn location_availability(&self) -> Result<bool> {
        Ok(self.service_enabled.load(Ordering::SeqCst))
    }

    fn is_location_service_enabled(&self) -> bool {
        self.service_enabled.load(Ordering::SeqCst)
    }
}

/// Polling backend with a fixed set of named providers
pub struct SimPollingBackend {
    providers: Mutex<Vec<SimProvider>>,
    service_enabled: AtomicBool,
    listeners: Mutex<HashMap<Uuid, mpsc::UnboundedSender<ProviderEvent>>>,
}

impl SimPollingBackend {
    pub fn set_service_enabled(&self, enabled: bool) {
        self.service_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_provider_enabled(&self, provider: &str, enabled: bool) {
        if let Some(p) = lock(&self.providers).iter_mut().find(|p| p.name == provider) {
            p.enabled = enabled;
        }
    }

    /// Send `event` to every listener regardless of the provider it registered on
    pub fn emit(&self, event: ProviderEvent) {
        for tx in lock(&self.listeners).values() {
            tx.send(event.clone()).ok();
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }
}

impl PollingBackend for SimPollingBackend {
    fn providers(&self, enabled_only: bool) -> Vec<String> {
        lock(&self.providers)
            .iter()
            .filter(|p| !enabled_only || p.enabled)
            .map(|p| p.name.clone())
            .collect()
    }

    fn best_provider(&self, criteria: &ProviderCriteria, enabled_only: bool) -> Option<String> {
        let providers = lock(&self.providers);
        let mut candidates = providers
            .iter()
            .filter(|p| !enabled_only || p.enabled)
            .filter(|p| p.horizontal_accuracy >= criteria.horizontal_accuracy)
            .collect::<Vec<_>>();

        // Prefer the cheapest provider that's accurate enough, relaxing power if nothing fits
        candidates.sort_by_key(|p| p.power);
        candidates
            .iter()
            .find(|p| {
                criteria.power == PowerRequirement::NoRequirement || p.power <= criteria.power
            })
            .or_else(|| candidates.first())
            .map(|p| p.name.clone())
    }

    fn last_known_location(&self, provider: &str) -> Option<Location> {
        lock(&self.providers)
            .iter()
            .find(|p| p.name == provider)
            .and_then(|p| p.last_known.clone())
    }

    fn request_location_updates(
        &self,
        listener: Uuid,
        provider: &str,
        min_time: Duration,
        min_distance: f32,
        events: mpsc::UnboundedSender<ProviderEvent>,
    ) -> Result {
        let known = lock(&self.providers).iter().any(|p| p.name == provider);
        if !known {
            bail!("Unknown provider {provider}");
        }
        debug!(
            "Polling listener {listener} registered on {provider} every {min_time:?} / {min_distance}m"
        );
        lock(&self.listeners).insert(listener, events);
        Ok(())
    }

    fn remove_updates(&self, listener: Uuid) {
        lock(&self.listeners).remove(&listener);
    }

    fn is_location_service_enabled(&self) -> bool {
        self.service_enabled.load(Ordering::SeqCst)
    }
}

/// Satellite receiver that always reports the same snapshot
pub struct SimSatellites {
    snapshot: Option<SatelliteInfo>,
    running: AtomicBool,
}

impl SimSatellites {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl SatelliteSource for SimSatellites {
    fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn snapshot(&self) -> Option<SatelliteInfo> {
        self.snapshot.filter(|_| self.is_running())
    }
}

/// A whole simulated device
pub struct SimPlatform {
    pub fused: Arc<SimFusedBackend>,
    pub polling: Arc<SimPollingBackend>,
    satellite_snapshot: Option<SatelliteInfo>,
    satellites: Mutex<Vec<Arc<SimSatellites>>>,
    availability: SimAvailability,
}

impl SimPlatform {
    pub fn new(setup: PlatformSetup) -> Self {
        Self {
            fused: Arc::new(SimFusedBackend {
                settings: setup.settings,
                last_location: setup.last_location,
                service_enabled: AtomicBool::new(setup.service_enabled),
                listeners: Mutex::new(HashMap::new()),
            }),
            polling: Arc::new(SimPollingBackend {
                providers: Mutex::new(setup.providers),
                service_enabled: AtomicBool::new(setup.service_enabled),
                listeners: Mutex::new(HashMap::new()),
            }),
            satellite_snapshot: setup.satellites,
            satellites: Mutex::new(Vec::new()),
            availability: setup.fused_availability,
        }
    }

    pub fn set_service_enabled(&self, enabled: bool) {
        self.fused.set_service_enabled(enabled);
        self.polling.set_service_enabled(enabled);
    }

    /// Every satellite receiver handed out so far, one per client
    pub fn satellite_sources(&self) -> Vec<Arc<SimSatellites>> {
        lock(&self.satellites).clone()
    }
}

impl Platform for SimPlatform {
    type Fused = SimFusedBackend;
    type Polling = SimPollingBackend;

    fn fused_backend(&self) -> Arc<Self::Fused> {
        self.fused.clone()
    }

    fn polling_backend(&self) -> Arc<Self::Polling> {
        self.polling.clone()
    }

    fn satellite_source(&self, options: &LocationOptions) -> Arc<dyn SatelliteSource> {
        debug!("New satellite receiver for {:?}", options.accuracy);
        let source = Arc::new(SimSatellites {
            snapshot: self.satellite_snapshot,
            running: AtomicBool::new(false),
        });
        lock(&self.satellites).push(source.clone());
        source
    }

    fn fused_service_availability(&self) -> Result<ServiceAvailability, MissingDependency> {
        match &self.availability {
            SimAvailability::Available => Ok(ServiceAvailability::Success),
            SimAvailability::Unavailable(status) => Ok(*status),
            SimAvailability::MissingDependency(what) => Err(MissingDependency(what.clone())),
        }
    }
}
