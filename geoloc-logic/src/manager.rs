use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{
    client::{
        LocationClient, PlatformClient, PositionCallback, RequestCode, ResolutionHost,
        ResolutionOutcome,
    },
    diagnostics::DiagnosticLog,
    error::ErrorCode,
    fused::{FusedBackend, FusedLocationClient},
    location::{Location, SatelliteSource},
    options::LocationOptions,
    polling::{PollingBackend, PollingLocationClient},
};

const TAG: &str = "GeolocationManager";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
/// What the fused backend's support service reports about itself
pub enum ServiceAvailability {
    Success,
    ServiceMissing,
    ServiceUpdating,
    ServiceVersionUpdateRequired,
    ServiceDisabled,
    ServiceInvalid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The availability probe itself couldn't run because something it needs isn't installed
pub struct MissingDependency(pub String);

impl fmt::Display for MissingDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "missing dependency: {}", self.0)
    }
}

impl std::error::Error for MissingDependency {}

/// Everything the manager needs from the device
pub trait Platform: Send + Sync + 'static {
    type Fused: FusedBackend;
    type Polling: PollingBackend;

    fn fused_backend(&self) -> Arc<Self::Fused>;
    fn polling_backend(&self) -> Arc<Self::Polling>;
    /// A fresh satellite receiver for one client, never shared between clients
    fn satellite_source(&self, options: &LocationOptions) -> Arc<dyn SatelliteSource>;
    fn fused_service_availability(&self) -> Result<ServiceAvailability, MissingDependency>;
}

/// Chooses a backend for each request and routes resolution results to the clients
/// waiting on them.
pub struct GeolocationManager<P: Platform> {
    platform: P,
    log: DiagnosticLog,
    clients: RwLock<Vec<Arc<PlatformClient<P>>>>,
}

impl<P: Platform> GeolocationManager<P> {
    pub fn new(platform: P, log: DiagnosticLog) -> Self {
        Self {
            platform,
            log,
            clients: RwLock::new(Vec::with_capacity(2)),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    fn fused_available(&self) -> bool {
        match self.platform.fused_service_availability() {
            Ok(ServiceAvailability::Success) => true,
            Ok(other) => {
                self.log.log(TAG, format!("Fused service unavailable: {other:?}"));
                false
            }
            Err(why) => {
                self.log.log(TAG, format!("Couldn't check fused service: {why}"));
                false
            }
        }
    }

    /// Build a client for `options`, it isn't tracked until it's started through
    /// [Self::start_position_updates]
    pub fn create_location_client(
        &self,
        force_polling: bool,
        options: LocationOptions,
    ) -> PlatformClient<P> {
        let satellites = self.platform.satellite_source(&options);
        if !force_polling && self.fused_available() {
            PlatformClient::Fused(FusedLocationClient::new(
                self.platform.fused_backend(),
                satellites,
                options,
                self.log.clone(),
            ))
        } else {
            PlatformClient::Polling(PollingLocationClient::new(
                self.platform.polling_backend(),
                satellites,
                options,
                self.log.clone(),
            ))
        }
    }

    pub async fn get_last_known_position(
        &self,
        force_polling: bool,
    ) -> Result<Option<Location>, ErrorCode> {
        let client = self.create_location_client(force_polling, LocationOptions::default());
        client.get_last_known_position().await
    }

    pub async fn is_location_service_enabled(&self) -> Result<bool, ErrorCode> {
        let client = self.create_location_client(false, LocationOptions::default());
        client.is_location_service_enabled().await
    }

    /// Track `client` and start it
    pub async fn start_position_updates(
        &self,
        client: Arc<PlatformClient<P>>,
        host: Option<Arc<dyn ResolutionHost>>,
        callback: Arc<dyn PositionCallback>,
    ) {
        self.clients.write().await.push(client.clone());
        client.start_position_updates(host, callback).await;
    }

    /// Stop tracking `client`, then stop it
    pub async fn stop_position_updates(&self, client: &PlatformClient<P>) {
        let id = client.id();
        self.clients.write().await.retain(|c| c.id() != id);
        client.stop_position_updates().await;
    }

    /// Create, track, and start a client for `options`
    pub async fn subscribe(
        &self,
        options: LocationOptions,
        host: Option<Arc<dyn ResolutionHost>>,
        callback: Arc<dyn PositionCallback>,
    ) -> Arc<PlatformClient<P>> {
        let client = Arc::new(self.create_location_client(options.force_polling, options));
        self.start_position_updates(client.clone(), host, callback)
            .await;
        client
    }

    /// Offer a resolution result to every tracked client in the order they were started,
    /// returns whether one claimed it
    pub async fn on_resolution_result(
        &self,
        request_code: RequestCode,
        outcome: ResolutionOutcome,
    ) -> bool {
        // Snapshot so a claiming client can call back into the manager
        let clients = self.clients.read().await.clone();
        for client in clients {
            if client.on_resolution_result(request_code, outcome).await {
                return true;
            }
        }
        self.log.log(
            TAG,
            format!("No client claimed resolution result {}", request_code.0),
        );
        false
    }

    pub async fn tracked_clients(&self) -> usize {
        self.clients.read().await.len()
    }
}
