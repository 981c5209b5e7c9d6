use std::sync::{Arc, Mutex, PoisonError};

use geoloc_logic::{
    DiagnosticLog, ErrorCode, FusedEvent, GeolocationManager, Location, LocationOptions,
    PositionCallback, ProviderEvent, ProviderStatus, RequestCode, ResolutionHost,
    ResolutionOutcome,
};
use log::info;
use serde::{Deserialize, Serialize};
use tokio::task::yield_now;

use crate::{
    prelude::*,
    sim::{PlatformSetup, SimPlatform},
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
/// One step of a recorded session
pub enum ScenarioEvent {
    FusedResult {
        locations: Vec<Location>,
    },
    FusedAvailability {
        available: bool,
    },
    /// Switch device location on or off for both backends
    ServiceEnabled {
        enabled: bool,
    },
    ProviderSample {
        location: Location,
    },
    ProviderEnabled {
        provider: String,
    },
    ProviderDisabled {
        provider: String,
    },
    ProviderStatus {
        provider: String,
        status: ProviderStatus,
    },
    /// The user answered a resolution prompt, defaults to the most recently requested code
    Resolution {
        outcome: ResolutionOutcome,
        #[serde(default)]
        request_code: Option<u32>,
    },
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Scenario {
    pub options: LocationOptions,
    /// Whether the consumer can show resolution prompts
    pub with_host: bool,
    pub platform: PlatformSetup,
    pub timeline: Vec<ScenarioEvent>,
}

impl Scenario {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Failed to parse scenario")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
/// Something the consumer observed during a replay
pub enum ReplayOutput {
    Position { location: Location },
    Error { code: ErrorCode },
    ResolutionRequested { request_code: u32 },
    ResolutionUnclaimed { request_code: u32 },
    LastKnown { location: Option<Location> },
    ServiceEnabled { enabled: bool },
}

#[derive(Default)]
struct Recorder {
    outputs: Mutex<Vec<ReplayOutput>>,
    last_request: Mutex<Option<RequestCode>>,
}

impl Recorder {
    fn push(&self, output: ReplayOutput) {
        self.outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(output);
    }

    fn last_request(&self) -> Option<RequestCode> {
        *self
            .last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self) -> Vec<ReplayOutput> {
        std::mem::take(&mut *self.outputs.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl PositionCallback for Recorder {
    fn on_position(&self, location: Location) {
        self.push(ReplayOutput::Position { location });
    }

    fn on_error(&self, code: ErrorCode) {
        self.push(ReplayOutput::Error { code });
    }
}

impl ResolutionHost for Recorder {
    fn start_resolution(&self, request_code: RequestCode) -> Result {
        *self
            .last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(request_code);
        self.push(ReplayOutput::ResolutionRequested {
            request_code: request_code.0,
        });
        Ok(())
    }
}

/// Let the client pumps drain whatever the simulated backends queued
async fn settle() {
    for _ in 0..20 {
        yield_now().await;
    }
}

/// Run `scenario` as a continuous subscription and collect everything the consumer saw, in
/// order. Must run on a current-thread runtime for the output order to be deterministic.
pub async fn replay(scenario: Scenario) -> Result<Vec<ReplayOutput>> {
    let platform = SimPlatform::new(scenario.platform);
    let fused = platform.fused.clone();
    let polling = platform.polling.clone();
    let manager = GeolocationManager::new(platform, DiagnosticLog::default());

    let recorder = Arc::new(Recorder::default());
    let host = scenario
        .with_host
        .then(|| recorder.clone() as Arc<dyn ResolutionHost>);

    let client = manager
        .subscribe(scenario.options, host, recorder.clone())
        .await;
    settle().await;

    for event in scenario.timeline {
        info!("Replaying {event:?}");
        match event {
            ScenarioEvent::FusedResult { locations } => {
                fused.emit(FusedEvent::Result(locations));
            }
            ScenarioEvent::FusedAvailability { available } => {
                fused.emit(FusedEvent::Availability(available));
            }
            ScenarioEvent::ServiceEnabled { enabled } => {
                fused.set_service_enabled(enabled);
                polling.set_service_enabled(enabled);
            }
            ScenarioEvent::ProviderSample { location } => {
                polling.emit(ProviderEvent::LocationChanged(location));
            }
            ScenarioEvent::ProviderEnabled { provider } => {
                polling.set_provider_enabled(&provider, true);
                polling.emit(ProviderEvent::ProviderEnabled(provider));
            }
            ScenarioEvent::ProviderDisabled { provider } => {
                polling.set_provider_enabled(&provider, false);
                polling.emit(ProviderEvent::ProviderDisabled(provider));
            }
            ScenarioEvent::ProviderStatus { provider, status } => {
                polling.emit(ProviderEvent::StatusChanged(provider, status));
            }
            ScenarioEvent::Resolution {
                outcome,
                request_code,
            } => {
                let Some(code) = request_code
                    .map(RequestCode)
                    .or_else(|| recorder.last_request())
                else {
                    bail!("Resolution result in the timeline, but no resolution was requested");
                };
                if !manager.on_resolution_result(code, outcome).await {
                    recorder.push(ReplayOutput::ResolutionUnclaimed {
                        request_code: code.0,
                    });
                }
            }
            ScenarioEvent::Stop => {
                manager.stop_position_updates(&client).await;
            }
        }
        settle().await;
    }

    manager.stop_position_updates(&client).await;

    Ok(recorder.take())
}

/// Run the one-shot queries against the scenario's device, the timeline is ignored
pub async fn last_known(scenario: Scenario) -> Result<Vec<ReplayOutput>> {
    let manager = GeolocationManager::new(
        SimPlatform::new(scenario.platform),
        DiagnosticLog::default(),
    );

    let last = match manager
        .get_last_known_position(scenario.options.force_polling)
        .await
    {
        Ok(location) => ReplayOutput::LastKnown { location },
        Err(code) => ReplayOutput::Error { code },
    };

    let enabled = match manager.is_location_service_enabled().await {
        Ok(enabled) => ReplayOutput::ServiceEnabled { enabled },
        Err(code) => ReplayOutput::Error { code },
    };

    Ok(vec![last, enabled])
}
