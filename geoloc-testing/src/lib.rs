mod scenario;
mod sim;

pub mod prelude {
    pub use anyhow::{Context, anyhow, bail};
    pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
}

pub use prelude::*;
pub use scenario::{ReplayOutput, Scenario, ScenarioEvent, last_known, replay};
pub use sim::{
    PlatformSetup, SimAvailability, SimFusedBackend, SimPlatform, SimPollingBackend, SimProvider,
    SimSatellites, SimSettings,
};
