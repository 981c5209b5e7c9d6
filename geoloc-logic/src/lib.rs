mod arbiter;
mod client;
mod diagnostics;
mod error;
mod fused;
mod location;
mod manager;
mod options;
mod permission;
mod polling;
mod stream;

pub use arbiter::{Verdict, compare_locations, is_better_location};
pub use client::{
    LocationClient, PlatformClient, PositionCallback, RequestCode, ResolutionHost,
    ResolutionOutcome,
};
pub use diagnostics::{DiagnosticLog, DiagnosticProbe, LogListener, PROBE_INTERVAL};
pub use error::ErrorCode;
pub use fused::{
    FusedBackend, FusedEvent, FusedLocationClient, FusedRequest, SettingsFailure, SettingsStates,
};
pub use location::{Location, SatelliteInfo, SatelliteSource, UtcDT};
pub use manager::{GeolocationManager, MissingDependency, Platform, ServiceAvailability};
pub use options::{
    CriteriaAccuracy, HorizontalAccuracy, LocationAccuracy, LocationOptions, PowerRequirement,
    Priority, ProviderCriteria,
};
pub use permission::{PermissionOracle, PermissionUndefined, check_permission};
pub use polling::{PollingBackend, PollingLocationClient, ProviderEvent, ProviderStatus};
pub use stream::PositionStream;

pub mod prelude {
    use anyhow::Error as AnyhowError;
    use std::result::Result as StdResult;
    pub type Result<T = (), E = AnyhowError> = StdResult<T, E>;
    pub use anyhow::Context;
}
