use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
/// Errors surfaced to a consumer through its error callback
pub enum ErrorCode {
    /// Device location is off, no provider is usable, a settings conflict went unresolved, or
    /// the provider in use was disabled
    LocationServicesDisabled,
    /// The backend returned nothing where a fix was expected
    ErrorWhileAcquiringPosition,
    PermissionDenied,
    /// The app doesn't declare the location permissions at all
    PermissionDefinitionsNotFound,
}

impl ErrorCode {
    /// Stable identifier sent over the wire
    pub fn code(self) -> &'static str {
        match self {
            Self::LocationServicesDisabled => "LOCATION_SERVICES_DISABLED",
            Self::ErrorWhileAcquiringPosition => "ERROR_WHILE_ACQUIRING_POSITION",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::PermissionDefinitionsNotFound => "PERMISSION_DEFINITIONS_NOT_FOUND",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::LocationServicesDisabled => "Location services are disabled.",
            Self::ErrorWhileAcquiringPosition => {
                "An unexpected error occurred while trying to acquire the device's position."
            }
            Self::PermissionDenied => "User denied permissions to access the device's location.",
            Self::PermissionDefinitionsNotFound => {
                "No location permissions are defined in the manifest."
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.description())
    }
}

impl std::error::Error for ErrorCode {}
