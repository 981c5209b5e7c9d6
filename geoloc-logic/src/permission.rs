use std::fmt;

use crate::error::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The platform has no (or malformed) location permission declarations
pub struct PermissionUndefined;

impl fmt::Display for PermissionUndefined {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("location permissions are not declared")
    }
}

impl std::error::Error for PermissionUndefined {}

pub trait PermissionOracle: Send + Sync {
    fn has_permission(&self) -> Result<bool, PermissionUndefined>;
}

/// Ask `oracle` before touching any backend, mapping its answer to the consumer error.
pub fn check_permission(oracle: &impl PermissionOracle) -> Result<(), ErrorCode> {
    match oracle.has_permission() {
        Ok(true) => Ok(()),
        Ok(false) => Err(ErrorCode::PermissionDenied),
        Err(PermissionUndefined) => Err(ErrorCode::PermissionDefinitionsNotFound),
    }
}
