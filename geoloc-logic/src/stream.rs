use std::sync::Arc;

use tokio::sync::Mutex;

use crate::{
    client::{PlatformClient, PositionCallback, ResolutionHost},
    diagnostics::DiagnosticLog,
    error::ErrorCode,
    location::Location,
    manager::{GeolocationManager, Platform},
    options::LocationOptions,
    permission::{PermissionOracle, check_permission},
};

const TAG: &str = "PositionStream";

/// A consumer's continuous subscription, at most one is active at a time
pub struct PositionStream<P: Platform, O: PermissionOracle> {
    manager: Arc<GeolocationManager<P>>,
    permissions: O,
    log: DiagnosticLog,
    active: Mutex<Option<Arc<PlatformClient<P>>>>,
}

impl<P: Platform, O: PermissionOracle> PositionStream<P, O> {
    pub fn new(manager: Arc<GeolocationManager<P>>, permissions: O, log: DiagnosticLog) -> Self {
        Self {
            manager,
            permissions,
            log,
            active: Mutex::new(None),
        }
    }

    /// Start delivering positions to `callback`, replacing any subscription that's already
    /// running. Permission problems are reported to `callback` without touching a backend.
    pub async fn listen(
        &self,
        options: LocationOptions,
        host: Option<Arc<dyn ResolutionHost>>,
        callback: Arc<dyn PositionCallback>,
    ) {
        if let Err(why) = check_permission(&self.permissions) {
            self.log.log(TAG, format!("Not listening: {why}"));
            callback.on_error(why);
            return;
        }

        let mut active = self.active.lock().await;

        if let Some(previous) = active.take() {
            self.log.log(TAG, "Replacing the active subscription");
            self.manager.stop_position_updates(&previous).await;
        }

        let client = self.manager.subscribe(options, host, callback).await;
        *active = Some(client);
    }

    /// Stop the active subscription, if any
    pub async fn cancel(&self) {
        if let Some(client) = self.active.lock().await.take() {
            self.manager.stop_position_updates(&client).await;
        }
    }

    pub async fn is_listening(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// One-shot cached fix, permissions are checked first just like [Self::listen]
    pub async fn last_known_position(
        &self,
        force_polling: bool,
    ) -> Result<Option<Location>, ErrorCode> {
        if let Err(why) = check_permission(&self.permissions) {
            self.log.log(TAG, format!("Not querying last known position: {why}"));
            return Err(why);
        }
        self.manager.get_last_known_position(force_polling).await
    }
}
