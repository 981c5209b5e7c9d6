use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use crate::{
    error::ErrorCode, fused::FusedLocationClient, location::Location, manager::Platform,
    polling::PollingLocationClient,
};

/// Consumer of a continuous subscription
pub trait PositionCallback: Send + Sync {
    /// Called with every accepted fix, never with rejected ones
    fn on_position(&self, location: Location);
    /// Called when the subscription hits a problem, the subscription is *not* stopped
    fn on_error(&self, error: ErrorCode);
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
/// Correlation token for a resolution request, handed to the host and handed back with the
/// result
pub struct RequestCode(pub u32);

impl RequestCode {
    pub fn generate() -> Self {
        Self(rand::random_range(0..1 << 16))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// The user fixed their location settings
    Resolved,
    Declined,
}

/// Something that can show the user a prompt to fix their location settings. The result is
/// reported back through [crate::GeolocationManager::on_resolution_result].
pub trait ResolutionHost: Send + Sync {
    fn start_resolution(&self, request_code: RequestCode) -> anyhow::Result<()>;
}

/// A single subscription to one positioning backend
pub trait LocationClient: Send + Sync {
    /// Key this client registers with its backend under
    fn id(&self) -> Uuid;

    fn is_location_service_enabled(
        &self,
    ) -> impl Future<Output = Result<bool, ErrorCode>> + Send;

    /// One-shot fetch of a cached fix, [None] means the backend has nothing cached
    fn get_last_known_position(
        &self,
    ) -> impl Future<Output = Result<Option<Location>, ErrorCode>> + Send;

    /// Begin a continuous subscription, failures are reported to `callback`
    fn start_position_updates(
        &self,
        host: Option<Arc<dyn ResolutionHost>>,
        callback: Arc<dyn PositionCallback>,
    ) -> impl Future<Output = ()> + Send;

    /// Tear down the subscription, safe to call any number of times
    fn stop_position_updates(&self) -> impl Future<Output = ()> + Send;

    /// Handle the result of a resolution request, returns whether this client claimed it
    fn on_resolution_result(
        &self,
        _request_code: RequestCode,
        _outcome: ResolutionOutcome,
    ) -> impl Future<Output = bool> + Send {
        async { false }
    }
}

/// The client variant the manager picked for a request
pub enum PlatformClient<P: Platform> {
    Fused(FusedLocationClient<P::Fused>),
    Polling(PollingLocationClient<P::Polling>),
}

impl<P: Platform> PlatformClient<P> {
    pub fn is_fused(&self) -> bool {
        matches!(self, Self::Fused(_))
    }
}

impl<P: Platform> LocationClient for PlatformClient<P> {
    fn id(&self) -> Uuid {
        match self {
            Self::Fused(c) => c.id(),
            Self::Polling(c) => c.id(),
        }
    }

    async fn is_location_service_enabled(&self) -> Result<bool, ErrorCode> {
        match self {
            Self::Fused(c) => c.is_location_service_enabled().await,
            Self::Polling(c) => c.is_location_service_enabled().await,
        }
    }

    async fn get_last_known_position(&self) -> Result<Option<Location>, ErrorCode> {
        match self {
            Self::Fused(c) => c.get_last_known_position().await,
            Self::Polling(c) => c.get_last_known_position().await,
        }
    }

    async fn start_position_updates(
        &self,
        host: Option<Arc<dyn ResolutionHost>>,
        callback: Arc<dyn PositionCallback>,
    ) {
        match self {
            Self::Fused(c) => c.start_position_updates(host, callback).await,
            Self::Polling(c) => c.start_position_updates(host, callback).await,
        }
    }

    async fn stop_position_updates(&self) {
        match self {
            Self::Fused(c) => c.stop_position_updates().await,
            Self::Polling(c) => c.stop_position_updates().await,
        }
    }

    async fn on_resolution_result(
        &self,
        request_code: RequestCode,
        outcome: ResolutionOutcome,
    ) -> bool {
        match self {
            Self::Fused(c) => c.on_resolution_result(request_code, outcome).await,
            Self::Polling(c) => c.on_resolution_result(request_code, outcome).await,
        }
    }
}

/// Spawn the task that feeds backend events to `handle` one at a time.
///
/// Only a weak reference to the client is kept, the task ends when the returned guard is
/// dropped, the backend drops its sender, or the client goes away.
pub(crate) fn spawn_pump<S, E, F, Fut>(
    shared: &Arc<S>,
    mut events: mpsc::UnboundedReceiver<E>,
    handle: F,
) -> DropGuard
where
    S: Send + Sync + 'static,
    E: Send + 'static,
    F: Fn(Arc<S>, E) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let weak: Weak<S> = Arc::downgrade(shared);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    break;
                }

                event = events.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    let Some(shared) = weak.upgrade() else {
                        break;
                    };
                    handle(shared, event).await;
                }
            }
        }
    });

    cancel.drop_guard()
}
