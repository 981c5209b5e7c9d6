use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Convenience alias for UTC DT
pub type UtcDT = DateTime<Utc>;

/// A "part" of a location
pub type LocationComponent = f64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
/// Auxiliary data from the satellite receiver attached to a fix when available
pub struct SatelliteInfo {
    /// Satellites currently visible to the receiver
    pub satellite_count: u32,
    /// Satellites that contributed to the fix
    pub satellites_used_in_fix: u32,
    /// Altitude above mean sea level from the last GGA sentence, if any
    pub altitude_msl: Option<LocationComponent>,
}

/// Source of [SatelliteInfo], started and stopped alongside a client's subscription.
pub trait SatelliteSource: Send + Sync {
    fn start(&self);
    fn stop(&self);
    /// Most recent satellite data, [None] if the receiver hasn't reported anything yet
    fn snapshot(&self) -> Option<SatelliteInfo>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
/// One positioning fix as reported by a backend.
///
/// Values are never changed after construction; enrichment produces a new [Location].
pub struct Location {
    latitude: LocationComponent,
    longitude: LocationComponent,
    /// Horizontal accuracy radius in meters, never negative
    #[serde(deserialize_with = "non_negative_accuracy")]
    accuracy: f32,
    #[serde(default)]
    altitude: Option<LocationComponent>,
    #[serde(default)]
    speed: Option<f32>,
    #[serde(default)]
    bearing: Option<f32>,
    /// Milliseconds since the unix epoch
    timestamp: i64,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    satellites: Option<SatelliteInfo>,
}

fn sanitize_accuracy(accuracy: f32) -> f32 {
    if accuracy.is_nan() || accuracy < 0.0 {
        0.0
    } else {
        accuracy
    }
}

fn non_negative_accuracy<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
    f32::deserialize(deserializer).map(sanitize_accuracy)
}

impl Location {
    pub fn new(
        latitude: LocationComponent,
        longitude: LocationComponent,
        accuracy: f32,
        timestamp: i64,
    ) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: sanitize_accuracy(accuracy),
            altitude: None,
            speed: None,
            bearing: None,
            timestamp,
            provider: None,
            satellites: None,
        }
    }

    pub fn with_provider(self, provider: impl Into<String>) -> Self {
        Self {
            provider: Some(provider.into()),
            ..self
        }
    }

    pub fn with_altitude(self, altitude: LocationComponent) -> Self {
        Self {
            altitude: Some(altitude),
            ..self
        }
    }

    pub fn with_motion(self, speed: Option<f32>, bearing: Option<f32>) -> Self {
        Self {
            speed,
            bearing,
            ..self
        }
    }

    pub fn with_satellites(self, satellites: SatelliteInfo) -> Self {
        Self {
            satellites: Some(satellites),
            ..self
        }
    }

    /// Attach the latest satellite data from `source`, returns the fix untouched if there is
    /// none.
    pub fn enriched(self, source: &dyn SatelliteSource) -> Self {
        match source.snapshot() {
            Some(info) => self.with_satellites(info),
            None => self,
        }
    }

    pub fn latitude(&self) -> LocationComponent {
        self.latitude
    }

    pub fn longitude(&self) -> LocationComponent {
        self.longitude
    }

    pub fn accuracy(&self) -> f32 {
        self.accuracy
    }

    pub fn altitude(&self) -> Option<LocationComponent> {
        self.altitude
    }

    pub fn speed(&self) -> Option<f32> {
        self.speed
    }

    pub fn bearing(&self) -> Option<f32> {
        self.bearing
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub fn satellites(&self) -> Option<&SatelliteInfo> {
        self.satellites.as_ref()
    }

    /// The timestamp as a date, [None] if it is out of chrono's range
    pub fn time(&self) -> Option<UtcDT> {
        DateTime::from_timestamp_millis(self.timestamp)
    }

    pub(crate) fn describe(&self) -> String {
        let time = self
            .time()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| self.timestamp.to_string());
        format!(
            "{} {} {} {}",
            self.longitude, self.latitude, self.accuracy, time
        )
    }
}
