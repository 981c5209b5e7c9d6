use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "camelCase")]
/// Requested accuracy tier, ordered from least to most precise
pub enum LocationAccuracy {
    Lowest,
    Low,
    Medium,
    High,
    #[default]
    Best,
    BestForNavigation,
}

impl LocationAccuracy {
    /// Worst accuracy radius (meters) a polled fix may have and still be delivered
    pub fn ceiling_meters(self) -> f32 {
        match self {
            Self::Lowest | Self::Low => 500.0,
            Self::Medium => 250.0,
            Self::Best | Self::BestForNavigation => 50.0,
            Self::High => 100.0,
        }
    }

    /// Priority the fused backend should run at for this tier
    pub fn fused_priority(self) -> Priority {
        match self {
            Self::Lowest => Priority::Passive,
            Self::Low => Priority::LowPower,
            Self::Medium => Priority::BalancedPowerAccuracy,
            _ => Priority::HighAccuracy,
        }
    }

    /// Capabilities a polling provider needs to serve this tier
    pub fn provider_criteria(self) -> ProviderCriteria {
        match self {
            Self::Lowest => ProviderCriteria {
                accuracy: CriteriaAccuracy::NoRequirement,
                horizontal_accuracy: HorizontalAccuracy::NoRequirement,
                power: PowerRequirement::NoRequirement,
                ..Default::default()
            },
            Self::Low => ProviderCriteria {
                accuracy: CriteriaAccuracy::Coarse,
                horizontal_accuracy: HorizontalAccuracy::Low,
                power: PowerRequirement::NoRequirement,
                ..Default::default()
            },
            Self::Medium => ProviderCriteria {
                accuracy: CriteriaAccuracy::Coarse,
                horizontal_accuracy: HorizontalAccuracy::Medium,
                power: PowerRequirement::Medium,
                ..Default::default()
            },
            _ => ProviderCriteria {
                accuracy: CriteriaAccuracy::Fine,
                horizontal_accuracy: HorizontalAccuracy::High,
                power: PowerRequirement::High,
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
/// Request priority understood by the fused backend
pub enum Priority {
    Passive,
    LowPower,
    BalancedPowerAccuracy,
    HighAccuracy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum CriteriaAccuracy {
    #[default]
    NoRequirement,
    Coarse,
    Fine,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum HorizontalAccuracy {
    #[default]
    NoRequirement,
    Low,
    Medium,
    High,
}

/// Ordered by how much power a provider is allowed to draw
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum PowerRequirement {
    #[default]
    NoRequirement,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
/// What a polling backend is asked for when choosing its best provider
pub struct ProviderCriteria {
    pub accuracy: CriteriaAccuracy,
    pub horizontal_accuracy: HorizontalAccuracy,
    pub power: PowerRequirement,
    pub altitude_required: bool,
    pub bearing_required: bool,
    pub speed_required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
/// Options for one subscription, these don't change while it's running
pub struct LocationOptions {
    pub accuracy: LocationAccuracy,
    /// Minimum milliseconds between updates
    pub time_interval: u64,
    /// Minimum meters moved between updates
    pub distance_filter: f32,
    /// Use the polling backend even when the fused one is available
    #[serde(rename = "forceLocationManager")]
    pub force_polling: bool,
}

impl LocationOptions {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.time_interval)
    }
}
