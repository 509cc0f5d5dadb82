use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of one slot acquisition attempt. Both rejection variants are
/// expected flow control, not errors: the voice worker re-enqueues with
/// delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquireOutcome {
    Acquired,
    /// The umbrella total hit the provider limit L.
    UmbrellaFull,
    /// The tenant hit its soft fairness cap C.
    TenantCap,
}

impl AcquireOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired)
    }
}

impl fmt::Display for AcquireOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AcquireOutcome::Acquired => "acquired",
            AcquireOutcome::UmbrellaFull => "umbrella_full",
            AcquireOutcome::TenantCap => "tenant_cap",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AcquireOutcome {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "acquired" => Ok(AcquireOutcome::Acquired),
            "umbrella_full" => Ok(AcquireOutcome::UmbrellaFull),
            "tenant_cap" => Ok(AcquireOutcome::TenantCap),
            other => Err(format!("unknown acquire outcome: {other}")),
        }
    }
}

/// Read-only view of an umbrella's coordination-store state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UmbrellaSnapshot {
    pub current: u32,
    pub limit: u32,
    /// Epoch milliseconds of the last provider-reported sync, if any.
    pub last_sync_ms: Option<i64>,
    /// Per-tenant usage map. May drift from `current` after a sync clamp.
    pub tenant_usage: Vec<(String, u32)>,
}

impl UmbrellaSnapshot {
    /// Milliseconds since the last provider sync, or `None` if never synced.
    pub fn sync_age_ms(&self, now_ms: i64) -> Option<i64> {
        self.last_sync_ms.map(|t| now_ms - t)
    }
}
