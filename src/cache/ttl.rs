use crate::config::CacheSettings;

pub const MIN_TTL_MS: u64 = 30_000;
pub const MAX_TTL_MS: u64 = 3_600_000;
const DEFAULT_BASE_TTL_MS: u64 = 300_000;

/// Base freshness window for a provider before the endpoint multiplier applies.
pub fn base_ttl_ms(provider: &str) -> u64 {
    match provider {
        "alphaVantage" => 300_000,
        "finnhub" => 60_000,
        "indianAPI" => 120_000,
        _ => DEFAULT_BASE_TTL_MS,
    }
}

/// Endpoint multiplier in thousandths, so `quote` (0.5) is 500.
pub fn endpoint_multiplier_permille(endpoint: &str) -> u64 {
    match endpoint {
        "quote" => 500,
        "intraday" => 300,
        "daily" => 2_000,
        "historical" => 3_000,
        "candles" => 1_500,
        "profile" | "companyInfo" => 10_000,
        "topGainersLosers" => 200,
        _ => 1_000,
    }
}

/// Clamp bounds applied to every computed TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            min_ms: MIN_TTL_MS,
            max_ms: MAX_TTL_MS,
        }
    }
}

impl From<&CacheSettings> for TtlPolicy {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            min_ms: settings.min_ttl_ms,
            max_ms: settings.max_ttl_ms.max(settings.min_ttl_ms),
        }
    }
}

impl TtlPolicy {
    pub fn ttl_ms(&self, provider: &str, endpoint: &str) -> u64 {
        let raw = base_ttl_ms(provider).saturating_mul(endpoint_multiplier_permille(endpoint)) / 1_000;
        raw.clamp(self.min_ms, self.max_ms)
    }
}

/// TTL with the default bounds of 30 seconds and one hour.
pub fn ttl_for(provider: &str, endpoint: &str) -> u64 {
    TtlPolicy::default().ttl_ms(provider, endpoint)
}
