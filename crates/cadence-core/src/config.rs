use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8720;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Scheduler tick period.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
/// Max enrollments fetched per tick.
pub const DEFAULT_BATCH_SIZE: u32 = 100;
/// Voice worker parallelism.
pub const DEFAULT_VOICE_CONCURRENCY: usize = 5;
/// Base re-enqueue delay after a capacity rejection.
pub const DEFAULT_VOICE_RETRY_DELAY_MS: u64 = 30_000;
/// Acquisition attempts before a job is dropped as capacity-exhausted.
pub const DEFAULT_VOICE_MAX_RETRIES: u32 = 3;
/// Mutations below this confidence are discarded.
pub const DEFAULT_MUTATION_MIN_CONFIDENCE: f64 = 0.50;

/// Top-level config (cadence.toml + CADENCE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CadenceConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub coordination: CoordinationConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub mutation: MutationConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub webhooks: WebhooksConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Redis-backed coordination store: UCM counters and the job bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Key prefix so several deployments can share one redis.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            namespace: default_namespace(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(default = "default_voice_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_voice_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_voice_max_retries")]
    pub max_retries: u32,
    /// Resolver cache TTL for tenant → umbrella assignments.
    #[serde(default = "default_resolver_ttl_secs")]
    pub resolver_ttl_secs: u64,
    /// Counters untouched for longer than this are considered stale and
    /// corrected by the next concurrency-sync webhook.
    #[serde(default = "default_sync_horizon_secs")]
    pub sync_horizon_secs: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_VOICE_CONCURRENCY,
            retry_delay_ms: DEFAULT_VOICE_RETRY_DELAY_MS,
            max_retries: DEFAULT_VOICE_MAX_RETRIES,
            resolver_ttl_secs: default_resolver_ttl_secs(),
            sync_horizon_secs: default_sync_horizon_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationConfig {
    #[serde(default = "default_mutation_min_confidence")]
    pub min_confidence: f64,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MUTATION_MIN_CONFIDENCE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub llm: Option<LlmProviderConfig>,
    pub voice: Option<VoiceProviderConfig>,
    pub sms: Option<SmsProviderConfig>,
    pub email: Option<EmailProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    pub api_key: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Analysis calls get this budget; mutation calls get 1.5× (45 s cap).
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

/// Outbound voice provider (call initiation + webhook callbacks).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceProviderConfig {
    pub api_key: String,
    pub base_url: String,
    /// Public URL the provider calls back with call events.
    pub callback_url: String,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsProviderConfig {
    pub api_key: String,
    pub base_url: String,
    pub from_number: String,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailProviderConfig {
    pub api_key: String,
    pub base_url: String,
    pub from_address: String,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

/// Authentication mode for incoming provider webhooks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WebhookAuthMode {
    /// HMAC-SHA256 over the raw request body (`x-cadence-signature: sha256=<hex>`).
    #[default]
    HmacSha256,
    /// Static bearer token in the Authorization header.
    BearerToken,
    /// No authentication — internal/trusted networks only.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebhooksConfig {
    #[serde(default)]
    pub auth_mode: WebhookAuthMode,
    /// HMAC signing secret or bearer token value.
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// How long graceful drain waits for in-flight jobs before releasing
    /// held concurrency slots and exiting.
    #[serde(default = "default_drain_deadline_secs")]
    pub drain_deadline_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_deadline_secs: default_drain_deadline_secs(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.db", home)
}
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_namespace() -> String {
    "cadence".to_string()
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_batch_size() -> u32 {
    DEFAULT_BATCH_SIZE
}
fn default_voice_concurrency() -> usize {
    DEFAULT_VOICE_CONCURRENCY
}
fn default_voice_retry_delay_ms() -> u64 {
    DEFAULT_VOICE_RETRY_DELAY_MS
}
fn default_voice_max_retries() -> u32 {
    DEFAULT_VOICE_MAX_RETRIES
}
fn default_mutation_min_confidence() -> f64 {
    DEFAULT_MUTATION_MIN_CONFIDENCE
}
fn default_resolver_ttl_secs() -> u64 {
    300
}
fn default_sync_horizon_secs() -> u64 {
    300
}
fn default_llm_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_llm_model() -> String {
    "claude-sonnet-4-6".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    30
}
fn default_provider_timeout_secs() -> u64 {
    30
}
fn default_drain_deadline_secs() -> u64 {
    30
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides
    /// (e.g. `CADENCE_SCHEDULER_POLL_INTERVAL_MS=2000`).
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CadenceConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CADENCE_").split("_"))
            .extract()
            .map_err(|e| crate::error::CadenceError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = CadenceConfig::default();
        assert_eq!(cfg.scheduler.poll_interval_ms, 5_000);
        assert_eq!(cfg.scheduler.batch_size, 100);
        assert_eq!(cfg.voice.concurrency, 5);
        assert_eq!(cfg.voice.retry_delay_ms, 30_000);
        assert_eq!(cfg.voice.max_retries, 3);
        assert!((cfg.mutation.min_confidence - 0.50).abs() < f64::EPSILON);
    }

    #[test]
    fn webhook_auth_defaults_to_hmac() {
        let cfg = WebhooksConfig::default();
        assert_eq!(cfg.auth_mode, WebhookAuthMode::HmacSha256);
        assert!(cfg.secret.is_none());
    }
}
