use crate::binding::{ProviderProtocol, ToolCallIdStyle};
use crate::error::RouterError;
use crate::route::RouteDef;
use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

/// Top-level configuration for the RouteCodex gateway.
///
/// The external loader has already merged files and normalized legacy
/// fields by the time this is deserialized; anything it failed to
/// normalize (unknown keys, missing triple fields) is rejected here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Gateway node ID (auto-generated if not set)
    #[serde(default = "default_node_id")]
    pub node_id: String,

    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream providers keyed by provider id.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Route table, in declaration order.
    #[serde(default)]
    pub routes: Vec<RouteDef>,

    /// Named config blocks referenced by `config_ref` in module specs.
    #[serde(default)]
    pub config_library: HashMap<String, Value>,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub snapshots: SnapshotConfig,

    #[serde(default)]
    pub mcp: McpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Ingress listener address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Per-request deadline applied to upstream I/O (milliseconds).
    /// Retries never extend it.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Maximum accepted request body (bytes)
    #[serde(default = "default_max_body")]
    pub max_body_bytes: usize,

    /// CORS allowed origins for the ingress endpoints
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// One upstream provider entry. The `(provider_protocol, provider_id,
/// compatibility_profile)` triple is mandatory; the id is the map key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub provider_protocol: ProviderProtocol,

    pub compatibility_profile: String,

    pub base_url: String,

    pub auth: AuthConfig,

    /// Models this provider serves (informational; routing is regex-based)
    #[serde(default)]
    pub models: Vec<String>,

    #[serde(default)]
    pub responses: ResponsesConfig,

    /// Per-provider retry policy override
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponsesConfig {
    #[serde(default)]
    pub tool_call_id_style: ToolCallIdStyle,
}

/// Credential assembly modes understood by the provider kernel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", deny_unknown_fields)]
pub enum AuthConfig {
    Apikey {
        key: String,
        /// Header carrying the key; adapters/profiles may override.
        #[serde(default = "default_auth_header")]
        header: String,
    },
    Bearer {
        /// One or more tokens; multiple tokens rotate per request with
        /// per-key failure accounting.
        keys: Vec<String>,
    },
    Tokenfile {
        /// Read at request time, never cached across requests.
        path: String,
    },
    Cookie {
        cookie: String,
    },
    Oauth {
        token_url: String,
        client_id: String,
        #[serde(default)]
        client_secret: Option<String>,
        #[serde(default)]
        scopes: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// Seconds between background health probes
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    /// Consecutive probe failures before an instance is marked degraded
    #[serde(default = "default_degraded_after")]
    pub degraded_after: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds the breaker stays open before a half-open probe
    #[serde(default = "default_reset_window")]
    pub reset_window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    #[serde(default)]
    pub strategy: CleanupStrategy,

    #[serde(default = "default_warning_bytes")]
    pub warning_bytes: u64,

    #[serde(default = "default_critical_bytes")]
    pub critical_bytes: u64,

    /// TTL applied by the ttl/hybrid strategies (seconds)
    #[serde(default = "default_resource_ttl")]
    pub resource_ttl_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CleanupStrategy {
    Lru,
    Lfu,
    Fifo,
    Ttl,
    Size,
    #[default]
    Hybrid,
}

/// Upstream HTTP connection pooling. Connections are never shared across
/// hosts; these limits apply per host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_max_idle_per_host")]
    pub max_idle_per_host: usize,

    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default)]
    pub strategy: RetryStrategy,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RetryStrategy {
    RetryImmediate,
    #[default]
    RetryDelayed,
    RetryExponential,
}

impl RetryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryStrategy::RetryImmediate => "retry-immediate",
            RetryStrategy::RetryDelayed => "retry-delayed",
            RetryStrategy::RetryExponential => "retry-exponential",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotConfig {
    /// Emit request/response snapshots to the configured sink
    #[serde(default)]
    pub enabled: bool,

    /// Sink selector: "log" is built in; anything else must be registered
    /// by the embedding binary.
    #[serde(default = "default_snapshot_sink")]
    pub sink: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct McpConfig {
    /// Inject MCP resource tools into tool lists
    #[serde(default)]
    pub enabled: bool,

    /// Servers known up front, merged with servers discovered from
    /// dotted tool names.
    #[serde(default)]
    pub servers: Vec<String>,
}

impl GatewayConfig {
    /// Load from a YAML file with `${NAME:default}` environment
    /// interpolation, then apply `ROUTECODEX_*` env overrides.
    pub fn load(path: &Path) -> Result<Self, RouterError> {
        let raw = std::fs::read_to_string(path)?;
        let interpolated = interpolate_env(&raw);
        let config: GatewayConfig = Figment::new()
            .merge(Yaml::string(&interpolated))
            .merge(Env::prefixed("ROUTECODEX_").split("__"))
            .extract()
            .map_err(|e| RouterError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup validation beyond what serde enforces: every route must
    /// reference a known provider and config_ref, and the triple must be
    /// internally coherent.
    pub fn validate(&self) -> Result<(), RouterError> {
        for route in &self.routes {
            route.validate()?;
            for spec in &route.modules {
                if let crate::route::ConfigRef::ConfigRef(name) = &spec.config {
                    if !self.config_library.contains_key(name) {
                        return Err(RouterError::ConfigError(format!(
                            "route '{}': unknown config_ref '{}'",
                            route.id, name
                        )));
                    }
                }
            }
        }
        for (id, provider) in &self.providers {
            if provider.base_url.is_empty() {
                return Err(RouterError::ConfigError(format!(
                    "provider '{}': base_url is empty",
                    id
                )));
            }
            if provider.compatibility_profile.is_empty() {
                return Err(RouterError::ConfigError(format!(
                    "provider '{}': compatibility_profile is empty",
                    id
                )));
            }
            if let AuthConfig::Bearer { keys } = &provider.auth {
                if keys.is_empty() {
                    return Err(RouterError::ConfigError(format!(
                        "provider '{}': bearer auth with no keys",
                        id
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            server: ServerConfig::default(),
            providers: HashMap::new(),
            routes: Vec::new(),
            config_library: HashMap::new(),
            pool: PoolConfig::default(),
            breaker: BreakerConfig::default(),
            memory: MemoryConfig::default(),
            upstream: UpstreamConfig::default(),
            snapshots: SnapshotConfig::default(),
            mcp: McpConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            request_timeout_ms: default_request_timeout(),
            max_body_bytes: default_max_body(),
            cors_origins: Vec::new(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval(),
            degraded_after: default_degraded_after(),
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_window_secs: default_reset_window(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            strategy: CleanupStrategy::default(),
            warning_bytes: default_warning_bytes(),
            critical_bytes: default_critical_bytes(),
            resource_ttl_secs: default_resource_ttl(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            max_idle_per_host: default_max_idle_per_host(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::default(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sink: default_snapshot_sink(),
        }
    }
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            servers: Vec::new(),
        }
    }
}

/// Expand `${NAME}` and `${NAME:default}` references against the process
/// environment. Unset variables without a default expand to empty.
pub fn interpolate_env(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        match tail.find('}') {
            Some(end) => {
                let expr = &tail[..end];
                let (name, default) = match expr.find(':') {
                    Some(colon) => (&expr[..colon], Some(&expr[colon + 1..])),
                    None => (expr, None),
                };
                match std::env::var(name) {
                    Ok(v) => out.push_str(&v),
                    Err(_) => out.push_str(default.unwrap_or("")),
                }
                rest = &tail[end + 1..];
            }
            None => {
                out.push_str("${");
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

// Defaults

fn default_node_id() -> String {
    format!("routecodex-{}", uuid::Uuid::new_v4())
}

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:5520".parse().expect("valid addr")
}

fn default_request_timeout() -> u64 {
    300_000
}

fn default_max_body() -> usize {
    16 * 1024 * 1024
}

fn default_auth_header() -> String {
    "Authorization".to_string()
}

fn default_probe_interval() -> u64 {
    30
}

fn default_degraded_after() -> u32 {
    3
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_window() -> u64 {
    30
}

fn default_warning_bytes() -> u64 {
    256 * 1024 * 1024
}

fn default_critical_bytes() -> u64 {
    512 * 1024 * 1024
}

fn default_resource_ttl() -> u64 {
    600
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_idle_timeout() -> u64 {
    90
}

fn default_max_idle_per_host() -> usize {
    32
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    250
}

fn default_snapshot_sink() -> String {
    "log".to_string()
}
