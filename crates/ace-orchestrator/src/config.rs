//! Process configuration, loaded once from the environment at boot.
//!
//! Grounded on `vpn-proxy::config::ProxyConfig`'s struct-of-structs shape:
//! one top-level [`OrchestratorConfig`] composed of per-component structs,
//! each with its own `from_env` constructor and sane defaults so a bare
//! `docker run` with no environment at all still starts (single replica,
//! no VPN, variant A). Config load failure is the one place this process
//! is allowed to exit non-zero before the async runtime starts (spec.md
//! §7 "Propagation policy").

use ace_engine::EngineVariant;
use ace_ports::PortAllocatorConfig;
use ace_proxy::ProxyConfig;
use ace_types::VpnId;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue { key: &'static str, value: String, reason: String },

    #[error("MIN_REPLICAS ({min}) must be <= MAX_REPLICAS ({max})")]
    ReplicaBoundsInverted { min: usize, max: usize },

    #[error("VPN_MODE=redundant requires both GLUETUN_CONTAINER_NAME and GLUETUN_CONTAINER_NAME_2")]
    RedundantModeMissingSecondVpn,
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub min_replicas: usize,
    pub max_replicas: usize,
    pub target_image: String,
    pub ops_label: (String, String),
    pub startup_timeout: Duration,
    pub stop_timeout_secs: i64,
    pub map_https: bool,
    pub variant: EngineVariant,
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub check_interval: Duration,
    pub failure_threshold: u32,
    pub unhealthy_grace_period: Duration,
    pub replacement_cooldown: Duration,
}

#[derive(Debug, Clone)]
pub struct VpnSidecar {
    pub id: VpnId,
    pub container_name: String,
    pub api_port: u16,
}

#[derive(Debug, Clone)]
pub struct VpnConfig {
    pub mode: ace_types::VpnMode,
    pub sidecars: Vec<VpnSidecar>,
    pub health_check_interval: Duration,
    pub unhealthy_restart_timeout: Duration,
    pub restart_grace_period: Duration,
    pub port_check_interval: Duration,
    pub startup_grace_period: Duration,
    pub min_stable_checks: u32,
    pub restart_engines_on_reconnect: bool,
    pub double_check_interval: Duration,
    pub recovery_port_wait_timeout: Duration,
    pub recovery_port_poll_interval: Duration,
    pub recovery_stabilization_window: Duration,
    pub port_cache_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    /// Accepted and validated for operator-facing completeness, but the
    /// breaker itself (`ace_engine::CircuitBreaker`) tracks one
    /// threshold/timeout pair shared across every context string rather
    /// than one per context; see DESIGN.md for why that's the right
    /// tradeoff here rather than threading two breakers through
    /// `HealthManager`.
    pub replacement_failure_threshold: u32,
    pub replacement_recovery_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub server: ServerConfig,
    pub fleet: FleetConfig,
    pub health: HealthConfig,
    pub vpn: VpnConfig,
    pub ports: PortsConfig,
    pub breaker: BreakerConfig,
    pub proxy: ProxyConfig,
    pub max_concurrent_provisions: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct PortsConfig {
    pub host_range: (u16, u16),
    pub container_http_range: (u16, u16),
    pub container_https_range: (u16, u16),
    pub vpn_ranges: Vec<(VpnId, u16, u16)>,
}

impl PortsConfig {
    pub fn into_allocator_config(self) -> PortAllocatorConfig {
        PortAllocatorConfig {
            host_range: self.host_range,
            container_http_range: self.container_http_range,
            container_https_range: self.container_https_range,
            vpn_ranges: self.vpn_ranges,
        }
    }
}

fn env_string(key: &'static str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_bool(key: &'static str, default: bool) -> Result<bool> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(v) => match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::InvalidValue { key, value: other.to_owned(), reason: "expected a boolean".into() }),
        },
    }
}

fn env_parsed<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(v) => v.parse().map_err(|_| ConfigError::InvalidValue { key, value: v, reason: "failed to parse".into() }),
    }
}

fn env_secs(key: &'static str, default_secs: u64) -> Result<Duration> {
    env_parsed::<u64>(key, default_secs).map(Duration::from_secs)
}

fn env_millis(key: &'static str, default_millis: u64) -> Result<Duration> {
    env_parsed::<u64>(key, default_millis).map(Duration::from_millis)
}

fn env_opt_usize(key: &'static str) -> Result<Option<usize>> {
    match std::env::var(key) {
        Err(_) => Ok(None),
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue { key, value: v, reason: "expected an integer".into() }),
    }
}

/// Parses a `"start-end"` port range the same way `ace_ports::PortPool`
/// does, duplicated here (rather than exposing the bounds back out of
/// `PortPool`, which deliberately keeps them private) because the
/// allocator wants a `PortPool`, not a tuple, and the config layer needs
/// the tuple to build `PortAllocatorConfig`.
fn parse_range(key: &'static str, default: &str) -> Result<(u16, u16)> {
    let raw = env_string(key, default);
    let invalid = || ConfigError::InvalidValue { key, value: raw.clone(), reason: "expected \"start-end\"".into() };
    let (start, end) = raw.split_once('-').ok_or_else(invalid)?;
    let start: u16 = start.trim().parse().map_err(|_| invalid())?;
    let end: u16 = end.trim().parse().map_err(|_| invalid())?;
    if start > end {
        return Err(invalid());
    }
    Ok((start, end))
}

impl OrchestratorConfig {
    /// Loads and validates every knob from the process environment. The
    /// defaults mirror spec.md §4's stated defaults; anything not in the
    /// spec's table gets a conservative default documented inline.
    pub fn from_env() -> Result<Self> {
        let bind_host = env_string("BIND_ADDR", "0.0.0.0");
        let bind_port: u16 = env_parsed("BIND_PORT", 8089)?;
        let bind_addr = SocketAddr::new(
            bind_host.parse::<IpAddr>().map_err(|_| ConfigError::InvalidValue { key: "BIND_ADDR", value: bind_host, reason: "expected an IP address".into() })?,
            bind_port,
        );

        let min_replicas: usize = env_parsed("MIN_REPLICAS", 1)?;
        let max_replicas: usize = env_parsed("MAX_REPLICAS", 10)?;
        if min_replicas > max_replicas {
            return Err(ConfigError::ReplicaBoundsInverted { min: min_replicas, max: max_replicas });
        }

        let variant_raw = env_string("ENGINE_VARIANT", "conf");
        let variant: EngineVariant = variant_raw.parse().map_err(|reason| ConfigError::InvalidValue { key: "ENGINE_VARIANT", value: variant_raw.clone(), reason })?;

        let fleet = FleetConfig {
            min_replicas,
            max_replicas,
            target_image: env_string("ACESTREAM_IMAGE", "acestream/engine:latest"),
            ops_label: (env_string("OPS_LABEL_KEY", "acestream-fleet.managed"), env_string("OPS_LABEL_VALUE", "true")),
            startup_timeout: env_secs("STARTUP_TIMEOUT_S", 25)?,
            stop_timeout_secs: env_parsed("ENGINE_STOP_TIMEOUT_S", 10)?,
            map_https: env_bool("MAP_HTTPS", false)?,
            variant,
        };

        let health = HealthConfig {
            check_interval: env_secs("HEALTH_CHECK_INTERVAL_S", 20)?,
            failure_threshold: env_parsed("HEALTH_FAILURE_THRESHOLD", 3)?,
            unhealthy_grace_period: env_secs("HEALTH_UNHEALTHY_GRACE_PERIOD_S", 60)?,
            replacement_cooldown: env_secs("HEALTH_REPLACEMENT_COOLDOWN_S", 60)?,
        };

        let vpn_mode_raw = env_string("VPN_MODE", "disabled");
        let vpn1 = std::env::var("GLUETUN_CONTAINER_NAME").ok();
        let vpn2 = std::env::var("GLUETUN_CONTAINER_NAME_2").ok();
        let gluetun_api_port: u16 = env_parsed("GLUETUN_API_PORT", 8000)?;

        let mode = match vpn_mode_raw.to_ascii_lowercase().as_str() {
            "single" => ace_types::VpnMode::Single,
            "redundant" => ace_types::VpnMode::Redundant,
            _ => ace_types::VpnMode::Disabled,
        };

        let mut sidecars = Vec::new();
        if mode != ace_types::VpnMode::Disabled {
            let Some(name1) = vpn1.clone() else {
                return Err(ConfigError::InvalidValue { key: "GLUETUN_CONTAINER_NAME", value: String::new(), reason: "required when VPN_MODE is not disabled".into() });
            };
            sidecars.push(VpnSidecar { id: VpnId::new(name1.clone()), container_name: name1, api_port: gluetun_api_port });
        }
        if mode == ace_types::VpnMode::Redundant {
            let Some(name2) = vpn2.clone() else {
                return Err(ConfigError::RedundantModeMissingSecondVpn);
            };
            sidecars.push(VpnSidecar { id: VpnId::new(name2.clone()), container_name: name2, api_port: gluetun_api_port });
        }

        let vpn = VpnConfig {
            mode,
            sidecars,
            health_check_interval: env_secs("GLUETUN_HEALTH_CHECK_INTERVAL_S", 5)?,
            unhealthy_restart_timeout: env_secs("VPN_UNHEALTHY_RESTART_TIMEOUT_S", 120)?,
            restart_grace_period: env_secs("VPN_RESTART_GRACE_PERIOD_S", 15)?,
            port_check_interval: env_secs("GLUETUN_HEALTH_CHECK_INTERVAL_S", 5)?,
            startup_grace_period: env_secs("VPN_STARTUP_GRACE_PERIOD_S", 60)?,
            min_stable_checks: env_parsed("VPN_MIN_STABLE_CHECKS", 5)?,
            restart_engines_on_reconnect: env_bool("VPN_RESTART_ENGINES_ON_RECONNECT", false)?,
            double_check_interval: env_secs("VPN_DOUBLE_CHECK_INTERVAL_S", 30)?,
            recovery_port_wait_timeout: env_secs("VPN_RECOVERY_PORT_WAIT_TIMEOUT_S", 30)?,
            recovery_port_poll_interval: env_secs("VPN_RECOVERY_PORT_POLL_INTERVAL_S", 2)?,
            recovery_stabilization_window: env_secs("VPN_RECOVERY_STABILIZATION_WINDOW_S", 120)?,
            port_cache_ttl: env_secs("GLUETUN_PORT_CACHE_TTL_S", 30)?,
        };

        let mut vpn_ranges = Vec::new();
        if !vpn.sidecars.is_empty() {
            let range1 = parse_range("GLUETUN_PORT_RANGE_1", "40000-40099")?;
            vpn_ranges.push((vpn.sidecars[0].id.clone(), range1.0, range1.1));
            if vpn.sidecars.len() > 1 {
                let range2 = parse_range("GLUETUN_PORT_RANGE_2", "40100-40199")?;
                vpn_ranges.push((vpn.sidecars[1].id.clone(), range2.0, range2.1));
            }
        }

        let ports = PortsConfig {
            host_range: parse_range("PORT_RANGE_HOST", "19000-19099")?,
            container_http_range: parse_range("ACE_HTTP_RANGE", "6878-6977")?,
            container_https_range: parse_range("ACE_HTTPS_RANGE", "6978-7077")?,
            vpn_ranges,
        };

        let breaker = BreakerConfig {
            failure_threshold: env_parsed("CIRCUIT_BREAKER_FAILURE_THRESHOLD", 5)?,
            recovery_timeout: env_secs("CIRCUIT_BREAKER_RECOVERY_TIMEOUT_S", 60)?,
            replacement_failure_threshold: env_parsed("CIRCUIT_BREAKER_REPLACEMENT_THRESHOLD", 3)?,
            replacement_recovery_timeout: env_secs("CIRCUIT_BREAKER_REPLACEMENT_TIMEOUT_S", 60)?,
        };

        let proxy = ProxyConfig {
            grace_period: env_secs("GRACE_PERIOD_S", 5)?,
            max_streams_per_engine: env_opt_usize("MAX_STREAMS_PER_ENGINE")?,
            ring_buffer_capacity: env_parsed("RING_BUFFER_CAPACITY", 1000)?,
            connect_timeout: env_secs("PROXY_CONNECT_TIMEOUT_S", 5)?,
            no_data_check_interval: env_secs("PROXY_NO_DATA_CHECK_INTERVAL_S", 1)?,
            no_data_timeout_checks: env_parsed("PROXY_NO_DATA_TIMEOUT_CHECKS", 60)?,
            initial_data_wait_timeout: env_secs("INITIAL_DATA_WAIT_TIMEOUT_S", 10)?,
            initial_data_check_interval: env_millis("INITIAL_DATA_CHECK_INTERVAL_MS", 200)?,
            client_heartbeat_interval: env_secs("CLIENT_HEARTBEAT_INTERVAL_S", 15)?,
            ghost_client_multiplier: env_parsed("GHOST_CLIENT_MULTIPLIER", 3)?,
        };
        // BUFFER_CHUNK_SIZE is accepted for operator-facing completeness
        // (spec.md §4.7) but the upstream reader forwards whatever chunk
        // size reqwest's `bytes_stream` yields rather than re-chunking;
        // see DESIGN.md.
        let _buffer_chunk_size: usize = env_parsed("BUFFER_CHUNK_SIZE", 8192)?;

        let max_concurrent_provisions = env_opt_usize("MAX_CONCURRENT_PROVISIONS")?;

        Ok(Self { server: ServerConfig { bind_addr }, fleet, health, vpn, ports, breaker, proxy, max_concurrent_provisions })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8089) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable mutation races across tests in the same
    // process; serialize the handful of tests that touch it.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_known_vars() {
        for key in ["MIN_REPLICAS", "MAX_REPLICAS", "VPN_MODE", "GLUETUN_CONTAINER_NAME", "GLUETUN_CONTAINER_NAME_2", "ENGINE_VARIANT", "BIND_ADDR"] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn defaults_load_with_no_environment() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_known_vars();
        let config = OrchestratorConfig::from_env().expect("defaults must be valid");
        assert_eq!(config.fleet.min_replicas, 1);
        assert_eq!(config.vpn.mode, ace_types::VpnMode::Disabled);
        assert!(config.vpn.sidecars.is_empty());
    }

    #[test]
    fn rejects_inverted_replica_bounds() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_known_vars();
        std::env::set_var("MIN_REPLICAS", "5");
        std::env::set_var("MAX_REPLICAS", "2");
        let result = OrchestratorConfig::from_env();
        clear_known_vars();
        assert!(matches!(result, Err(ConfigError::ReplicaBoundsInverted { min: 5, max: 2 })));
    }

    #[test]
    fn redundant_mode_requires_second_vpn() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_known_vars();
        std::env::set_var("VPN_MODE", "redundant");
        std::env::set_var("GLUETUN_CONTAINER_NAME", "gluetun1");
        let result = OrchestratorConfig::from_env();
        clear_known_vars();
        assert!(matches!(result, Err(ConfigError::RedundantModeMissingSecondVpn)));
    }

    #[test]
    fn redundant_mode_with_both_vpns_builds_two_port_pools() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_known_vars();
        std::env::set_var("VPN_MODE", "redundant");
        std::env::set_var("GLUETUN_CONTAINER_NAME", "gluetun1");
        std::env::set_var("GLUETUN_CONTAINER_NAME_2", "gluetun2");
        let config = OrchestratorConfig::from_env().expect("valid redundant config");
        clear_known_vars();
        assert_eq!(config.vpn.sidecars.len(), 2);
        assert_eq!(config.ports.vpn_ranges.len(), 2);
    }

    #[test]
    fn rejects_unrecognized_engine_variant() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_known_vars();
        std::env::set_var("ENGINE_VARIANT", "not-a-variant");
        let result = OrchestratorConfig::from_env();
        clear_known_vars();
        assert!(result.is_err());
    }
}
