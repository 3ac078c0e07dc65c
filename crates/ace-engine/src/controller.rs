use crate::error::{EngineError, Result};
use crate::labels;
use crate::naming;
use crate::variant::{build_args_string, build_cmd_vector, build_conf_string, parse_ports_from_conf, validate_user_ports, EngineVariant};
use crate::vpn_lookup::VpnLookup;
use ace_docker::{ContainerRuntime, ContainerSpec, ContainerStatus};
use ace_ports::PortAllocator;
use ace_state::StateStore;
use ace_types::{EngineRecord, VpnId, VpnMode};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct EngineControllerConfig {
    pub target_image: String,
    pub ops_label: (String, String),
    pub startup_timeout: Duration,
    pub stop_timeout_secs: i64,
    pub map_https: bool,
    pub variant: EngineVariant,
    /// Hard ceiling on live engines (spec.md "blocked ... MAX_REPLICAS
    /// reached" -> 503). Checked inside `provision_engine`'s critical
    /// section so it sees the same consistent engine count the naming
    /// and port-allocation logic does.
    pub max_replicas: usize,
}

/// Translates "desired fleet" into "actual containers" (spec.md §4.1).
/// Idempotent under repeated invocation; the allocation-plus-VPN-selection
/// critical section is serialized by `provision_lock` so concurrent
/// provisioning calls cannot both read "fewer engines on vpn1" and both
/// pick it, skewing the balance the load-balancing rule promises.
pub struct EngineController {
    runtime: Arc<dyn ContainerRuntime>,
    ports: Arc<PortAllocator>,
    state: Arc<StateStore>,
    vpn: Arc<dyn VpnLookup>,
    config: EngineControllerConfig,
    provision_lock: AsyncMutex<()>,
    /// Names claimed by a provision in flight but not yet registered in
    /// `state` (the container isn't running yet). Consulted alongside
    /// `state.list_engines()` while picking the next ordinal so two
    /// concurrent `provision_engine` calls never pick the same name
    /// (spec.md §4.1 "Naming invariant").
    pending_names: std::sync::Mutex<HashSet<String>>,
}

impl EngineController {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        ports: Arc<PortAllocator>,
        state: Arc<StateStore>,
        vpn: Arc<dyn VpnLookup>,
        config: EngineControllerConfig,
    ) -> Self {
        Self { runtime, ports, state, vpn, config, provision_lock: AsyncMutex::new(()), pending_names: std::sync::Mutex::new(HashSet::new()) }
    }

    /// Choose the target VPN per the priority order in spec.md §4.1.
    fn select_target_vpn(&self, vpn_hint: Option<&VpnId>) -> Option<VpnId> {
        if let Some(hint) = vpn_hint {
            return Some(hint.clone());
        }
        if let Some(recovery) = self.vpn.recovery_target() {
            return Some(recovery);
        }
        if let Some(emergency) = self.vpn.emergency_healthy_vpn() {
            return Some(emergency);
        }
        match self.vpn.mode() {
            VpnMode::Disabled => None,
            VpnMode::Single => self.vpn.configured_vpns().into_iter().next(),
            VpnMode::Redundant => {
                let vpns = self.vpn.configured_vpns();
                vpns.into_iter().min_by_key(|v| self.state.engines_for_vpn(v).len())
            }
        }
    }

    pub async fn provision_engine(&self, vpn_hint: Option<VpnId>) -> Result<EngineRecord> {
        // The critical section covers only VPN selection, port allocation
        // and name reservation — the part that reads "engines per VPN" and
        // "names in use" and must be atomic (spec.md §4.1, §4.6). Running
        // the container itself happens after the lock is released so a
        // burst of concurrent provisions actually runs concurrently.
        let (target_vpn, container_http, container_https, name, will_be_forwarded, forwarded_port) = {
            let _guard = self.provision_lock.lock().await;

            if self.state.list_engines().len() >= self.config.max_replicas {
                return Err(EngineError::ReplicaCapReached(self.config.max_replicas));
            }

            let target_vpn = self.select_target_vpn(vpn_hint.as_ref());
            if let Some(vpn) = &target_vpn {
                if !self.vpn.is_healthy(vpn) {
                    return Err(EngineError::VpnUnavailable(vpn.to_string()));
                }
            }

            // Containers placed behind a VPN share that VPN's network
            // namespace (`network_mode: container:<vpn>`), so their ports
            // must come from that VPN's own pool rather than the shared
            // `container_http`/`container_https` pools: two engines behind
            // the same VPN binding the same `container_http` port would
            // collide in the shared namespace (spec.md §4.6).
            let (container_http, container_https) = if let Some(vpn) = &target_vpn {
                let http = self.ports.alloc_vpn_port(vpn)?;
                let https = self.ports.alloc_vpn_port(vpn).map_err(|e| {
                    self.ports.free_vpn_port(vpn, http);
                    e
                })?;
                (http, https)
            } else {
                let http = self.ports.alloc_container_http()?;
                let https = self.ports.alloc_container_https().map_err(|e| {
                    self.ports.free_container_http(http);
                    e
                })?;
                (http, https)
            };

            let mut existing_names: Vec<String> = self.state.list_engines().into_iter().map(|e| e.container_name).collect();
            let mut pending = self.pending_names.lock().unwrap();
            existing_names.extend(pending.iter().cloned());
            let ordinal = naming::next_ordinal(&existing_names);
            let name = naming::container_name(ordinal);
            pending.insert(name.clone());
            drop(pending);

            let forwarded_port = target_vpn.as_ref().and_then(|v| self.vpn.forwarded_port(v));
            let will_be_forwarded = match (&target_vpn, forwarded_port) {
                (Some(vpn), Some(_)) => !self.state.has_forwarded_engine(vpn),
                _ => false,
            };

            (target_vpn, container_http, container_https, name, will_be_forwarded, forwarded_port)
        };
        let p2p_port = if will_be_forwarded { forwarded_port } else { None };

        let mut spec = ContainerSpec::new(&name, &self.config.target_image)
            .with_label(&self.config.ops_label.0, &self.config.ops_label.1)
            .with_label(labels::ACESTREAM_HTTP_PORT, container_http.to_string())
            .with_label(labels::ACESTREAM_HTTPS_PORT, container_https.to_string());

        spec = match self.config.variant {
            EngineVariant::ConfString => {
                let conf = build_conf_string(container_http, container_https);
                let mut spec = spec.with_env("CONF", conf).with_env("HTTP_PORT", container_http.to_string()).with_env("HTTPS_PORT", container_https.to_string());
                if let Some(p2p) = p2p_port {
                    spec = spec.with_env("P2P_PORT", p2p.to_string());
                }
                spec
            }
            EngineVariant::EnvArgs => spec.with_env("ACESTREAM_ARGS", build_args_string(container_http, container_https, p2p_port)),
            EngineVariant::Cmd => spec.with_cmd(build_cmd_vector(container_http, container_https, p2p_port)),
        };

        let host = if let Some(vpn) = &target_vpn {
            let vpn_container = self.vpn.container_name(vpn);
            spec = spec
                .with_label(labels::VPN_CONTAINER, vpn.to_string())
                .with_network_mode(format!("container:{vpn_container}"));
            vpn_container
        } else {
            let host_http = self.ports.alloc_host()?;
            spec = spec
                .with_label(labels::HOST_HTTP_PORT, host_http.to_string())
                .with_port_binding(container_http, host_http);
            if self.config.map_https {
                let host_https = self.ports.alloc_host()?;
                spec = spec
                    .with_label(labels::HOST_HTTPS_PORT, host_https.to_string())
                    .with_port_binding(container_https, host_https);
            }
            "127.0.0.1".to_owned()
        };

        if will_be_forwarded {
            spec = spec.with_label(labels::FORWARDED, "true");
        }

        let run_result = self.run_and_wait(&name, spec).await;
        self.pending_names.lock().unwrap().remove(&name);
        let container_id = match run_result {
            Ok(id) => id,
            Err(e) => {
                self.compensate_failed_provision(&name, container_http, container_https, target_vpn.as_ref());
                return Err(e);
            }
        };

        let mut record = EngineRecord::new(&container_id, &name, &host, container_http);
        record.https_port = Some(container_https);
        record.vpn_id = target_vpn.clone();
        record.forwarded = will_be_forwarded;
        self.state.add_engine(record.clone());
        if let Some(vpn) = &target_vpn {
            if will_be_forwarded {
                self.state.set_forwarded(&container_id, vpn);
            }
        }

        info!(container_id, name, forwarded = will_be_forwarded, "provisioned engine");
        Ok(record)
    }

    async fn run_and_wait(&self, name: &str, spec: ContainerSpec) -> Result<String> {
        let id = self.runtime.run(spec).await?;
        if let Err(e) = self.runtime.wait_running(&id, self.config.startup_timeout).await {
            warn!(name, "engine did not reach running state in time");
            let _ = self.runtime.remove(&id, true).await;
            return Err(e.into());
        }
        Ok(id)
    }

    fn compensate_failed_provision(&self, name: &str, http_port: u16, https_port: u16, vpn: Option<&VpnId>) {
        warn!(name, "compensating failed provision: releasing ports");
        match vpn {
            Some(vpn) => {
                self.ports.free_vpn_port(vpn, http_port);
                self.ports.free_vpn_port(vpn, https_port);
            }
            None => {
                self.ports.free_container_http(http_port);
                self.ports.free_container_https(https_port);
            }
        }
    }

    /// Best-effort stop with a timeout, then remove. The state-store
    /// removal happens first so the selector stops choosing this engine
    /// immediately (spec.md §5 "Ordering guarantees").
    pub async fn stop_engine(&self, container_id: &str) -> Result<()> {
        let Some(record) = self.state.remove_engine(container_id) else {
            return Err(EngineError::NotFound(container_id.to_owned()));
        };

        if let Err(e) = self.runtime.stop(container_id, self.config.stop_timeout_secs).await {
            warn!(container_id, error = %e, "stop failed, forcing removal");
        }
        let _ = self.runtime.remove(container_id, true).await;

        match &record.vpn_id {
            Some(vpn) => {
                self.ports.free_vpn_port(vpn, record.http_port);
                if let Some(https) = record.https_port {
                    self.ports.free_vpn_port(vpn, https);
                }
            }
            None => {
                self.ports.free_container_http(record.http_port);
                if let Some(https) = record.https_port {
                    self.ports.free_container_https(https);
                }
            }
        }
        info!(container_id, "stopped engine");
        Ok(())
    }

    /// Reconciles the state store with observed container-runtime reality.
    /// Called at startup and whenever the runtime reports transient
    /// unavailability (spec.md §4.1 `reindex`).
    pub async fn reindex(&self) -> Result<()> {
        self.ports.clear_all();
        let managed = self.runtime.list_managed(&format!("{}={}", self.config.ops_label.0, self.config.ops_label.1)).await?;

        for container in managed {
            if container.status != ContainerStatus::Running {
                continue;
            }
            let lbl = &container.labels;
            let vpn_id = lbl.get(labels::VPN_CONTAINER).map(|v| VpnId::new(v.clone()));

            // A container launched under Engine Variant A (`CONF` string)
            // may carry its ports only in that string, not in the
            // dedicated labels -- extract and validate them the same way
            // a live provision would (spec.md SUPPLEMENTED BEHAVIOR #4).
            let (conf_http, conf_https) = parse_ports_from_conf(lbl.get("CONF").map(String::as_str).unwrap_or(""));
            if let Err(reason) = validate_user_ports(conf_http, conf_https) {
                warn!(container_id = %container.id, reason = %reason, "ignoring colliding user-supplied CONF ports");
            }

            let http_port_opt = lbl.get(labels::ACESTREAM_HTTP_PORT).and_then(|v| v.parse().ok()).or(conf_http);
            let https_port_opt = lbl.get(labels::ACESTREAM_HTTPS_PORT).and_then(|v| v.parse().ok()).or(conf_https);

            if let Some(p) = http_port_opt {
                match &vpn_id {
                    Some(vpn) => self.ports.reserve_vpn_port(vpn, p),
                    None => self.ports.reserve_container_http(p),
                }
            }
            if let Some(p) = https_port_opt {
                match &vpn_id {
                    Some(vpn) => self.ports.reserve_vpn_port(vpn, p),
                    None => self.ports.reserve_container_https(p),
                }
            }
            if let Some(p) = lbl.get(labels::HOST_HTTP_PORT).and_then(|v| v.parse().ok()) {
                self.ports.reserve_host(p);
            }
            if let Some(p) = lbl.get(labels::HOST_HTTPS_PORT).and_then(|v| v.parse().ok()) {
                self.ports.reserve_host(p);
            }

            if self.state.get_engine(&container.id).is_some() {
                continue;
            }

            let http_port = http_port_opt.unwrap_or(0);
            let host = vpn_id.as_ref().map(|v| self.vpn.container_name(v)).unwrap_or_else(|| "127.0.0.1".to_owned());

            let is_forwarded_label = lbl.get(labels::FORWARDED).map(|v| v == "true").unwrap_or(false);
            let should_be_forwarded =
                is_forwarded_label && vpn_id.as_ref().map(|v| !self.state.has_forwarded_engine(v)).unwrap_or(false);

            let mut record = EngineRecord::new(&container.id, &container.name, &host, http_port);
            record.https_port = https_port_opt;
            record.vpn_id = vpn_id.clone();
            record.forwarded = should_be_forwarded;
            self.state.add_engine(record);

            if should_be_forwarded {
                if let Some(vpn) = &vpn_id {
                    self.state.set_forwarded(&container.id, vpn);
                    info!(container_id = %container.id, "reindexed forwarded engine");
                }
            }
        }
        Ok(())
    }
}
