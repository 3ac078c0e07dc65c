//! Performs the actual HTTP liveness probe spec.md §4.3 describes only in
//! the abstract ("Target: each engine's HTTP liveness endpoint") and feeds
//! the boolean result into [`ace_engine::HealthManager::record_probe_result`],
//! which owns the failure-counting/grace-period state machine.
//!
//! `original_source/app/services/health_manager.py` imports
//! `check_acestream_health` from a sibling module this retrieval pack does
//! not include, so the concrete endpoint is a documented decision rather
//! than a grounded one: AceStream's engine API exposes
//! `/webui/api/service?method=get_version` as a cheap, side-effect-free
//! call that only succeeds once the engine's web API is actually serving
//! requests, which is what "liveness" needs here (see DESIGN.md).

use ace_engine::HealthManager;
use ace_state::StateStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

pub struct HealthProbe {
    http: reqwest::Client,
    manager: Arc<HealthManager>,
    state: Arc<StateStore>,
}

impl HealthProbe {
    pub fn new(manager: Arc<HealthManager>, state: Arc<StateStore>, probe_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder().timeout(probe_timeout).build().unwrap_or_default(),
            manager,
            state,
        }
    }

    /// One pass over every currently known engine. Never propagates
    /// errors: an unresponsive engine must not stall the probe loop for
    /// every other engine (spec.md §5 "per-engine probe timeout applies").
    pub async fn tick(&self) {
        for engine in self.state.list_engines() {
            let url = format!("http://{}:{}/webui/api/service?method=get_version", engine.host, engine.http_port);
            let succeeded = match self.http.get(&url).send().await {
                Ok(resp) => resp.status().is_success(),
                Err(err) => {
                    debug!(container_id = %engine.container_id, error = %err, "engine liveness probe failed");
                    false
                }
            };
            self.manager.record_probe_result(&engine.container_id, succeeded).await;
        }
    }

    /// Runs the probe at `interval` until `cancel` reports cancellation,
    /// checked between ticks so an in-flight round of probes completes.
    pub async fn run(&self, interval: Duration, mut cancel: watch::Receiver<bool>) {
        loop {
            self.tick().await;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

/// Runs the [`HealthManager`]'s own replacement-loop tick on an interval,
/// separately from probing (spec.md §4.3 "replacement loop" vs "probe").
pub async fn run_replacement_loop(manager: Arc<HealthManager>, mut cancel: watch::Receiver<bool>) {
    loop {
        manager.tick().await;
        tokio::select! {
            _ = tokio::time::sleep(manager.health_check_interval()) => {}
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_probe_is_send_and_sync() {
        fn assert_bounds<T: Send + Sync>() {}
        assert_bounds::<HealthProbe>();
    }
}
