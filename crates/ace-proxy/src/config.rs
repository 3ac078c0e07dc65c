use std::time::Duration;

/// Tunables for the Proxy Session Manager and the upstream readers it
/// spawns. The composition root loads these from the environment; tests
/// and the defaults here match the original service's constants.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// How long an empty session (no clients) lingers before teardown, so a
    /// client reconnecting (e.g. a player seeking) does not pay the cost of
    /// reopening the upstream stream.
    pub grace_period: Duration,
    /// Per-engine concurrent stream cap used by the Engine Selector. `None`
    /// is unlimited.
    pub max_streams_per_engine: Option<usize>,
    /// Ring buffer depth, in chunks.
    pub ring_buffer_capacity: usize,
    /// Upstream connect timeout.
    pub connect_timeout: Duration,
    /// How long a single "is there a chunk yet" poll on the upstream
    /// response may take before it counts as one no-data tick.
    pub no_data_check_interval: Duration,
    /// Consecutive no-data ticks tolerated before the reader gives up on a
    /// stalled upstream. `no_data_check_interval * no_data_timeout_checks`
    /// is the effective total silence budget.
    pub no_data_timeout_checks: u32,
    /// How long a client's first read may wait for the buffer to produce
    /// its first chunk before the client is told the stream is
    /// unavailable (unless the writer is still alive, in which case the
    /// client proceeds anyway and waits on its own read loop).
    pub initial_data_wait_timeout: Duration,
    /// Poll interval used while waiting for that first chunk.
    pub initial_data_check_interval: Duration,
    /// Interval at which a connected client is expected to send a
    /// heartbeat; see `ghost_client_multiplier`.
    pub client_heartbeat_interval: Duration,
    /// A client is considered a ghost (vanished without an orderly
    /// disconnect) once `client_heartbeat_interval * ghost_client_multiplier`
    /// has elapsed since its last heartbeat.
    pub ghost_client_multiplier: u32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            max_streams_per_engine: None,
            ring_buffer_capacity: 1000,
            connect_timeout: Duration::from_secs(5),
            no_data_check_interval: Duration::from_secs(1),
            no_data_timeout_checks: 60,
            initial_data_wait_timeout: Duration::from_secs(10),
            initial_data_check_interval: Duration::from_millis(200),
            client_heartbeat_interval: Duration::from_secs(15),
            ghost_client_multiplier: 3,
        }
    }
}

impl ProxyConfig {
    pub fn ghost_ttl(&self) -> Duration {
        self.client_heartbeat_interval * self.ghost_client_multiplier
    }
}
