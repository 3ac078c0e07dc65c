use crate::error::{PortError, Result};
use crate::pool::PortPool;
use ace_types::VpnId;
use std::collections::HashMap;
use std::sync::Mutex;

/// The four logical pools of spec.md §4.6, behind a single allocator-wide
/// mutex. Allocation is not a hot path, so a single lock guarding a handful
/// of linear scans is the right tradeoff over finer-grained locking.
pub struct PortAllocator {
    inner: Mutex<Inner>,
}

struct Inner {
    host: PortPool,
    container_http: PortPool,
    container_https: PortPool,
    vpn_pools: HashMap<VpnId, PortPool>,
}

/// Construction parameters, one range per pool plus the VPN pools keyed by
/// VPN id (mirrors `GLUETUN_PORT_RANGE_1`/`_2` in the original configuration).
pub struct PortAllocatorConfig {
    pub host_range: (u16, u16),
    pub container_http_range: (u16, u16),
    pub container_https_range: (u16, u16),
    pub vpn_ranges: Vec<(VpnId, u16, u16)>,
}

impl PortAllocator {
    pub fn new(cfg: PortAllocatorConfig) -> Self {
        let mut vpn_pools = HashMap::new();
        for (id, min, max) in cfg.vpn_ranges {
            vpn_pools.insert(id, PortPool::new(min, max));
        }
        Self {
            inner: Mutex::new(Inner {
                host: PortPool::new(cfg.host_range.0, cfg.host_range.1),
                container_http: PortPool::new(cfg.container_http_range.0, cfg.container_http_range.1),
                container_https: PortPool::new(cfg.container_https_range.0, cfg.container_https_range.1),
                vpn_pools,
            }),
        }
    }

    pub fn alloc_host(&self) -> Result<u16> {
        self.inner.lock().unwrap().host.alloc()
    }

    pub fn alloc_container_http(&self) -> Result<u16> {
        self.inner.lock().unwrap().container_http.alloc()
    }

    pub fn alloc_container_https(&self) -> Result<u16> {
        self.inner.lock().unwrap().container_https.alloc()
    }

    pub fn alloc_vpn_port(&self, vpn: &VpnId) -> Result<u16> {
        let mut inner = self.inner.lock().unwrap();
        let pool = inner
            .vpn_pools
            .get_mut(vpn)
            .ok_or_else(|| PortError::UnknownVpnPool(vpn.to_string()))?;
        pool.alloc()
    }

    pub fn reserve_host(&self, port: u16) {
        self.inner.lock().unwrap().host.reserve(port);
    }

    pub fn reserve_container_http(&self, port: u16) {
        self.inner.lock().unwrap().container_http.reserve(port);
    }

    pub fn reserve_container_https(&self, port: u16) {
        self.inner.lock().unwrap().container_https.reserve(port);
    }

    pub fn reserve_vpn_port(&self, vpn: &VpnId, port: u16) {
        if let Some(pool) = self.inner.lock().unwrap().vpn_pools.get_mut(vpn) {
            pool.reserve(port);
        }
    }

    pub fn free_host(&self, port: u16) {
        self.inner.lock().unwrap().host.free(port);
    }

    pub fn free_container_http(&self, port: u16) {
        self.inner.lock().unwrap().container_http.free(port);
    }

    pub fn free_container_https(&self, port: u16) {
        self.inner.lock().unwrap().container_https.free(port);
    }

    pub fn free_vpn_port(&self, vpn: &VpnId, port: u16) {
        if let Some(pool) = self.inner.lock().unwrap().vpn_pools.get_mut(vpn) {
            pool.free(port);
        }
    }

    /// Clears every pool. Called before a reindex sweep so re-reserving
    /// observed ports can never double-count (spec.md §4.1 `reindex`).
    pub fn clear_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.host.clear();
        inner.container_http.clear();
        inner.container_https.clear();
        for pool in inner.vpn_pools.values_mut() {
            pool.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator() -> PortAllocator {
        PortAllocator::new(PortAllocatorConfig {
            host_range: (19000, 19009),
            container_http_range: (40000, 40009),
            container_https_range: (45000, 45009),
            vpn_ranges: vec![(VpnId::new("vpn1"), 50000, 50004), (VpnId::new("vpn2"), 51000, 51004)],
        })
    }

    #[test]
    fn pools_are_independent() {
        let alloc = allocator();
        assert_eq!(alloc.alloc_host().unwrap(), 19000);
        assert_eq!(alloc.alloc_container_http().unwrap(), 40000);
        assert_eq!(alloc.alloc_container_https().unwrap(), 45000);
    }

    #[test]
    fn vpn_pools_do_not_interfere() {
        let alloc = allocator();
        let vpn1 = VpnId::new("vpn1");
        let vpn2 = VpnId::new("vpn2");
        assert_eq!(alloc.alloc_vpn_port(&vpn1).unwrap(), 50000);
        assert_eq!(alloc.alloc_vpn_port(&vpn2).unwrap(), 51000);
    }

    #[test]
    fn unknown_vpn_pool_errors() {
        let alloc = allocator();
        let ghost = VpnId::new("ghost");
        assert!(matches!(alloc.alloc_vpn_port(&ghost), Err(PortError::UnknownVpnPool(_))));
    }

    #[test]
    fn clear_all_resets_every_pool() {
        let alloc = allocator();
        let vpn1 = VpnId::new("vpn1");
        alloc.alloc_host().unwrap();
        alloc.alloc_vpn_port(&vpn1).unwrap();
        alloc.clear_all();
        assert_eq!(alloc.alloc_host().unwrap(), 19000);
        assert_eq!(alloc.alloc_vpn_port(&vpn1).unwrap(), 50000);
    }

    #[test]
    fn reserve_then_free_round_trips() {
        let alloc = allocator();
        alloc.reserve_host(19005);
        alloc.free_host(19005);
        alloc.reserve_host(19005);
        // idempotent: freeing twice does not panic or double count
        alloc.free_host(19005);
        alloc.free_host(19005);
    }
}
