//! Global port registry shared across every running engine in this
//! process.
//!
//! Grounded directly on `original_source/backend/core/base_engine_manager.py`'s
//! module-level `_global_used_ports: Set[int]` and `find_free_port`: scan
//! sequentially from a start port, skip anything already claimed, and
//! probe with an actual bind so a port some other, non-forge process
//! already holds is never handed out. The port is registered the instant
//! the bind probe succeeds, before the caller does anything else with
//! it, to avoid a race between two concurrent `find_free_port` calls.

use std::collections::HashSet;
use std::net::TcpListener;

use parking_lot::Mutex;

use crate::error::EngineError;

#[derive(Default)]
pub struct PortRegistry {
    used: Mutex<HashSet<u16>>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt a port already in use by a container or process this
    /// manager discovered on startup (spec.md "reconnect to engines left
    /// running by a previous process"), so a later scan never reissues it.
    pub fn adopt(&self, port: u16) {
        self.used.lock().insert(port);
    }

    pub fn release(&self, port: u16) {
        self.used.lock().remove(&port);
    }

    /// Scan `[start, max]` for the first port that is neither already
    /// claimed by this registry nor held by another process on the host.
    pub fn find_free_port(&self, start: u16, max: u16) -> Result<u16, EngineError> {
        let mut used = self.used.lock();
        for port in start..=max {
            if used.contains(&port) {
                continue;
            }
            if TcpListener::bind(("127.0.0.1", port)).is_ok() {
                used.insert(port);
                return Ok(port);
            }
        }
        Err(EngineError::PortExhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_and_reserves_a_port() {
        let registry = PortRegistry::new();
        let port = registry.find_free_port(19000, 19100).unwrap();
        assert!((19000..=19100).contains(&port));
        // Claimed, so a second call skips it.
        let second = registry.find_free_port(19000, 19100).unwrap();
        assert_ne!(port, second);
    }

    #[test]
    fn released_port_can_be_reused() {
        let registry = PortRegistry::new();
        let port = registry.find_free_port(19200, 19201).unwrap();
        registry.release(port);
        let again = registry.find_free_port(19200, 19201).unwrap();
        assert_eq!(port, again);
    }

    #[test]
    fn exhausted_range_is_an_error() {
        let registry = PortRegistry::new();
        registry.adopt(19300);
        let err = registry.find_free_port(19300, 19300).unwrap_err();
        assert!(matches!(err, EngineError::PortExhausted));
    }
}
