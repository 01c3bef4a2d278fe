//! Known tactical-edge nodes reachable from this gateway.
//!
//! Node topology is static for now — the gateway ships with a fixed
//! roster rather than discovering peers dynamically.

use std::collections::BTreeSet;

pub trait NodeRegistry: Send + Sync + 'static {
    /// Nodes this gateway can deliver to directly right now.
    fn is_connected(&self, node_id: &str) -> bool;

    /// Every node this gateway knows about, connected or not.
    fn list(&self) -> Vec<String>;
}

pub struct StaticNodeRegistry {
    connected: BTreeSet<&'static str>,
    known: BTreeSet<&'static str>,
}

impl Default for StaticNodeRegistry {
    fn default() -> Self {
        Self {
            connected: BTreeSet::from(["NODE-ALPHA", "NODE-BRAVO"]),
            known: BTreeSet::from(["NODE-ALPHA", "NODE-BRAVO", "NODE-ZULU"]),
        }
    }
}

impl NodeRegistry for StaticNodeRegistry {
    fn is_connected(&self, node_id: &str) -> bool {
        self.connected.contains(node_id)
    }

    fn list(&self) -> Vec<String> {
        self.known.iter().map(|s| s.to_string()).collect()
    }
}
