//! Transfer topology resolution
//!
//! Whether an address means "the control host" is a set-membership
//! question, not string equality: `localhost`, `127.0.0.1`, the outbound
//! interface address, and the configured control address all name the same
//! machine. The alias set is computed once at startup and consulted by a
//! pure classification function.

use fleetcp_types::Topology;
use std::collections::HashSet;
use std::net::UdpSocket;
use tracing::debug;

/// The set of addresses that resolve to the control host
#[derive(Debug, Clone)]
pub struct LocalAliases {
    aliases: HashSet<String>,
}

impl LocalAliases {
    /// Build the alias set from the configured control address plus the
    /// machine's own loopback and outbound-interface addresses.
    pub fn detect(control_address: &str) -> Self {
        let mut aliases = HashSet::new();
        aliases.insert("localhost".to_string());
        aliases.insert("127.0.0.1".to_string());
        aliases.insert(control_address.to_string());
        if let Some(outbound) = outbound_address() {
            debug!("Outbound interface address: {}", outbound);
            aliases.insert(outbound);
        }
        Self { aliases }
    }

    /// Build an alias set from explicit members, for tests and callers
    /// that already know the machine's addresses.
    pub fn from_aliases<I, S>(aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            aliases: aliases.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the address names the control host
    pub fn is_local(&self, address: &str) -> bool {
        self.aliases.contains(address)
    }

    /// Classify a (source, target) pair into its transfer topology
    pub fn resolve_topology(&self, source: &str, target: &str) -> Topology {
        match (self.is_local(source), self.is_local(target)) {
            (true, true) => Topology::LocalToLocal,
            (true, false) => Topology::LocalToRemote,
            (false, true) => Topology::RemoteToLocal,
            (false, false) => Topology::RemoteToRemote,
        }
    }
}

/// Address of the interface that default-routes outward. The socket is
/// never written to; connecting a UDP socket only selects a route.
fn outbound_address() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    Some(socket.local_addr().ok()?.ip().to_string())
}
