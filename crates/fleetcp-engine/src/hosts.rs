//! Host registry and endpoint resolution

use crate::command::Endpoint;
use crate::mode::LocalAliases;
use fleetcp_config::ServerDescriptor;
use fleetcp_types::{Error, Result, Topology};

/// Registered servers plus the control-host alias set
#[derive(Debug, Clone)]
pub struct HostRegistry {
    servers: Vec<ServerDescriptor>,
    aliases: LocalAliases,
}

impl HostRegistry {
    /// Build the registry from configured servers and the control address
    pub fn new(servers: Vec<ServerDescriptor>, aliases: LocalAliases) -> Self {
        Self { servers, aliases }
    }

    /// Look up a server by name or address
    pub fn find(&self, key: &str) -> Option<&ServerDescriptor> {
        self.servers
            .iter()
            .find(|s| s.name == key || s.address == key)
    }

    /// All registered servers
    pub fn servers(&self) -> &[ServerDescriptor] {
        &self.servers
    }

    /// The control-host alias set
    pub fn aliases(&self) -> &LocalAliases {
        &self.aliases
    }

    /// Resolve a host key to an endpoint. Control-host aliases resolve to
    /// `Local`; anything else must be a registered server.
    pub fn resolve(&self, key: &str) -> Result<Endpoint> {
        if self.aliases.is_local(key) {
            return Ok(Endpoint::Local);
        }
        self.find(key)
            .cloned()
            .map(Endpoint::Remote)
            .ok_or_else(|| Error::validation(format!("unknown host: {}", key)))
    }

    /// Resolve both endpoints of a transfer and classify its topology
    pub fn resolve_pair(&self, source: &str, target: &str) -> Result<(Endpoint, Endpoint, Topology)> {
        let topology = self.aliases.resolve_topology(source, target);
        Ok((self.resolve(source)?, self.resolve(target)?, topology))
    }

    /// Default browse path for a host key
    pub fn default_path(&self, key: &str) -> String {
        if self.aliases.is_local(key) {
            return "/".to_string();
        }
        self.find(key)
            .map(ServerDescriptor::default_path)
            .unwrap_or_else(|| "/".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetcp_types::OsKind;

    fn registry() -> HostRegistry {
        let servers = vec![
            ServerDescriptor {
                name: "lin01".to_string(),
                address: "10.20.0.5".to_string(),
                user: "ops".to_string(),
                password: Some("pw".to_string()),
                key_path: None,
                os: OsKind::Posix,
                port: None,
                default_path: None,
            },
            ServerDescriptor {
                name: "win01".to_string(),
                address: "10.20.0.7".to_string(),
                user: "ops".to_string(),
                password: Some("pw".to_string()),
                key_path: None,
                os: OsKind::Windows,
                port: None,
                default_path: Some("D:/share".to_string()),
            },
        ];
        HostRegistry::new(
            servers,
            LocalAliases::from_aliases(["localhost", "127.0.0.1", "10.20.0.1"]),
        )
    }

    #[test]
    fn test_find_by_name_or_address() {
        let registry = registry();
        assert!(registry.find("lin01").is_some());
        assert!(registry.find("10.20.0.7").is_some());
        assert!(registry.find("10.9.9.9").is_none());
    }

    #[test]
    fn test_resolve_pair_classifies_topology() {
        let registry = registry();
        let (source, _, topology) = registry.resolve_pair("localhost", "win01").unwrap();
        assert!(matches!(source, Endpoint::Local));
        assert_eq!(topology, Topology::LocalToRemote);

        let (_, _, topology) = registry.resolve_pair("lin01", "win01").unwrap();
        assert_eq!(topology, Topology::RemoteToRemote);
    }

    #[test]
    fn test_unknown_remote_host_rejected() {
        assert!(registry().resolve("10.9.9.9").is_err());
    }

    #[test]
    fn test_default_paths() {
        let registry = registry();
        assert_eq!(registry.default_path("win01"), "D:/share");
        assert_eq!(registry.default_path("lin01"), "/home/ops");
        assert_eq!(registry.default_path("localhost"), "/");
    }
}
