// Inventory - the set of target hosts for a run

use std::collections::HashMap;

use serde_json::Value;

use crate::error::PrepError;

/// A single host in the inventory
#[derive(Debug, Clone)]
pub struct Host {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub user: String,
    pub vars: HashMap<String, Value>,
}

impl Host {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Host {
            address: name.clone(),
            name,
            port: 22,
            user: String::new(),
            vars: HashMap::new(),
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: Value) -> Self {
        self.vars.insert(key.into(), value);
        self
    }

    /// SSH connection string (user@host:port)
    pub fn ssh_target(&self) -> String {
        if self.user.is_empty() {
            format!("{}:{}", self.address, self.port)
        } else {
            format!("{}@{}:{}", self.user, self.address, self.port)
        }
    }

    /// Whether this host should use the local connection
    pub fn is_local(&self) -> bool {
        if let Some(Value::String(conn)) = self.vars.get("ansible_connection") {
            if conn == "local" {
                return true;
            }
        }

        matches!(self.name.as_str(), "localhost" | "127.0.0.1" | "::1")
            || matches!(self.address.as_str(), "localhost" | "127.0.0.1" | "::1")
    }

    /// A localhost host with the local connection forced on
    pub fn localhost() -> Self {
        Host::new("localhost")
            .with_address("127.0.0.1")
            .with_var("ansible_connection", Value::String("local".to_string()))
    }
}

/// The complete inventory. Hosts keep their declaration order so a run
/// visits them deterministically.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    hosts: Vec<Host>,
    pub default_user: Option<String>,
}

impl Inventory {
    pub fn new() -> Self {
        Inventory::default()
    }

    /// Build an inventory from a comma-separated host string, e.g.
    /// "18.194.205.225," or "web1.example.com,web2.example.com".
    /// A trailing comma marks the string as a host list rather than a file
    /// path, so empty segments are skipped.
    pub fn from_sources(sources: &str) -> Result<Self, PrepError> {
        let mut inv = Inventory::new();

        for host_str in sources.split(',') {
            let host_str = host_str.trim();
            if host_str.is_empty() {
                continue;
            }
            inv.add_host(Host::new(host_str));
        }

        if inv.hosts.is_empty() {
            return Err(PrepError::Inventory {
                message: format!("no hosts found in source '{}'", sources),
            });
        }

        Ok(inv)
    }

    pub fn with_default_user(mut self, user: impl Into<String>) -> Self {
        self.default_user = Some(user.into());
        self
    }

    /// Add a host, replacing any previous host with the same name.
    pub fn add_host(&mut self, host: Host) {
        if let Some(existing) = self.hosts.iter_mut().find(|h| h.name == host.name) {
            *existing = host;
        } else {
            self.hosts.push(host);
        }
    }

    pub fn get_host(&self, name: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.name == name)
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// Hosts matching a play's target pattern. "all" and "*" select every
    /// host; anything else matches a single host by name.
    pub fn matching(&self, pattern: &str) -> Vec<&Host> {
        match pattern {
            "all" | "*" => self.hosts.iter().collect(),
            name => self.hosts.iter().filter(|h| h.name == name).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_host_creation() {
        let host = Host::new("web1")
            .with_address("192.168.1.10")
            .with_port(2222)
            .with_user("admin");

        assert_eq!(host.name, "web1");
        assert_eq!(host.ssh_target(), "admin@192.168.1.10:2222");
        assert!(!host.is_local());
    }

    #[test]
    fn test_localhost_detection() {
        assert!(Host::localhost().is_local());
        assert!(Host::new("127.0.0.1").is_local());
        assert!(!Host::new("18.194.205.225").is_local());

        let forced = Host::new("build-box")
            .with_var("ansible_connection", Value::String("local".to_string()));
        assert!(forced.is_local());
    }

    #[test]
    fn test_from_sources_trailing_comma() {
        let inv = Inventory::from_sources("18.194.205.225,").unwrap();

        assert_eq!(inv.host_count(), 1);
        let host = inv.get_host("18.194.205.225").unwrap();
        assert_eq!(host.address, "18.194.205.225");
        assert_eq!(host.port, 22);
    }

    #[test]
    fn test_from_sources_multiple() {
        let inv = Inventory::from_sources("web1, web2,db1").unwrap();

        assert_eq!(inv.host_count(), 3);
        let names: Vec<_> = inv.hosts().iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["web1", "web2", "db1"]);
    }

    #[test]
    fn test_from_sources_empty_is_error() {
        assert!(Inventory::from_sources(",").is_err());
        assert!(Inventory::from_sources("").is_err());
    }

    #[test]
    fn test_matching_pattern() {
        let inv = Inventory::from_sources("web1,web2,").unwrap();

        assert_eq!(inv.matching("all").len(), 2);
        assert_eq!(inv.matching("web2").len(), 1);
        assert!(inv.matching("db9").is_empty());
    }
}
