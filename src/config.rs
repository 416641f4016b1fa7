// Run options - the immutable configuration record for a provisioning run

use std::path::PathBuf;
use std::time::Duration;

/// Transport used to reach hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Ssh,
    Local,
}

/// Privilege escalation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BecomeMethod {
    Sudo,
    Su,
}

/// Configuration for one run. Built once with the `with_*` builders and
/// never mutated afterwards; the runner only ever sees it behind a shared
/// reference.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// How to reach hosts (per-host localhost detection still applies)
    pub connection: ConnectionKind,
    /// Search path for out-of-tree modules. The embedded runner has none;
    /// a non-empty path is reported and ignored.
    pub module_path: Vec<PathBuf>,
    /// Upper bound on hosts provisioned in parallel
    pub forks: usize,
    /// Whether to escalate privileges for every task
    pub become_enabled: bool,
    pub become_method: BecomeMethod,
    pub become_user: String,
    /// Dry run - report what would change without touching the host
    pub check: bool,
    /// Include diffs in results where a module can produce them
    pub diff: bool,
    pub verbosity: u8,
    /// Private key for SSH auth; agent identities are tried first
    pub private_key_file: Option<String>,
    /// Login user on the remote side
    pub remote_user: Option<String>,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

impl RunOptions {
    pub fn new() -> Self {
        RunOptions {
            connection: ConnectionKind::Ssh,
            module_path: Vec::new(),
            forks: 10,
            become_enabled: false,
            become_method: BecomeMethod::Sudo,
            become_user: "root".to_string(),
            check: false,
            diff: false,
            verbosity: 0,
            private_key_file: None,
            remote_user: None,
            connect_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_connection(mut self, kind: ConnectionKind) -> Self {
        self.connection = kind;
        self
    }

    pub fn with_forks(mut self, forks: usize) -> Self {
        self.forks = forks;
        self
    }

    pub fn with_become(mut self, method: BecomeMethod, user: impl Into<String>) -> Self {
        self.become_enabled = true;
        self.become_method = method;
        self.become_user = user.into();
        self
    }

    pub fn with_check(mut self, check: bool) -> Self {
        self.check = check;
        self
    }

    pub fn with_diff(mut self, diff: bool) -> Self {
        self.diff = diff;
        self
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_private_key(mut self, path: impl Into<String>) -> Self {
        self.private_key_file = Some(path.into());
        self
    }

    pub fn with_remote_user(mut self, user: impl Into<String>) -> Self {
        self.remote_user = Some(user.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = RunOptions::new();

        assert_eq!(options.connection, ConnectionKind::Ssh);
        assert_eq!(options.forks, 10);
        assert!(!options.become_enabled);
        assert!(!options.check);
        assert!(options.private_key_file.is_none());
    }

    #[test]
    fn test_builder() {
        let options = RunOptions::new()
            .with_forks(4)
            .with_become(BecomeMethod::Sudo, "root")
            .with_private_key("~/.ssh/id_ed25519")
            .with_remote_user("ubuntu");

        assert_eq!(options.forks, 4);
        assert!(options.become_enabled);
        assert_eq!(options.become_user, "root");
        assert_eq!(options.remote_user.as_deref(), Some("ubuntu"));
        assert_eq!(
            options.private_key_file.as_deref(),
            Some("~/.ssh/id_ed25519")
        );
    }
}
