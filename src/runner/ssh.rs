// SSH connection management with pooling

use std::io::Read;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use ssh2::Session;

use super::{CommandResult, Connection};
use crate::error::PrepError;
use crate::inventory::Host;

/// SSH connection pool, one session per target, reused across tasks.
pub struct ConnectionPool {
    connections: DashMap<String, Arc<SshConnection>>,
    connect_timeout: Duration,
    command_timeout: Duration,
    default_user: Option<String>,
    private_key_path: Option<String>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        ConnectionPool {
            connections: DashMap::new(),
            connect_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(300),
            default_user: None,
            private_key_path: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_default_user(mut self, user: String) -> Self {
        self.default_user = Some(user);
        self
    }

    pub fn with_private_key(mut self, path: String) -> Self {
        self.private_key_path = Some(path);
        self
    }

    /// Get a connection to a host, from the pool or freshly established.
    pub fn get(&self, host: &Host) -> Result<Arc<SshConnection>, PrepError> {
        let key = host.ssh_target();

        if let Some(conn) = self.connections.get(&key) {
            if conn.is_valid() {
                return Ok(Arc::clone(&conn));
            }
        }

        let conn = Arc::new(self.connect(host)?);
        self.connections.insert(key, conn.clone());
        Ok(conn)
    }

    fn connect(&self, host: &Host) -> Result<SshConnection, PrepError> {
        let address = format!("{}:{}", host.address, host.port);

        let tcp = TcpStream::connect_timeout(
            &address.parse().map_err(|e| PrepError::Ssh {
                host: host.name.clone(),
                message: format!("invalid address '{}': {}", address, e),
                suggestion: Some("Check the host address format".to_string()),
            })?,
            self.connect_timeout,
        )
        .map_err(|e| PrepError::Ssh {
            host: host.name.clone(),
            message: format!("connection failed: {}", e),
            suggestion: connection_suggestion(&e),
        })?;

        let mut session = Session::new().map_err(|e| PrepError::Ssh {
            host: host.name.clone(),
            message: format!("failed to create SSH session: {}", e),
            suggestion: None,
        })?;

        session.set_tcp_stream(tcp);
        session.set_timeout(self.connect_timeout.as_millis() as u32);

        session.handshake().map_err(|e| PrepError::Ssh {
            host: host.name.clone(),
            message: format!("SSH handshake failed: {}", e),
            suggestion: Some("Check SSH service is running on the target".to_string()),
        })?;

        let user = if host.user.is_empty() {
            self.default_user
                .clone()
                .or_else(|| std::env::var("USER").ok())
                .unwrap_or_else(|| "root".to_string())
        } else {
            host.user.clone()
        };

        self.authenticate(&mut session, host, &user)?;

        // Commands may run much longer than the handshake
        session.set_timeout(self.command_timeout.as_millis() as u32);

        Ok(SshConnection {
            session,
            host_name: host.name.clone(),
        })
    }

    /// Agent identities first, then the configured key file, then the
    /// conventional default keys.
    fn authenticate(
        &self,
        session: &mut Session,
        host: &Host,
        user: &str,
    ) -> Result<(), PrepError> {
        if let Ok(mut agent) = session.agent() {
            if agent.connect().is_ok() {
                agent.list_identities().ok();
                for identity in agent.identities().unwrap_or_default() {
                    if agent.userauth(user, &identity).is_ok() {
                        return Ok(());
                    }
                }
            }
        }

        let key_paths = self
            .private_key_path
            .iter()
            .map(|p| expand_tilde(p))
            .chain(
                [
                    home_dir().map(|h| h.join(".ssh/id_ed25519")),
                    home_dir().map(|h| h.join(".ssh/id_rsa")),
                ]
                .into_iter()
                .flatten(),
            )
            .collect::<Vec<_>>();

        for key_path in key_paths {
            if key_path.exists()
                && session
                    .userauth_pubkey_file(user, None, &key_path, None)
                    .is_ok()
            {
                return Ok(());
            }
        }

        Err(PrepError::Ssh {
            host: host.name.clone(),
            message: format!("authentication failed for user '{}'", user),
            suggestion: Some(
                "Ensure the SSH key is added to the agent or the configured key file exists"
                    .to_string(),
            ),
        })
    }

    /// Close all pooled connections.
    pub fn close_all(&self) {
        self.connections.clear();
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

/// An authenticated SSH session to one host.
pub struct SshConnection {
    session: Session,
    host_name: String,
}

impl std::fmt::Debug for SshConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConnection")
            .field("host_name", &self.host_name)
            .finish_non_exhaustive()
    }
}

impl SshConnection {
    pub fn is_valid(&self) -> bool {
        self.session.authenticated()
    }

    fn exec_blocking(&self, command: &str) -> Result<CommandResult, PrepError> {
        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| PrepError::Ssh {
                host: self.host_name.clone(),
                message: format!("failed to open channel: {}", e),
                suggestion: None,
            })?;

        channel.exec(command).map_err(|e| PrepError::Ssh {
            host: self.host_name.clone(),
            message: format!("failed to execute command: {}", e),
            suggestion: None,
        })?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        channel.read_to_string(&mut stdout).ok();
        channel.stderr().read_to_string(&mut stderr).ok();

        channel.wait_close().ok();
        let exit_code = channel.exit_status().unwrap_or(-1);

        Ok(CommandResult {
            stdout,
            stderr,
            exit_code,
        })
    }
}

#[async_trait]
impl Connection for SshConnection {
    async fn exec(&self, cmd: &str) -> Result<CommandResult, PrepError> {
        // libssh2 calls are blocking; the per-host worker is the only user
        // of this session, so blocking here is contained
        self.exec_blocking(cmd)
    }

    fn host_name(&self) -> &str {
        &self.host_name
    }
}

fn connection_suggestion(e: &std::io::Error) -> Option<String> {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            Some("Ensure SSH service is running on the target host".to_string())
        }
        std::io::ErrorKind::TimedOut => {
            Some("Check network connectivity and firewall rules".to_string())
        }
        std::io::ErrorKind::PermissionDenied => {
            Some("Check SSH key permissions and authentication".to_string())
        }
        _ => None,
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

/// Expand a leading `~/` against $HOME.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    }
    Path::new(path).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde() {
        std::env::set_var("HOME", "/home/ci");
        assert_eq!(
            expand_tilde("~/.ssh/metasploit-key.pem"),
            PathBuf::from("/home/ci/.ssh/metasploit-key.pem")
        );
        assert_eq!(expand_tilde("/abs/key.pem"), PathBuf::from("/abs/key.pem"));
    }

    #[test]
    fn test_pool_rejects_bad_address() {
        let pool = ConnectionPool::new().with_connect_timeout(Duration::from_millis(50));
        let host = Host::new("not#a#valid#address");

        let err = pool.get(&host).unwrap_err();
        assert!(err.is_unreachable());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_close_all_empties_pool() {
        let pool = ConnectionPool::new();
        pool.close_all();
        assert!(pool.is_empty());
    }
}
