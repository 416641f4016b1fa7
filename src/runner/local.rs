// Local command execution without SSH

use async_trait::async_trait;
use tokio::process::Command;

use super::{CommandResult, Connection};
use crate::error::PrepError;

/// Connection that runs commands on the control node itself. Used for
/// localhost targets and for runs that force the local transport.
pub struct LocalConnection {
    host_name: String,
}

impl LocalConnection {
    pub fn new(host_name: impl Into<String>) -> Self {
        LocalConnection {
            host_name: host_name.into(),
        }
    }
}

#[async_trait]
impl Connection for LocalConnection {
    async fn exec(&self, cmd: &str) -> Result<CommandResult, PrepError> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .output()
            .await
            .map_err(|e| PrepError::Runtime {
                message: format!("failed to execute local command: {}", e),
            })?;

        Ok(CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    fn host_name(&self) -> &str {
        &self.host_name
    }
}
