// Per-task execution context and result payloads

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::{BecomeMethod, RunOptions};
use crate::error::PrepError;
use crate::inventory::Host;
use crate::vars::{value_to_string, VariableManager};

/// Context for executing one task on one host. Carries the variable scope
/// (task vars layered over the shared store) and the escalation settings
/// from the run options.
#[derive(Clone)]
pub struct ExecutionContext {
    pub host: Arc<Host>,
    vars: Arc<VariableManager>,
    task_vars: HashMap<String, Value>,
    pub check_mode: bool,
    pub become_enabled: bool,
    pub become_method: BecomeMethod,
    pub become_user: String,
}

impl ExecutionContext {
    pub fn new(
        host: Arc<Host>,
        vars: Arc<VariableManager>,
        options: &RunOptions,
        task_vars: HashMap<String, Value>,
    ) -> Self {
        ExecutionContext {
            host,
            vars,
            task_vars,
            check_mode: options.check,
            become_enabled: options.become_enabled,
            become_method: options.become_method,
            become_user: options.become_user.clone(),
        }
    }

    /// Render a template against this task's variable scope.
    pub fn render(&self, template: &str) -> Result<Value, PrepError> {
        self.vars.render(&self.host.name, template, &self.task_vars)
    }

    /// Render a template and flatten the result to a string.
    pub fn render_string(&self, template: &str) -> Result<String, PrepError> {
        Ok(value_to_string(&self.render(template)?))
    }

    /// Wrap a command with the configured privilege escalation.
    pub fn wrap_command(&self, cmd: &str) -> String {
        if !self.become_enabled {
            return cmd.to_string();
        }

        match self.become_method {
            BecomeMethod::Sudo => {
                if self.become_user == "root" {
                    format!("sudo -n -- sh -c {}", shell_escape(cmd))
                } else {
                    format!(
                        "sudo -n -u {} -- sh -c {}",
                        self.become_user,
                        shell_escape(cmd)
                    )
                }
            }
            BecomeMethod::Su => format!(
                "su -s /bin/sh {} -c {}",
                self.become_user,
                shell_escape(cmd)
            ),
        }
    }
}

/// Escape a command for use inside single quotes in sh -c.
pub fn shell_escape(cmd: &str) -> String {
    format!("'{}'", cmd.replace('\'', "'\"'\"'"))
}

/// Output from one task execution. Converted into the semi-structured
/// result payload that sinks receive and register names store.
#[derive(Debug, Clone, Default)]
pub struct TaskOutput {
    pub stdout: String,
    pub stderr: String,
    pub rc: i32,
    pub changed: bool,
    pub failed: bool,
    pub skipped: bool,
    pub msg: Option<String>,
    /// Module-specific fields merged into the payload (cmd, repo, timings…)
    pub data: Map<String, Value>,
}

impl TaskOutput {
    pub fn success() -> Self {
        TaskOutput::default()
    }

    pub fn changed() -> Self {
        TaskOutput {
            changed: true,
            ..Default::default()
        }
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        TaskOutput {
            rc: 1,
            failed: true,
            msg: Some(msg.into()),
            ..Default::default()
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        TaskOutput {
            skipped: true,
            msg: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn with_rc(mut self, rc: i32) -> Self {
        self.rc = rc;
        self
    }

    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// The semi-structured result payload: standard fields plus whatever
    /// the module put in `data`.
    pub fn to_payload(&self) -> Value {
        let mut map = Map::new();

        map.insert("changed".to_string(), Value::Bool(self.changed));
        map.insert("failed".to_string(), Value::Bool(self.failed));
        map.insert("rc".to_string(), Value::from(self.rc));
        map.insert("stdout".to_string(), Value::String(self.stdout.clone()));
        map.insert("stderr".to_string(), Value::String(self.stderr.clone()));

        let lines: Vec<Value> = self
            .stdout
            .lines()
            .map(|l| Value::String(l.to_string()))
            .collect();
        map.insert("stdout_lines".to_string(), Value::Array(lines));

        if self.skipped {
            map.insert("skipped".to_string(), Value::Bool(true));
        }
        if let Some(ref msg) = self.msg {
            map.insert("msg".to_string(), Value::String(msg.clone()));
        }

        for (k, v) in &self.data {
            map.insert(k.clone(), v.clone());
        }

        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Inventory;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn context(options: RunOptions) -> ExecutionContext {
        let inv = Inventory::from_sources("web1,").unwrap();
        let host = Arc::new(inv.get_host("web1").unwrap().clone());
        let vars = Arc::new(VariableManager::new(&inv));
        ExecutionContext::new(host, vars, &options, HashMap::new())
    }

    #[test]
    fn test_wrap_command_plain() {
        let ctx = context(RunOptions::new());
        assert_eq!(ctx.wrap_command("ls"), "ls");
    }

    #[test]
    fn test_wrap_command_sudo_root() {
        let ctx = context(RunOptions::new().with_become(BecomeMethod::Sudo, "root"));
        assert_eq!(ctx.wrap_command("ls"), "sudo -n -- sh -c 'ls'");
    }

    #[test]
    fn test_wrap_command_sudo_other_user() {
        let ctx = context(RunOptions::new().with_become(BecomeMethod::Sudo, "deploy"));
        assert_eq!(ctx.wrap_command("ls"), "sudo -n -u deploy -- sh -c 'ls'");
    }

    #[test]
    fn test_shell_escape_single_quotes() {
        assert_eq!(shell_escape("echo 'hi'"), "'echo '\"'\"'hi'\"'\"''");
    }

    #[test]
    fn test_payload_shape() {
        let output = TaskOutput::changed()
            .with_stdout("bin\netc")
            .with_data("cmd", json!("ls"));
        let payload = output.to_payload();

        assert_eq!(payload["changed"], json!(true));
        assert_eq!(payload["failed"], json!(false));
        assert_eq!(payload["rc"], json!(0));
        assert_eq!(payload["stdout"], json!("bin\netc"));
        assert_eq!(payload["stdout_lines"], json!(["bin", "etc"]));
        assert_eq!(payload["cmd"], json!("ls"));
        assert!(payload.get("skipped").is_none());
    }

    #[test]
    fn test_failed_payload() {
        let payload = TaskOutput::failed("command exited with code 2")
            .with_rc(2)
            .to_payload();

        assert_eq!(payload["failed"], json!(true));
        assert_eq!(payload["rc"], json!(2));
        assert_eq!(payload["msg"], json!("command exited with code 2"));
    }
}
