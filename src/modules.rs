// Action lowering - turns typed task descriptors into remote commands

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::error::PrepError;
use crate::play::Action;
use crate::runner::context::{shell_escape, ExecutionContext, TaskOutput};
use crate::runner::Connection;

/// Executes a single action against a host. Stateless; one instance serves
/// the whole run.
pub struct ModuleExecutor;

impl ModuleExecutor {
    pub fn new() -> Self {
        ModuleExecutor
    }

    /// Execute an action. `conn` is None only for actions that evaluate
    /// locally (debug). Transport failures surface as Err; a command that
    /// ran and failed comes back as Ok with the failed flag set.
    pub async fn execute(
        &self,
        action: &Action,
        ctx: &ExecutionContext,
        conn: Option<&dyn Connection>,
    ) -> Result<TaskOutput, PrepError> {
        match action {
            Action::Debug { msg } => self.debug(ctx, msg),
            _ => {
                let conn = conn.ok_or_else(|| PrepError::Runtime {
                    message: format!(
                        "module '{}' requires a connection",
                        action.module_name()
                    ),
                })?;

                match action {
                    Action::Shell { cmd } => self.shell(ctx, conn, cmd).await,
                    Action::AptRepository {
                        repo,
                        codename,
                        validate_certs,
                    } => {
                        self.apt_repository(ctx, conn, repo, codename.as_deref(), *validate_certs)
                            .await
                    }
                    Action::Apt { name, update_cache } => {
                        self.apt(ctx, conn, name, *update_cache).await
                    }
                    Action::AptKey { url } => self.apt_key(ctx, conn, url).await,
                    Action::Pip { name } => self.pip(ctx, conn, name).await,
                    Action::Debug { .. } => unreachable!(),
                }
            }
        }
    }

    fn debug(&self, ctx: &ExecutionContext, msg: &str) -> Result<TaskOutput, PrepError> {
        let rendered = ctx.render_string(msg)?;
        Ok(TaskOutput::success()
            .with_msg(rendered.clone())
            .with_data("msg", Value::String(rendered)))
    }

    async fn shell(
        &self,
        ctx: &ExecutionContext,
        conn: &dyn Connection,
        cmd: &str,
    ) -> Result<TaskOutput, PrepError> {
        let cmd = ctx.render_string(cmd)?;

        if ctx.check_mode {
            return Ok(TaskOutput::changed()
                .with_stdout(format!("Would run shell command: {}", cmd)));
        }

        let wrapped = format!("/bin/sh -c {}", shell_escape(&cmd));
        run_command(ctx, conn, "shell", &wrapped)
            .await
            .map(|out| out.with_data("cmd", Value::String(cmd)))
    }

    async fn apt_repository(
        &self,
        ctx: &ExecutionContext,
        conn: &dyn Connection,
        repo: &str,
        codename: Option<&str>,
        validate_certs: bool,
    ) -> Result<TaskOutput, PrepError> {
        let repo = ctx.render_string(repo)?;

        if ctx.check_mode {
            return Ok(TaskOutput::changed()
                .with_stdout(format!("Would add apt repository: {}", repo)));
        }

        let cmd = format!("add-apt-repository -y {}", shell_escape(&repo));
        let mut output = run_command(ctx, conn, "apt_repository", &cmd)
            .await?
            .with_data("repo", Value::String(repo))
            .with_data("validate_certs", Value::Bool(validate_certs));
        if let Some(codename) = codename {
            output = output.with_data("codename", Value::String(codename.to_string()));
        }
        Ok(output)
    }

    async fn apt(
        &self,
        ctx: &ExecutionContext,
        conn: &dyn Connection,
        name: &str,
        update_cache: bool,
    ) -> Result<TaskOutput, PrepError> {
        let rendered = ctx.render(name)?;
        let packages = package_names(&rendered);
        if packages.is_empty() {
            return Ok(TaskOutput::failed("apt: no package names given"));
        }

        if ctx.check_mode {
            return Ok(TaskOutput::changed()
                .with_stdout(format!("Would install packages: {}", packages.join(" "))));
        }

        let mut cmd = String::new();
        if update_cache {
            cmd.push_str("apt-get update && ");
        }
        cmd.push_str(&format!(
            "DEBIAN_FRONTEND=noninteractive apt-get install -y {}",
            packages.join(" ")
        ));

        run_command(ctx, conn, "apt", &cmd)
            .await
            .map(|out| out.with_data("name", rendered))
    }

    async fn apt_key(
        &self,
        ctx: &ExecutionContext,
        conn: &dyn Connection,
        url: &str,
    ) -> Result<TaskOutput, PrepError> {
        let url = ctx.render_string(url)?;

        if ctx.check_mode {
            return Ok(TaskOutput::changed().with_stdout(format!("Would add apt key from {}", url)));
        }

        let cmd = format!("curl -fsSL {} | apt-key add -", shell_escape(&url));
        run_command(ctx, conn, "apt_key", &cmd)
            .await
            .map(|out| out.with_data("url", Value::String(url)))
    }

    async fn pip(
        &self,
        ctx: &ExecutionContext,
        conn: &dyn Connection,
        name: &str,
    ) -> Result<TaskOutput, PrepError> {
        let name = ctx.render_string(name)?;

        if ctx.check_mode {
            return Ok(TaskOutput::changed()
                .with_stdout(format!("Would install Python package: {}", name)));
        }

        let cmd = format!("pip3 install {}", shell_escape(&name));
        run_command(ctx, conn, "pip", &cmd)
            .await
            .map(|out| out.with_data("name", Value::String(name)))
    }
}

impl Default for ModuleExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a lowered command over the connection, with privilege escalation
/// applied and start/end/delta timings recorded in the payload.
async fn run_command(
    ctx: &ExecutionContext,
    conn: &dyn Connection,
    module: &'static str,
    cmd: &str,
) -> Result<TaskOutput, PrepError> {
    let final_cmd = ctx.wrap_command(cmd);

    let start = Utc::now();
    let result = conn.exec(&final_cmd).await?;
    let end = Utc::now();

    let mut output = if result.success() {
        TaskOutput::changed()
    } else {
        TaskOutput::failed(format!(
            "{} command exited with code {}",
            module, result.exit_code
        ))
        .with_rc(result.exit_code)
    };

    output.stdout = result.stdout;
    output.stderr = result.stderr;

    Ok(output
        .with_data("start", Value::String(format_timestamp(start)))
        .with_data("end", Value::String(format_timestamp(end)))
        .with_data("delta", json!((end - start).num_milliseconds() as f64 / 1000.0)))
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// Package list from a rendered `name` argument: either a list value or a
/// single name string.
fn package_names(rendered: &Value) -> Vec<String> {
    match rendered {
        Value::Array(items) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) => s
            .split_whitespace()
            .map(|s| s.to_string())
            .collect(),
        other => vec![other.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_package_names_from_list() {
        let names = package_names(&json!(["curl", "docker-ce"]));
        assert_eq!(names, vec!["curl", "docker-ce"]);
    }

    #[test]
    fn test_package_names_from_string() {
        let names = package_names(&json!("python3-pip"));
        assert_eq!(names, vec!["python3-pip"]);
    }
}
