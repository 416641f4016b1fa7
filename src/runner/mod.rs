// Runner - task queue manager and connection plumbing

pub mod context;
pub mod local;
pub mod ssh;

pub use context::{ExecutionContext, TaskOutput};
pub use local::LocalConnection;
pub use ssh::{ConnectionPool, SshConnection};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::callback::{ResultSink, RunEvent};
use crate::config::{ConnectionKind, RunOptions};
use crate::error::PrepError;
use crate::inventory::{Host, Inventory};
use crate::modules::ModuleExecutor;
use crate::play::Play;
use crate::vars::VariableManager;

/// Common trait for transports (SSH, local).
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a command and return its captured output.
    async fn exec(&self, cmd: &str) -> Result<CommandResult, PrepError>;

    /// Host this connection belongs to.
    fn host_name(&self) -> &str;
}

/// Raw result of executing a command over a connection.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Per-host outcome counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HostStats {
    pub ok: usize,
    pub changed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub unreachable: usize,
}

/// Aggregate outcome of a play across all hosts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlayRecap {
    pub hosts: HashMap<String, HostStats>,
}

impl PlayRecap {
    pub fn has_failures(&self) -> bool {
        self.hosts
            .values()
            .any(|s| s.failed > 0 || s.unreachable > 0)
    }

    pub fn total_ok(&self) -> usize {
        self.hosts.values().map(|s| s.ok).sum()
    }
}

/// Drives a play to completion: resolves the target hosts, fans out across
/// them bounded by the configured fork count, and walks each host's task
/// list strictly in order, streaming outcomes into the sink.
///
/// `cleanup` releases pooled connections. It runs at most once, is safe to
/// call again, and the Drop impl guarantees it fires on every exit path
/// even when the caller forgets or unwinds.
pub struct TaskQueueManager {
    options: Arc<RunOptions>,
    inventory: Arc<Inventory>,
    vars: Arc<VariableManager>,
    pool: Arc<ConnectionPool>,
    cleaned: AtomicBool,
}

impl TaskQueueManager {
    pub fn new(options: RunOptions, inventory: Inventory, vars: VariableManager) -> Self {
        if !options.module_path.is_empty() {
            warn!(
                paths = ?options.module_path,
                "external module search path is ignored by the embedded runner"
            );
        }

        let mut pool = ConnectionPool::new()
            .with_connect_timeout(options.connect_timeout)
            .with_command_timeout(options.command_timeout);
        if let Some(ref user) = options.remote_user {
            pool = pool.with_default_user(user.clone());
        }
        if let Some(ref key) = options.private_key_file {
            pool = pool.with_private_key(key.clone());
        }

        TaskQueueManager {
            options: Arc::new(options),
            inventory: Arc::new(inventory),
            vars: Arc::new(vars),
            pool: Arc::new(pool),
            cleaned: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Run one play. Blocks until every targeted host has finished (or
    /// given up); per-task outcomes stream into the sink as they happen.
    pub async fn run(
        &self,
        play: &Play,
        sink: Arc<dyn ResultSink>,
    ) -> Result<PlayRecap, PrepError> {
        let hosts: Vec<Host> = self
            .inventory
            .matching(&play.hosts)
            .into_iter()
            .cloned()
            .collect();

        if hosts.is_empty() {
            warn!(pattern = play.hosts.as_str(), "no hosts matched the play");
            return Ok(PlayRecap::default());
        }

        debug!(
            play = play.name.as_str(),
            hosts = hosts.len(),
            tasks = play.tasks.len(),
            "starting play"
        );

        let play = Arc::new(play.clone());
        let semaphore = Arc::new(Semaphore::new(self.options.forks.max(1)));
        let mut workers = JoinSet::new();

        for host in hosts {
            let play = play.clone();
            let options = self.options.clone();
            let vars = self.vars.clone();
            let pool = self.pool.clone();
            let sink = sink.clone();
            let semaphore = semaphore.clone();

            workers.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (host.name.clone(), HostStats::default()),
                };
                let name = host.name.clone();
                let stats = run_host(host, &play, &options, &vars, &pool, &sink).await;
                (name, stats)
            });
        }

        let mut recap = PlayRecap::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((name, stats)) => {
                    recap.hosts.insert(name, stats);
                }
                Err(e) => {
                    return Err(PrepError::Runtime {
                        message: format!("host worker panicked: {}", e),
                    });
                }
            }
        }

        debug!(?recap, "play finished");
        Ok(recap)
    }

    /// Release engine-held resources. Idempotent; also invoked from Drop so
    /// it runs on every exit path.
    pub fn cleanup(&self) {
        if !self.cleaned.swap(true, Ordering::SeqCst) {
            debug!("releasing runner connections");
            self.pool.close_all();
        }
    }

    pub fn is_cleaned(&self) -> bool {
        self.cleaned.load(Ordering::SeqCst)
    }
}

impl Drop for TaskQueueManager {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Walk one host's task list in order. Stops at the first failure or
/// unreachable outcome; later tasks may depend on registered results from
/// earlier ones, so there is no skipping ahead.
async fn run_host(
    host: Host,
    play: &Play,
    options: &Arc<RunOptions>,
    vars: &Arc<VariableManager>,
    pool: &Arc<ConnectionPool>,
    sink: &Arc<dyn ResultSink>,
) -> HostStats {
    let host = Arc::new(host);
    let executor = ModuleExecutor::new();
    let mut stats = HostStats::default();
    let mut conn: Option<Arc<dyn Connection>> = None;

    for spec in &play.tasks {
        let task_name = spec.display_name();

        if spec.action.needs_connection() && conn.is_none() {
            match connect(pool, options, &host) {
                Ok(c) => conn = Some(c),
                Err(e) => {
                    stats.unreachable += 1;
                    sink.on_event(&RunEvent::Unreachable {
                        host: host.name.clone(),
                        error: e.to_string(),
                    });
                    return stats;
                }
            }
        }

        let ctx = ExecutionContext::new(
            host.clone(),
            vars.clone(),
            options,
            spec.vars.clone(),
        );

        match executor.execute(&spec.action, &ctx, conn.as_deref()).await {
            Ok(output) if output.failed => {
                stats.failed += 1;
                sink.on_event(&RunEvent::TaskFailed {
                    host: host.name.clone(),
                    task: task_name,
                    payload: output.to_payload(),
                });
                break;
            }
            Ok(output) if output.skipped => {
                stats.skipped += 1;
                sink.on_event(&RunEvent::TaskSkipped {
                    host: host.name.clone(),
                    task: task_name,
                    reason: output.msg.unwrap_or_default(),
                });
            }
            Ok(output) => {
                let payload = output.to_payload();
                if let Some(ref register) = spec.register {
                    vars.register(&host.name, register, payload.clone());
                }
                stats.ok += 1;
                if output.changed {
                    stats.changed += 1;
                }
                sink.on_event(&RunEvent::TaskOk {
                    host: host.name.clone(),
                    task: task_name,
                    payload,
                });
            }
            Err(e) if e.is_unreachable() => {
                stats.unreachable += 1;
                sink.on_event(&RunEvent::Unreachable {
                    host: host.name.clone(),
                    error: e.to_string(),
                });
                break;
            }
            Err(e) => {
                stats.failed += 1;
                sink.on_event(&RunEvent::TaskFailed {
                    host: host.name.clone(),
                    task: task_name,
                    payload: json!({ "failed": true, "msg": e.to_string() }),
                });
                break;
            }
        }
    }

    stats
}

/// Pick the transport for a host: local for localhost targets (or when the
/// run forces local), pooled SSH otherwise.
fn connect(
    pool: &ConnectionPool,
    options: &RunOptions,
    host: &Host,
) -> Result<Arc<dyn Connection>, PrepError> {
    if options.connection == ConnectionKind::Local || host.is_local() {
        Ok(Arc::new(LocalConnection::new(host.name.clone())))
    } else {
        let conn = pool.get(host)?;
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::MemorySink;
    use crate::play::{Action, TaskSpec};
    use pretty_assertions::assert_eq;

    fn local_inventory() -> Inventory {
        let mut inv = Inventory::new();
        inv.add_host(Host::localhost());
        inv
    }

    fn tqm_for(inv: Inventory) -> TaskQueueManager {
        let vars = VariableManager::new(&inv);
        TaskQueueManager::new(RunOptions::new(), inv, vars)
    }

    #[tokio::test]
    async fn test_shell_then_debug_in_order() {
        let tqm = tqm_for(local_inventory());
        let sink = Arc::new(MemorySink::new());

        let play = Play::new("test", "localhost")
            .task(
                TaskSpec::new(Action::Shell {
                    cmd: "echo provisioned".to_string(),
                })
                .register("shell_out"),
            )
            .task(TaskSpec::new(Action::Debug {
                msg: "{{ shell_out.stdout }}".to_string(),
            }));

        let recap = tqm.run(&play, sink.clone()).await.unwrap();
        tqm.cleanup();

        let stats = recap.hosts["localhost"];
        assert_eq!(stats.ok, 2);
        assert_eq!(stats.failed, 0);

        let events = sink.events();
        assert_eq!(events.len(), 2);

        // First event: the shell task, with its stdout captured
        match &events[0] {
            RunEvent::TaskOk { host, payload, .. } => {
                assert_eq!(host, "localhost");
                assert_eq!(payload["stdout"].as_str().unwrap().trim(), "provisioned");
                assert_eq!(payload["changed"], json!(true));
            }
            other => panic!("expected TaskOk, got {:?}", other),
        }

        // Second event: debug echoes the registered stdout
        match &events[1] {
            RunEvent::TaskOk { payload, .. } => {
                assert_eq!(payload["msg"].as_str().unwrap().trim(), "provisioned");
            }
            other => panic!("expected TaskOk, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failure_stops_remaining_tasks() {
        let tqm = tqm_for(local_inventory());
        let sink = Arc::new(MemorySink::new());

        let play = Play::new("test", "localhost")
            .task(TaskSpec::new(Action::Shell {
                cmd: "exit 3".to_string(),
            }))
            .task(TaskSpec::new(Action::Debug {
                msg: "never reached".to_string(),
            }));

        let recap = tqm.run(&play, sink.clone()).await.unwrap();

        let stats = recap.hosts["localhost"];
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.ok, 0);
        assert!(recap.has_failures());

        let events = sink.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            RunEvent::TaskFailed { payload, .. } => {
                assert_eq!(payload["rc"], json!(3));
            }
            other => panic!("expected TaskFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_host_emits_event() {
        // An unparseable address fails before any network traffic
        let inv = Inventory::from_sources("not#a#valid#address,").unwrap();
        let tqm = tqm_for(inv);
        let sink = Arc::new(MemorySink::new());

        let play = Play::new("test", "all").task(TaskSpec::new(Action::Shell {
            cmd: "ls".to_string(),
        }));

        let recap = tqm.run(&play, sink.clone()).await.unwrap();
        tqm.cleanup();

        assert!(recap.has_failures());
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], RunEvent::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_check_mode_does_not_execute() {
        let inv = local_inventory();
        let vars = VariableManager::new(&inv);
        let tqm = TaskQueueManager::new(RunOptions::new().with_check(true), inv, vars);
        let sink = Arc::new(MemorySink::new());

        let play = Play::new("test", "localhost").task(TaskSpec::new(Action::Shell {
            cmd: "echo should-not-run".to_string(),
        }));

        let recap = tqm.run(&play, sink.clone()).await.unwrap();

        assert_eq!(recap.total_ok(), 1);
        match &sink.events()[0] {
            RunEvent::TaskOk { payload, .. } => {
                assert!(payload["stdout"]
                    .as_str()
                    .unwrap()
                    .starts_with("Would run shell command"));
            }
            other => panic!("expected TaskOk, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cleanup_runs_once_and_is_idempotent() {
        let tqm = tqm_for(local_inventory());
        assert!(!tqm.is_cleaned());

        tqm.cleanup();
        assert!(tqm.is_cleaned());

        // Second call must be safe
        tqm.cleanup();
        assert!(tqm.is_cleaned());
    }

    #[tokio::test]
    async fn test_cleanup_runs_on_drop() {
        let inv = local_inventory();
        let vars = VariableManager::new(&inv);
        let tqm = TaskQueueManager::new(RunOptions::new(), inv, vars);
        // Dropping without an explicit cleanup call must still release
        drop(tqm);
    }

    #[tokio::test]
    async fn test_no_matching_hosts_is_empty_recap() {
        let tqm = tqm_for(local_inventory());
        let sink = Arc::new(MemorySink::new());

        let play = Play::new("test", "db9").task(TaskSpec::new(Action::Shell {
            cmd: "ls".to_string(),
        }));

        let recap = tqm.run(&play, sink.clone()).await.unwrap();
        assert!(recap.hosts.is_empty());
        assert!(sink.events().is_empty());
    }
}
