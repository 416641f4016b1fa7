// Play definition - typed task descriptors in a fixed order

use std::collections::HashMap;

use serde_json::Value;

/// A single module invocation with its arguments. The workload is a closed
/// set of actions, so the play is an explicit list of typed descriptors
/// rather than a dynamic structure.
#[derive(Debug, Clone)]
pub enum Action {
    /// Run a command through the remote shell
    Shell { cmd: String },
    /// Print a (templated) message without touching the host
    Debug { msg: String },
    /// Register an apt source line
    AptRepository {
        repo: String,
        codename: Option<String>,
        validate_certs: bool,
    },
    /// Install packages via apt
    Apt { name: String, update_cache: bool },
    /// Add an apt signing key from a URL
    AptKey { url: String },
    /// Install a Python package via pip
    Pip { name: String },
}

impl Action {
    pub fn module_name(&self) -> &'static str {
        match self {
            Action::Shell { .. } => "shell",
            Action::Debug { .. } => "debug",
            Action::AptRepository { .. } => "apt_repository",
            Action::Apt { .. } => "apt",
            Action::AptKey { .. } => "apt_key",
            Action::Pip { .. } => "pip",
        }
    }

    /// Debug evaluates locally; everything else needs a connection.
    pub fn needs_connection(&self) -> bool {
        !matches!(self, Action::Debug { .. })
    }
}

/// One task in a play: an action, an optional name to register the result
/// under, and optional task-scoped variables.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub action: Action,
    pub register: Option<String>,
    pub vars: HashMap<String, Value>,
}

impl TaskSpec {
    pub fn new(action: Action) -> Self {
        TaskSpec {
            action,
            register: None,
            vars: HashMap::new(),
        }
    }

    pub fn register(mut self, name: impl Into<String>) -> Self {
        self.register = Some(name.into());
        self
    }

    pub fn var(mut self, key: impl Into<String>, value: Value) -> Self {
        self.vars.insert(key.into(), value);
        self
    }

    /// Short display name for logs and events, e.g. "shell: ls".
    pub fn display_name(&self) -> String {
        let module = self.action.module_name();
        let detail = match &self.action {
            Action::Shell { cmd } => cmd.clone(),
            Action::Debug { msg } => msg.clone(),
            Action::AptRepository { repo, .. } => repo.clone(),
            Action::Apt { name, .. } => name.clone(),
            Action::AptKey { url } => url.clone(),
            Action::Pip { name } => name.clone(),
        };
        format!("{}: {}", module, detail)
    }
}

/// An ordered task list applied to a set of hosts. Built once from
/// literals; the runner never reorders it.
#[derive(Debug, Clone)]
pub struct Play {
    pub name: String,
    pub hosts: String,
    pub gather_facts: bool,
    pub tasks: Vec<TaskSpec>,
}

impl Play {
    pub fn new(name: impl Into<String>, hosts: impl Into<String>) -> Self {
        Play {
            name: name.into(),
            hosts: hosts.into(),
            gather_facts: false,
            tasks: Vec::new(),
        }
    }

    pub fn task(mut self, task: TaskSpec) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}
