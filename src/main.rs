// hostprep - provision one remote host with Docker and the BackBox repos
//
// Everything here is a literal: the target address, the credentials, and
// the task list. The runner does the rest.

use std::sync::Arc;

use serde_json::json;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use hostprep::prelude::*;

const TARGET: &str = "18.194.205.225";
const PRIVATE_KEY: &str = "~/.ssh/metasploit-key.pem";
const REMOTE_USER: &str = "ubuntu";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let options = RunOptions::new()
        .with_connection(ConnectionKind::Ssh)
        .with_forks(10)
        .with_become(BecomeMethod::Sudo, "root")
        .with_private_key(PRIVATE_KEY)
        .with_remote_user(REMOTE_USER);

    let inventory = Inventory::from_sources(&format!("{},", TARGET))?;

    let mut vars = VariableManager::new(&inventory);
    vars.set_extra("ansible_python_interpreter", json!("/usr/bin/python3"));

    let play = provision_play();
    let sink: Arc<dyn ResultSink> = Arc::new(JsonCallback::new());

    let tqm = TaskQueueManager::new(options, inventory, vars);

    // The runner holds connections and workers; release them on every exit
    // path, then surface whatever run() produced.
    let outcome = tqm.run(&play, sink).await;
    tqm.cleanup();
    let recap = outcome?;

    if recap.has_failures() {
        warn!("provisioning finished with failures");
        std::process::exit(2);
    }

    Ok(())
}

/// The fixed workload. Ordering matters: the debug task reads the result
/// registered by the shell task, and the Docker install expects the key
/// and repository tasks to have run first.
fn provision_play() -> Play {
    Play::new("Provision play", TARGET)
        .task(
            TaskSpec::new(Action::Shell {
                cmd: "ls".to_string(),
            })
            .register("shell_out"),
        )
        .task(TaskSpec::new(Action::Debug {
            msg: "{{ shell_out.stdout }}".to_string(),
        }))
        .task(TaskSpec::new(Action::AptRepository {
            repo: "deb http://ppa.launchpad.net/backbox/four/ubuntu trusty main".to_string(),
            codename: Some("trusty".to_string()),
            validate_certs: false,
        }))
        .task(TaskSpec::new(Action::AptRepository {
            repo: "deb-src http://ppa.launchpad.net/backbox/four/ubuntu trusty main".to_string(),
            codename: Some("trusty".to_string()),
            validate_certs: false,
        }))
        .task(
            TaskSpec::new(Action::Apt {
                name: "{{ packages }}".to_string(),
                update_cache: true,
            })
            .var(
                "packages",
                json!([
                    "apt-transport-https",
                    "ca-certificates",
                    "curl",
                    "software-properties-common",
                    "shellter",
                ]),
            ),
        )
        .task(TaskSpec::new(Action::AptKey {
            url: "https://download.docker.com/linux/ubuntu/gpg".to_string(),
        }))
        .task(TaskSpec::new(Action::AptRepository {
            repo: "deb [arch=amd64] https://download.docker.com/linux/ubuntu/ bionic stable"
                .to_string(),
            codename: Some("bionic".to_string()),
            validate_certs: true,
        }))
        .task(
            TaskSpec::new(Action::Apt {
                name: "{{ packages }}".to_string(),
                update_cache: false,
            })
            .var("packages", json!(["docker-ce", "python3-pip"])),
        )
        .task(TaskSpec::new(Action::Pip {
            name: "docker".to_string(),
        }))
}
