// hostprep - one-shot remote host provisioning
//
// A small embedded task runner plus the typed workload definitions it
// executes: inventory, variables, play, result sinks, and the task queue
// manager that delivers outcomes to a callback.

pub mod callback;
pub mod config;
pub mod error;
pub mod inventory;
pub mod modules;
pub mod play;
pub mod runner;
pub mod vars;

pub use callback::{JsonCallback, MemorySink, ResultSink, RunEvent};
pub use config::{BecomeMethod, ConnectionKind, RunOptions};
pub use error::PrepError;
pub use inventory::{Host, Inventory};
pub use play::{Action, Play, TaskSpec};
pub use runner::{PlayRecap, TaskQueueManager};
pub use vars::VariableManager;

/// Version of the hostprep tool
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::callback::{JsonCallback, ResultSink, RunEvent};
    pub use crate::config::{BecomeMethod, ConnectionKind, RunOptions};
    pub use crate::error::PrepError;
    pub use crate::inventory::{Host, Inventory};
    pub use crate::play::{Action, Play, TaskSpec};
    pub use crate::runner::{PlayRecap, TaskQueueManager};
    pub use crate::vars::VariableManager;
}
