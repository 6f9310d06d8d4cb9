//! Account and group management
//!
//! [`AccountProvider`] is the capability the orchestrator drives. One implementation
//! exists per platform and is chosen once at startup by [`for_host`]:
//!
//! - **linux**: shadow-utils (`useradd`, `groupadd`, `usermod`, `chpasswd`, `userdel`)
//! - **macos**: Directory Service (`dscl`, `createhomedir`)
//!
//! Operations report failure through [`FleetError`]; none of them is expected to be
//! idempotent, so callers check existence first where it matters.

pub mod linux;
pub mod macos;

pub use linux::LinuxAccounts;
pub use macos::MacAccounts;

use log::debug;
use nix::sys::signal::{kill, Signal};
use nix::unistd::{Group, Pid};

use crate::errors::{FleetError, Result};
use crate::execution::{CommandRequest, Executor, Identity, SystemExecutor};

/// Platform account primitives consumed by the orchestrator
pub trait AccountProvider {
    /// Short platform name, for logs
    fn platform(&self) -> &'static str;

    /// Resolve an account; `None` when absent
    fn account_exists(&self, name: &str) -> Result<Option<Identity>> {
        Identity::lookup(name)
    }

    /// Members of a group; `None` when the group is absent
    fn group_members(&self, group: &str) -> Result<Option<Vec<String>>> {
        let entry = Group::from_name(group)
            .map_err(|e| FleetError::Account(format!("getgrnam({}): {}", group, e)))?;
        Ok(entry.map(|g| g.mem))
    }

    /// Create an account with a home directory and the given supplementary groups
    fn create_account(&self, name: &str, supplementary_groups: &[&str]) -> Result<()>;

    /// Create a group with a host-unique id
    fn create_group(&self, name: &str) -> Result<()>;

    /// Set the account's login secret
    fn set_password(&self, name: &str, secret: &str) -> Result<()>;

    /// Add the account to a supplementary group
    fn add_to_group(&self, group: &str, name: &str) -> Result<()>;

    /// Pids of processes owned by `name` whose command line matches `filter`
    fn list_owned_processes(&self, name: &str, filter: &str) -> Result<Vec<i32>>;

    /// Ask a process to exit
    fn terminate(&self, pid: i32) -> Result<()> {
        kill(Pid::from_raw(pid), Signal::SIGTERM)
            .map_err(|e| FleetError::Account(format!("kill({}): {}", pid, e)))
    }

    /// Drop secondary memberships, clear the credential, delete account and home
    fn delete_account(&self, name: &str) -> Result<()>;

    /// Delete a group
    fn delete_group(&self, name: &str) -> Result<()>;
}

/// Provider for the platform this binary runs on
pub fn for_host() -> Result<Box<dyn AccountProvider>> {
    match std::env::consts::OS {
        "linux" => Ok(Box::new(LinuxAccounts::new(SystemExecutor))),
        "macos" => Ok(Box::new(MacAccounts::new(SystemExecutor))),
        other => Err(FleetError::Account(format!(
            "unsupported operating system '{}'",
            other
        ))),
    }
}

/// `pgrep -u <name> -f <filter>`; exit status 1 means nothing matched
pub(crate) fn pgrep(exec: &dyn Executor, name: &str, filter: &str) -> Result<Vec<i32>> {
    let request = CommandRequest::new("pgrep").args(["-u", name, "-f", filter]);
    let output = match exec.run(&request) {
        Ok(output) => output,
        Err(FleetError::Command { exit_code: 1, .. }) => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let pids = output
        .split_whitespace()
        .map(|s| {
            s.parse::<i32>()
                .map_err(|_| FleetError::Account(format!("pgrep printed '{}', expected a pid", s)))
        })
        .collect::<Result<Vec<_>>>()?;
    debug!("Processes of '{}' matching '{}': {:?}", name, filter, pids);
    Ok(pids)
}
