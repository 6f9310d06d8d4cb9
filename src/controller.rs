//! Lifecycle orchestration over the roster
//!
//! Each command walks the roster in order and drives one row at a time through the
//! account provider, the executor and the material distributor. A failing row is
//! recorded and the walk moves on; only batch-level preconditions abort a command.
//!
//! Row states, in the order a fresh roster passes through them:
//!
//! `Absent → Provisioned → Credentialed → Materialized → Running → Stopped → Retrieved → Removed`
//!
//! Every step checks the host first, so re-running a command skips work that an
//! earlier run already completed.

use std::fmt;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::accounts::AccountProvider;
use crate::config::Config;
use crate::errors::{FleetError, Result};
use crate::execution::{CommandRequest, Executor, Identity};
use crate::profile;
use crate::roster::{Roster, UserRecord};
use crate::secrets::generate_secret;
use crate::storage::{dir_beneath, make_dirs_beneath, tree_chown, tree_copy};

/// Where a roster row stands in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Absent,
    Provisioned,
    Credentialed,
    Materialized,
    Running,
    Stopped,
    Retrieved,
    Removed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Absent => "absent",
            LifecycleState::Provisioned => "provisioned",
            LifecycleState::Credentialed => "credentialed",
            LifecycleState::Materialized => "materialized",
            LifecycleState::Running => "running",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Retrieved => "retrieved",
            LifecycleState::Removed => "removed",
        };
        f.write_str(name)
    }
}

/// Result of one command for one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowOutcome {
    pub username: String,
    /// Furthest state reached during the command
    pub reached: LifecycleState,
    /// Why the row failed, if it did
    pub error: Option<String>,
}

impl RowOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-row outcomes of one command, plus failures not tied to a row
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub command: &'static str,
    pub outcomes: Vec<RowOutcome>,
    pub errors: Vec<String>,
}

impl BatchReport {
    pub fn new(command: &'static str) -> Self {
        Self {
            command,
            ..Default::default()
        }
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &RowOutcome> {
        self.outcomes.iter().filter(|o| o.succeeded())
    }

    pub fn failed(&self) -> impl Iterator<Item = &RowOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }

    pub fn has_failures(&self) -> bool {
        !self.errors.is_empty() || self.failed().next().is_some()
    }

    pub fn outcome(&self, username: &str) -> Option<&RowOutcome> {
        self.outcomes.iter().find(|o| o.username == username)
    }
}

/// Yes/no question asked before destructive steps
pub trait Confirm {
    fn confirm(&self, question: &str) -> bool;
}

/// Answers yes to everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, question: &str) -> bool {
        info!("{} yes", question);
        true
    }
}

/// Drives roster rows through the account lifecycle
pub struct Controller<'a> {
    config: &'a Config,
    accounts: &'a dyn AccountProvider,
    exec: &'a dyn Executor,
    confirm: &'a dyn Confirm,
}

impl<'a> Controller<'a> {
    pub fn new(
        config: &'a Config,
        accounts: &'a dyn AccountProvider,
        exec: &'a dyn Executor,
        confirm: &'a dyn Confirm,
    ) -> Self {
        Self {
            config,
            accounts,
            exec,
            confirm,
        }
    }

    pub fn config(&self) -> &Config {
        self.config
    }

    /// Create the shared group, then provision, credential and materialize every row.
    ///
    /// Fails without touching any row when the group cannot be created. A row with a
    /// system secret has it applied again, so an interrupted password step completes
    /// on the next run.
    pub fn setup(&self, roster: &mut Roster) -> Result<BatchReport> {
        self.ensure_group()?;
        Ok(self.for_each_row("setup", roster, |_, user, reached| {
            self.setup_user(user, reached)
        }))
    }

    /// Copy the material into every existing account again
    pub fn send(&self, roster: &mut Roster) -> BatchReport {
        self.for_each_row("send", roster, |_, user, reached| {
            let identity = self.identity_of(&user.username)?;
            *reached = LifecycleState::Provisioned;
            self.distribute(&identity)?;
            *reached = LifecycleState::Materialized;
            Ok(())
        })
    }

    /// Start one detached sandbox per row; row `i` listens on `port + 1 + i`.
    ///
    /// A sandbox already running on its row's port is left alone. One running on any
    /// other port is stopped and started again on the right one.
    pub fn launch(&self, roster: &mut Roster) -> Result<BatchReport> {
        let base = self.config.launch.port;
        if usize::from(base) + roster.len() > usize::from(u16::MAX) {
            return Err(FleetError::Config(format!(
                "base port {} leaves no room for {} sandboxes",
                base,
                roster.len()
            )));
        }

        Ok(self.for_each_row("launch", roster, |index, user, reached| {
            // In range: base + len fits in u16 and index < len.
            let port = base + 1 + index as u16;
            self.launch_user(port, user, reached)
        }))
    }

    /// Stop every sandbox, collect its artifacts and clear its port
    pub fn shutdown(&self, roster: &mut Roster) -> BatchReport {
        self.for_each_row("shutdown", roster, |_, user, reached| {
            let identity = self.identity_of(&user.username)?;
            *reached = LifecycleState::Provisioned;
            self.stop_sandboxes(&user.username)?;
            user.port = None;
            *reached = LifecycleState::Stopped;
            self.collect(&identity)?;
            *reached = LifecycleState::Retrieved;
            Ok(())
        })
    }

    /// Snapshot every account's work while its sandbox keeps running
    pub fn retrieve(&self, roster: &mut Roster) -> BatchReport {
        self.for_each_row("retrieve", roster, |_, user, reached| {
            let identity = self.identity_of(&user.username)?;
            *reached = LifecycleState::Provisioned;
            self.collect(&identity)?;
            *reached = LifecycleState::Retrieved;
            Ok(())
        })
    }

    /// Delete every account after confirmation, then optionally the shared group.
    ///
    /// With `retrieve_first`, a row whose artifacts cannot be collected keeps its
    /// account.
    pub fn remove(&self, roster: &mut Roster, retrieve_first: bool) -> BatchReport {
        let question = {
            let names: Vec<&str> = roster.users.iter().map(|u| u.username.as_str()).collect();
            format!(
                "Remove {} user account(s) and their home directories ({})?",
                names.len(),
                names.join(", ")
            )
        };

        let mut report = if !roster.is_empty() && self.confirm.confirm(&question) {
            self.for_each_row("remove", roster, |_, user, reached| {
                self.remove_user(user, reached, retrieve_first)
            })
        } else {
            info!("Keeping user accounts");
            BatchReport::new("remove")
        };

        let group = &self.config.setup.group;
        if self.confirm.confirm(&format!("Remove group '{}'?", group)) {
            if let Err(e) = self.remove_group() {
                warn!("Could not remove group '{}': {}", group, e);
                report.errors.push(format!("group '{}': {}", group, e));
            }
        }
        report
    }

    fn for_each_row<F>(&self, command: &'static str, roster: &mut Roster, mut step: F) -> BatchReport
    where
        F: FnMut(usize, &mut UserRecord, &mut LifecycleState) -> Result<()>,
    {
        let mut report = BatchReport::new(command);
        for (index, user) in roster.users.iter_mut().enumerate() {
            let mut reached = LifecycleState::Absent;
            let error = match step(index, user, &mut reached) {
                Ok(()) => {
                    info!("{} '{}': {}", command, user.username, reached);
                    None
                }
                Err(e) => {
                    warn!(
                        "{} '{}' failed after reaching {}: {}",
                        command, user.username, reached, e
                    );
                    Some(e.to_string())
                }
            };
            report.outcomes.push(RowOutcome {
                username: user.username.clone(),
                reached,
                error,
            });
        }
        report
    }

    fn identity_of(&self, name: &str) -> Result<Identity> {
        self.accounts
            .account_exists(name)?
            .ok_or_else(|| FleetError::Account(format!("no account named '{}'", name)))
    }

    fn ensure_group(&self) -> Result<()> {
        let group = &self.config.setup.group;
        if self.accounts.group_members(group)?.is_none() {
            self.accounts.create_group(group)?;
            info!("Created group '{}'", group);
        }
        Ok(())
    }

    fn remove_group(&self) -> Result<()> {
        let group = &self.config.setup.group;
        if self.accounts.group_members(group)?.is_some() {
            self.accounts.delete_group(group)?;
        } else {
            debug!("Group '{}' already absent", group);
        }
        Ok(())
    }

    fn setup_user(&self, user: &mut UserRecord, reached: &mut LifecycleState) -> Result<()> {
        let setup = &self.config.setup;
        let created = match self.accounts.account_exists(&user.username)? {
            Some(_) => {
                debug!("Account '{}' already exists", user.username);
                false
            }
            None => {
                let group = setup.group.as_str();
                self.accounts.create_account(&user.username, &[group])?;
                info!("Created account '{}'", user.username);
                true
            }
        };
        let identity = self.identity_of(&user.username)?;
        *reached = LifecycleState::Provisioned;

        // Stored before it is applied so a failed attempt is retried with the same secret
        if created && user.sys_pass.is_empty() {
            user.sys_pass = generate_secret(setup.password_length);
        }
        if !user.sys_pass.is_empty() {
            self.accounts.set_password(&user.username, &user.sys_pass)?;
        }

        self.ensure_membership(&user.username)?;
        if user.nb_pass.is_empty() {
            user.nb_pass = generate_secret(setup.password_length);
        }
        if !setup.profile.is_empty() {
            profile::provision(self.exec, setup, &identity, &user.nb_pass)?;
        }
        *reached = LifecycleState::Credentialed;

        self.distribute(&identity)?;
        *reached = LifecycleState::Materialized;
        Ok(())
    }

    fn ensure_membership(&self, name: &str) -> Result<()> {
        let group = &self.config.setup.group;
        let members = self
            .accounts
            .group_members(group)?
            .ok_or_else(|| FleetError::Account(format!("group '{}' does not exist", group)))?;
        if !members.iter().any(|m| m == name) {
            self.accounts.add_to_group(group, name)?;
            debug!("Added '{}' to group '{}'", name, group);
        }
        Ok(())
    }

    fn distribute(&self, identity: &Identity) -> Result<()> {
        let tutorial = make_dirs_beneath(&identity.home, &self.config.setup.tutorial_dir)?;
        let destination = tutorial.join(self.config.material_name());
        let copied = tree_copy(&self.config.setup.material_dir, &destination)?;
        let changed = tree_chown(identity, &tutorial)?;
        debug!(
            "Copied {} files to {} and changed ownership of {} entries",
            copied,
            destination.display(),
            changed
        );
        Ok(())
    }

    fn sandbox_command(&self, port: u16) -> Result<CommandRequest> {
        let launch = &self.config.launch;
        let request = CommandRequest::from_argv(&launch.notebook_command)
            .ok_or_else(|| FleetError::Config("notebook_command cannot be empty".to_string()))?
            .args(["--ip", "*", "--port"])
            .arg(port.to_string())
            .arg("--certfile")
            .arg(launch.cert_file.display().to_string());

        let profile = &self.config.setup.profile;
        let request = if profile.is_empty() {
            request
        } else {
            request.arg("--profile").arg(profile.as_str())
        };
        Ok(request.arg("--no-browser"))
    }

    fn launch_user(
        &self,
        port: u16,
        user: &mut UserRecord,
        reached: &mut LifecycleState,
    ) -> Result<()> {
        let identity = self.identity_of(&user.username)?;
        *reached = LifecycleState::Provisioned;

        let running = self
            .accounts
            .list_owned_processes(&user.username, &self.config.launch.process_name)?;
        if !running.is_empty() {
            if user.port == Some(port) {
                info!(
                    "Sandbox for '{}' already running on port {}",
                    user.username, port
                );
                *reached = LifecycleState::Running;
                return Ok(());
            }

            info!(
                "Moving sandbox of '{}' from port {} to {}",
                user.username,
                user.port.map_or_else(|| "unknown".to_string(), |p| p.to_string()),
                port
            );
            let survivors = self.stop_sandboxes(&user.username)?;
            if !survivors.is_empty() {
                return Err(FleetError::Account(format!(
                    "sandbox of '{}' still running as {:?}, not starting it on port {}",
                    user.username, survivors, port
                )));
            }
        }
        user.port = None;

        let request = self
            .sandbox_command(port)?
            .cwd(identity.home.join(self.config.launch_dir()))
            .run_as(&identity);
        let pid = self.exec.spawn_detached(&request)?;
        user.port = Some(port);
        *reached = LifecycleState::Running;
        info!(
            "Started sandbox for '{}' on port {} (pid {})",
            user.username, port, pid
        );
        Ok(())
    }

    /// Terminate the account's sandboxes; returns the pids still alive after the settle delay
    fn stop_sandboxes(&self, name: &str) -> Result<Vec<i32>> {
        let filter = &self.config.launch.process_name;
        let pids = self.accounts.list_owned_processes(name, filter)?;
        if pids.is_empty() {
            debug!("No sandbox running for '{}'", name);
            return Ok(pids);
        }

        for pid in &pids {
            if let Err(e) = self.accounts.terminate(*pid) {
                warn!("Could not terminate process {} of '{}': {}", pid, name, e);
            }
        }
        thread::sleep(Duration::from_millis(self.config.shutdown.settle_ms));

        let survivors = self.accounts.list_owned_processes(name, filter)?;
        if survivors.is_empty() {
            info!("Stopped {} sandbox process(es) of '{}'", pids.len(), name);
        } else {
            warn!(
                "{} sandbox process(es) of '{}' still running: {:?}",
                survivors.len(),
                name,
                survivors
            );
        }
        Ok(survivors)
    }

    /// Copy `<home>/<tutorial_dir>` to `<storage_dir>/<login>` and hand it to the owner
    fn collect(&self, identity: &Identity) -> Result<PathBuf> {
        let source = dir_beneath(&identity.home, &self.config.setup.tutorial_dir)?;
        let destination = self.config.shutdown.storage_dir.join(&identity.login);
        let copied = tree_copy(&source, &destination)?;

        let owner = &self.config.shutdown.owner;
        if !owner.is_empty() {
            match self.accounts.account_exists(owner)? {
                Some(owner_identity) => {
                    tree_chown(&owner_identity, &destination)?;
                }
                None => warn!(
                    "Owner '{}' does not exist; {} keeps its current ownership",
                    owner,
                    destination.display()
                ),
            }
        }

        info!(
            "Retrieved {} files of '{}' into {}",
            copied,
            identity.login,
            destination.display()
        );
        Ok(destination)
    }

    fn remove_user(
        &self,
        user: &mut UserRecord,
        reached: &mut LifecycleState,
        retrieve_first: bool,
    ) -> Result<()> {
        match self.accounts.account_exists(&user.username)? {
            None => info!("Account '{}' already absent", user.username),
            Some(identity) => {
                *reached = LifecycleState::Provisioned;
                self.stop_sandboxes(&user.username)?;
                *reached = LifecycleState::Stopped;
                if retrieve_first {
                    self.collect(&identity)?;
                    *reached = LifecycleState::Retrieved;
                }
                self.accounts.delete_account(&user.username)?;
            }
        }

        user.sys_pass.clear();
        user.nb_pass.clear();
        user.port = None;
        *reached = LifecycleState::Removed;
        Ok(())
    }
}
