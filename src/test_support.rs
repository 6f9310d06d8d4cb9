//! Fakes shared by unit tests

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};

use crate::accounts::AccountProvider;
use crate::controller::Confirm;
use crate::errors::{FleetError, Result};
use crate::execution::{CommandRequest, Executor, Identity};
use crate::utils;

pub fn serial_guard() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

/// Scripted outcome for commands whose line starts with a prefix
enum Reply {
    Output(String),
    Failure { exit_code: i32, output: String },
}

/// Executor that records requests instead of running them.
///
/// Unscripted commands succeed with empty output.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: RefCell<Vec<CommandRequest>>,
    spawned: RefCell<Vec<CommandRequest>>,
    replies: RefCell<Vec<(String, Reply)>>,
    next_pid: Cell<u32>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self {
            next_pid: Cell::new(4000),
            ..Default::default()
        }
    }

    pub fn respond(&self, prefix: &str, output: &str) {
        self.replies
            .borrow_mut()
            .push((prefix.to_string(), Reply::Output(output.to_string())));
    }

    pub fn fail(&self, prefix: &str, exit_code: i32, output: &str) {
        self.replies.borrow_mut().push((
            prefix.to_string(),
            Reply::Failure {
                exit_code,
                output: output.to_string(),
            },
        ));
    }

    pub fn calls(&self) -> Vec<CommandRequest> {
        self.calls.borrow().clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.command_line()).collect()
    }

    pub fn spawned(&self) -> Vec<CommandRequest> {
        self.spawned.borrow().clone()
    }

    fn reply(&self, request: &CommandRequest) -> Result<String> {
        let line = request.command_line();
        let replies = self.replies.borrow();
        match replies.iter().rev().find(|(prefix, _)| line.starts_with(prefix)) {
            Some((_, Reply::Output(output))) => Ok(output.clone()),
            Some((_, Reply::Failure { exit_code, output })) => Err(FleetError::Command {
                command: line,
                exit_code: *exit_code,
                output: output.clone(),
            }),
            None => Ok(String::new()),
        }
    }
}

impl Executor for RecordingExecutor {
    fn run(&self, request: &CommandRequest) -> Result<String> {
        self.calls.borrow_mut().push(request.clone());
        self.reply(request)
    }

    fn spawn_detached(&self, request: &CommandRequest) -> Result<u32> {
        self.spawned.borrow_mut().push(request.clone());
        self.reply(request)?;
        let pid = self.next_pid.get();
        self.next_pid.set(pid + 1);
        Ok(pid)
    }
}

#[derive(Default)]
struct FakeHost {
    accounts: BTreeMap<String, Identity>,
    groups: BTreeMap<String, Vec<String>>,
    passwords: BTreeMap<String, String>,
    processes: BTreeMap<i32, String>,
    stubborn: BTreeSet<i32>,
    failures: BTreeSet<(String, String)>,
    log: Vec<String>,
}

/// In-memory account database with real home directories under a scratch root.
///
/// Every account maps to the current uid/gid so ownership changes succeed without
/// root.
pub struct FakeAccounts {
    root: PathBuf,
    host: RefCell<FakeHost>,
}

impl FakeAccounts {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            host: RefCell::new(FakeHost::default()),
        }
    }

    pub fn home_of(&self, name: &str) -> PathBuf {
        self.root.join("home").join(name)
    }

    /// Make `operation` fail for `name` (a login or a group)
    pub fn fail_on(&self, operation: &str, name: &str) {
        self.host
            .borrow_mut()
            .failures
            .insert((operation.to_string(), name.to_string()));
    }

    pub fn clear_failures(&self) {
        self.host.borrow_mut().failures.clear();
    }

    pub fn add_existing_account(&self, name: &str) {
        let identity = Identity {
            login: name.to_string(),
            uid: utils::get_uid(),
            gid: utils::get_gid(),
            home: self.home_of(name),
        };
        let _ = fs::create_dir_all(&identity.home);
        self.host
            .borrow_mut()
            .accounts
            .insert(name.to_string(), identity);
    }

    pub fn add_existing_group(&self, name: &str) {
        self.host
            .borrow_mut()
            .groups
            .entry(name.to_string())
            .or_default();
    }

    pub fn add_process(&self, owner: &str, pid: i32) {
        self.host
            .borrow_mut()
            .processes
            .insert(pid, owner.to_string());
    }

    /// A process that ignores termination requests
    pub fn add_stubborn_process(&self, owner: &str, pid: i32) {
        self.add_process(owner, pid);
        self.host.borrow_mut().stubborn.insert(pid);
    }

    pub fn has_account(&self, name: &str) -> bool {
        self.host.borrow().accounts.contains_key(name)
    }

    pub fn has_group(&self, name: &str) -> bool {
        self.host.borrow().groups.contains_key(name)
    }

    pub fn is_member(&self, group: &str, name: &str) -> bool {
        self.host
            .borrow()
            .groups
            .get(group)
            .is_some_and(|members| members.iter().any(|m| m == name))
    }

    pub fn password_of(&self, name: &str) -> Option<String> {
        self.host.borrow().passwords.get(name).cloned()
    }

    pub fn processes_of(&self, name: &str) -> Vec<i32> {
        self.host
            .borrow()
            .processes
            .iter()
            .filter(|(_, owner)| *owner == name)
            .map(|(pid, _)| *pid)
            .collect()
    }

    /// Operations performed, as `operation name` strings
    pub fn log(&self) -> Vec<String> {
        self.host.borrow().log.clone()
    }

    fn record(&self, operation: &str, name: &str) -> Result<()> {
        let mut host = self.host.borrow_mut();
        host.log.push(format!("{} {}", operation, name));
        if host
            .failures
            .contains(&(operation.to_string(), name.to_string()))
        {
            return Err(FleetError::Command {
                command: format!("{} {}", operation, name),
                exit_code: 1,
                output: format!("{} failed for '{}'", operation, name),
            });
        }
        Ok(())
    }
}

impl AccountProvider for FakeAccounts {
    fn platform(&self) -> &'static str {
        "fake"
    }

    fn account_exists(&self, name: &str) -> Result<Option<Identity>> {
        Ok(self.host.borrow().accounts.get(name).cloned())
    }

    fn group_members(&self, group: &str) -> Result<Option<Vec<String>>> {
        Ok(self.host.borrow().groups.get(group).cloned())
    }

    fn create_account(&self, name: &str, supplementary_groups: &[&str]) -> Result<()> {
        self.record("create_account", name)?;
        if self.has_account(name) {
            return Err(FleetError::Command {
                command: format!("create_account {}", name),
                exit_code: 9,
                output: format!("user '{}' already exists", name),
            });
        }
        self.add_existing_account(name);
        for group in supplementary_groups {
            self.add_to_group(group, name)?;
        }
        Ok(())
    }

    fn create_group(&self, name: &str) -> Result<()> {
        self.record("create_group", name)?;
        self.add_existing_group(name);
        Ok(())
    }

    fn set_password(&self, name: &str, secret: &str) -> Result<()> {
        self.record("set_password", name)?;
        self.host
            .borrow_mut()
            .passwords
            .insert(name.to_string(), secret.to_string());
        Ok(())
    }

    fn add_to_group(&self, group: &str, name: &str) -> Result<()> {
        self.record("add_to_group", name)?;
        let mut host = self.host.borrow_mut();
        let members = host.groups.get_mut(group).ok_or_else(|| FleetError::Command {
            command: format!("add_to_group {} {}", group, name),
            exit_code: 6,
            output: format!("group '{}' does not exist", group),
        })?;
        if !members.iter().any(|m| m == name) {
            members.push(name.to_string());
        }
        Ok(())
    }

    fn list_owned_processes(&self, name: &str, _filter: &str) -> Result<Vec<i32>> {
        self.record("list_owned_processes", name)?;
        Ok(self.processes_of(name))
    }

    fn terminate(&self, pid: i32) -> Result<()> {
        let mut host = self.host.borrow_mut();
        host.log.push(format!("terminate {}", pid));
        if !host.stubborn.contains(&pid) {
            host.processes.remove(&pid);
        }
        Ok(())
    }

    fn delete_account(&self, name: &str) -> Result<()> {
        self.record("delete_account", name)?;
        let removed = {
            let mut host = self.host.borrow_mut();
            for members in host.groups.values_mut() {
                members.retain(|m| m != name);
            }
            host.passwords.remove(name);
            host.accounts.remove(name)
        };
        if let Some(identity) = removed {
            if identity.home.exists() {
                fs::remove_dir_all(&identity.home)?;
            }
        }
        Ok(())
    }

    fn delete_group(&self, name: &str) -> Result<()> {
        self.record("delete_group", name)?;
        self.host.borrow_mut().groups.remove(name);
        Ok(())
    }
}

/// Confirmation capability answering from a fixed script, recording the questions
pub struct ScriptedConfirm {
    answers: RefCell<Vec<bool>>,
    questions: RefCell<Vec<String>>,
}

impl ScriptedConfirm {
    pub fn new(answers: &[bool]) -> Self {
        Self {
            answers: RefCell::new(answers.iter().rev().copied().collect()),
            questions: RefCell::new(Vec::new()),
        }
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.borrow().clone()
    }
}

impl Confirm for ScriptedConfirm {
    fn confirm(&self, question: &str) -> bool {
        self.questions.borrow_mut().push(question.to_string());
        self.answers.borrow_mut().pop().unwrap_or(false)
    }
}
