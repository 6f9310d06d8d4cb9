//! External command execution, optionally under another account's identity
//!
//! Identity switching happens in the forked child right before `execve`: supplementary
//! groups, then the primary group, then the user. The parent never changes identity.

use std::ffi::{CStr, CString};
use std::io::{self, Write};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;

use log::{debug, warn};
use nix::unistd::{Gid, Uid, User};

use crate::errors::{FleetError, Result};

/// OS-level account identity as reported by the user database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub login: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
}

impl Identity {
    /// Resolve a login through the user database; `None` when the account is absent
    pub fn lookup(login: &str) -> Result<Option<Self>> {
        let user = User::from_name(login)
            .map_err(|e| FleetError::Account(format!("getpwnam({}): {}", login, e)))?;
        Ok(user.map(|u| Self {
            login: u.name,
            uid: u.uid.as_raw(),
            gid: u.gid.as_raw(),
            home: u.dir,
        }))
    }

    /// Environment a login shell of this account would have in `cwd`
    pub fn env_overrides(&self, cwd: &Path) -> Vec<(String, String)> {
        vec![
            ("HOME".to_string(), self.home.display().to_string()),
            ("LOGNAME".to_string(), self.login.clone()),
            ("PWD".to_string(), cwd.display().to_string()),
            ("USER".to_string(), self.login.clone()),
        ]
    }
}

/// A single external command invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandRequest {
    /// Program to execute (looked up on PATH)
    pub program: String,
    /// Program arguments
    pub args: Vec<String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Environment overrides on top of the inherited environment
    pub env: Vec<(String, String)>,
    /// Data written to the child's stdin
    pub stdin: Option<String>,
    /// Account to run as
    pub identity: Option<Identity>,
}

impl CommandRequest {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Build from an argv vector; `None` when it is empty
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Run as `identity`, with HOME/LOGNAME/PWD/USER rewritten to match it
    pub fn run_as(mut self, identity: &Identity) -> Self {
        let cwd = self.cwd.clone().unwrap_or_else(|| identity.home.clone());
        for (key, value) in identity.env_overrides(&cwd) {
            if let Some((_, existing)) = self.env.iter_mut().find(|(k, _)| *k == key) {
                *existing = value;
            } else {
                self.env.push((key, value));
            }
        }
        self.cwd = Some(cwd);
        self.identity = Some(identity.clone());
        self
    }

    /// Space-joined command line, for messages
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Runs external commands
pub trait Executor {
    /// Run to completion and capture output.
    ///
    /// Returns stdout, or stderr when stdout is empty. A non-zero exit becomes
    /// [`FleetError::Command`] carrying the captured diagnostic text.
    fn run(&self, request: &CommandRequest) -> Result<String>;

    /// Start in a new session without waiting; returns the child pid
    fn spawn_detached(&self, request: &CommandRequest) -> Result<u32>;
}

/// Executor backed by real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl SystemExecutor {
    fn build_command(request: &CommandRequest, detached: bool) -> Result<Command> {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let identity = match &request.identity {
            Some(identity) => Some((
                CString::new(identity.login.as_str()).map_err(|_| {
                    FleetError::Account(format!("login '{}' contains nul byte", identity.login))
                })?,
                Gid::from_raw(identity.gid),
                Uid::from_raw(identity.uid),
            )),
            None => None,
        };

        // SAFETY: the hook runs in the forked child before exec and only issues
        // setsid/initgroups/setgid/setuid on values prepared in the parent.
        unsafe {
            cmd.pre_exec(move || {
                if detached {
                    nix::unistd::setsid()?;
                }
                if let Some((login, gid, uid)) = &identity {
                    switch_identity(login, *gid, *uid)?;
                }
                Ok(())
            });
        }

        Ok(cmd)
    }

    fn spawn_error(request: &CommandRequest, e: io::Error) -> FleetError {
        FleetError::Command {
            command: request.command_line(),
            exit_code: 127,
            output: e.to_string(),
        }
    }
}

impl Executor for SystemExecutor {
    fn run(&self, request: &CommandRequest) -> Result<String> {
        debug!("Running: {}", request.command_line());
        let mut cmd = Self::build_command(request, false)?;
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.stdin(if request.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd.spawn().map_err(|e| Self::spawn_error(request, e))?;
        if let (Some(input), Some(mut pipe)) = (&request.stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())?;
        }
        let output = child.wait_with_output()?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        check_status(request, output.status, stdout, stderr)
    }

    fn spawn_detached(&self, request: &CommandRequest) -> Result<u32> {
        debug!("Spawning detached: {}", request.command_line());
        let mut cmd = Self::build_command(request, true)?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut child = cmd.spawn().map_err(|e| Self::spawn_error(request, e))?;
        let pid = child.id();
        let reaper = thread::Builder::new()
            .name(format!("reap-{}", pid))
            .spawn(move || match child.wait() {
                Ok(status) => debug!("Sandbox {} exited with code {}", pid, exit_code(status)),
                Err(e) => warn!("Could not wait for sandbox {}: {}", pid, e),
            });
        if let Err(e) = reaper {
            warn!("Sandbox {} will not be reaped: {}", pid, e);
        }
        Ok(pid)
    }
}

/// Supplementary groups, then the primary group, then the user
fn switch_identity(login: &CStr, gid: Gid, uid: Uid) -> io::Result<()> {
    init_groups(login, gid)?;
    nix::unistd::setgid(gid)?;
    nix::unistd::setuid(uid)?;
    Ok(())
}

#[cfg(not(any(target_os = "macos", target_os = "ios")))]
fn init_groups(login: &CStr, gid: Gid) -> io::Result<()> {
    nix::unistd::initgroups(login, gid)?;
    Ok(())
}

// nix leaves initgroups out on Apple targets, where the base group is an int
#[cfg(any(target_os = "macos", target_os = "ios"))]
fn init_groups(login: &CStr, gid: Gid) -> io::Result<()> {
    // SAFETY: `login` is a valid nul-terminated string for the whole call.
    let rc = unsafe { libc::initgroups(login.as_ptr(), gid.as_raw() as libc::c_int) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Exit code as the shell reports it; signals map to 128 + signo
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(-1)
}

fn check_status(
    request: &CommandRequest,
    status: ExitStatus,
    stdout: String,
    stderr: String,
) -> Result<String> {
    if status.success() {
        return Ok(if stdout.is_empty() { stderr } else { stdout });
    }

    let output = if stderr.trim().is_empty() {
        stdout
    } else {
        stderr
    };
    Err(FleetError::Command {
        command: request.command_line(),
        exit_code: exit_code(status),
        output: output.trim().to_string(),
    })
}
