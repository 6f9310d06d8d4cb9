//! Linux account management through shadow-utils

use log::info;

use super::{pgrep, AccountProvider};
use crate::errors::Result;
use crate::execution::{CommandRequest, Executor};

/// `useradd`/`groupadd` family backend
pub struct LinuxAccounts<E: Executor> {
    exec: E,
}

impl<E: Executor> LinuxAccounts<E> {
    pub fn new(exec: E) -> Self {
        Self { exec }
    }

    pub fn executor(&self) -> &E {
        &self.exec
    }

    fn run<I, S>(&self, program: &str, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exec.run(&CommandRequest::new(program).args(args))
    }
}

impl<E: Executor> AccountProvider for LinuxAccounts<E> {
    fn platform(&self) -> &'static str {
        "linux"
    }

    fn create_account(&self, name: &str, supplementary_groups: &[&str]) -> Result<()> {
        if supplementary_groups.is_empty() {
            self.run("useradd", ["-m", name])?;
        } else {
            let groups = supplementary_groups.join(",");
            self.run("useradd", ["-m", "-G", groups.as_str(), name])?;
        }
        Ok(())
    }

    fn create_group(&self, name: &str) -> Result<()> {
        // groupadd allocates the next free gid itself
        self.run("groupadd", ["-f", name])?;
        Ok(())
    }

    fn set_password(&self, name: &str, secret: &str) -> Result<()> {
        let request = CommandRequest::new("chpasswd").stdin(format!("{}:{}\n", name, secret));
        self.exec.run(&request)?;
        Ok(())
    }

    fn add_to_group(&self, group: &str, name: &str) -> Result<()> {
        self.run("usermod", ["-aG", group, name])?;
        Ok(())
    }

    fn list_owned_processes(&self, name: &str, filter: &str) -> Result<Vec<i32>> {
        pgrep(&self.exec, name, filter)
    }

    fn delete_account(&self, name: &str) -> Result<()> {
        self.run("usermod", ["-G", "", name])?;
        self.run("passwd", ["-d", name])?;
        self.run("userdel", ["-r", name])?;
        info!("Removed user '{}'", name);
        Ok(())
    }

    fn delete_group(&self, name: &str) -> Result<()> {
        self.run("groupdel", [name])?;
        info!("Removed group '{}'", name);
        Ok(())
    }
}
