//! macOS account management through Directory Service

use std::fs;

use log::{info, warn};

use super::{pgrep, AccountProvider};
use crate::errors::Result;
use crate::execution::{CommandRequest, Executor};

/// First id handed out to regular accounts on macOS
const FIRST_REGULAR_ID: u32 = 501;

/// Primary group for created accounts (`staff`)
const STAFF_GID: &str = "20";

/// `dscl` backend
pub struct MacAccounts<E: Executor> {
    exec: E,
}

/// One more than the largest id in a `dscl . -list <path> <attribute>` listing
///
/// Computed from the listing on every call so concurrent allocations in one
/// invocation never share a counter.
pub fn next_free_id(listing: &str) -> u32 {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().last()?.parse::<i64>().ok())
        .filter(|id| (0..i64::from(u32::MAX)).contains(id))
        .map(|id| id as u32 + 1)
        .max()
        .unwrap_or(FIRST_REGULAR_ID)
        .max(FIRST_REGULAR_ID)
}

impl<E: Executor> MacAccounts<E> {
    pub fn new(exec: E) -> Self {
        Self { exec }
    }

    pub fn executor(&self) -> &E {
        &self.exec
    }

    fn dscl<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exec
            .run(&CommandRequest::new("dscl").arg(".").args(args))
    }
}

impl<E: Executor> AccountProvider for MacAccounts<E> {
    fn platform(&self) -> &'static str {
        "macos"
    }

    fn create_account(&self, name: &str, supplementary_groups: &[&str]) -> Result<()> {
        let record = format!("/Users/{}", name);
        let uid = next_free_id(&self.dscl(["-list", "/Users", "UniqueID"])?).to_string();

        self.dscl(["-create", record.as_str()])?;
        self.dscl(["-create", record.as_str(), "UserShell", "/bin/bash"])?;
        self.dscl(["-create", record.as_str(), "UniqueID", uid.as_str()])?;
        self.dscl(["-create", record.as_str(), "PrimaryGroupID", STAFF_GID])?;
        self.dscl(["-create", record.as_str(), "NFSHomeDirectory", record.as_str()])?;
        self.exec
            .run(&CommandRequest::new("createhomedir").args(["-c", "-u", name]))?;

        for group in supplementary_groups {
            self.add_to_group(group, name)?;
        }
        Ok(())
    }

    fn create_group(&self, name: &str) -> Result<()> {
        let record = format!("/Groups/{}", name);
        let gid = next_free_id(&self.dscl(["-list", "/Groups", "PrimaryGroupID"])?).to_string();

        self.dscl(["-create", record.as_str()])?;
        self.dscl(["-create", record.as_str(), "PrimaryGroupID", gid.as_str()])?;
        Ok(())
    }

    fn set_password(&self, name: &str, secret: &str) -> Result<()> {
        let record = format!("/Users/{}", name);
        self.dscl(["-passwd", record.as_str(), secret])?;
        Ok(())
    }

    fn add_to_group(&self, group: &str, name: &str) -> Result<()> {
        let record = format!("/Groups/{}", group);
        self.dscl(["-append", record.as_str(), "GroupMembership", name])?;
        Ok(())
    }

    fn list_owned_processes(&self, name: &str, filter: &str) -> Result<Vec<i32>> {
        pgrep(&self.exec, name, filter)
    }

    fn delete_account(&self, name: &str) -> Result<()> {
        let identity = self.account_exists(name)?;
        let record = format!("/Users/{}", name);

        let groups = self
            .exec
            .run(&CommandRequest::new("id").args(["-Gn", name]))?;
        for group in groups.split_whitespace() {
            let group_record = format!("/Groups/{}", group);
            // Primary groups list no explicit membership; nothing to drop there.
            if let Err(e) = self.dscl(["-delete", group_record.as_str(), "GroupMembership", name]) {
                warn!("Could not drop '{}' from group '{}': {}", name, group, e);
            }
        }

        self.dscl(["-delete", record.as_str(), "Password"])?;
        self.dscl(["-delete", record.as_str()])?;

        if let Some(home) = identity.map(|i| i.home).filter(|h| h.is_dir()) {
            fs::remove_dir_all(&home)?;
        }
        info!("Removed user '{}'", name);
        Ok(())
    }

    fn delete_group(&self, name: &str) -> Result<()> {
        let record = format!("/Groups/{}", name);
        self.dscl(["-delete", record.as_str()])?;
        info!("Removed group '{}'", name);
        Ok(())
    }
}
