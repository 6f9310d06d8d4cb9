//! Operational configuration
//!
//! Loaded once per invocation from a TOML document with `[setup]`, `[launch]` and
//! `[shutdown]` sections and immutable afterwards.
//!
//! ```toml
//! [setup]
//! user_list = "students.csv"
//! tutorial_dir = "tutorial"
//! material_dir = "/srv/course/week01"
//! password_length = 12
//! group = "students"
//! profile = "nbserver"
//!
//! [launch]
//! cert_file = "/etc/ssl/private/notebooks.pem"
//! port = 9000
//! server_address = ""
//! web_title = "Scientific Computing"
//!
//! [shutdown]
//! storage_dir = "/srv/course/collected"
//! owner = "instructor"
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::{FleetError, Result};
use crate::utils;

/// Default configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "notebooks.toml";

/// Settings used while provisioning accounts
#[derive(Debug, Clone, Deserialize)]
pub struct SetupConfig {
    /// Roster file
    pub user_list: PathBuf,
    /// Destination of the material, relative to each user's home
    pub tutorial_dir: PathBuf,
    /// Operator-side material copied into every account
    pub material_dir: PathBuf,
    /// Length of generated secrets
    pub password_length: usize,
    /// Shared supplementary group
    pub group: String,
    /// Notebook profile name; empty disables profile provisioning
    #[serde(default)]
    pub profile: String,
    /// Directory whose `*.py` files seed each user's profile
    #[serde(default)]
    pub profile_template: Option<PathBuf>,
    /// Notebook configuration directory, relative to each user's home
    #[serde(default = "default_ipython_dir")]
    pub ipython_dir: PathBuf,
    /// Command that creates a named profile (profile name is appended)
    #[serde(default = "default_profile_command")]
    pub profile_command: Vec<String>,
}

/// Settings used while launching sandboxes and the presenter
#[derive(Debug, Clone, Deserialize)]
pub struct LaunchConfig {
    /// TLS certificate handed to every sandbox
    pub cert_file: PathBuf,
    /// Working directory of the sandbox, relative to each user's home
    #[serde(default)]
    pub launch_dir: Option<PathBuf>,
    /// Base port; the presenter listens here and row `i` gets `port + 1 + i`
    pub port: u16,
    /// Address advertised in sandbox links; detected when empty
    #[serde(default)]
    pub server_address: String,
    /// Title of the presenter page
    #[serde(default)]
    pub web_title: String,
    /// Sandbox program and leading arguments
    #[serde(default = "default_notebook_command")]
    pub notebook_command: Vec<String>,
    /// Pattern matched against full command lines when terminating sandboxes
    #[serde(default = "default_process_name")]
    pub process_name: String,
}

/// Settings used while collecting artifacts and removing accounts
#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownConfig {
    /// Collected artifacts land in `storage_dir/<login>`
    pub storage_dir: PathBuf,
    /// Account that owns the collected artifacts
    #[serde(default)]
    pub owner: String,
    #[serde(default = "default_true")]
    pub retrieve_before_remove: bool,
    /// Delay between terminating sandboxes and checking for survivors
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

/// Complete operational configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub setup: SetupConfig,
    pub launch: LaunchConfig,
    pub shutdown: ShutdownConfig,
}

fn default_ipython_dir() -> PathBuf {
    PathBuf::from(".ipython")
}

fn default_profile_command() -> Vec<String> {
    vec!["ipython".into(), "profile".into(), "create".into()]
}

fn default_notebook_command() -> Vec<String> {
    vec!["ipython".into(), "notebook".into()]
}

fn default_process_name() -> String {
    "ipython notebook".to_string()
}

fn default_true() -> bool {
    true
}

fn default_settle_ms() -> u64 {
    200
}

impl Config {
    /// Read, resolve and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => FleetError::not_found(path),
            _ => FleetError::Io(e),
        })?;

        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut config = Self::from_toml_str(&contents)?;
        config.resolve_relative_to(base);
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Parse without touching the filesystem
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| FleetError::Config(e.to_string()))
    }

    /// Anchor operator-side relative paths at the configuration file's directory
    pub fn resolve_relative_to(&mut self, base: &Path) {
        let anchor = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        anchor(&mut self.setup.user_list);
        anchor(&mut self.setup.material_dir);
        anchor(&mut self.shutdown.storage_dir);
        if let Some(template) = self.setup.profile_template.as_mut() {
            anchor(template);
        }
    }

    /// Fill in values derived from other settings
    pub fn apply_defaults(&mut self) {
        let launch_dir_missing = self
            .launch
            .launch_dir
            .as_ref()
            .map_or(true, |d| d.as_os_str().is_empty());
        if launch_dir_missing {
            self.launch.launch_dir = Some(self.material_destination());
        }
        if self.launch.server_address.trim().is_empty() {
            self.launch.server_address = utils::detect_server_address();
        }
    }

    /// Check every setting that must hold before any account is touched
    pub fn validate(&self) -> Result<()> {
        if !self.setup.user_list.exists() {
            return Err(FleetError::Config(format!(
                "no such file '{}'",
                self.setup.user_list.display()
            )));
        }
        if !self.setup.material_dir.is_dir() {
            return Err(FleetError::Config(format!(
                "no such directory '{}'",
                self.setup.material_dir.display()
            )));
        }
        if self.setup.password_length == 0 {
            return Err(FleetError::Config(
                "password_length must be greater than zero".to_string(),
            ));
        }
        if self.setup.group.trim().is_empty() {
            return Err(FleetError::Config("group cannot be empty".to_string()));
        }
        if self.setup.tutorial_dir.is_absolute() {
            return Err(FleetError::Config(format!(
                "tutorial_dir '{}' must be relative to the users' homes",
                self.setup.tutorial_dir.display()
            )));
        }
        if !self.launch.cert_file.is_absolute() {
            return Err(FleetError::Config(format!(
                "path to certificate file '{}' is not absolute",
                self.launch.cert_file.display()
            )));
        }
        if !self.launch.cert_file.exists() {
            return Err(FleetError::Config(format!(
                "no such file '{}'",
                self.launch.cert_file.display()
            )));
        }
        if self.launch.notebook_command.is_empty() {
            return Err(FleetError::Config(
                "notebook_command cannot be empty".to_string(),
            ));
        }
        if self.launch.process_name.trim().is_empty() {
            return Err(FleetError::Config("process_name cannot be empty".to_string()));
        }
        if !self.setup.profile.is_empty() && self.setup.profile_command.is_empty() {
            return Err(FleetError::Config(
                "profile_command cannot be empty when a profile is set".to_string(),
            ));
        }
        Ok(())
    }

    /// Last component of the material directory
    pub fn material_name(&self) -> PathBuf {
        self.setup
            .material_dir
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("material"))
    }

    /// Where the material lands, relative to a home directory
    pub fn material_destination(&self) -> PathBuf {
        self.setup.tutorial_dir.join(self.material_name())
    }

    /// Sandbox working directory, relative to a home directory
    pub fn launch_dir(&self) -> PathBuf {
        self.launch
            .launch_dir
            .clone()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| self.material_destination())
    }
}
