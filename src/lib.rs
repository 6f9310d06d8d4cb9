//! nbfleet: per-user notebook sandboxes on one host
//!
//! Provisions one OS account per roster entry, launches a notebook server under each
//! account, collects the students' work and tears the accounts down again.
//!
//! # Modules
//!
//! - **roster**: Tabular user records, loaded and saved in their original format
//! - **config**: Operational configuration
//! - **execution**: External commands, optionally under another identity
//! - **accounts**: Platform account and group management
//! - **storage**: Material distribution and ownership transfer
//! - **profile**: Notebook profile provisioning
//! - **controller**: Lifecycle orchestration
//! - **presenter**: Web page listing running sandboxes
//!
//! # Example
//!
//! ```ignore
//! use nbfleet::{accounts, roster, AssumeYes, Config, Controller, SystemExecutor};
//!
//! let config = Config::load("notebooks.toml")?;
//! let (mut users, format) = roster::load(&config.setup.user_list)?;
//! let provider = accounts::for_host()?;
//! let controller = Controller::new(&config, provider.as_ref(), &SystemExecutor, &AssumeYes);
//!
//! let report = controller.setup(&mut users);
//! roster::save(&config.setup.user_list, &users, format)?;
//! let report = report?;
//! println!("{} rows failed", report.failed().count());
//! ```

// Core modules
pub mod errors;
pub mod utils;

// Layered modules
pub mod accounts;
pub mod config;
pub mod execution;
pub mod profile;
pub mod roster;
pub mod secrets;
pub mod storage;

// Orchestration and presentation
pub mod controller;
pub mod presenter;

// Public API
pub use accounts::AccountProvider;
pub use config::Config;
pub use controller::{AssumeYes, BatchReport, Confirm, Controller, LifecycleState, RowOutcome};
pub use errors::{FleetError, Result};
pub use execution::{CommandRequest, Executor, Identity, SystemExecutor};
pub use presenter::PresenterState;
pub use roster::{Roster, RosterFormat, UserRecord};

#[cfg(test)]
pub mod test_support;
