//! Execution layer: running external commands
//!
//! Every account, group and sandbox operation ends up here as a [`CommandRequest`]
//! handed to an [`Executor`].
//!
//! # Features
//!
//! - **Output capture**: stdout, falling back to stderr for tools that report there
//! - **Structured failure**: exit code plus captured diagnostics
//! - **Credential switching**: group then user, in the child only
//! - **Detached launch**: new session, streams closed, reaped in the background
//!
//! # Examples
//!
//! ```ignore
//! use nbfleet::execution::{CommandRequest, Executor, Identity, SystemExecutor};
//!
//! let alice = Identity::lookup("alice")?.expect("account exists");
//! let request = CommandRequest::new("ipython")
//!     .args(["profile", "create", "nbserver"])
//!     .run_as(&alice);
//! let output = SystemExecutor.run(&request)?;
//! ```

pub mod process;
pub use process::{CommandRequest, Executor, Identity, SystemExecutor};
