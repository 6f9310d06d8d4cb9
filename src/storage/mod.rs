//! Storage layer: material distribution and artifact collection
//!
//! Copies directory trees between the operator and user homes and hands ownership
//! of the copies to the right account.
//!
//! # Features
//!
//! - **Tree copy**: regular files and directories only; symlinks and mount points
//!   are skipped
//! - **Tree chown**: only entries whose owner differs are touched, so re-runs are free
//! - **No-follow writes**: a symlink or hard link left where a file or directory is
//!   expected is replaced, never written through
//!
//! # Examples
//!
//! ```ignore
//! use nbfleet::storage::{make_dirs_beneath, tree_chown, tree_copy};
//!
//! let tutorial = make_dirs_beneath(&alice.home, Path::new("tutorial"))?;
//! tree_copy("/srv/course/week01", tutorial.join("week01"))?;
//! tree_chown(&alice, "/home/alice/tutorial")?;
//! ```

pub mod distribute;
pub use distribute::{
    dir_beneath, install_file, make_dirs_beneath, read_file, tree_chown, tree_copy, write_file,
};
