//! Recursive copy and ownership transfer
//!
//! Destinations usually live inside a home directory whose owner can rearrange it
//! between runs, so nothing written here follows a symlink or writes through a
//! hard link planted in place of an expected entry.

use std::fs::{self, File, Metadata, OpenOptions, Permissions};
use std::io::{self, Read, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use log::{debug, warn};
use nix::fcntl::AtFlags;
use nix::unistd::{fchownat, Gid, Uid};

use crate::errors::{FleetError, Result};
use crate::execution::Identity;

fn copy_error(path: &Path, e: impl std::fmt::Display) -> FleetError {
    FleetError::Copy(format!("{}: {}", path.display(), e))
}

/// Entries a tree walk must not descend into or copy
fn is_skipped(path: &Path, meta: &Metadata, root_dev: u64) -> bool {
    if meta.file_type().is_symlink() {
        debug!("Skipping symlink {}", path.display());
        return true;
    }
    if meta.dev() != root_dev {
        debug!("Skipping mount point {}", path.display());
        return true;
    }
    false
}

fn no_follow(options: &mut OpenOptions) -> &mut OpenOptions {
    options.custom_flags(libc::O_NOFOLLOW)
}

/// Remove a symlink or a hard-linked file sitting where a file will be written
fn unlink_alias(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(copy_error(path, e)),
    };
    if meta.file_type().is_symlink() || (meta.is_file() && meta.nlink() > 1) {
        warn!("Replacing link {} with a regular file", path.display());
        fs::remove_file(path).map_err(|e| copy_error(path, e))?;
    }
    Ok(())
}

/// Make `path` a real directory; a symlink in its place is removed first
pub fn ensure_dir(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(meta) if meta.file_type().is_symlink() => {
            warn!("Replacing symlink {} with a directory", path.display());
            fs::remove_file(path).map_err(|e| copy_error(path, e))?;
        }
        Ok(_) => return Err(copy_error(path, "exists and is not a directory")),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(copy_error(path, e)),
    }
    fs::create_dir(path).map_err(|e| copy_error(path, e))
}

/// Create `base/relative` one component at a time without following symlinks.
///
/// `base` itself is trusted; `relative` must not climb out of it.
pub fn make_dirs_beneath(base: &Path, relative: &Path) -> Result<PathBuf> {
    let mut current = base.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(name) => {
                current.push(name);
                ensure_dir(&current)?;
            }
            Component::CurDir => {}
            _ => {
                return Err(copy_error(
                    relative,
                    format!("must stay inside {}", base.display()),
                ))
            }
        }
    }
    Ok(current)
}

/// `base/relative` if every component below `base` is a real directory
pub fn dir_beneath(base: &Path, relative: &Path) -> Result<PathBuf> {
    let mut current = base.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(name) => {
                current.push(name);
                let meta = fs::symlink_metadata(&current).map_err(|e| copy_error(&current, e))?;
                if !meta.is_dir() {
                    return Err(copy_error(&current, "not a directory"));
                }
            }
            Component::CurDir => {}
            _ => {
                return Err(copy_error(
                    relative,
                    format!("must stay inside {}", base.display()),
                ))
            }
        }
    }
    Ok(current)
}

/// Write `contents` to `path`, replacing any link there instead of writing through it
pub fn write_file(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    unlink_alias(path)?;
    let mut file = no_follow(OpenOptions::new().write(true).create(true).truncate(true))
        .mode(mode)
        .open(path)
        .map_err(|e| copy_error(path, e))?;
    file.write_all(contents).map_err(|e| copy_error(path, e))
}

/// Read `path` as text unless it is a symlink; `None` when it does not exist
pub fn read_file(path: &Path) -> Result<Option<String>> {
    let mut file = match no_follow(OpenOptions::new().read(true)).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(copy_error(path, e)),
    };
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|e| copy_error(path, e))?;
    Ok(Some(contents))
}

/// Copy one regular file to `dst`, keeping its permission bits and modification time
pub fn install_file(src: &Path, dst: &Path) -> Result<()> {
    let meta = fs::metadata(src).map_err(|e| copy_error(src, e))?;
    copy_file(src, dst, &meta)
}

/// Copy the contents of `src` into `dst`, creating `dst` if needed.
///
/// Regular files keep their permissions and modification time. Symbolic links and
/// entries on another filesystem are skipped; other special files are ignored. A
/// failure leaves whatever was already copied in place. Returns the number of
/// files copied.
///
/// Missing parents of `dst` are created as usual; use [`make_dirs_beneath`] first
/// when they lie in a directory owned by someone else.
pub fn tree_copy(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<usize> {
    let src = src.as_ref();
    let dst = dst.as_ref();
    let root = fs::metadata(src).map_err(|e| copy_error(src, e))?;
    if !root.is_dir() {
        return Err(copy_error(src, "not a directory"));
    }
    if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| copy_error(parent, e))?;
    }
    copy_dir(src, dst, root.dev())
}

fn copy_dir(src: &Path, dst: &Path, root_dev: u64) -> Result<usize> {
    ensure_dir(dst)?;

    let mut copied = 0;
    for entry in fs::read_dir(src).map_err(|e| copy_error(src, e))? {
        let entry = entry.map_err(|e| copy_error(src, e))?;
        let path = entry.path();
        let meta = fs::symlink_metadata(&path).map_err(|e| copy_error(&path, e))?;
        if is_skipped(&path, &meta, root_dev) {
            continue;
        }

        let target = dst.join(entry.file_name());
        if meta.is_dir() {
            copied += copy_dir(&path, &target, root_dev)?;
        } else if meta.is_file() {
            copy_file(&path, &target, &meta)?;
            copied += 1;
        }
    }
    Ok(copied)
}

fn copy_file(src: &Path, dst: &Path, meta: &Metadata) -> Result<()> {
    let mode = meta.mode() & 0o777;
    unlink_alias(dst)?;

    let mut input = File::open(src).map_err(|e| copy_error(src, e))?;
    let mut output = no_follow(OpenOptions::new().write(true).create(true).truncate(true))
        .mode(mode)
        .open(dst)
        .map_err(|e| copy_error(dst, e))?;
    io::copy(&mut input, &mut output).map_err(|e| copy_error(dst, e))?;

    output
        .set_permissions(Permissions::from_mode(mode))
        .map_err(|e| copy_error(dst, e))?;
    if let Ok(modified) = meta.modified() {
        output
            .set_modified(modified)
            .map_err(|e| copy_error(dst, e))?;
    }
    Ok(())
}

/// Give every directory and file under `root` to `identity`.
///
/// Entries already owned by the identity's uid and gid are left alone; symlinks,
/// mount points and hard-linked files are skipped. Returns the number of entries
/// changed.
pub fn tree_chown(identity: &Identity, root: impl AsRef<Path>) -> Result<usize> {
    let root = root.as_ref();
    let meta = fs::symlink_metadata(root).map_err(|e| copy_error(root, e))?;
    if meta.file_type().is_symlink() {
        return Ok(0);
    }
    chown_entry(identity, root, &meta, meta.dev())
}

fn chown_entry(identity: &Identity, path: &Path, meta: &Metadata, root_dev: u64) -> Result<usize> {
    if !meta.is_dir() && meta.nlink() > 1 {
        warn!("Leaving hard-linked {} with its owner", path.display());
        return Ok(0);
    }

    let mut changed = 0;
    if meta.uid() != identity.uid || meta.gid() != identity.gid {
        fchownat(
            None,
            path,
            Some(Uid::from_raw(identity.uid)),
            Some(Gid::from_raw(identity.gid)),
            AtFlags::AT_SYMLINK_NOFOLLOW,
        )
        .map_err(|e| copy_error(path, e))?;
        changed += 1;
    }

    if meta.is_dir() {
        for entry in fs::read_dir(path).map_err(|e| copy_error(path, e))? {
            let entry = entry.map_err(|e| copy_error(path, e))?;
            let child = entry.path();
            let child_meta = fs::symlink_metadata(&child).map_err(|e| copy_error(&child, e))?;
            if is_skipped(&child, &child_meta, root_dev) {
                continue;
            }
            changed += chown_entry(identity, &child, &child_meta, root_dev)?;
        }
    }
    Ok(changed)
}

