//! Per-user notebook profile provisioning
//!
//! A profile is created by running the configured profile command as the account,
//! seeded from an operator template, and locked with the hashed sandbox secret.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::config::SetupConfig;
use crate::errors::{FleetError, Result};
use crate::execution::{CommandRequest, Executor, Identity};
use crate::secrets;
use crate::storage::distribute::ensure_dir;
use crate::storage::{install_file, make_dirs_beneath, read_file, tree_chown, write_file};

/// Notebook server configuration file inside a profile
pub const NOTEBOOK_CONFIG_FILE: &str = "ipython_notebook_config.py";

const PASSWORD_SETTING: &str = "c.NotebookApp.password";

/// Profile directory of `profile` under a home directory
pub fn profile_dir(setup: &SetupConfig, home: &Path) -> PathBuf {
    home.join(profile_path(setup))
}

fn profile_path(setup: &SetupConfig) -> PathBuf {
    setup
        .ipython_dir
        .join(format!("profile_{}", setup.profile))
}

/// Configuration text with the password setting replaced, or appended when absent
pub fn with_password(contents: &str, hashed: &str) -> String {
    let setting = format!("{} = u'{}'", PASSWORD_SETTING, hashed);
    let mut replaced = false;
    let mut lines: Vec<String> = contents
        .lines()
        .map(|line| {
            if !replaced && line.trim_start().starts_with(PASSWORD_SETTING) {
                replaced = true;
                setting.clone()
            } else {
                line.to_string()
            }
        })
        .collect();
    if !replaced {
        lines.push(setting);
    }

    let mut text = lines.join("\n");
    text.push('\n');
    text
}

/// Copy the `*.py` files directly inside `src` to `dst`; returns how many were copied
fn copy_python_files(src: &Path, dst: &Path) -> Result<usize> {
    if !src.is_dir() {
        return Ok(0);
    }
    ensure_dir(dst)?;

    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let path = entry?.path();
        let is_python = path.extension().is_some_and(|ext| ext == "py");
        if is_python && path.is_file() {
            if let Some(name) = path.file_name() {
                install_file(&path, &dst.join(name))?;
                copied += 1;
            }
        }
    }
    Ok(copied)
}

/// Create and configure the account's profile; returns the profile directory
pub fn provision(
    exec: &dyn Executor,
    setup: &SetupConfig,
    identity: &Identity,
    app_secret: &str,
) -> Result<PathBuf> {
    let request = CommandRequest::from_argv(&setup.profile_command)
        .ok_or_else(|| FleetError::Config("profile_command cannot be empty".to_string()))?
        .arg(setup.profile.as_str())
        .cwd(&identity.home)
        .run_as(identity);
    exec.run(&request)?;

    let dir = make_dirs_beneath(&identity.home, &profile_path(setup))?;

    if let Some(template) = &setup.profile_template {
        let copied = copy_python_files(template, &dir)?
            + copy_python_files(&template.join("startup"), &dir.join("startup"))?;
        debug!("Copied {} profile files from {}", copied, template.display());
    }

    let config_file = dir.join(NOTEBOOK_CONFIG_FILE);
    let contents = read_file(&config_file)?.unwrap_or_default();
    let updated = with_password(&contents, &secrets::hash_app_secret(app_secret));
    write_file(&config_file, updated.as_bytes(), 0o600)?;

    tree_chown(identity, &dir)?;
    info!("Profile '{}' ready for '{}'", setup.profile, identity.login);
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::verify_app_secret;
    use crate::test_support::RecordingExecutor;
    use crate::utils;
    use tempfile::tempdir;

    fn setup_config(template: Option<PathBuf>) -> SetupConfig {
        SetupConfig {
            user_list: PathBuf::from("students.csv"),
            tutorial_dir: PathBuf::from("tutorial"),
            material_dir: PathBuf::from("week01"),
            password_length: 8,
            group: "students".to_string(),
            profile: "nbserver".to_string(),
            profile_template: template,
            ipython_dir: PathBuf::from(".ipython"),
            profile_command: vec!["ipython".into(), "profile".into(), "create".into()],
        }
    }

    fn identity(home: &Path) -> Identity {
        Identity {
            login: "alice".to_string(),
            uid: utils::get_uid(),
            gid: utils::get_gid(),
            home: home.to_path_buf(),
        }
    }

    fn stored_hash(contents: &str) -> &str {
        contents
            .lines()
            .find_map(|l| l.strip_prefix("c.NotebookApp.password = u'"))
            .and_then(|rest| rest.strip_suffix('\''))
            .unwrap()
    }

    #[test]
    fn password_line_is_replaced_in_place() {
        let original = "c = get_config()\nc.NotebookApp.password = u''\nc.NotebookApp.port = 1\n";
        let updated = with_password(original, "sha256:abc:def");
        assert_eq!(
            updated,
            "c = get_config()\nc.NotebookApp.password = u'sha256:abc:def'\nc.NotebookApp.port = 1\n"
        );
    }

    #[test]
    fn password_line_is_appended_when_missing() {
        assert_eq!(
            with_password("c = get_config()\n# c.NotebookApp.password = u''", "h"),
            "c = get_config()\n# c.NotebookApp.password = u''\nc.NotebookApp.password = u'h'\n"
        );
        assert_eq!(with_password("", "h"), "c.NotebookApp.password = u'h'\n");
    }

    #[test]
    fn provision_runs_profile_command_as_account() {
        let home = tempdir().unwrap();
        let exec = RecordingExecutor::new();
        let setup = setup_config(None);
        let alice = identity(home.path());

        let dir = provision(&exec, &setup, &alice, "nbsecret").unwrap();

        let calls = exec.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].command_line(), "ipython profile create nbserver");
        assert_eq!(calls[0].identity.as_ref(), Some(&alice));
        assert_eq!(calls[0].cwd.as_deref(), Some(home.path()));
        assert_eq!(dir, home.path().join(".ipython/profile_nbserver"));
        assert_eq!(dir, profile_dir(&setup, home.path()));

        let contents = fs::read_to_string(dir.join(NOTEBOOK_CONFIG_FILE)).unwrap();
        assert!(verify_app_secret(stored_hash(&contents), "nbsecret"));
    }

    #[test]
    fn provision_copies_template_files() {
        let scratch = tempdir().unwrap();
        let template = scratch.path().join("template");
        fs::create_dir_all(template.join("startup")).unwrap();
        fs::write(
            template.join(NOTEBOOK_CONFIG_FILE),
            "c = get_config()\nc.NotebookApp.password = u''\n",
        )
        .unwrap();
        fs::write(template.join("notes.txt"), "not python").unwrap();
        fs::write(template.join("startup/00-imports.py"), "import numpy\n").unwrap();
        let home = scratch.path().join("home");
        fs::create_dir_all(&home).unwrap();

        let dir = provision(
            &RecordingExecutor::new(),
            &setup_config(Some(template)),
            &identity(&home),
            "nbsecret",
        )
        .unwrap();

        assert!(dir.join("startup/00-imports.py").is_file());
        assert!(!dir.join("notes.txt").exists());
        let contents = fs::read_to_string(dir.join(NOTEBOOK_CONFIG_FILE)).unwrap();
        assert!(contents.starts_with("c = get_config()\n"));
        assert_eq!(contents.matches("c.NotebookApp.password").count(), 1);
        assert!(verify_app_secret(stored_hash(&contents), "nbsecret"));
    }

    #[test]
    fn failing_profile_command_stops_provisioning() {
        let home = tempdir().unwrap();
        let exec = RecordingExecutor::new();
        exec.fail("ipython profile", 1, "ipython: command not found");

        let err = provision(&exec, &setup_config(None), &identity(home.path()), "x").unwrap_err();

        assert!(matches!(err, FleetError::Command { .. }));
        assert!(!home.path().join(".ipython").exists());
    }

    #[test]
    fn provision_replaces_links_planted_in_the_profile() {
        let scratch = tempdir().unwrap();
        let home = scratch.path().join("home");
        let outside = scratch.path().join("shadow");
        fs::write(&outside, "root:x:0:0\n").unwrap();
        let dir = home.join(".ipython/profile_nbserver");
        fs::create_dir_all(&dir).unwrap();
        std::os::unix::fs::symlink(&outside, dir.join(NOTEBOOK_CONFIG_FILE)).unwrap();

        provision(
            &RecordingExecutor::new(),
            &setup_config(None),
            &identity(&home),
            "nbsecret",
        )
        .unwrap();

        assert_eq!(fs::read_to_string(&outside).unwrap(), "root:x:0:0\n");
        let config_file = dir.join(NOTEBOOK_CONFIG_FILE);
        assert!(!fs::symlink_metadata(&config_file).unwrap().file_type().is_symlink());
        let contents = fs::read_to_string(config_file).unwrap();
        assert!(!contents.contains("root:x"));
        assert!(verify_app_secret(stored_hash(&contents), "nbsecret"));
    }

    #[test]
    fn provision_refuses_profile_path_behind_symlink() {
        let scratch = tempdir().unwrap();
        let home = scratch.path().join("home");
        let elsewhere = scratch.path().join("elsewhere");
        fs::create_dir_all(&home).unwrap();
        fs::create_dir_all(&elsewhere).unwrap();
        std::os::unix::fs::symlink(&elsewhere, home.join(".ipython")).unwrap();

        let dir = provision(
            &RecordingExecutor::new(),
            &setup_config(None),
            &identity(&home),
            "nbsecret",
        )
        .unwrap();

        assert!(fs::symlink_metadata(home.join(".ipython")).unwrap().is_dir());
        assert!(dir.join(NOTEBOOK_CONFIG_FILE).is_file());
        assert_eq!(fs::read_dir(&elsewhere).unwrap().count(), 0);
    }
}
