use crate::state::InstalledState;
use crate::utils::{copy_path, move_path, remove_path};
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const INFO_FILE: &str = "backup-info.txt";

/// Timestamp-named copy of the artifacts that were installed before a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupSnapshot {
    pub name: String,
    pub path: PathBuf,
    /// Artifact names moved into the snapshot, in the order they were moved
    pub artifacts: Vec<String>,
}

/// Retire the installed artifacts into a fresh snapshot under `backup_root`.
///
/// Each artifact is moved only if it exists. The snapshot directory is named
/// from `now` at second resolution and never reuses an existing directory.
pub fn snapshot(
    state: &InstalledState,
    backup_root: &Path,
    now: NaiveDateTime,
) -> Result<BackupSnapshot> {
    let (name, path) = create_snapshot_dir(backup_root, now)?;

    let mut artifacts = Vec::new();
    for artifact in state.artifacts() {
        if fs::symlink_metadata(artifact).is_err() {
            continue;
        }
        let Some(file_name) = artifact.file_name() else {
            continue;
        };
        move_path(artifact, &path.join(file_name))?;
        artifacts.push(file_name.to_string_lossy().into_owned());
    }

    write_info(&path, &name, now, &artifacts)?;

    tracing::info!(snapshot = %path.display(), ?artifacts, "backed up installed configuration");
    Ok(BackupSnapshot {
        name,
        path,
        artifacts,
    })
}

fn create_snapshot_dir(backup_root: &Path, now: NaiveDateTime) -> Result<(String, PathBuf)> {
    fs::create_dir_all(backup_root).with_context(|| {
        format!(
            "Failed to create backup base directory: {}",
            backup_root.display()
        )
    })?;

    let base = now.format("%Y%m%d_%H%M%S").to_string();
    for attempt in 0u32.. {
        let name = if attempt == 0 {
            base.clone()
        } else {
            format!("{}-{}", base, attempt)
        };
        let path = backup_root.join(&name);
        match fs::create_dir(&path) {
            Ok(()) => return Ok((name, path)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to create backup directory: {}", path.display())
                });
            }
        }
    }
    unreachable!("snapshot suffixes exhausted")
}

fn write_info(dir: &Path, name: &str, now: NaiveDateTime, artifacts: &[String]) -> Result<()> {
    let mut info = format!(
        "Host: {}\nOperator: {}\nSnapshot: {}\nDate: {}\nArtifacts:\n",
        whoami::devicename(),
        whoami::username(),
        name,
        now.format("%Y-%m-%d %H:%M:%S"),
    );
    if artifacts.is_empty() {
        info.push_str("  (none installed)\n");
    }
    for artifact in artifacts {
        info.push_str(&format!("  - {}\n", artifact));
    }
    fs::write(dir.join(INFO_FILE), info)
        .with_context(|| format!("Failed to write backup metadata in {}", dir.display()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupEntry {
    pub name: String,
    pub path: PathBuf,
    pub artifacts: Vec<String>,
}

/// Snapshots under `backup_root`, newest first
pub fn list(backup_root: &Path) -> Result<Vec<BackupEntry>> {
    if !backup_root.is_dir() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for entry in fs::read_dir(backup_root)
        .with_context(|| format!("Failed to read directory: {}", backup_root.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let path = entry.path();
        let mut artifacts: Vec<String> = fs::read_dir(&path)?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n != INFO_FILE)
            .collect();
        artifacts.sort();
        entries.push(BackupEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            path,
            artifacts,
        });
    }

    entries.sort_by(|a, b| sort_key(&b.name).cmp(&sort_key(&a.name)));
    Ok(entries)
}

fn sort_key(name: &str) -> (&str, u32) {
    match name.split_once('-') {
        Some((base, suffix)) => (base, suffix.parse().unwrap_or(0)),
        None => (name, 0),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    /// Snapshot holding what was installed right before the restore
    pub retired: BackupSnapshot,
    pub restored: Vec<String>,
}

/// Put the artifacts of snapshot `name` back into the install directory.
///
/// Whatever is currently installed is first retired into a new snapshot, and
/// the restored snapshot itself is copied rather than consumed.
pub fn restore(
    state: &InstalledState,
    backup_root: &Path,
    name: &str,
    now: NaiveDateTime,
) -> Result<RestoreReport> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        anyhow::bail!("Invalid backup name: {}", name);
    }
    let source = backup_root.join(name);
    if !source.is_dir() {
        anyhow::bail!(
            "Backup directory does not exist: {}\n\nList available backups with: ovpn-deploy backup list",
            source.display()
        );
    }

    let retired = snapshot(state, backup_root, now)?;

    fs::create_dir_all(&state.install_dir).with_context(|| {
        format!(
            "Failed to create install directory: {}",
            state.install_dir.display()
        )
    })?;

    let mut restored = Vec::new();
    for entry in fs::read_dir(&source)
        .with_context(|| format!("Failed to read directory: {}", source.display()))?
    {
        let entry = entry?;
        let file_name = entry.file_name();
        if file_name == INFO_FILE {
            continue;
        }
        let target = state.install_dir.join(&file_name);
        remove_path(&target)?;
        copy_path(&entry.path(), &target)?;
        restored.push(file_name.to_string_lossy().into_owned());
    }
    restored.sort();

    tracing::info!(snapshot = %source.display(), ?restored, "restored backup");
    Ok(RestoreReport { retired, restored })
}
