//! The configuration and runtime artifacts currently active on the host.

use crate::bundle::ConfigurationBundle;
use crate::config::DeployConfig;
use crate::utils::{move_path, remove_path};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Paths making up the installed server state.
///
/// Passed explicitly through each pipeline step; only a running deployment
/// mutates what these paths point at.
#[derive(Debug, Clone)]
pub struct InstalledState {
    pub install_dir: PathBuf,
    pub config_file: PathBuf,
    pub routes_dir: PathBuf,
    pub pool_file: PathBuf,
    pub log_files: Vec<PathBuf>,
}

impl InstalledState {
    pub fn from_config(config: &DeployConfig) -> Self {
        let dir = &config.install_dir;
        Self {
            install_dir: dir.clone(),
            config_file: dir.join(&config.config_file),
            routes_dir: dir.join(&config.routes_dir),
            pool_file: dir.join(&config.pool_file),
            log_files: config.log_files.iter().map(|f| dir.join(f)).collect(),
        }
    }

    /// Mutable artifacts retired into a snapshot before replacement
    pub fn artifacts(&self) -> Vec<&Path> {
        let mut paths = vec![
            self.config_file.as_path(),
            self.routes_dir.as_path(),
            self.pool_file.as_path(),
        ];
        paths.extend(self.log_files.iter().map(PathBuf::as_path));
        paths
    }

    /// Move the bundle's contents into the install directory.
    ///
    /// The configuration file lands under the configured name and the routes
    /// directory is moved whole. Leftover entries with the same name are
    /// replaced. Returns the installed entry names.
    pub fn install(&self, bundle: ConfigurationBundle) -> Result<Vec<String>> {
        fs::create_dir_all(&self.install_dir).with_context(|| {
            format!(
                "Failed to create install directory: {}",
                self.install_dir.display()
            )
        })?;

        let mut moves: Vec<(PathBuf, PathBuf)> =
            vec![(bundle.config_path.clone(), self.config_file.clone())];
        if let Some(routes) = &bundle.routes_dir {
            moves.push((routes.clone(), self.routes_dir.clone()));
        }
        let extras = bundle.extra_entries().with_context(|| {
            format!("Failed to list bundle directory: {}", bundle.root.display())
        })?;
        for entry in extras {
            if let Some(name) = entry.file_name() {
                let target = self.install_dir.join(name);
                moves.push((entry, target));
            }
        }

        let mut installed = Vec::with_capacity(moves.len());
        for (from, to) in moves {
            if fs::symlink_metadata(&to).is_ok() {
                tracing::debug!(path = %to.display(), "replacing leftover entry");
                remove_path(&to)?;
            }
            move_path(&from, &to)?;
            tracing::debug!(from = %from.display(), to = %to.display(), "installed");
            installed.push(
                to.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            );
        }

        Ok(installed)
    }
}
