use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Move a file or directory tree, falling back to copy-and-remove when a
/// plain rename crosses filesystems.
pub fn move_path(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }

    let metadata = fs::symlink_metadata(from)
        .with_context(|| format!("Failed to stat {}", from.display()))?;
    if metadata.is_dir() {
        copy_dir_all(from, to)?;
        fs::remove_dir_all(from)
            .with_context(|| format!("Failed to remove directory: {}", from.display()))?;
    } else {
        fs::copy(from, to).with_context(|| {
            format!(
                "Failed to copy file from {} to {}",
                from.display(),
                to.display()
            )
        })?;
        fs::remove_file(from)
            .with_context(|| format!("Failed to remove file: {}", from.display()))?;
    }
    Ok(())
}

/// Remove a file or directory tree if it exists
pub fn remove_path(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)
            .with_context(|| format!("Failed to remove directory: {}", path.display())),
        Ok(_) => fs::remove_file(path)
            .with_context(|| format!("Failed to remove file: {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to stat {}", path.display())),
    }
}

/// Copy a file or directory tree, leaving the source in place
pub fn copy_path(from: &Path, to: &Path) -> Result<()> {
    if from.is_dir() {
        copy_dir_all(from, to)
    } else {
        fs::copy(from, to)
            .map(|_| ())
            .with_context(|| format!("Failed to copy {}", from.display()))
    }
}

fn copy_dir_all(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to)
        .with_context(|| format!("Failed to create directory: {}", to.display()))?;
    for entry in fs::read_dir(from)
        .with_context(|| format!("Failed to read directory: {}", from.display()))?
    {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).with_context(|| {
                format!("Failed to copy {}", entry.path().display())
            })?;
        }
    }
    Ok(())
}
