//! Atomic Store
//!
//! Moves a finished temp file into its final location. The bytes are first
//! placed under a hidden staging name next to the destination, then renamed
//! over it, so a reader of the final path sees either the old file or the
//! complete new one.

use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Move `temp` to `dest`, replacing whatever is there.
///
/// On success `dest` holds exactly the bytes of `temp` and `temp` is gone.
/// On failure `temp` is left in place and no partial file appears at `dest`.
pub async fn commit(temp: &Path, dest: &Path) -> io::Result<()> {
    let parent = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&parent).await?;

    let staging = staging_path(&parent, dest);
    let copied = stage(temp, &staging).await?;

    if let Err(e) = tokio::fs::rename(&staging, dest).await {
        if copied {
            let _ = tokio::fs::remove_file(&staging).await;
        } else {
            // put the bytes back where the caller expects them
            let _ = tokio::fs::rename(&staging, temp).await;
        }
        return Err(e);
    }

    if copied {
        remove_if_exists(temp).await?;
    }

    sync_dir(&parent).await;
    Ok(())
}

/// Move a published file back to `temp` after its catalog record failed.
///
/// Renames when possible and copies across filesystems. A file that `dest`
/// replaced under the overwrite policy is not brought back.
pub async fn restore(dest: &Path, temp: &Path) -> io::Result<()> {
    match tokio::fs::rename(dest, temp).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            copy_synced(dest, temp).await?;
            tokio::fs::remove_file(dest).await
        }
        Err(e) => Err(e),
    }
}

/// Remove a file, treating absence as success. Returns whether it existed.
pub async fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn staging_path(parent: &Path, dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    parent.join(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
}

/// Bring `temp` to `staging`. Rename when both sit on one filesystem, else
/// copy and fsync. Returns true when the bytes were copied.
async fn stage(temp: &Path, staging: &Path) -> io::Result<bool> {
    match tokio::fs::rename(temp, staging).await {
        Ok(()) => Ok(false),
        Err(e) if is_cross_device(&e) => {
            tracing::debug!(
                from = %temp.display(),
                to = %staging.display(),
                "Cross-device move, copying"
            );
            if let Err(e) = copy_synced(temp, staging).await {
                let _ = tokio::fs::remove_file(staging).await;
                return Err(e);
            }
            Ok(true)
        }
        Err(e) => Err(e),
    }
}

async fn copy_synced(from: &Path, to: &Path) -> io::Result<()> {
    tokio::fs::copy(from, to).await?;
    let file = tokio::fs::OpenOptions::new().write(true).open(to).await?;
    file.sync_all().await
}

#[cfg(unix)]
fn is_cross_device(err: &io::Error) -> bool {
    // EXDEV
    err.raw_os_error() == Some(18)
}

#[cfg(not(unix))]
fn is_cross_device(_err: &io::Error) -> bool {
    false
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) {
    let dir = dir.to_path_buf();
    let result = tokio::task::spawn_blocking(move || std::fs::File::open(&dir)?.sync_all()).await;
    if let Ok(Err(e)) = result {
        tracing::warn!("Failed to sync storage directory: {}", e);
    }
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) {}
