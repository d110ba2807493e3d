//! Atomic JSON record persistence
//!
//! Every write lands in a uniquely named sibling temp file
//! (`.<basename>.<16 hex>.tmp`) which is then renamed over the target.
//! A rename within one filesystem is indivisible, so a reader sees either
//! the complete old document or the complete new one.
//!
//! All project record mutations go through [`update_json`] or [`write_json`].

use crate::{Error, Result};
use rand::Rng;
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Sibling temp path for `path`. Same directory so the final rename never
/// crosses a filesystem boundary.
fn temp_path_for(path: &Path) -> PathBuf {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let basename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "record".to_string());
    let tag: u64 = rand::thread_rng().gen();
    dir.join(format!(".{}.{:016x}.tmp", basename, tag))
}

async fn write_and_sync(temp: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(temp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(())
}

/// Atomically replace `path` with `data`.
///
/// On failure the temp file is removed and the target is left untouched.
pub async fn write_bytes(path: &Path, data: &[u8]) -> Result<()> {
    let temp = temp_path_for(path);

    let outcome = match write_and_sync(&temp, data).await {
        Ok(()) => fs::rename(&temp, path).await,
        Err(e) => Err(e),
    };

    if let Err(e) = outcome {
        if let Err(cleanup) = fs::remove_file(&temp).await {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                warn!(temp = %temp.display(), error = %cleanup, "Failed to remove temp file");
            }
        }
        return Err(Error::Io(e));
    }

    debug!(path = %path.display(), bytes = data.len(), "Atomic write complete");
    Ok(())
}

/// Atomically write `value` as pretty-printed JSON.
pub async fn write_json<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let data = serde_json::to_vec_pretty(value)?;
    write_bytes(path, &data).await
}

/// Read a JSON document. Returns `Ok(None)` when the file does not exist.
pub async fn read_json<T>(path: &Path) -> Result<Option<T>>
where
    T: DeserializeOwned,
{
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Read the current document (or `default` when absent), apply `mutate`,
/// atomically write the result and return it.
///
/// `mutate` may reject the change; nothing is written in that case.
/// Concurrent updaters of the same file are last-writer-wins.
pub async fn update_json<T, E, F>(path: &Path, mutate: F, default: T) -> std::result::Result<T, E>
where
    T: Serialize + DeserializeOwned,
    E: From<Error>,
    F: FnOnce(T) -> std::result::Result<T, E>,
{
    let current = read_json::<T>(path).await?.unwrap_or(default);
    let updated = mutate(current)?;
    write_json(path, &updated).await?;
    Ok(updated)
}
