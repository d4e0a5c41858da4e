//! Directory mirroring between a local tree and an object-store key prefix
//!
//! `{src_dir}/a/b.bin` uploads to `{key_prefix}a/b.bin`; downloads reverse the
//! mapping. Key prefixes must end with `/` and are checked before any I/O.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use harness_core::{Error, Result};
use tokio::fs;
use tracing::{debug, info, instrument};

use crate::backend::{ObjectStore, KEY_SEPARATOR};

fn validate_key_prefix(key_prefix: &str) -> Result<()> {
    if key_prefix.ends_with(KEY_SEPARATOR) {
        Ok(())
    } else {
        Err(Error::InvalidKeyPrefix {
            prefix: key_prefix.to_string(),
        })
    }
}

/// Map a file under `root` to its object key
pub fn file_path_to_key(file_path: &Path, root: &Path, key_prefix: &str) -> Result<String> {
    let relative = file_path.strip_prefix(root).map_err(|_| Error::Internal {
        message: format!("{} is not under {}", file_path.display(), root.display()),
    })?;
    let suffix = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join(&KEY_SEPARATOR.to_string());
    Ok(format!("{key_prefix}{suffix}"))
}

/// Map an object key under `key_prefix` to a file under `root`
pub fn key_to_file_path(key: &str, root: &Path, key_prefix: &str) -> Result<PathBuf> {
    validate_key_prefix(key_prefix)?;
    let suffix = key.strip_prefix(key_prefix).ok_or_else(|| Error::Internal {
        message: format!("key {key:?} is not under prefix {key_prefix:?}"),
    })?;

    let mut path = root.to_path_buf();
    for segment in suffix.split(KEY_SEPARATOR).filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." {
            return Err(Error::Storage {
                message: format!("key {key:?} would escape {}", root.display()),
            });
        }
        path.push(segment);
    }
    Ok(path)
}

/// Regular files under `root`, sorted
async fn walk_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Upload every file under `src_dir` to `bucket` under `key_prefix`
///
/// Returns the number of objects uploaded.
#[instrument(skip(store, src_dir), fields(src_dir = %src_dir.as_ref().display()))]
pub async fn upload_directory<S>(
    store: &S,
    src_dir: impl AsRef<Path>,
    bucket: &str,
    key_prefix: &str,
) -> Result<usize>
where
    S: ObjectStore + ?Sized,
{
    validate_key_prefix(key_prefix)?;
    let src_dir = src_dir.as_ref();

    let files = walk_files(src_dir).await?;
    for file_path in &files {
        let key = file_path_to_key(file_path, src_dir, key_prefix)?;
        let data = fs::read(file_path).await?;
        let size = store.put_object(bucket, &key, Bytes::from(data)).await?;
        debug!(%key, size, "Uploaded object");
    }

    info!(bucket, key_prefix, count = files.len(), "Uploaded directory");
    Ok(files.len())
}

/// Download every object under `key_prefix` in `bucket` into `dst_dir`
///
/// Keys ending in `/` are directory markers and are skipped. Returns the
/// number of objects downloaded.
#[instrument(skip(store, dst_dir), fields(dst_dir = %dst_dir.as_ref().display()))]
pub async fn download_directory<S>(
    store: &S,
    bucket: &str,
    key_prefix: &str,
    dst_dir: impl AsRef<Path>,
) -> Result<usize>
where
    S: ObjectStore + ?Sized,
{
    validate_key_prefix(key_prefix)?;
    let dst_dir = dst_dir.as_ref();

    let mut count = 0;
    for key in store.list_objects(bucket, key_prefix).await? {
        if key.ends_with(KEY_SEPARATOR) {
            continue;
        }
        let file_path = key_to_file_path(&key, dst_dir, key_prefix)?;
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let data = store.get_object(bucket, &key).await?;
        fs::write(&file_path, &data).await?;
        debug!(%key, path = %file_path.display(), "Downloaded object");
        count += 1;
    }

    info!(bucket, key_prefix, count, "Downloaded directory");
    Ok(count)
}
