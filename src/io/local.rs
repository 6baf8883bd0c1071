//! Directory-backed [`ObjectStore`].
//!
//! Each container is a sub-directory of `root`; keys are `/`-separated paths
//! beneath it.

use crate::io::store::{ObjectReference, ObjectStore, StoreError, StoreErrorKind, StoreResult};
use bytes::Bytes;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, container: &str, key: &str) -> StoreResult<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if container.is_empty() || key.is_empty() || escapes {
            return Err(StoreError::new(
                StoreErrorKind::Other,
                format!("invalid object location {container}/{key}"),
            ));
        }
        Ok(self.root.join(container).join(relative))
    }
}

fn store_error(err: &io::Error, what: &str) -> StoreError {
    let kind = match err.kind() {
        io::ErrorKind::NotFound => StoreErrorKind::NotFound,
        io::ErrorKind::PermissionDenied => StoreErrorKind::AccessDenied,
        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut => StoreErrorKind::Network,
        _ => StoreErrorKind::Other,
    };
    StoreError::new(kind, format!("{what}: {err}"))
}

fn walk(dir: &Path, relative: &str, out: &mut Vec<(String, fs::Metadata)>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let key = if relative.is_empty() {
            name
        } else {
            format!("{relative}/{name}")
        };
        let meta = entry.metadata()?;
        if meta.is_dir() {
            walk(&entry.path(), &key, out)?;
        } else {
            out.push((key, meta));
        }
    }
    Ok(())
}

impl ObjectStore for LocalObjectStore {
    fn list(&self, container: &str, prefix: &str) -> StoreResult<Vec<ObjectReference>> {
        let base = self.root.join(container);
        let mut entries = Vec::new();
        walk(&base, "", &mut entries)
            .map_err(|e| store_error(&e, &format!("list {}", base.display())))?;

        let mut objects: Vec<ObjectReference> = entries
            .into_iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, meta)| {
                let reference = ObjectReference::new(container, key).with_size(meta.len());
                match meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .and_then(|d| i64::try_from(d.as_secs()).ok())
                {
                    Some(secs) => reference.with_last_modified(secs),
                    None => reference,
                }
            })
            .collect();
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    fn get(&self, container: &str, key: &str) -> StoreResult<Bytes> {
        let path = self.object_path(container, key)?;
        fs::read(&path)
            .map(Bytes::from)
            .map_err(|e| store_error(&e, &format!("read {}", path.display())))
    }

    fn put(&self, container: &str, key: &str, data: &[u8]) -> StoreResult<()> {
        let path = self.object_path(container, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| store_error(&e, &format!("mkdir -p {}", parent.display())))?;
        }
        fs::write(&path, data).map_err(|e| store_error(&e, &format!("write {}", path.display())))
    }
}
