use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::Result;

/// A small JSON document persisted as one file.
///
/// Readers always see a complete document: writes go to a sibling temp file
/// that is renamed over the target. Mutations are serialised through an
/// internal mutex, so one `JsonDocument` per file must be shared between
/// writers in the same process.
#[derive(Debug)]
pub struct JsonDocument<T> {
    path: PathBuf,
    write_lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDocument<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    /// Missing and malformed documents both load as `T::default()`.
    pub fn load(&self) -> T {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
            Err(e) => {
                log::warn!("Could not read {}: {}", self.path.display(), e);
                return T::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                log::warn!(
                    "Ignoring malformed document {}: {}",
                    self.path.display(),
                    e
                );
                T::default()
            }
        }
    }

    /// Replace the whole document.
    pub fn save(&self, value: &T) -> Result<()> {
        let _guard = self.lock();
        self.write(value)
    }

    /// Load, mutate and write back under the writer lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let _guard = self.lock();
        let mut value = self.load();
        let result = f(&mut value);
        self.write(&value)?;
        Ok(result)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // The guarded data is (), a poisoned lock carries no broken state.
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self, value: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_vec_pretty(value)?;
        let tmp_path = tmp_path_for(&self.path);
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
