//! Object storage the stages read from and write to.
//!
//! Keys are `/`-separated paths relative to the storage root, the same way bucket keys are.
//! Stages only ever talk to `dyn Storage`, so a remote backend can replace `LocalStorage`
//! without touching them.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::warn;

use crate::error::{DatasetError, Result};

pub trait Storage: Send + Sync {
    fn exists(&self, key: &str) -> bool;

    fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Writes `bytes` to `key`, creating parent directories as needed.
    fn write(&self, key: &str, bytes: &[u8]) -> Result<()>;

    fn copy(&self, from: &str, to: &str) -> Result<()>;

    /// Copies every file under `from` to the same relative location under `to`.
    fn copy_dir(&self, from: &str, to: &str) -> Result<()>;

    /// All keys matching a glob pattern (`**` recurses), sorted.
    fn glob(&self, pattern: &str) -> Result<Vec<String>>;

    fn make_dirs(&self, key: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    /// Downloads `key` into a local file.
    fn get(&self, key: &str, local_path: &Path) -> Result<()> {
        let bytes = self.read(key)?;
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(local_path, bytes)?;
        Ok(())
    }
}

/// Glob pattern for `pattern` under `dir`. Only `pattern` may carry wildcards.
pub(crate) fn escaped_pattern(dir: &Path, pattern: &str) -> String {
    let dir = glob::Pattern::escape(&dir.to_string_lossy());
    let pattern = pattern.trim_start_matches('/');
    if pattern.is_empty() {
        dir
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), pattern)
    }
}

/// Storage backed by a directory on the local filesystem.
#[derive(Clone, Debug)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, key: &str) -> PathBuf {
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            self.root.clone()
        } else {
            self.root.join(key)
        }
    }

    fn key_of(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

impl Storage for LocalStorage {
    fn exists(&self, key: &str) -> bool {
        self.resolve(key).exists()
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        fs::read(self.resolve(key)).map_err(|e| DatasetError::storage(key, e))
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write under a temporary name first so a crash never leaves a half file that
        // the existence checks would then skip.
        let mut temp_path = path.clone().into_os_string();
        temp_path.push(".part");
        fs::write(&temp_path, bytes).map_err(|e| DatasetError::storage(key, e))?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn copy(&self, from: &str, to: &str) -> Result<()> {
        let target = self.resolve(to);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(self.resolve(from), &target).map_err(|e| DatasetError::storage(from, e))?;
        Ok(())
    }

    fn copy_dir(&self, from: &str, to: &str) -> Result<()> {
        let source = self.resolve(from);
        if !source.is_dir() {
            return Err(DatasetError::storage(from, "not a directory"));
        }
        let files = self.glob(&join(from, "**/*"))?;
        for file in files {
            let relative = relative_to(&file, from);
            self.copy(&file, &join(to, &relative))?;
        }
        Ok(())
    }

    fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        let full = escaped_pattern(&self.root, pattern);
        let mut keys = Vec::new();
        for entry in glob::glob(&full)? {
            let path = entry.map_err(|e| DatasetError::storage(pattern, e))?;
            if !path.is_file() {
                continue;
            }
            match self.key_of(&path) {
                Some(key) => keys.push(key),
                None => warn!("Skipping {} outside of the storage root", path.display()),
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn make_dirs(&self, key: &str) -> Result<()> {
        fs::create_dir_all(self.resolve(key))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        fs::remove_file(self.resolve(key)).map_err(|e| DatasetError::storage(key, e))
    }
}

/// Runs `f` until it succeeds, at most `attempts` times, returning the last error.
pub fn retry<T>(attempts: usize, label: &str, mut f: impl FnMut() -> Result<T>) -> Result<T> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!("{} failed (attempt {}/{}), retrying: {}", label, attempt, attempts, e);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

pub fn join(base: &str, rest: &str) -> String {
    let base = base.trim_end_matches('/');
    let rest = rest.trim_start_matches('/');
    match (base.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{}/{}", base, rest),
    }
}

pub fn parent(key: &str) -> &str {
    key.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

pub fn file_name(key: &str) -> &str {
    key.rsplit_once('/').map(|(_, name)| name).unwrap_or(key)
}

/// File name up to its first dot: `all.ogg` -> `all`.
pub fn base_name(key: &str) -> &str {
    let name = file_name(key);
    name.split('.').next().unwrap_or(name)
}

/// `key` relative to `base`. Keys outside `base` come back unchanged.
pub fn relative_to(key: &str, base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        return key.to_string();
    }
    match key.strip_prefix(base) {
        Some(rest) if rest.is_empty() => ".".to_string(),
        Some(rest) if rest.starts_with('/') => rest[1..].to_string(),
        _ => key.to_string(),
    }
}
