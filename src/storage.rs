use std::path::{Path, PathBuf};

use tokio::fs;
use walkdir::WalkDir;

use crate::error::AppError;

/// Local byte storage under a single root directory. Names are
/// `/`-separated relative paths; everything is validated against path
/// traversal before touching the filesystem.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, AppError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub async fn store(&self, name: &str, bytes: &[u8]) -> Result<(), AppError> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;
        Ok(())
    }

    pub async fn retrieve(&self, name: &str) -> Result<Vec<u8>, AppError> {
        let path = self.resolve(name)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("file {name}")))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Deletes the named file, reporting whether it existed.
    pub async fn delete(&self, name: &str) -> Result<bool, AppError> {
        let path = self.resolve(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// All regular files under the root as `/`-separated relative paths.
    pub fn list(&self) -> Result<Vec<String>, AppError> {
        let mut names = Vec::new();
        for entry in WalkDir::new(&self.root).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
            names.push(relative.to_string_lossy().replace('\\', "/"));
        }
        names.sort();
        Ok(names)
    }

    /// Validates a relative name and resolves it under the root.
    fn resolve(&self, name: &str) -> Result<PathBuf, AppError> {
        if !is_valid_name(name) {
            return Err(AppError::BadRequest(format!("invalid file path: {name}")));
        }
        let mut path = self.root.clone();
        for segment in name.split('/') {
            path.push(segment);
        }
        Ok(path)
    }
}

/// Rejects names that could escape the storage root or confuse the host
/// filesystem: empty names, `..` components, absolute paths, drive
/// prefixes, control characters and reserved characters.
fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 1024 {
        return false;
    }
    if name.starts_with('/') || name.starts_with('\\') {
        return false;
    }
    // Windows drive prefix such as "C:".
    if name.len() > 1 && name.as_bytes()[1] == b':' {
        return false;
    }
    if name.chars().any(|ch| {
        ch.is_control() || matches!(ch, '<' | '>' | ':' | '"' | '|' | '?' | '*' | '\\')
    }) {
        return false;
    }
    for segment in name.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return false;
        }
    }
    // Belt and braces: the composed path must stay lexically relative.
    !Path::new(name)
        .components()
        .any(|component| !matches!(component, std::path::Component::Normal(_)))
}
