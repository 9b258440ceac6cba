use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;

/// Resolve the directory holding the redb file (`poof.redb`).
///
/// Priority:
/// 1. An explicitly configured directory (`DATA_DIR`)
/// 2. Platform-specific app data dir (`~/.local/share/poof/`, etc.)
pub fn data_dir(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = configured {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create data dir: {}", dir.display()))?;
        return Ok(dir.to_owned());
    }

    let dirs =
        ProjectDirs::from("", "", "poof").context("could not determine platform data directory")?;

    let path = dirs.data_dir().to_owned();
    std::fs::create_dir_all(&path).context("create platform data dir")?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_dir_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let wanted = tmp.path().join("nested").join("data");
        let got = data_dir(Some(&wanted)).unwrap();
        assert_eq!(got, wanted);
        assert!(wanted.is_dir());
    }
}
