use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

// Sandboxed users may differ from the judge's own user
const WORKSPACE_PERMISSIONS: u32 = 0o777;

/// Scratch directory owned by one compile or run, removed on drop
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn create() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("oj-judge-")
            .tempdir()
            .context("Failed to create scratch workspace")?;
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(WORKSPACE_PERMISSIONS))?;
        Ok(Self { dir })
    }

    /// Fresh workspace holding a copy of everything in `source`
    pub fn copy_of(source: &Path) -> Result<Self> {
        let workspace = Self::create()?;
        copy_dir_contents(source, workspace.path())
            .with_context(|| format!("Failed to populate workspace from {}", source.display()))?;
        Ok(workspace)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_file(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        fs::write(&path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

/// Recursively copies regular files and directories; symlinks are skipped
pub(crate) fn copy_dir_contents(source: &Path, target: &Path) -> Result<()> {
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let destination = target.join(entry.file_name());

        if file_type.is_dir() {
            fs::create_dir_all(&destination)?;
            copy_dir_contents(&entry.path(), &destination)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &destination)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_is_independent_and_removed_on_drop() {
        let build = Workspace::create().unwrap();
        build.write_file("solution.py", "print(1)").unwrap();
        fs::create_dir(build.path().join("pkg")).unwrap();
        fs::write(build.path().join("pkg/Main.class"), "cafebabe").unwrap();

        let run = Workspace::copy_of(build.path()).unwrap();
        let run_path = run.path().to_path_buf();
        assert_eq!(
            fs::read_to_string(run_path.join("solution.py")).unwrap(),
            "print(1)"
        );
        assert!(run_path.join("pkg/Main.class").exists());

        fs::write(run_path.join("out.txt"), "scratch").unwrap();
        assert!(!build.path().join("out.txt").exists());

        drop(run);
        assert!(!run_path.exists());
    }
}
