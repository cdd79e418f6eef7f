//! Store layout under `<home>/.orc`.
//!
//! The global registry lives at `<home>/.orc/orc.db`; each project's
//! database at `<home>/.orc/projects/<project_id>/orc.db`. Early releases
//! kept the project database inside the project tree at
//! `<project>/.orc/orc.db`; that layout is migrated once, on first open.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::errors::{OrcError, OrcResult};

/// Project-local state moved alongside the database during the legacy
/// migration.
const LEGACY_SIBLINGS: &[&str] = &["config.toml", "prompts", "sequences", "exports"];

#[derive(Debug, Clone)]
pub struct OrcPaths {
    home: PathBuf,
}

impl OrcPaths {
    /// Layout rooted at an explicit orc home (tests, unusual setups).
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Layout rooted at `$ORC_HOME`, or `<home>/.orc`.
    pub fn discover() -> OrcResult<Self> {
        if let Ok(home) = std::env::var("ORC_HOME") {
            return Ok(Self::new(home));
        }
        let home = dirs::home_dir()
            .ok_or_else(|| OrcError::config_invalid("Cannot determine the home directory"))?;
        Ok(Self::new(home.join(".orc")))
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn global_db(&self) -> PathBuf {
        self.home.join("orc.db")
    }

    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.home.join("projects").join(project_id)
    }

    pub fn project_db(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("orc.db")
    }

    /// One-shot migration of the legacy `<project>/.orc` layout into the
    /// home layout. Returns `true` when anything was moved. Idempotent:
    /// once the home database exists, the legacy tree is left alone.
    /// Repairing git worktrees after the move is the CLI's job.
    pub fn migrate_legacy_layout(
        &self,
        project_root: &Path,
        project_id: &str,
    ) -> OrcResult<bool> {
        let legacy_dir = project_root.join(".orc");
        let legacy_db = legacy_dir.join("orc.db");
        let new_db = self.project_db(project_id);

        if !legacy_db.exists() || new_db.exists() {
            return Ok(false);
        }

        let target_dir = self.project_dir(project_id);
        std::fs::create_dir_all(&target_dir).map_err(|e| {
            OrcError::wrap(e, format!("Failed to create {}", target_dir.display()))
        })?;

        // The database plus its WAL sidecars move together.
        for name in ["orc.db", "orc.db-wal", "orc.db-shm"] {
            let from = legacy_dir.join(name);
            if from.exists() {
                move_path(&from, &target_dir.join(name))?;
            }
        }
        for name in LEGACY_SIBLINGS {
            let from = legacy_dir.join(name);
            if from.exists() {
                move_path(&from, &target_dir.join(name))?;
            }
        }

        info!(
            project_id,
            from = %legacy_dir.display(),
            to = %target_dir.display(),
            "migrated legacy project layout"
        );
        Ok(true)
    }
}

/// Rename, falling back to copy+remove for cross-device moves.
fn move_path(from: &Path, to: &Path) -> OrcResult<()> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    if from.is_dir() {
        copy_dir(from, to)?;
        std::fs::remove_dir_all(from)
            .map_err(|e| OrcError::wrap(e, format!("Failed to remove {}", from.display())))?;
    } else {
        std::fs::copy(from, to)
            .map_err(|e| OrcError::wrap(e, format!("Failed to copy {}", from.display())))?;
        std::fs::remove_file(from)
            .map_err(|e| OrcError::wrap(e, format!("Failed to remove {}", from.display())))?;
    }
    Ok(())
}

fn copy_dir(from: &Path, to: &Path) -> OrcResult<()> {
    std::fs::create_dir_all(to)
        .map_err(|e| OrcError::wrap(e, format!("Failed to create {}", to.display())))?;
    for entry in std::fs::read_dir(from)
        .map_err(|e| OrcError::wrap(e, format!("Failed to read {}", from.display())))?
    {
        let entry = entry.map_err(|e| OrcError::wrap(e, "Failed to read directory entry"))?;
        let target = to.join(entry.file_name());
        if entry.path().is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| {
                OrcError::wrap(e, format!("Failed to copy {}", entry.path().display()))
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn layout_paths() {
        let paths = OrcPaths::new("/home/dev/.orc");
        assert_eq!(paths.global_db(), PathBuf::from("/home/dev/.orc/orc.db"));
        assert_eq!(
            paths.project_db("myproj"),
            PathBuf::from("/home/dev/.orc/projects/myproj/orc.db")
        );
    }

    #[test]
    fn legacy_migration_moves_db_and_siblings() {
        let home = tempdir().unwrap();
        let project = tempdir().unwrap();
        let paths = OrcPaths::new(home.path());

        let legacy = project.path().join(".orc");
        fs::create_dir_all(legacy.join("prompts")).unwrap();
        fs::write(legacy.join("orc.db"), b"sqlite bytes").unwrap();
        fs::write(legacy.join("config.toml"), b"concurrency = 2").unwrap();
        fs::write(legacy.join("prompts").join("spec.md"), b"prompt").unwrap();

        let migrated = paths
            .migrate_legacy_layout(project.path(), "myproj")
            .unwrap();
        assert!(migrated);

        assert!(paths.project_db("myproj").exists());
        assert!(paths.project_dir("myproj").join("config.toml").exists());
        assert!(paths.project_dir("myproj").join("prompts/spec.md").exists());
        assert!(!legacy.join("orc.db").exists());
    }

    #[test]
    fn migration_is_one_shot() {
        let home = tempdir().unwrap();
        let project = tempdir().unwrap();
        let paths = OrcPaths::new(home.path());

        let legacy = project.path().join(".orc");
        fs::create_dir_all(&legacy).unwrap();
        fs::write(legacy.join("orc.db"), b"old").unwrap();

        assert!(paths.migrate_legacy_layout(project.path(), "p").unwrap());

        // A stale legacy db reappearing must not clobber the new home.
        fs::write(legacy.join("orc.db"), b"stale").unwrap();
        assert!(!paths.migrate_legacy_layout(project.path(), "p").unwrap());
        assert_eq!(fs::read(paths.project_db("p")).unwrap(), b"old");
    }

    #[test]
    fn no_legacy_layout_is_a_noop() {
        let home = tempdir().unwrap();
        let project = tempdir().unwrap();
        let paths = OrcPaths::new(home.path());
        assert!(!paths.migrate_legacy_layout(project.path(), "p").unwrap());
    }
}
