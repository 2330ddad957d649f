//! Staging of source text into per-session working directories.
//!
//! Every session gets its own directory under the stager's root, named after
//! the escaped session id, so two sessions running files with the same name
//! never touch each other's artifacts.

use coderun_proto::{Error, Result, SessionId};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Files belonging to one run generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifact {
    dir: PathBuf,
    source: PathBuf,
    binary: Option<PathBuf>,
    intermediates: Vec<PathBuf>,
}

impl StagedArtifact {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn binary(&self) -> Option<&Path> {
        self.binary.as_deref()
    }

    pub fn intermediates(&self) -> &[PathBuf] {
        &self.intermediates
    }

    /// File name without its extension, used as the logical run target.
    pub fn stem(&self) -> String {
        self.source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Records the path a build step will write its executable to.
    pub fn set_binary(&mut self, path: PathBuf) {
        self.binary = Some(path);
    }

    /// Records a generated file that must be removed on cleanup.
    pub fn add_intermediate(&mut self, path: PathBuf) {
        if !self.intermediates.contains(&path) {
            self.intermediates.push(path);
        }
    }

    /// Every path this artifact may have produced.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.source.as_path())
            .chain(self.binary.as_deref())
            .chain(self.intermediates.iter().map(PathBuf::as_path))
    }
}

/// Writes and removes run artifacts below a single root directory.
#[derive(Debug, Clone)]
pub struct ArtifactStager {
    root: PathBuf,
}

impl ArtifactStager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Working directory reserved for `session`.
    pub fn session_dir(&self, session: &SessionId) -> PathBuf {
        self.root.join(session.path_component())
    }

    /// Writes `source_text` to `work_dir/file_name`, creating `work_dir` if needed.
    pub fn stage(&self, work_dir: &Path, file_name: &str, source_text: &str) -> Result<StagedArtifact> {
        validate_file_name(file_name)?;

        fs::create_dir_all(work_dir).map_err(|e| {
            Error::io(format!("creating work directory {}", work_dir.display()), e)
        })?;

        let source = work_dir.join(file_name);
        fs::write(&source, source_text)
            .map_err(|e| Error::io(format!("writing {}", source.display()), e))?;

        debug!(path = %source.display(), bytes = source_text.len(), "Staged source file");

        Ok(StagedArtifact {
            dir: work_dir.to_path_buf(),
            source,
            binary: None,
            intermediates: Vec::new(),
        })
    }

    /// Removes every file of `artifact`. Failures are logged, never returned.
    pub fn cleanup(&self, artifact: &StagedArtifact) {
        for path in artifact.paths() {
            remove_file_logged(path);
        }
    }

    /// Removes a whole directory tree, logging failures.
    pub fn remove_dir(&self, dir: &Path) {
        match fs::remove_dir_all(dir) {
            Ok(()) => debug!(path = %dir.display(), "Removed directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %dir.display(), error = %e, "Failed to remove directory"),
        }
    }
}

fn remove_file_logged(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed artifact"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove artifact"),
    }
}

/// Accepts only a plain file name: no separators, no `.`/`..`.
pub fn validate_file_name(file_name: &str) -> Result<()> {
    let trimmed = file_name.trim();
    let invalid = trimmed.is_empty()
        || trimmed != file_name
        || file_name == "."
        || file_name == ".."
        || file_name.contains(['/', '\\', '\0'])
        || Path::new(file_name).components().count() != 1;
    if invalid {
        return Err(Error::InvalidFileName(file_name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stage_creates_directory_and_file() {
        let temp = TempDir::new().unwrap();
        let stager = ArtifactStager::new(temp.path());
        let dir = stager.session_dir(&SessionId::from("panel/1"));

        let artifact = stager.stage(&dir, "main.py", "print('hi')\n").unwrap();

        assert_eq!(artifact.dir(), dir);
        assert_eq!(artifact.source(), dir.join("main.py"));
        assert_eq!(fs::read_to_string(artifact.source()).unwrap(), "print('hi')\n");
        assert_eq!(artifact.stem(), "main");
        assert!(dir.starts_with(temp.path()));
        assert_eq!(dir.file_name().unwrap(), "panel%2F1");
    }

    #[test]
    fn test_sessions_do_not_share_directories() {
        let temp = TempDir::new().unwrap();
        let stager = ArtifactStager::new(temp.path());
        let a = stager.session_dir(&SessionId::from("a"));
        let b = stager.session_dir(&SessionId::from("b"));

        stager.stage(&a, "main.c", "A").unwrap();
        stager.stage(&b, "main.c", "B").unwrap();

        assert_eq!(fs::read_to_string(a.join("main.c")).unwrap(), "A");
        assert_eq!(fs::read_to_string(b.join("main.c")).unwrap(), "B");
    }

    #[test]
    fn test_cleanup_removes_all_paths_and_tolerates_missing() {
        let temp = TempDir::new().unwrap();
        let stager = ArtifactStager::new(temp.path());
        let dir = temp.path().join("s");

        let mut artifact = stager.stage(&dir, "Main.java", "class Main {}").unwrap();
        let class_file = dir.join("Main.class");
        fs::write(&class_file, b"\xca\xfe").unwrap();
        artifact.add_intermediate(class_file.clone());
        artifact.add_intermediate(class_file.clone());
        artifact.set_binary(dir.join("never-built"));

        assert_eq!(artifact.intermediates().len(), 1);
        stager.cleanup(&artifact);

        assert!(!artifact.source().exists());
        assert!(!class_file.exists());
        // Cleaning twice is harmless.
        stager.cleanup(&artifact);
    }

    #[test]
    fn test_stage_fails_when_directory_cannot_be_created() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("file");
        fs::write(&blocker, "not a dir").unwrap();
        let stager = ArtifactStager::new(temp.path());

        let err = stager
            .stage(&blocker.join("nested"), "main.py", "")
            .unwrap_err();

        assert_eq!(err.kind(), coderun_proto::ErrorKind::Io);
    }

    #[test]
    fn test_file_name_validation() {
        for ok in ["main.py", "Main.java", "a b.c", ".hidden.sh"] {
            assert!(validate_file_name(ok).is_ok(), "{ok}");
        }
        for bad in ["", " ", "..", ".", "dir/main.c", "..\\x.c", " main.c", "a\0b"] {
            assert!(
                matches!(validate_file_name(bad), Err(Error::InvalidFileName(_))),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn test_remove_dir_tolerates_missing() {
        let temp = TempDir::new().unwrap();
        let stager = ArtifactStager::new(temp.path());
        let dir = temp.path().join("gone");
        stager.remove_dir(&dir);
        fs::create_dir_all(dir.join("inner")).unwrap();
        stager.remove_dir(&dir);
        assert!(!dir.exists());
    }
}
