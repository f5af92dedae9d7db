//! Scoped temp root and disposal of job files.
//!
//! Every job file lives under one root directory. Disposal is idempotent: a
//! file that is already gone counts as removed. Anything else that goes wrong
//! comes back as a [`CleanupError`] for the caller to log.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tf_core::{CleanupError, Error, JobId, Result};

/// Owns the temp root and the output retention policy.
#[derive(Debug, Clone)]
pub struct FileManager {
    root: PathBuf,
    keep_output_files: bool,
}

impl FileManager {
    pub fn new(root: impl Into<PathBuf>, keep_output_files: bool) -> Self {
        Self {
            root: root.into(),
            keep_output_files,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn keeps_outputs(&self) -> bool {
        self.keep_output_files
    }

    /// Create the temp root if needed.
    pub fn ensure_root(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        tracing::debug!("Temp root ready at {}", self.root.display());
        Ok(())
    }

    /// Resolve a file reference to an absolute path under the root.
    ///
    /// Relative references are joined onto the root. References containing
    /// `..` or pointing outside the root are rejected.
    pub fn resolve(&self, reference: &Path) -> Result<PathBuf> {
        if reference
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(Error::Validation(format!(
                "file reference {} must not contain '..'",
                reference.display()
            )));
        }

        let path = if reference.is_absolute() {
            reference.to_path_buf()
        } else {
            self.root.join(reference)
        };

        if !path.starts_with(&self.root) || path == self.root {
            return Err(Error::Validation(format!(
                "file reference {} is outside {}",
                reference.display(),
                self.root.display()
            )));
        }

        Ok(path)
    }

    /// A fresh path `<root>/<prefix>_<id>_<name>`. Only the final component
    /// of `name` is used.
    pub fn job_file_path(&self, prefix: &str, id: JobId, name: &str) -> PathBuf {
        let name = Path::new(name)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "file".to_string());
        self.root.join(format!("{prefix}_{id}_{name}"))
    }

    /// Remove every input. Called once the tool has exited, whatever the
    /// outcome.
    pub fn remove_inputs(&self, inputs: &[PathBuf]) -> std::result::Result<(), Vec<CleanupError>> {
        let errors: Vec<CleanupError> = inputs
            .iter()
            .filter_map(|p| self.remove_file(p).err())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Remove the output unless outputs are retained.
    pub fn remove_output(&self, output: &Path) -> std::result::Result<(), CleanupError> {
        if self.keep_output_files {
            tracing::info!("Keeping output file {}", output.display());
            return Ok(());
        }
        self.remove_file(output)
    }

    /// Failure-path disposal of a job's inputs and output.
    pub fn remove_all(
        &self,
        inputs: &[PathBuf],
        output: &Path,
    ) -> std::result::Result<(), Vec<CleanupError>> {
        let mut errors = self.remove_inputs(inputs).err().unwrap_or_default();
        if let Err(e) = self.remove_output(output) {
            errors.push(e);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn remove_file(&self, reference: &Path) -> std::result::Result<(), CleanupError> {
        let path = self
            .resolve(reference)
            .map_err(|_| CleanupError::OutsideRoot {
                path: reference.to_path_buf(),
            })?;

        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!("Removed {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("Already removed: {}", path.display());
                Ok(())
            }
            Err(source) => Err(CleanupError::Remove { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(keep: bool) -> (tempfile::TempDir, FileManager) {
        let dir = tempfile::tempdir().unwrap();
        let files = FileManager::new(dir.path().join("ffmpeg_api"), keep);
        files.ensure_root().unwrap();
        (dir, files)
    }

    fn touch(path: &Path) {
        std::fs::write(path, b"data").unwrap();
    }

    #[test]
    fn resolve_relative_and_absolute() {
        let (_dir, files) = manager(false);
        assert_eq!(
            files.resolve(Path::new("a.wav")).unwrap(),
            files.root().join("a.wav")
        );
        let abs = files.root().join("b.wav");
        assert_eq!(files.resolve(&abs).unwrap(), abs);
    }

    #[test]
    fn resolve_rejects_escapes() {
        let (_dir, files) = manager(false);
        assert!(files.resolve(Path::new("../etc/passwd")).is_err());
        assert!(files.resolve(&files.root().join("x/../../y")).is_err());
        assert!(files.resolve(Path::new("/etc/passwd")).is_err());
        assert!(files.resolve(files.root()).is_err());
    }

    #[test]
    fn job_file_paths_are_namespaced() {
        let (_dir, files) = manager(false);
        let a = JobId::new();
        let b = JobId::new();
        let pa = files.job_file_path("input", a, "clip.mp4");
        let pb = files.job_file_path("input", b, "clip.mp4");
        assert_ne!(pa, pb);
        assert_eq!(
            pa.file_name().unwrap().to_string_lossy(),
            format!("input_{a}_clip.mp4")
        );
        // Directory parts of the name are dropped.
        let nested = files.job_file_path("output", a, "../../x/out.wav");
        assert_eq!(nested.parent().unwrap(), files.root());
    }

    #[test]
    fn remove_inputs_is_idempotent() {
        let (_dir, files) = manager(false);
        let inputs = vec![files.root().join("in1.wav"), files.root().join("in2.srt")];
        for p in &inputs {
            touch(p);
        }
        files.remove_inputs(&inputs).unwrap();
        assert!(inputs.iter().all(|p| !p.exists()));
        // Second call: nothing left, still fine.
        files.remove_inputs(&inputs).unwrap();
    }

    #[test]
    fn remove_output_honours_retention() {
        let (_dir, keep) = manager(true);
        let out = keep.root().join("out.wav");
        touch(&out);
        keep.remove_output(&out).unwrap();
        assert!(out.exists());

        let drop_mgr = FileManager::new(keep.root(), false);
        drop_mgr.remove_output(&out).unwrap();
        assert!(!out.exists());
    }

    #[test]
    fn remove_all_reports_outside_root() {
        let (_dir, files) = manager(false);
        let input = files.root().join("in.wav");
        touch(&input);
        let errors = files
            .remove_all(&[input.clone()], Path::new("/etc/hostname"))
            .unwrap_err();
        assert!(!input.exists());
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], CleanupError::OutsideRoot { .. }));
    }

    #[test]
    fn remove_directory_is_reported() {
        let (_dir, files) = manager(false);
        let sub = files.root().join("subdir");
        std::fs::create_dir(&sub).unwrap();
        let err = files.remove_output(&sub).unwrap_err();
        assert!(matches!(err, CleanupError::Remove { .. }));
    }
}
