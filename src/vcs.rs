//! Version control boundary.
//!
//! The engine never issues version-control commands directly; it calls the
//! [`Vcs`] trait. The bundled [`GitVcs`] drives the `git` CLI for mutations
//! (branch, worktree, commit, merge) and the `gh` CLI for pull requests,
//! while repository discovery and branch inspection go through libgit2.

use std::path::{Path, PathBuf};
use std::process::Command;

/// Error type for VCS operations.
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("not a git repository: {}", .0.display())]
    NotARepository(PathBuf),

    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Git(#[from] git2::Error),
}

/// Version control operations the engine delegates.
pub trait Vcs: Send + Sync {
    /// Create a branch at the current HEAD.
    fn create_branch(&self, name: &str) -> Result<(), VcsError>;

    /// Create a worktree at `path` with a new branch checked out.
    fn create_worktree(&self, path: &Path, branch: &str) -> Result<(), VcsError>;

    /// Remove the worktree at `path`.
    fn remove_worktree(&self, path: &Path) -> Result<(), VcsError>;

    /// Stage everything and commit in the given working directory.
    fn commit(&self, working_dir: &Path, message: &str) -> Result<(), VcsError>;

    /// Merge a branch into the current branch of the main checkout.
    fn merge(&self, branch: &str) -> Result<(), VcsError>;

    /// Open a pull request for a branch; returns its URL.
    fn create_pull_request(&self, title: &str, body: &str, branch: &str)
        -> Result<String, VcsError>;
}

/// Git implementation of the VCS boundary.
pub struct GitVcs {
    root: PathBuf,
}

impl GitVcs {
    /// Open the repository containing `path`.
    pub fn open(path: &Path) -> Result<Self, VcsError> {
        let repo = git2::Repository::discover(path)
            .map_err(|_| VcsError::NotARepository(path.to_path_buf()))?;
        let root = repo
            .workdir()
            .ok_or_else(|| VcsError::NotARepository(path.to_path_buf()))?
            .to_path_buf();
        Ok(Self { root })
    }

    /// Repository root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Name of the currently checked-out branch (None if detached).
    pub fn current_branch(&self) -> Result<Option<String>, VcsError> {
        let repo = git2::Repository::open(&self.root)?;
        let head = repo.head()?;
        if !head.is_branch() {
            return Ok(None);
        }
        Ok(head.shorthand().map(ToString::to_string))
    }

    fn git(&self, working_dir: &Path, args: &[&str]) -> Result<String, VcsError> {
        let rendered = format!("git {}", args.join(" "));
        tracing::debug!("running {rendered} in {}", working_dir.display());

        let output = Command::new("git")
            .args(args)
            .current_dir(working_dir)
            .output()
            .map_err(|e| VcsError::Spawn { command: rendered.clone(), source: e })?;

        if !output.status.success() {
            return Err(VcsError::CommandFailed {
                command: rendered,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Vcs for GitVcs {
    fn create_branch(&self, name: &str) -> Result<(), VcsError> {
        self.git(&self.root, &["branch", name])?;
        Ok(())
    }

    fn create_worktree(&self, path: &Path, branch: &str) -> Result<(), VcsError> {
        let path_str = path.to_string_lossy();
        self.git(&self.root, &["worktree", "add", "-b", branch, path_str.as_ref()])?;
        Ok(())
    }

    fn remove_worktree(&self, path: &Path) -> Result<(), VcsError> {
        let path_str = path.to_string_lossy();
        self.git(&self.root, &["worktree", "remove", "--force", path_str.as_ref()])?;
        Ok(())
    }

    fn commit(&self, working_dir: &Path, message: &str) -> Result<(), VcsError> {
        self.git(working_dir, &["add", "-A"])?;
        self.git(working_dir, &["commit", "-m", message])?;
        Ok(())
    }

    fn merge(&self, branch: &str) -> Result<(), VcsError> {
        self.git(&self.root, &["merge", "--no-ff", branch])?;
        Ok(())
    }

    fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        branch: &str,
    ) -> Result<String, VcsError> {
        let rendered = "gh pr create".to_string();
        let output = Command::new("gh")
            .args(["pr", "create", "--title", title, "--body", body, "--head", branch])
            .current_dir(&self.root)
            .output()
            .map_err(|e| VcsError::Spawn { command: rendered.clone(), source: e })?;

        if !output.status.success() {
            return Err(VcsError::CommandFailed {
                command: rendered,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
