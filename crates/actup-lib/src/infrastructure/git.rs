use log::{debug, info};
use std::path::Path;
use std::process::{Child, Command, Stdio};

use crate::domain::{CloneProcess, CloneSpawner, ProcessStatus, VcsError, VersionControl};

/// Version control through the `git` command line.
///
/// `push` only logs when `dry_run` is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitCli {
    dry_run: bool,
}

impl GitCli {
    #[must_use]
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    /// Run `git` in `dir` and return its trimmed stdout.
    fn run(dir: &Path, args: &[&str]) -> Result<String, VcsError> {
        let command = args.join(" ");
        debug!("git {command} ({})", dir.display());

        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(|source| VcsError::Spawn {
                command: command.clone(),
                dir: dir.to_path_buf(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            return Err(VcsError::Failed {
                command,
                dir: dir.to_path_buf(),
                stderr: if stderr.is_empty() {
                    output.status.to_string()
                } else {
                    stderr
                },
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}

/// Last path segment of an abbreviated ref, e.g. `origin/main` -> `main`.
fn short_branch_name(abbrev_ref: &str) -> &str {
    abbrev_ref
        .rsplit_once('/')
        .map_or(abbrev_ref, |(_, name)| name)
}

impl VersionControl for GitCli {
    fn current_branch(&self, repo_dir: &Path) -> Result<String, VcsError> {
        let abbrev_ref = Self::run(repo_dir, &["rev-parse", "--abbrev-ref", "HEAD"])?;
        Ok(short_branch_name(&abbrev_ref).to_owned())
    }

    fn set_config(&self, repo_dir: &Path, key: &str, value: &str) -> Result<(), VcsError> {
        Self::run(repo_dir, &["config", key, value]).map(|_| ())
    }

    fn commit_all(&self, repo_dir: &Path, message: &str) -> Result<(), VcsError> {
        Self::run(repo_dir, &["commit", "-a", "-m", message]).map(|_| ())
    }

    fn push(&self, repo_dir: &Path, remote_branch: &str) -> Result<(), VcsError> {
        let refspec = format!("HEAD:{remote_branch}");
        if self.dry_run {
            info!(
                "Dry run: not pushing {} to {remote_branch}",
                repo_dir.display()
            );
            return Ok(());
        }
        info!("Pushing {} to {remote_branch}", repo_dir.display());
        Self::run(repo_dir, &["push", "origin", &refspec]).map(|_| ())
    }
}

/// Starts `git clone` as a detached child process.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitCloneSpawner;

impl CloneSpawner for GitCloneSpawner {
    type Process = GitCloneProcess;

    fn spawn(&self, url: &str, target: &Path) -> std::io::Result<GitCloneProcess> {
        let mut command = Command::new("git");
        command
            .arg("clone")
            .arg("--quiet")
            .arg(url)
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group so the whole tree can be signalled at once.
            command.process_group(0);
        }

        command.spawn().map(|child| GitCloneProcess { child })
    }
}

/// A running `git clone`.
#[derive(Debug)]
pub struct GitCloneProcess {
    child: Child,
}

impl CloneProcess for GitCloneProcess {
    fn poll(&mut self) -> std::io::Result<ProcessStatus> {
        Ok(match self.child.try_wait()? {
            Some(status) => ProcessStatus::Exited {
                success: status.success(),
            },
            None => ProcessStatus::Running,
        })
    }

    fn kill_tree(&mut self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            let group = format!("-{}", self.child.id());
            match Command::new("kill")
                .args(["-KILL", "--", group.as_str()])
                .stderr(Stdio::null())
                .status()
            {
                Ok(status) if status.success() => {}
                Ok(status) => debug!("kill {group} exited with {status}"),
                Err(e) => debug!("kill {group} could not run: {e}"),
            }
        }

        if let Err(e) = self.child.kill() {
            debug!("kill of clone process {}: {e}", self.child.id());
        }
        self.child.wait().map(|_| ())
    }
}
