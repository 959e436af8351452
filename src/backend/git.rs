//! Git command line client

use super::{RunOptions, VcsClient};
use anyhow::{Context, Result, bail};
use declarative::Invocation;
use std::path::Path;

/// Drives the `git` executable
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: "git".to_string(),
        }
    }
}

fn is_commit_id(revision: &str) -> bool {
    revision.len() == 40 && revision.chars().all(|c| c.is_ascii_hexdigit())
}

/// Pick the commit for `revision` from `git ls-remote` output
///
/// Branches win over tags; annotated tags are peeled.
fn parse_ls_remote(stdout: &str, revision: &str) -> Option<String> {
    let refs: Vec<(&str, &str)> = stdout
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .collect();

    let wanted = [
        format!("refs/heads/{revision}"),
        format!("refs/tags/{revision}^{{}}"),
        format!("refs/tags/{revision}"),
        revision.to_string(),
    ];
    wanted.iter().find_map(|name| {
        refs.iter()
            .find(|(_, r)| r == name)
            .map(|(sha, _)| (*sha).to_string())
    })
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// `git` with ownership checks relaxed, so root can manage a working
    /// copy owned by the service account
    fn git(&self, opts: &RunOptions, dest: Option<&Path>) -> Invocation {
        let invocation = opts
            .command(&self.program)
            .args(["-c", "safe.directory=*"]);
        match dest {
            Some(dir) => invocation.arg("-C").arg(dir.to_string_lossy()),
            None => invocation,
        }
    }

    fn stdout(&self, invocation: &Invocation) -> Result<String> {
        let output = invocation.run()?;
        Ok(output.stdout_str().trim().to_string())
    }

    /// Commit for `revision` inside an existing working copy, after a fetch
    fn local_commit(&self, revision: &str, dest: &Path, opts: &RunOptions) -> Result<String> {
        for candidate in [format!("origin/{revision}"), revision.to_string()] {
            let output = self
                .git(opts, Some(dest))
                .args(["rev-parse", "--verify", "--quiet"])
                .arg(format!("{candidate}^{{commit}}"))
                .output()?;
            if output.success {
                return Ok(output.stdout_str().trim().to_string());
            }
        }
        bail!("revision '{revision}' not found in {}", dest.display())
    }
}

impl VcsClient for GitCli {
    fn checkout(&self, url: &str, revision: &str, dest: &Path, opts: &RunOptions) -> Result<()> {
        log::info!("git clone {url} {}", dest.display());
        self.git(opts, None)
            .args(["clone", "--quiet", url])
            .arg(dest.to_string_lossy())
            .run()
            .with_context(|| format!("Failed to clone {url}"))?;

        if revision != "HEAD" {
            let commit = self.local_commit(revision, dest, opts)?;
            self.git(opts, Some(dest))
                .args(["checkout", "--quiet", "-B", "deploy"])
                .arg(commit)
                .run()
                .with_context(|| format!("Failed to check out {revision}"))?;
        }
        Ok(())
    }

    fn sync(&self, url: &str, revision: &str, dest: &Path, opts: &RunOptions) -> Result<()> {
        if !dest.join(".git").exists() {
            return self.checkout(url, revision, dest, opts);
        }

        log::info!("git sync {} to {revision}", dest.display());
        self.git(opts, Some(dest))
            .args(["remote", "set-url", "origin", url])
            .run()?;
        self.git(opts, Some(dest))
            .args(["fetch", "--quiet", "--tags", "origin"])
            .run()
            .with_context(|| format!("Failed to fetch {url}"))?;

        let commit = self.local_commit(revision, dest, opts)?;
        self.git(opts, Some(dest))
            .args(["checkout", "--quiet", "--force", "-B", "deploy"])
            .arg(&commit)
            .run()?;
        self.git(opts, Some(dest))
            .args(["reset", "--quiet", "--hard"])
            .arg(&commit)
            .run()
            .with_context(|| format!("Failed to reset to {revision}"))?;
        Ok(())
    }

    fn current_revision(&self, dest: &Path, opts: &RunOptions) -> Result<Option<String>> {
        if !dest.join(".git").exists() {
            return Ok(None);
        }
        let head = self.stdout(&self.git(opts, Some(dest)).args(["rev-parse", "HEAD"]))?;
        Ok(Some(head))
    }

    fn resolve_revision(&self, url: &str, revision: &str, opts: &RunOptions) -> Result<String> {
        if is_commit_id(revision) {
            return Ok(revision.to_lowercase());
        }
        let listing = self
            .stdout(&self.git(opts, None).args(["ls-remote", url, revision]))
            .with_context(|| format!("Failed to list refs of {url}"))?;
        parse_ls_remote(&listing, revision)
            .with_context(|| format!("revision '{revision}' not found at {url}"))
    }

    fn is_dirty(&self, dest: &Path, opts: &RunOptions) -> Result<bool> {
        let status = self.stdout(
            &self
                .git(opts, Some(dest))
                .args(["status", "--porcelain", "--untracked-files=no"]),
        )?;
        Ok(!status.is_empty())
    }
}
