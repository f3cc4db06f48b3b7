//! Course sources in Git.
//!
//! All courses share one repository in the data directory. Each course
//! repository becomes a remote named by [`git_config_key`]; archiving checks
//! out the wanted branch into a throwaway worktree.

mod clock;

pub use clock::{Clock, SystemClock};

use crate::error::{ArchiveError, Result};
use crate::process::{run_checked, run_logged, CommandSpec};
use chrono::{Duration, NaiveDateTime};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{info, instrument, warn};

/// Exit code of `git remote add` when the remote already exists.
const REMOTE_EXISTS: i32 = 3;

const FETCH_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Convert an arbitrary string to a valid Git config key.
///
/// Git keys are case-insensitive, alphanumeric plus `-`, and start with a
/// letter. Lowercase letters and digits are kept, common URL punctuation
/// gets a two-letter code and everything else is hex-escaped. Keys that
/// would not start with a letter get an `x` prefix, as do keys starting
/// with `x` itself, so the mapping stays injective.
pub fn git_config_key(input: &str) -> String {
    let mut key = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            'a'..='z' | '0'..='9' => key.push(c),
            '.' => key.push_str("-p"),
            '/' => key.push_str("-s"),
            ':' => key.push_str("-k"),
            '?' => key.push_str("-q"),
            '=' => key.push_str("-i"),
            '#' => key.push_str("-g"),
            c if (c as u32) <= 0xff => key.push_str(&format!("-{:02x}", c as u32)),
            c if (c as u32) <= 0xffff => key.push_str(&format!("-u{:04x}", c as u32)),
            c => key.push_str(&format!("-m{:08x}", c as u32)),
        }
    }
    if !key.starts_with(|c: char| c.is_ascii_lowercase() && c != 'x') {
        key.insert(0, 'x');
    }
    key
}

/// Whether a fetch recorded at `last_fetch` is stale at `now`.
///
/// A missing or unreadable timestamp always needs a fetch. A window too long
/// to add to the timestamp never expires.
pub fn fetch_due(last_fetch: &str, now: NaiveDateTime, interval: Duration) -> bool {
    let last_fetch = last_fetch.trim();
    if last_fetch.is_empty() {
        return true;
    }
    match NaiveDateTime::parse_from_str(last_fetch, FETCH_TIME_FORMAT) {
        Ok(when) => match when.checked_add_signed(interval) {
            Some(due) => due <= now,
            None => false,
        },
        Err(e) => {
            warn!("Ignoring unreadable last fetch time {:?}: {}", last_fetch, e);
            true
        }
    }
}

/// The shared Git repository holding every course's remote.
pub struct GitSource {
    repo_dir: PathBuf,
    clock: Arc<dyn Clock>,
    refetch_interval: Duration,
    fetch_depth: u32,
}

impl GitSource {
    pub fn new(repo_dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            clock,
            refetch_interval: Duration::hours(1),
            fetch_depth: 10,
        }
    }

    pub fn with_refetch_interval(mut self, interval: Duration) -> Self {
        self.refetch_interval = interval;
        self
    }

    pub fn with_fetch_depth(mut self, depth: u32) -> Self {
        self.fetch_depth = depth;
        self
    }

    /// A `git` command in the repository, isolated from user and system config.
    fn git<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new("git")
            .args(args)
            .cwd(&self.repo_dir)
            .env("GIT_CONFIG_GLOBAL", "/dev/null")
            .env("GIT_CONFIG_SYSTEM", "/dev/null")
    }

    /// Fetch `repo` into its remote, unless that happened recently.
    ///
    /// The last fetch time is kept in the repository config as
    /// `naucse.last_fetch.<remote>`; remove it to force a refetch.
    /// Returns the remote name.
    #[instrument(skip(self))]
    pub async fn fetch(&self, repo: &str) -> Result<String> {
        let remote = git_config_key(repo);
        let config_key = format!("naucse.last_fetch.{}", remote);

        let last_fetch =
            run_logged(&self.git(["config", config_key.as_str()]).capture_stdout()).await?;
        let now = self.clock.now();
        if !fetch_due(&last_fetch.stdout_text(), now, self.refetch_interval) {
            info!("Fetched {} recently, skipping", remote);
            return Ok(remote);
        }

        let added = run_logged(&self.git(["remote", "add", remote.as_str(), repo])).await?;
        if added.code == Some(REMOTE_EXISTS) {
            run_checked(&self.git(["fetch", remote.as_str()])).await?;
        } else {
            let depth = self.fetch_depth.to_string();
            run_checked(&self.git(["fetch", remote.as_str(), "--depth", depth.as_str()])).await?;
        }

        let stamp = now.format(FETCH_TIME_FORMAT).to_string();
        run_logged(&self.git(["config", config_key.as_str(), stamp.as_str()])).await?;
        Ok(remote)
    }

    /// Commit ID a reference points to.
    pub async fn commit_id(&self, reference: &str) -> Result<String> {
        let output = run_checked(&self.git(["rev-parse", reference]).capture_stdout()).await?;
        let commit = output.stdout_text().trim().to_string();
        if commit.is_empty() {
            return Err(ArchiveError::Internal(format!(
                "git rev-parse {} printed nothing",
                reference
            )));
        }
        Ok(commit)
    }

    /// Check out `reference` into a new temporary worktree.
    pub async fn add_worktree(&self, reference: &str) -> Result<Worktree> {
        let dir = tempfile::Builder::new()
            .prefix("naucse-worktree-")
            .tempdir()
            .map_err(|e| ArchiveError::io(std::env::temp_dir(), e))?;
        let path = dir.path().to_string_lossy().into_owned();
        run_checked(&self.git(["worktree", "add", "--detach", path.as_str(), reference])).await?;
        Ok(Worktree { dir, remove: self.git(["worktree", "remove", "-f", path.as_str()]) })
    }
}

/// Ref of a remote-tracking branch.
pub fn branch_ref(remote: &str, branch: &str) -> String {
    format!("refs/remotes/{}/{}", remote, branch)
}

/// A checked-out worktree; call [`Worktree::remove`] when done.
///
/// Dropping it without `remove` deletes the directory but leaves Git's
/// worktree record behind until `git worktree prune`.
pub struct Worktree {
    dir: TempDir,
    remove: CommandSpec,
}

impl Worktree {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub async fn remove(self) -> Result<()> {
        run_checked(&self.remove).await?;
        Ok(())
    }
}
