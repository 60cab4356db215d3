//! Thin wrappers around the `rad` and `git` binaries.

use crate::config::{CliConfig, DiffConfig};
use crate::patch::{cob, Identity, Patch};
use crate::store::RepoContext;
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Object type of patches in `rad cob`
pub const PATCH_COB_TYPE: &str = "xyz.radicle.patch";

/// Captured result of a finished process
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Run `program args` in `cwd`, killing it once `timeout` elapses.
pub async fn exec(program: &str, args: &[&str], cwd: &Path, timeout: Duration) -> Result<ExecOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .with_context(|| format!("Failed to run {program}"))?;
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .with_context(|| format!("{program} {} timed out after {}s", args.join(" "), timeout.as_secs()))?
        .with_context(|| format!("Failed to wait for {program}"))?;

    let result = ExecOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        code: output.status.code(),
    };
    debug!(program, args = %args.join(" "), code = ?result.code, "exec");
    Ok(result)
}

/// Run and return trimmed stdout, failing on a non-zero exit
async fn exec_ok(program: &str, args: &[&str], cwd: &Path, timeout: Duration) -> Result<String> {
    let output = exec(program, args, cwd, timeout).await?;
    if !output.success() {
        anyhow::bail!("{} {} failed: {}", program, args.join(" "), output.stderr.trim());
    }
    Ok(output.stdout.trim().to_string())
}

/// The `rad`/`git` view of one working copy
pub struct Workspace {
    rad: String,
    git: String,
    timeout: Duration,
    root: PathBuf,
    rid: Mutex<Option<String>>,
}

impl Workspace {
    pub fn new(root: PathBuf, config: &CliConfig) -> Self {
        Self {
            rad: config.rad.clone(),
            git: config.git.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            root,
            rid: Mutex::new(None),
        }
    }

    async fn rad(&self, args: &[&str]) -> Result<String> {
        exec_ok(&self.rad, args, &self.root, self.timeout).await
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        exec_ok(&self.git, args, &self.root, self.timeout).await
    }

    /// Repository id (`rad:z…`) of the working copy, cached after the first success
    pub async fn repository_id(&self) -> Result<String> {
        let cached = self.rid.lock().clone();
        if let Some(rid) = cached {
            return Ok(rid);
        }
        let rid = self.rad(&["inspect"]).await?;
        if !rid.starts_with("rad:") {
            anyhow::bail!("rad inspect returned an unexpected id: {}", rid);
        }
        *self.rid.lock() = Some(rid.clone());
        Ok(rid)
    }

    /// Upstream of the checked-out branch, e.g. `rad/patches/8c1e…`
    pub async fn upstream(&self) -> Result<String> {
        self.git(&["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{upstream}"])
            .await
    }

    /// Absolute path of the `.git` directory (differs from `root/.git` in worktrees)
    pub async fn git_dir(&self) -> Result<PathBuf> {
        Ok(PathBuf::from(self.git(&["rev-parse", "--absolute-git-dir"]).await?))
    }

    /// The local node identity
    pub async fn local_identity(&self) -> Result<Identity> {
        let did = self.rad(&["self", "--did"]).await?;
        let alias = self.rad(&["self", "--alias"]).await.ok();
        Ok(Identity {
            id: did,
            alias: alias.filter(|a| !a.is_empty()),
        })
    }

    /// Read a patch straight from local storage
    pub async fn show_patch(&self, id: &str) -> Result<Patch> {
        let rid = self.repository_id().await?;
        let json = self
            .rad(&["cob", "show", "--type", PATCH_COB_TYPE, "--object", id, "--repo", &rid])
            .await?;
        cob::normalize(id, &json).with_context(|| format!("Failed to read patch {id}"))
    }

    pub async fn checkout_patch(&self, id: &str) -> Result<String> {
        let rid = self.repository_id().await?;
        self.rad(&["patch", "checkout", id, "--repo", &rid]).await
    }

    pub async fn sync(&self) -> Result<String> {
        self.rad(&["sync", "--fetch"]).await
    }

    /// `rad clone <rid>` into `parent`
    pub async fn clone_repo(&self, rid: &str, parent: &Path) -> Result<String> {
        exec_ok(&self.rad, &["clone", rid], parent, self.timeout).await
    }
}

#[async_trait]
impl RepoContext for Workspace {
    async fn rid(&self) -> Option<String> {
        match self.repository_id().await {
            Ok(rid) => Some(rid),
            Err(e) => {
                debug!("no repository id: {:#}", e);
                None
            }
        }
    }

    async fn upstream_branch(&self) -> Option<String> {
        self.upstream().await.ok().filter(|b| !b.is_empty())
    }
}

/// Arguments for the configured diff tool with `{old}`/`{new}` filled in
pub fn diff_tool_args(config: &DiffConfig, old: &Path, new: &Path) -> Vec<String> {
    let old = old.display().to_string();
    let new = new.display().to_string();
    config
        .args
        .iter()
        .map(|arg| arg.replace("{old}", &old).replace("{new}", &new))
        .collect()
}

/// Launch the diff tool detached from the terminal; the caller may await
/// the child to report a failed exit.
pub fn open_diff_tool(config: &DiffConfig, old: &Path, new: &Path) -> Result<tokio::process::Child> {
    let args = diff_tool_args(config, old, new);
    debug!(command = %config.command, args = %args.join(" "), "opening diff tool");
    Command::new(&config.command)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to run diff tool '{}'", config.command))
}

/// Repository root containing `dir`
pub async fn repo_root_of(git: &str, dir: &Path, timeout: Duration) -> Result<PathBuf> {
    let root = exec_ok(git, &["rev-parse", "--show-toplevel"], dir, timeout)
        .await
        .with_context(|| format!("Not a git repository: {}", dir.display()))?;
    Ok(PathBuf::from(root))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exec_captures_output_and_status() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = exec("sh", &["-c", "echo out; echo err >&2; exit 3"], dir.path(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
        assert_eq!(out.code, Some(3));
        assert!(!out.success());
    }

    #[tokio::test]
    async fn exec_times_out() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = exec("sh", &["-c", "sleep 5"], dir.path(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn exec_ok_reports_stderr() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = exec_ok("sh", &["-c", "echo boom >&2; exit 1"], dir.path(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn diff_tool_placeholders_are_replaced() {
        let config = DiffConfig {
            command: "meld".into(),
            args: vec!["--label={old}".into(), "{new}".into()],
            temp_root: None,
        };
        let args = diff_tool_args(&config, Path::new("/tmp/a/x.rs"), Path::new("/tmp/b/x.rs"));
        assert_eq!(args, vec!["--label=/tmp/a/x.rs", "/tmp/b/x.rs"]);
    }

    #[tokio::test]
    async fn missing_binary_means_no_repository() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = CliConfig {
            rad: "definitely-not-a-rad-binary".into(),
            ..CliConfig::default()
        };
        let ws = Workspace::new(dir.path().to_path_buf(), &config);
        assert_eq!(ws.rid().await, None);
    }
}
