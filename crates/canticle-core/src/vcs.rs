//! Version-control backends and repository handles.
//!
//! Every backend operation is a declarative command: a program, an argv
//! template, and a capture regex applied to the trimmed output. Placeholders
//! (`{rev}`, `{branch}`, `{repo}`, `{dir}`, `{url}`) are substituted by a
//! replace-from-map step; nothing is ever passed through a shell.

use regex::Regex;
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

use crate::workspace::package_source;

/// Errors from running or interpreting VCS subprocesses.
#[derive(Error, Debug)]
pub enum VcsError {
    #[error("could not run '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("'{program} {args}' failed: {output}")]
    CommandFailed {
        program: String,
        args: String,
        output: String,
    },

    #[error("unparseable output from '{program}': {output}")]
    ParseMismatch { program: String, output: String },

    #[error("{op} is not supported for a {handle} handle")]
    Unsupported { op: &'static str, handle: &'static str },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// The four supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VcsKind {
    Git,
    Hg,
    Svn,
    Bzr,
}

impl VcsKind {
    pub const ALL: [VcsKind; 4] = [VcsKind::Git, VcsKind::Hg, VcsKind::Svn, VcsKind::Bzr];

    /// The executable for this backend.
    #[must_use]
    pub fn program(self) -> &'static str {
        match self {
            VcsKind::Git => "git",
            VcsKind::Hg => "hg",
            VcsKind::Svn => "svn",
            VcsKind::Bzr => "bzr",
        }
    }

    /// The metadata directory marking a working copy of this backend.
    #[must_use]
    pub fn metadata_dir(self) -> &'static str {
        match self {
            VcsKind::Git => ".git",
            VcsKind::Hg => ".hg",
            VcsKind::Svn => ".svn",
            VcsKind::Bzr => ".bzr",
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        self.program()
    }

    fn rev_cmd(self) -> Option<VcsCmd> {
        match self {
            VcsKind::Git => Some(VcsCmd::new("git", &["rev-parse", "HEAD"], r"(\S+)")),
            VcsKind::Hg => Some(VcsCmd::new(
                "hg",
                &["log", "--template", "{node}", "-r", "."],
                r"(\S+)",
            )),
            VcsKind::Svn => Some(VcsCmd::new("svnversion", &[], r"^(\S+)$")),
            VcsKind::Bzr => Some(VcsCmd::new("bzr", &["revno"], r"(\S+)")),
        }
    }

    fn remote_cmd(self) -> Option<VcsCmd> {
        match self {
            VcsKind::Git => Some(VcsCmd::new(
                "git",
                &["ls-remote", "--get-url", "origin"],
                r"(.+)",
            )),
            VcsKind::Hg => Some(VcsCmd::new("hg", &["paths", "default"], r"(.+)")),
            VcsKind::Svn => Some(VcsCmd::new("svn", &["info"], r"URL: (.+)")),
            VcsKind::Bzr => None,
        }
    }

    fn branch_cmd(self) -> Option<VcsCmd> {
        match self {
            VcsKind::Git => Some(VcsCmd::new(
                "git",
                &["rev-parse", "--abbrev-ref", "HEAD"],
                r"(\S+)",
            )),
            VcsKind::Hg => Some(VcsCmd::new("hg", &["branch"], r"(\S+)")),
            VcsKind::Svn | VcsKind::Bzr => None,
        }
    }

    /// Pulls remote refs without touching the work tree. Backends without a
    /// separate fetch step treat this as a no-op.
    fn update_cmd(self) -> Option<VcsCmd> {
        match self {
            VcsKind::Git => Some(VcsCmd::new("git", &["fetch", "origin"], r"(?s)(.*)")),
            VcsKind::Hg => Some(VcsCmd::new("hg", &["pull"], r"(?s)(.*)")),
            VcsKind::Svn | VcsKind::Bzr => None,
        }
    }

    fn tag_sync_cmd(self) -> VcsCmd {
        match self {
            VcsKind::Git => VcsCmd::new("git", &["checkout", "{rev}"], r"(?s)(.*)"),
            VcsKind::Hg => VcsCmd::new("hg", &["update", "-r", "{rev}"], r"(?s)(.*)"),
            VcsKind::Svn => VcsCmd::new("svn", &["update", "-r", "{rev}"], r"(?s)(.*)"),
            VcsKind::Bzr => VcsCmd::new("bzr", &["update", "-r", "{rev}"], r"(?s)(.*)"),
        }
    }

    /// Fast-forwards the named branch against its remote. The capture
    /// matches the backend's "something changed" line; centralised backends
    /// fall back to a plain revision sync.
    fn branch_update_cmd(self) -> VcsCmd {
        match self {
            VcsKind::Git => VcsCmd::new(
                "git",
                &["merge", "--ff-only", "origin/{branch}"],
                r"(Updating [^\s]+)",
            ),
            VcsKind::Hg => VcsCmd::new("hg", &["update", "{branch}"], r"(\d+ files updated.*)"),
            VcsKind::Svn => VcsCmd::new("svn", &["update", "-r", "{branch}"], r"(Updated to .*)"),
            VcsKind::Bzr => VcsCmd::new("bzr", &["update", "-r", "{branch}"], r"(Updated to .*)"),
        }
    }

    fn branches_cmd(self) -> Option<VcsCmd> {
        match self {
            VcsKind::Git => Some(VcsCmd::new("git", &["branch", "-a"], r"(?s)(.*)")),
            VcsKind::Hg => Some(VcsCmd::new("hg", &["branches"], r"(?s)(.*)")),
            VcsKind::Svn | VcsKind::Bzr => None,
        }
    }

    fn create_cmd(self) -> VcsCmd {
        match self {
            VcsKind::Git => VcsCmd::new("git", &["clone", "{repo}", "{dir}"], r"(?s)(.*)"),
            VcsKind::Hg => VcsCmd::new("hg", &["clone", "{repo}", "{dir}"], r"(?s)(.*)"),
            VcsKind::Svn => VcsCmd::new("svn", &["checkout", "{repo}", "{dir}"], r"(?s)(.*)"),
            VcsKind::Bzr => VcsCmd::new("bzr", &["branch", "{repo}", "{dir}"], r"(?s)(.*)"),
        }
    }

    fn ping_cmd(self) -> VcsCmd {
        match self {
            VcsKind::Git => VcsCmd::new("git", &["ls-remote", "{url}"], r"(?s)(.*)"),
            VcsKind::Hg => VcsCmd::new("hg", &["identify", "{url}"], r"(?s)(.*)"),
            VcsKind::Svn => VcsCmd::new("svn", &["info", "{url}"], r"(?s)(.*)"),
            VcsKind::Bzr => VcsCmd::new("bzr", &["info", "{url}"], r"(?s)(.*)"),
        }
    }
}

/// A declarative VCS command: program, argv template, capture regex.
#[derive(Debug, Clone)]
pub struct VcsCmd {
    program: &'static str,
    args: &'static [&'static str],
    capture: &'static str,
}

/// Outcome of a command run: the full trimmed output plus the first capture
/// group, when the pattern matched.
#[derive(Debug)]
struct CmdOutput {
    raw: String,
    capture: Option<String>,
}

impl VcsCmd {
    fn new(program: &'static str, args: &'static [&'static str], capture: &'static str) -> Self {
        VcsCmd { program, args, capture }
    }

    /// Substitutes placeholders and runs the command in `dir`, returning the
    /// combined output and the capture.
    fn run(&self, dir: Option<&Path>, subs: &[(&str, &str)]) -> Result<CmdOutput, VcsError> {
        let args: Vec<String> = self.args.iter().map(|a| substitute(a, subs)).collect();
        let mut cmd = Command::new(self.program);
        cmd.args(&args);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        let output = cmd.output().map_err(|e| VcsError::Spawn {
            program: self.program.to_string(),
            reason: e.to_string(),
        })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let raw = combined.trim().to_string();

        if !output.status.success() {
            return Err(VcsError::CommandFailed {
                program: self.program.to_string(),
                args: args.join(" "),
                output: raw,
            });
        }

        // Command tables hold only static, known-good patterns.
        let re = Regex::new(self.capture).expect("static capture pattern");
        let capture = re
            .captures(&raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        Ok(CmdOutput { raw, capture })
    }

    /// Runs the command and requires the capture to match.
    fn exec(&self, dir: Option<&Path>, subs: &[(&str, &str)]) -> Result<String, VcsError> {
        let out = self.run(dir, subs)?;
        out.capture.ok_or_else(|| VcsError::ParseMismatch {
            program: self.program.to_string(),
            output: out.raw,
        })
    }
}

/// Replaces `{key}` placeholders from the substitution map.
fn substitute(template: &str, subs: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in subs {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// Result of a branch update attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchUpdate {
    /// True when the backend reported a fast-forward.
    pub updated: bool,
    /// The raw command output, or a short reason when nothing ran.
    pub output: String,
}

/// A repository handle. All operations run against one checkout rooted at a
/// repository root inside a workspace.
pub trait Vcs: Send + Sync + std::fmt::Debug {
    /// Materialises the repository (when needed) and syncs it to `rev`.
    /// An empty revision means the backend's default.
    fn create(&self, rev: &str) -> Result<(), VcsError>;

    /// Syncs an existing checkout to `rev`; an empty revision is a no-op.
    fn set_rev(&self, rev: &str) -> Result<(), VcsError>;

    /// The resolved commit identifier of the checkout. Empty when the
    /// backend has no rev command.
    fn get_rev(&self) -> Result<String, VcsError>;

    /// The current branch name, when the backend tracks one.
    fn get_branch(&self) -> Result<String, VcsError>;

    /// Fast-forwards `branch` against its remote. Not-a-branch names report
    /// `updated: false` without error.
    fn update_branch(&self, branch: &str) -> Result<BranchUpdate, VcsError>;

    /// The canonical upstream URL. Empty when the backend cannot report one.
    fn get_source(&self) -> Result<String, VcsError>;

    /// The repository root import path; a prefix of every import path
    /// attributed to this handle.
    fn get_root(&self) -> &str;
}

/// A handle over an existing working copy under `workspace/src/<root>`.
#[derive(Debug, Clone)]
pub struct LocalVcs {
    kind: VcsKind,
    root: String,
    workspace: PathBuf,
}

impl LocalVcs {
    #[must_use]
    pub fn new(kind: VcsKind, root: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        LocalVcs {
            kind,
            root: root.into(),
            workspace: workspace.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> VcsKind {
        self.kind
    }

    fn dir(&self) -> PathBuf {
        package_source(&self.workspace, &self.root)
    }

    /// Pulls remote refs, where the backend distinguishes that from a
    /// work-tree sync.
    fn update(&self) -> Result<(), VcsError> {
        if let Some(cmd) = self.kind.update_cmd() {
            cmd.run(Some(&self.dir()), &[])?;
        }
        Ok(())
    }

    /// Lists local and remote branch names.
    ///
    /// # Errors
    ///
    /// Backends without cheap enumeration return
    /// [`VcsError::Unsupported`].
    pub fn branches(&self) -> Result<BTreeSet<String>, VcsError> {
        let cmd = self.kind.branches_cmd().ok_or(VcsError::Unsupported {
            op: "branch enumeration",
            handle: self.kind.name(),
        })?;
        let out = cmd.run(Some(&self.dir()), &[])?;
        Ok(parse_branches(self.kind, &out.raw))
    }
}

/// Extracts branch names from a branch listing.
fn parse_branches(kind: VcsKind, raw: &str) -> BTreeSet<String> {
    let mut branches = BTreeSet::new();
    for line in raw.lines() {
        let line = line.trim().trim_start_matches("* ").trim();
        if line.is_empty() || line.contains("->") {
            continue;
        }
        let name = match kind {
            // `git branch -a` prefixes remote branches with `remotes/<remote>/`.
            VcsKind::Git => {
                let mut name = line;
                if let Some(rest) = name.strip_prefix("remotes/") {
                    name = rest.splitn(2, '/').nth(1).unwrap_or(rest);
                }
                name
            }
            // `hg branches` lines are `<name>  <rev>:<node>`.
            _ => line.split_whitespace().next().unwrap_or(line),
        };
        branches.insert(name.to_string());
    }
    branches
}

impl Vcs for LocalVcs {
    fn create(&self, rev: &str) -> Result<(), VcsError> {
        self.set_rev(rev)
    }

    fn set_rev(&self, rev: &str) -> Result<(), VcsError> {
        if rev.is_empty() {
            return Ok(());
        }
        self.update()?;
        self.kind.tag_sync_cmd().run(Some(&self.dir()), &[("rev", rev)])?;
        Ok(())
    }

    fn get_rev(&self) -> Result<String, VcsError> {
        match self.kind.rev_cmd() {
            Some(cmd) => cmd.exec(Some(&self.dir()), &[]),
            None => Ok(String::new()),
        }
    }

    fn get_branch(&self) -> Result<String, VcsError> {
        let cmd = self.kind.branch_cmd().ok_or(VcsError::Unsupported {
            op: "branch lookup",
            handle: self.kind.name(),
        })?;
        cmd.exec(Some(&self.dir()), &[])
    }

    fn update_branch(&self, branch: &str) -> Result<BranchUpdate, VcsError> {
        match self.branches() {
            Ok(branches) if !branches.contains(branch) => {
                return Ok(BranchUpdate {
                    updated: false,
                    output: format!("{branch} is not a branch"),
                });
            }
            // Backends that cannot enumerate attempt the update directly.
            Ok(_) | Err(VcsError::Unsupported { .. }) => {}
            Err(e) => return Err(e),
        }
        self.update()?;
        let out = self
            .kind
            .branch_update_cmd()
            .run(Some(&self.dir()), &[("branch", branch)])?;
        Ok(BranchUpdate {
            updated: out.capture.is_some(),
            output: out.capture.unwrap_or(out.raw),
        })
    }

    fn get_source(&self) -> Result<String, VcsError> {
        match self.kind.remote_cmd() {
            Some(cmd) => cmd.exec(Some(&self.dir()), &[]),
            None => Ok(String::new()),
        }
    }

    fn get_root(&self) -> &str {
        &self.root
    }
}

/// A handle over a repository that may not be on disk yet. Once the clone
/// exists every mutating operation routes through an internal [`LocalVcs`].
#[derive(Debug, Clone)]
pub struct RemoteVcs {
    kind: VcsKind,
    root: String,
    source: String,
    workspace: PathBuf,
}

impl RemoteVcs {
    #[must_use]
    pub fn new(
        kind: VcsKind,
        root: impl Into<String>,
        source: impl Into<String>,
        workspace: impl Into<PathBuf>,
    ) -> Self {
        RemoteVcs {
            kind,
            root: root.into(),
            source: source.into(),
            workspace: workspace.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> VcsKind {
        self.kind
    }

    fn local(&self) -> LocalVcs {
        LocalVcs::new(self.kind, self.root.clone(), self.workspace.clone())
    }

    fn dir(&self) -> PathBuf {
        package_source(&self.workspace, &self.root)
    }
}

impl Vcs for RemoteVcs {
    fn create(&self, rev: &str) -> Result<(), VcsError> {
        let dir = self.dir();
        if !dir.exists() {
            if let Some(parent) = dir.parent() {
                std::fs::create_dir_all(parent)?;
            }
            // Clone targets are absolute, so no working-directory change is
            // needed for any backend.
            let target = dir.to_string_lossy();
            self.kind.create_cmd().run(
                None,
                &[("repo", self.source.as_str()), ("dir", target.as_ref())],
            )?;
        }
        self.local().set_rev(rev)
    }

    fn set_rev(&self, rev: &str) -> Result<(), VcsError> {
        self.local().set_rev(rev)
    }

    fn get_rev(&self) -> Result<String, VcsError> {
        Err(VcsError::Unsupported {
            op: "get_rev",
            handle: "remote",
        })
    }

    fn get_branch(&self) -> Result<String, VcsError> {
        Err(VcsError::Unsupported {
            op: "get_branch",
            handle: "remote",
        })
    }

    fn update_branch(&self, branch: &str) -> Result<BranchUpdate, VcsError> {
        self.local().update_branch(branch)
    }

    fn get_source(&self) -> Result<String, VcsError> {
        Ok(self.source.clone())
    }

    fn get_root(&self) -> &str {
        &self.root
    }
}

/// Pings a remote URL with the backend's cheapest remote query.
///
/// # Errors
///
/// Returns the command failure when the remote is unreachable.
pub fn ping(kind: VcsKind, url: &str) -> Result<(), VcsError> {
    kind.ping_cmd().run(None, &[("url", url)])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_replaces_from_map() {
        let s = substitute("origin/{branch}", &[("branch", "main")]);
        assert_eq!(s, "origin/main");
        let s = substitute("{repo}", &[("repo", "https://example.org/x"), ("dir", "/tmp/x")]);
        assert_eq!(s, "https://example.org/x");
    }

    #[test]
    fn substitute_leaves_unknown_placeholders() {
        assert_eq!(substitute("{rev}", &[("branch", "b")]), "{rev}");
    }

    #[test]
    fn git_branch_update_capture_matches_fast_forward() {
        let re = Regex::new(r"(Updating [^\s]+)").unwrap();
        let output = "Updating a1b2c3d..e4f5a6b\nFast-forward\n file | 1 +";
        let cap = re.captures(output).unwrap().get(1).unwrap().as_str();
        assert_eq!(cap, "Updating a1b2c3d..e4f5a6b");
        assert!(re.captures("Already up to date.").is_none());
    }

    #[test]
    fn parse_git_branches() {
        let raw = "* main\n  feature/x\n  remotes/origin/HEAD -> origin/main\n  remotes/origin/main\n  remotes/origin/release";
        let branches = parse_branches(VcsKind::Git, raw);
        let expected: BTreeSet<String> = ["main", "feature/x", "release"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(branches, expected);
    }

    #[test]
    fn parse_hg_branches() {
        let raw = "default                       4:1f3a9b2c\nstable                        2:9c8b7a6d";
        let branches = parse_branches(VcsKind::Hg, raw);
        assert!(branches.contains("default"));
        assert!(branches.contains("stable"));
        assert_eq!(branches.len(), 2);
    }

    #[test]
    fn kind_tables_cover_every_backend() {
        for kind in VcsKind::ALL {
            // Every backend can sync, create, and ping; the optional tables
            // follow the support matrix.
            let _ = kind.tag_sync_cmd();
            let _ = kind.branch_update_cmd();
            let _ = kind.create_cmd();
            let _ = kind.ping_cmd();
        }
        assert!(VcsKind::Bzr.remote_cmd().is_none());
        assert!(VcsKind::Svn.branch_cmd().is_none());
        assert!(VcsKind::Svn.update_cmd().is_none());
        assert!(VcsKind::Git.branches_cmd().is_some());
    }

    #[test]
    fn metadata_dirs_are_distinct() {
        let dirs: BTreeSet<_> = VcsKind::ALL.iter().map(|k| k.metadata_dir()).collect();
        assert_eq!(dirs.len(), 4);
    }

    #[test]
    fn set_rev_empty_is_a_noop_without_a_checkout() {
        // No repository exists at this root; an empty revision must still
        // succeed without running anything.
        let lv = LocalVcs::new(VcsKind::Git, "example.org/none", "/nonexistent-workspace");
        lv.set_rev("").unwrap();
    }

    #[test]
    fn remote_handle_reports_known_values() {
        let rv = RemoteVcs::new(
            VcsKind::Git,
            "example.org/x/lib",
            "https://example.org/x/lib",
            "/ws",
        );
        assert_eq!(rv.get_root(), "example.org/x/lib");
        assert_eq!(rv.get_source().unwrap(), "https://example.org/x/lib");
        assert!(matches!(rv.get_rev(), Err(VcsError::Unsupported { .. })));
        assert!(matches!(rv.get_branch(), Err(VcsError::Unsupported { .. })));
    }

    /// End-to-end against a real git binary; skipped when git is absent.
    #[test]
    fn local_git_rev_branch_and_source() {
        if Command::new("git").arg("--version").output().is_err() {
            return;
        }
        let ws = tempfile::tempdir().unwrap();
        let repo = ws.path().join("src").join("example.org").join("lib");
        std::fs::create_dir_all(&repo).unwrap();

        let git = |args: &[&str]| {
            let out = Command::new("git").args(args).current_dir(&repo).output().unwrap();
            assert!(out.status.success(), "git {args:?}: {:?}", out);
        };
        git(&["init", "-q"]);
        git(&["checkout", "-q", "-b", "main"]);
        git(&["config", "user.email", "dev@example.org"]);
        git(&["config", "user.name", "dev"]);
        git(&["remote", "add", "origin", "https://example.org/lib.git"]);
        std::fs::write(repo.join("f.go"), "package lib\n").unwrap();
        git(&["add", "."]);
        git(&["commit", "-q", "-m", "init"]);

        let lv = LocalVcs::new(VcsKind::Git, "example.org/lib", ws.path());
        let rev = lv.get_rev().unwrap();
        assert_eq!(rev.len(), 40, "expected a full sha, got {rev}");
        assert_eq!(lv.get_branch().unwrap(), "main");
        assert_eq!(lv.get_source().unwrap(), "https://example.org/lib.git");
        assert!(lv.branches().unwrap().contains("main"));

        let update = lv.update_branch("no-such-branch").unwrap();
        assert!(!update.updated);
        assert!(update.output.contains("not a branch"));
    }
}
