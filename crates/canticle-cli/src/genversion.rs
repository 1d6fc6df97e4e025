//! Implementation of the `cant genversion` command.
//!
//! Generates a `buildinfo` Go package inside the project carrying the full
//! pin set plus revision, host, user, and timestamp, so built binaries can
//! report exactly what they were built from. The managed workspace is a Go
//! workspace, so the generated files are Go source.

use anyhow::{anyhow, Context, Result};
use canticle_core::{
    package_name, remote_imports, workspace_root, CompositeResolver, ConflictResolver,
    DependencySaver, DependencyWalker, LocalResolver, Manifest, ManifestEntry, MemoizedResolver,
    PreferLocal, RepoResolver, SourcesResolver,
};
use std::path::{Path, PathBuf};

/// Options for the genversion command.
#[derive(Debug, Default)]
pub struct GenVersionOptions {
    /// Project directory; the current directory when absent.
    pub path: Option<PathBuf>,
    /// Print operations, not just errors.
    pub verbose: bool,
}

/// Build metadata stamped into the generated package.
#[derive(Debug, Clone, Default)]
pub struct BuildInfo {
    pub build_time: String,
    pub build_user: String,
    pub build_host: String,
    pub revision: String,
    pub deps_json: String,
}

/// Resolve the project's pins on-disk and write the buildinfo package.
pub fn run(options: GenVersionOptions) -> Result<()> {
    let project = match options.path {
        Some(path) => path,
        None => std::env::current_dir().context("cannot determine current directory")?,
    };
    let workspace = workspace_root().context("no workspace found")?;

    // The save pipeline in prefer-local mode: walk, read on-disk state,
    // pin without prompting.
    let reader_workspace = workspace.clone();
    let mut saver = DependencySaver::new(
        Box::new(move |p: &str| remote_imports(p, &reader_workspace)),
        &workspace,
        &project,
    );
    DependencyWalker::new(&mut saver)
        .traverse_dependencies(&project.to_string_lossy())
        .context("cannot read the project's dependency tree")?;

    let resolver = MemoizedResolver::new(Box::new(CompositeResolver::for_save(&workspace)));
    let sources_resolver = SourcesResolver {
        workspace: workspace.clone(),
        project_path: project.clone(),
        resolver: &resolver,
        branches: false,
    };
    let sources = sources_resolver.resolve_sources(saver.dependencies())?;
    let entries = PreferLocal.resolve_conflicts(&sources)?;

    // The project's own revision comes from its working copy.
    let pkg = package_name(&workspace, &project)?;
    let local = LocalResolver::new(&workspace);
    let vcs = local
        .resolve_repo(&pkg, None)
        .map_err(|e| anyhow!("cannot resolve the project's own repository: {e}"))?;
    let revision = vcs
        .get_rev()
        .map_err(|e| anyhow!("cannot read the project's revision: {e}"))?;

    let info = BuildInfo::collect(revision, &entries);
    if options.verbose {
        eprintln!("Writing buildinfo for {} pins", entries.len());
    }
    info.write_files(&project)
        .with_context(|| format!("cannot write buildinfo under {}", project.display()))
}

impl BuildInfo {
    /// Gathers revision, pins, and the ambient build environment.
    #[must_use]
    pub fn collect(revision: String, entries: &[ManifestEntry]) -> Self {
        let manifest = Manifest {
            entries: entries.to_vec(),
        };
        BuildInfo {
            build_time: chrono::Utc::now().to_rfc3339(),
            build_user: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| "unknown".to_string()),
            build_host: hostname(),
            revision,
            deps_json: manifest.to_json_string(),
        }
    }

    /// Writes `buildinfo/buildinfo.go` (check-in-able declarations) and
    /// `buildinfo/info.go` (the generated values) under `dir`.
    ///
    /// # Errors
    ///
    /// Returns any filesystem error.
    pub fn write_files(&self, dir: &Path) -> std::io::Result<()> {
        let pkgdir = dir.join("buildinfo");
        std::fs::create_dir_all(&pkgdir)?;
        std::fs::write(pkgdir.join("buildinfo.go"), BUILDINFO_GO)?;
        std::fs::write(pkgdir.join("info.go"), self.render_info())
    }

    /// The generated `info.go` contents.
    #[must_use]
    pub fn render_info(&self) -> String {
        format!(
            r#"package buildinfo

import "encoding/json"

// GENERATED by cant genversion, do not check in.
func init() {{
	deps := json.RawMessage(`{deps}`)
	buildInfo = &BuildInfo{{
		BuildTime:    "{time}",
		BuildUser:    "{user}",
		BuildHost:    "{host}",
		Revision:     "{rev}",
		CanticleDeps: &deps,
	}}
}}
"#,
            deps = self.deps_json,
            time = self.build_time,
            user = self.build_user,
            host = self.build_host,
            rev = self.revision,
        )
    }
}

/// The static half of the generated package; safe to check in so builds
/// work without running genversion.
const BUILDINFO_GO: &str = r#"package buildinfo

import "encoding/json"

// BuildInfo carries the dependency pins of a build plus the environment
// genversion ran in. buildinfo.go may be checked in; info.go may not.
type BuildInfo struct {
	BuildTime    string
	BuildUser    string
	BuildHost    string
	Revision     string
	CanticleDeps *json.RawMessage
}

var buildInfo = &BuildInfo{}

// GetBuildInfo returns the information recorded by cant genversion.
func GetBuildInfo() *BuildInfo {
	return buildInfo
}
"#;

fn hostname() -> String {
    let from_cmd = std::process::Command::new("hostname")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string());
    match from_cmd {
        Some(host) if !host.is_empty() => host,
        _ => std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> BuildInfo {
        let mut entry = ManifestEntry::new("example.org/x/lib");
        entry.revision = "abc123".to_string();
        BuildInfo {
            build_time: "2015-06-01T12:00:00+00:00".to_string(),
            build_user: "dev".to_string(),
            build_host: "buildbox".to_string(),
            revision: "feedface".to_string(),
            deps_json: Manifest {
                entries: vec![entry],
            }
            .to_json_string(),
        }
    }

    #[test]
    fn info_embeds_revision_and_pins() {
        let rendered = sample_info().render_info();
        assert!(rendered.contains("package buildinfo"));
        assert!(rendered.contains(r#"Revision:     "feedface""#));
        assert!(rendered.contains("example.org/x/lib"));
        assert!(rendered.contains("abc123"));
    }

    #[test]
    fn write_files_creates_both_halves() {
        let dir = tempfile::tempdir().unwrap();
        sample_info().write_files(dir.path()).unwrap();

        let static_half =
            std::fs::read_to_string(dir.path().join("buildinfo/buildinfo.go")).unwrap();
        assert!(static_half.contains("func GetBuildInfo()"));

        let generated = std::fs::read_to_string(dir.path().join("buildinfo/info.go")).unwrap();
        assert!(generated.contains("func init()"));
        assert!(generated.contains("buildbox"));
    }

    #[test]
    fn collect_fills_the_environment() {
        let info = BuildInfo::collect("rev".to_string(), &[]);
        assert!(!info.build_time.is_empty());
        assert!(!info.build_user.is_empty());
        assert!(!info.build_host.is_empty());
        assert_eq!(info.deps_json, "[]");
    }
}
