//! Implementation of the `cant get` command.

use anyhow::{anyhow, Context, Result};
use canticle_core::{
    fetch_entries, package_name, remote_imports, workspace_root, CompositeResolver,
    DependencyLoader, DependencyWalker, Manifest, ManifestError, MemoizedResolver, RepoResolver,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Options for the get command.
#[derive(Debug, Default)]
pub struct GetOptions {
    /// Project directories; the current directory when empty.
    pub paths: Vec<PathBuf>,
    /// Update pinned branches and report what moved.
    pub update: bool,
    /// Override the URL the pinned repositories are fetched from.
    pub source: Option<String>,
    /// Print operations, not just errors.
    pub verbose: bool,
}

/// Fetch the pinned dependencies of each project, then walk the import
/// graph for anything the manifest missed.
pub fn run(options: GetOptions) -> Result<()> {
    if options.source.is_some() && options.paths.len() > 1 {
        return Err(anyhow!("get may not be run with --source and multiple paths"));
    }
    let paths = default_to_cwd(options.paths.clone())?;
    for path in paths {
        get_project(&path, &options)?;
    }
    Ok(())
}

pub(crate) fn default_to_cwd(paths: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    if paths.is_empty() {
        Ok(vec![std::env::current_dir().context("cannot determine current directory")?])
    } else {
        Ok(paths)
    }
}

fn get_project(project: &Path, options: &GetOptions) -> Result<()> {
    let workspace = workspace_root().context("no workspace found")?;
    let project = project
        .canonicalize()
        .with_context(|| format!("no project at {}", project.display()))?;

    let mut manifest = match Manifest::read(&project) {
        Ok(manifest) => manifest,
        Err(ManifestError::NotFound(_)) => Manifest::default(),
        Err(e) => return Err(e.into()),
    };
    // A source override redirects every resolution for this project's pins.
    if let Some(url) = &options.source {
        for entry in &mut manifest.entries {
            entry.source_path = url.clone();
        }
    }
    if options.verbose {
        eprintln!("Fetching {} pinned repositories", manifest.entries.len());
    }

    let resolver: Arc<dyn RepoResolver> = Arc::new(MemoizedResolver::new(Box::new(
        CompositeResolver::for_fetch(&workspace),
    )));

    // Every pinned repository first, in parallel.
    let report = fetch_entries(resolver.clone(), manifest.entries.clone(), options.update);
    if !report.ok() {
        for err in &report.errors[1..] {
            eprintln!("error: {err}");
        }
        return Err(anyhow!("{}", report.errors[0]));
    }

    // Then the import graph, covering anything the manifest missed.
    let pkg = package_name(&workspace, &project)?;
    if !pkg.is_empty() {
        let reader_workspace = workspace.clone();
        let mut loader = DependencyLoader::new(
            &*resolver,
            Box::new(move |p: &str| remote_imports(p, &reader_workspace)),
            &workspace,
            manifest.entries,
        );
        DependencyWalker::new(&mut loader)
            .traverse_dependencies(&pkg)
            .with_context(|| format!("cannot fetch the dependencies of {pkg}"))?;
    }

    if options.update {
        println!(
            "Updated packages: {}",
            serde_json::to_string_pretty(&report.updated)?
        );
    }
    Ok(())
}
