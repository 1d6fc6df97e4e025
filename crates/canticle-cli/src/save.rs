//! Implementation of the `cant save` command.

use anyhow::{Context, Result};
use canticle_core::{
    remote_imports, workspace_root, CompositeResolver, ConflictResolver, DependencySaver,
    DependencyWalker, Manifest, MemoizedResolver, PreferLocal, Prompt, SourcesResolver,
};
use std::path::{Path, PathBuf};

/// Options for the save command.
#[derive(Debug, Default)]
pub struct SaveOptions {
    /// Pin on-disk revisions and sources without prompting.
    pub ondisk: bool,
    /// Record branch names instead of revisions where one exists.
    pub branches: bool,
    /// Print the manifest instead of writing it.
    pub dry_run: bool,
    /// Directories never recurred into unless the dep tree reaches them.
    pub excludes: Vec<PathBuf>,
    /// Print operations, not just errors.
    pub verbose: bool,
}

/// Walk the project at the current directory, resolve revision conflicts,
/// and write its Canticle file.
pub fn run(options: SaveOptions) -> Result<()> {
    let project = std::env::current_dir().context("cannot determine current directory")?;
    save_project(&project, &options)
}

fn save_project(project: &Path, options: &SaveOptions) -> Result<()> {
    let workspace = workspace_root().context("no workspace found")?;

    // Walk the project's packages and everything they import.
    let reader_workspace = workspace.clone();
    let mut saver = DependencySaver::new(
        Box::new(move |p: &str| remote_imports(p, &reader_workspace)),
        &workspace,
        project,
    );
    saver.set_excludes(absolutize(&options.excludes, project));
    DependencyWalker::new(&mut saver)
        .traverse_dependencies(&project.to_string_lossy())
        .context("cannot read the project's dependency tree")?;
    if options.verbose {
        eprintln!("Discovered {} packages", saver.dependencies().len());
    }

    // Read each repository root's on-disk state.
    let resolver = MemoizedResolver::new(Box::new(CompositeResolver::for_save(&workspace)));
    let sources_resolver = SourcesResolver {
        workspace: workspace.clone(),
        project_path: project.to_path_buf(),
        resolver: &resolver,
        branches: options.branches,
    };
    let sources = sources_resolver.resolve_sources(saver.dependencies())?;

    // Reduce to one pin per root.
    let entries = if options.ondisk {
        PreferLocal.resolve_conflicts(&sources)?
    } else {
        Prompt::stdio().resolve_conflicts(&sources)?
    };

    let manifest = Manifest { entries };
    if options.dry_run {
        println!("{}", manifest.to_json_string());
        return Ok(());
    }
    manifest
        .write(project)
        .with_context(|| format!("cannot write the manifest at {}", project.display()))?;
    if options.verbose {
        eprintln!("Saved {} pins", manifest.entries.len());
    }
    Ok(())
}

/// Exclude flags may be given relative to the project.
fn absolutize(excludes: &[PathBuf], project: &Path) -> Vec<PathBuf> {
    excludes
        .iter()
        .map(|e| {
            if e.is_absolute() {
                e.clone()
            } else {
                project.join(e)
            }
        })
        .collect()
}
