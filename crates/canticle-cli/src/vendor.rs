//! Implementation of the `cant vendor` command.

use anyhow::{Context, Result};
use canticle_core::{
    package_name, remote_imports, workspace_root, CompositeResolver, DependencyLoader,
    DependencyWalker, Manifest, ManifestEntry, MemoizedResolver,
};
use std::path::{Path, PathBuf};

use crate::get::default_to_cwd;

/// Options for the vendor command.
#[derive(Debug, Default)]
pub struct VendorOptions {
    /// Project directories; the current directory when empty.
    pub paths: Vec<PathBuf>,
    /// Canticle file whose entries override fetch sources.
    pub sources: Option<PathBuf>,
    /// Print operations, not just errors.
    pub verbose: bool,
}

/// Walk each project's entire import graph, fetching everything it reaches.
/// Unlike get, the graph drives the work; the manifests encountered along
/// the way supply the pins.
pub fn run(options: VendorOptions) -> Result<()> {
    let overrides = match &options.sources {
        Some(path) => {
            Manifest::read_file(path)
                .with_context(|| format!("cannot read sources file {}", path.display()))?
                .entries
        }
        None => Vec::new(),
    };

    for path in default_to_cwd(options.paths.clone())? {
        vendor_project(&path, overrides.clone(), &options)?;
    }
    Ok(())
}

fn vendor_project(
    project: &Path,
    overrides: Vec<ManifestEntry>,
    options: &VendorOptions,
) -> Result<()> {
    let workspace = workspace_root().context("no workspace found")?;
    let project = project
        .canonicalize()
        .with_context(|| format!("no project at {}", project.display()))?;
    let pkg = package_name(&workspace, &project)?;
    if options.verbose {
        eprintln!("Vendoring {pkg}");
    }

    let resolver = MemoizedResolver::new(Box::new(CompositeResolver::for_fetch(&workspace)));
    let reader_workspace = workspace.clone();
    // Override entries are seeded first, so pins read from the project's own
    // manifests never displace them.
    let mut loader = DependencyLoader::new(
        &resolver,
        Box::new(move |p: &str| remote_imports(p, &reader_workspace)),
        &workspace,
        overrides,
    );
    DependencyWalker::new(&mut loader)
        .traverse_dependencies(&pkg)
        .with_context(|| format!("cannot vendor {pkg}"))?;
    Ok(())
}
