//! cant - dependency pinning and restoration for Go-convention workspaces.
//!
//! `cant save` records the revision of every external repository a project
//! imports into a `Canticle` file; `cant get` and `cant vendor` restore
//! those revisions on another machine; `cant genversion` stamps a build
//! with the full pin set.

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use std::path::PathBuf;

mod genversion;
mod get;
mod save;
mod vendor;

#[derive(Parser)]
#[command(name = "cant")]
#[command(version = canticle_core::VERSION)]
#[command(about = "Dependency pinning for Go-convention workspaces", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download dependencies as pinned in the Canticle file
    ///
    /// Reads the manifest of each project (defaulting to the current
    /// directory), fetches every pinned repository in parallel, then walks
    /// the import graph to cover anything the manifest missed.
    Get {
        /// Project directories to fetch for
        paths: Vec<PathBuf>,

        /// Update pinned branches and print what moved
        #[arg(short, long)]
        update: bool,

        /// Override the URL the pinned repositories are fetched from
        #[arg(long)]
        source: Option<String>,

        /// Print each operation, not just errors
        #[arg(short, long)]
        verbose: bool,
    },

    /// Save the current revision of all dependencies in a Canticle file
    Save {
        /// Use on-disk revisions and sources, with no conflict prompts
        #[arg(long)]
        ondisk: bool,

        /// Record branches instead of revisions where one exists
        #[arg(short, long)]
        branches: bool,

        /// Print the manifest to stdout instead of writing it
        #[arg(short = 'd', long)]
        dry_run: bool,

        /// Do not recur into these directories unless the dep tree reaches them
        #[arg(long)]
        exclude: Vec<PathBuf>,

        /// Print each operation, not just errors
        #[arg(short, long)]
        verbose: bool,
    },

    /// Download the entire dependency graph of a project
    Vendor {
        /// Project directories to vendor
        paths: Vec<PathBuf>,

        /// Canticle file whose entries override fetch sources
        #[arg(short, long)]
        sources: Option<PathBuf>,

        /// Print each operation, not just errors
        #[arg(short, long)]
        verbose: bool,
    },

    /// Generate a buildinfo package recording all dependency revisions
    Genversion {
        /// Project directory (defaults to the current directory)
        path: Option<PathBuf>,

        /// Print each operation, not just errors
        #[arg(short, long)]
        verbose: bool,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Get {
            paths,
            update,
            source,
            verbose,
        } => get::run(get::GetOptions {
            paths,
            update,
            source,
            verbose,
        }),
        Commands::Save {
            ondisk,
            branches,
            dry_run,
            exclude,
            verbose,
        } => save::run(save::SaveOptions {
            ondisk,
            branches,
            dry_run,
            excludes: exclude,
            verbose,
        }),
        Commands::Vendor {
            paths,
            sources,
            verbose,
        } => vendor::run(vendor::VendorOptions {
            paths,
            sources,
            verbose,
        }),
        Commands::Genversion { path, verbose } => {
            genversion::run(genversion::GenVersionOptions { path, verbose })
        }
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "cant", &mut io::stdout());
            Ok(())
        }
    }
}
