//! Command-line surface: one subcommand per operation named in the spec.

pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

pub use commands::run;

/// Kishu: checkpoint and restore notebook session state.
#[derive(Debug, Parser)]
#[command(name = "kishu", version, about)]
pub struct Cli {
    /// Print the full error chain instead of a single diagnostic line.
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Root directory for session stores, overriding the platform data directory. Mainly for
    /// tests and containers that can't rely on `$XDG_DATA_HOME` being writable.
    #[arg(long, env = "KISHU_PATH_ROOT", global = true)]
    pub path_root: Option<PathBuf>,

    /// The operation to run.
    #[command(subcommand)]
    pub command: Command,
}

/// One CLI operation.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Instrument a notebook: create its session store and add its `kishu` metadata block.
    Init {
        /// Path to the notebook file.
        path: PathBuf,
    },
    /// Uninstrument a notebook: tear down its session and remove its `kishu` metadata block.
    Detach {
        /// Path to the notebook file.
        path: PathBuf,
    },
    /// List known sessions.
    List {
        /// Include sessions whose kernel is no longer alive.
        #[arg(long)]
        all: bool,
    },
    /// Show a session's commit history.
    Log {
        /// The notebook key.
        key: String,
        /// Start from this commit instead of HEAD.
        commit: Option<String>,
        /// Show every commit, not just the current branch's ancestry.
        #[arg(long)]
        all: bool,
        /// Render ancestry as a text graph.
        #[arg(long)]
        graph: bool,
    },
    /// Show one commit's full entry.
    Status {
        /// The notebook key.
        key: String,
        /// The commit to inspect.
        commit: String,
    },
    /// Record a manual commit, or edit an existing commit's message.
    Commit {
        /// The notebook key.
        key: String,
        /// Commit message.
        #[arg(short = 'm', long)]
        message: Option<String>,
        /// Edit the message of this existing commit instead of creating a new one.
        #[arg(short = 'e', long)]
        edit: Option<String>,
    },
    /// Restore a branch or commit's namespace into the live session.
    Checkout {
        /// The notebook key.
        key: String,
        /// A branch name or commit id.
        reference: String,
        /// Restore the namespace without overwriting the notebook file, auto-committing the
        /// result so it isn't lost.
        #[arg(long)]
        skip_notebook: bool,
    },
    /// Create, list, delete, or rename branches.
    Branch {
        /// The notebook key.
        key: String,
        /// Commit to point a newly created branch at (defaults to HEAD).
        commit: Option<String>,
        /// Create a branch with this name.
        #[arg(short = 'c', long)]
        create: Option<String>,
        /// Delete the named branch.
        #[arg(short = 'd', long)]
        delete: Option<String>,
        /// Rename `<old> <new>`.
        #[arg(short = 'm', long, num_args = 2)]
        rename: Option<Vec<String>>,
    },
    /// Create, list, or delete tags.
    Tag {
        /// The notebook key.
        key: String,
        /// Tag name to create.
        name: Option<String>,
        /// Commit to tag (defaults to HEAD).
        commit: Option<String>,
        /// Annotation message.
        #[arg(short = 'm', long)]
        message: Option<String>,
        /// Delete the named tag.
        #[arg(short = 'd', long)]
        delete: Option<String>,
        /// List every tag.
        #[arg(short = 'l', long)]
        list: bool,
    },
    /// Experimental: frontend-oriented commit graph as JSON.
    Fegraph {
        /// The notebook key.
        key: String,
    },
    /// Experimental: frontend-oriented single-commit JSON with variable attributes.
    Fecommit {
        /// The notebook key.
        key: String,
        /// The commit to describe.
        commit: String,
    },
    /// Print a shell completion script to stdout.
    Completions {
        /// Shell to generate the script for.
        shell: Shell,
    },
}
