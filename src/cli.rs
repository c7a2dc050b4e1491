//! CLI struct definitions for the exocortex command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "exocortex",
    version = env!("CARGO_PKG_VERSION"),
    about = "Personal records on disk: YAML files moved between status folders by a path-contained record store.",
    disable_version_flag = true
)]
pub(crate) struct Cli {
    /// Config file (defaults to $EXOCORTEX_CONFIG, then <data_dir>/exocortex.toml).
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

/// Flags shared by every collection-scoped command.
#[derive(clap::Args, Debug, Clone)]
pub(crate) struct CollectionArgs {
    /// Collection: recipes, career, analyses, companies, reading.
    #[clap(long, short = 'c', default_value = "recipes")]
    pub collection: String,
    /// Override the collection root directory.
    #[clap(long)]
    pub root: Option<PathBuf>,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Set a record's status, moving it into the matching status folder
    #[clap(name = "status", visible_alias = "s")]
    Status {
        /// Path to the record file.
        path: PathBuf,
        /// New status, e.g. "In Progress".
        new_status: String,
        #[clap(flatten)]
        args: CollectionArgs,
    },

    /// Replace a record's tags (trimmed, deduplicated, empties dropped)
    #[clap(name = "tags", visible_alias = "t")]
    Tags {
        /// Path to the record file.
        path: PathBuf,
        /// Tags in order; pass none to clear.
        tags: Vec<String>,
        #[clap(flatten)]
        args: CollectionArgs,
    },

    /// List records by status folder
    #[clap(name = "list", visible_alias = "ls")]
    List {
        /// Only records whose folder matches this status.
        #[clap(long)]
        status: Option<String>,
        #[clap(flatten)]
        args: CollectionArgs,
    },

    /// Show a record by id, or every record whose name matches
    #[clap(name = "show")]
    Show {
        /// Record id (file name without extension).
        #[clap(required_unless_present = "name", conflicts_with = "name")]
        id: Option<String>,
        /// Case-insensitive part of the record's `name`.
        #[clap(long)]
        name: Option<String>,
        #[clap(flatten)]
        args: CollectionArgs,
    },

    /// Check store invariants: folder/status agreement, tags, duplicates
    #[clap(name = "check")]
    Check {
        #[clap(flatten)]
        args: CollectionArgs,
    },

    /// Validate recipe fields (required fields, status, rating, lists, id)
    #[clap(name = "validate", visible_alias = "v")]
    Validate {
        #[clap(flatten)]
        args: CollectionArgs,
    },

    /// Show resolved data dir, collection roots and audit log
    #[clap(name = "paths")]
    Paths {
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },

    /// Show version information
    #[clap(name = "version")]
    Version,
}
