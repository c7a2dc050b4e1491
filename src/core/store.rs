//! Collection handles for exocortex's on-disk record roots.
//!
//! Every record collection lives under its own root directory. The root is the
//! containment boundary for the record store: nothing outside it is ever read,
//! written, or removed.

use crate::core::error::ExocortexError;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Named record collection.
///
/// Each collection maps to a directory under the data dir, e.g. recipes live in
/// `<data_dir>/recipe-manager/recipes/<status-folder>/<id>.yaml`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Recipe collection at `recipe-manager/recipes`
    Recipes,
    /// Career tracker at `job-analyzer`
    Career,
    /// Analyzed job postings at `job-analyzer/jobs/analyzed`
    Analyses,
    /// Company notes at `job-analyzer/companies`
    Companies,
    /// Reading list at `reading-list`
    Reading,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Recipes,
        Collection::Career,
        Collection::Analyses,
        Collection::Companies,
        Collection::Reading,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::Recipes => "recipes",
            Collection::Career => "career",
            Collection::Analyses => "analyses",
            Collection::Companies => "companies",
            Collection::Reading => "reading",
        }
    }

    /// Default root relative to the data dir.
    pub fn default_subpath(&self) -> &'static str {
        match self {
            Collection::Recipes => "recipe-manager/recipes",
            Collection::Career => "job-analyzer",
            Collection::Analyses => "job-analyzer/jobs/analyzed",
            Collection::Companies => "job-analyzer/companies",
            Collection::Reading => "reading-list",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Collection {
    type Err = ExocortexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Collection::ALL
            .into_iter()
            .find(|c| c.name() == wanted)
            .ok_or_else(|| {
                ExocortexError::ValidationError(format!(
                    "Unknown collection '{}'. Expected one of: {}",
                    s,
                    Collection::ALL.map(|c| c.name()).join(", ")
                ))
            })
    }
}

/// Store handle for one record collection.
///
/// `root` is the configured value, not a canonical path. The record store
/// canonicalizes it on every call so a moved or re-linked data dir is never
/// judged against a stale boundary.
#[derive(Debug, Clone)]
pub struct Store {
    pub collection: Collection,
    pub root: PathBuf,
}
