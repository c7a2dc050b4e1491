//! File-backed record store.
//!
//! A record is one YAML mapping per file. Its `status` decides which folder
//! under the collection root holds it:
//!
//! ```text
//! <root>/to-try/shakshuka.yaml      status: To try
//! <root>/in-progress/acme.yaml      status: In Progress
//! ```
//!
//! Mutations are read-modify-write. A status change that moves a record
//! writes the new file before removing the old one, so an interrupted move
//! leaves a duplicate, never a lost record.

use crate::core::broker::{MutationBroker, MutationTrace};
use crate::core::error::{ExocortexError, IoStep};
use crate::core::fsops::{OsFs, RecordFs};
use crate::core::store::Store;
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};

pub const STATUS_KEY: &str = "status";
pub const TAGS_KEY: &str = "tags";
const RECORD_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// One parsed record and where it was read from.
#[derive(Debug, Clone)]
pub struct Record {
    pub location: PathBuf,
    pub data: Mapping,
}

impl Record {
    /// File base name without extension; stable across relocation.
    pub fn id(&self) -> String {
        record_id(&self.location)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn status(&self) -> Option<&str> {
        self.get_str(STATUS_KEY)
    }

    /// String tags in stored order. Non-string entries are skipped.
    pub fn tags(&self) -> Vec<String> {
        match self.get(TAGS_KEY) {
            Some(Value::Sequence(seq)) => seq
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Name of the folder the file currently sits in.
    pub fn folder(&self) -> Option<String> {
        self.location
            .parent()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().to_string())
    }
}

/// Folder name for a status: trimmed, lowercased, whitespace runs to `-`.
pub fn status_folder(status: &str) -> String {
    status
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

/// Trim, drop empties, and dedupe (case-sensitive, first occurrence wins).
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for tag in tags {
        let trimmed = tag.as_ref().trim();
        if trimmed.is_empty() || !seen.insert(trimmed.to_string()) {
            continue;
        }
        out.push(trimmed.to_string());
    }
    out
}

pub fn record_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

pub fn is_record_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| RECORD_EXTENSIONS.contains(&e))
}

pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Parse a record document. Empty documents are empty mappings.
pub fn parse_record(path: &Path, content: &str) -> Result<Mapping, ExocortexError> {
    if content.trim().is_empty() {
        return Ok(Mapping::new());
    }
    let value: Value =
        serde_yaml::from_str(content).map_err(|e| ExocortexError::MalformedRecord {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    match value {
        Value::Mapping(m) => Ok(m),
        Value::Null => Ok(Mapping::new()),
        other => Err(ExocortexError::MalformedRecord {
            path: path.to_path_buf(),
            reason: format!("expected a mapping, found {}", value_kind(&other)),
        }),
    }
}

pub fn render_record(path: &Path, data: &Mapping) -> Result<String, ExocortexError> {
    serde_yaml::to_string(data).map_err(|e| ExocortexError::MalformedRecord {
        path: path.to_path_buf(),
        reason: format!("cannot serialize: {}", e),
    })
}

fn value_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Resolve `.` and `..` without touching the filesystem.
fn lexical_absolute(path: &Path) -> PathBuf {
    let abs = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut out = PathBuf::new();
    for comp in abs.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Result of a successful status change.
#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub location: PathBuf,
    pub previous_location: PathBuf,
    pub record_id: String,
    pub relocated: bool,
    /// Record ids whose cached views are now stale: the old and the new id.
    pub stale_ids: Vec<String>,
    pub content_hash: String,
}

/// Result of a successful tag update.
#[derive(Debug, Clone, Serialize)]
pub struct TagsChange {
    pub location: PathBuf,
    pub record_id: String,
    pub tags: Vec<String>,
    pub stale_ids: Vec<String>,
    pub content_hash: String,
}

/// Records found under a root, plus files that could not be loaded.
#[derive(Debug, Default)]
pub struct Listing {
    pub records: Vec<Record>,
    pub skipped: Vec<(PathBuf, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// File is not in the folder its status maps to.
    FolderMismatch,
    MissingStatus,
    DuplicateTag,
    EmptyTag,
    NonStringTag,
    /// Same id in more than one folder, e.g. residue of an interrupted move.
    DuplicateRecord,
    /// Record file directly under the root instead of a status folder.
    Unfiled,
    Unreadable,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvariantViolation {
    pub kind: ViolationKind,
    pub location: PathBuf,
    pub record_id: String,
    pub detail: String,
}

/// Structured outcome handed to callers (CLI, view layer).
///
/// Built from an operation `Result`; a failure is never reported as success.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MutationReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    pub stale_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
}

impl MutationReport {
    pub fn failure(err: &ExocortexError) -> Self {
        let failed_step = match err {
            ExocortexError::IoFailure { step, .. } => Some(step.to_string()),
            _ => None,
        };
        Self {
            success: false,
            error: Some(err.to_string()),
            error_kind: Some(err.kind().to_string()),
            failed_step,
            ..Self::default()
        }
    }
}

impl From<&Result<StatusChange, ExocortexError>> for MutationReport {
    fn from(result: &Result<StatusChange, ExocortexError>) -> Self {
        match result {
            Ok(change) => Self {
                success: true,
                new_location: Some(change.location.to_string_lossy().to_string()),
                record_id: Some(change.record_id.clone()),
                stale_ids: change.stale_ids.clone(),
                ..Self::default()
            },
            Err(e) => Self::failure(e),
        }
    }
}

impl From<&Result<TagsChange, ExocortexError>> for MutationReport {
    fn from(result: &Result<TagsChange, ExocortexError>) -> Self {
        match result {
            Ok(change) => Self {
                success: true,
                new_location: Some(change.location.to_string_lossy().to_string()),
                record_id: Some(change.record_id.clone()),
                tags: Some(change.tags.clone()),
                stale_ids: change.stale_ids.clone(),
                ..Self::default()
            },
            Err(e) => Self::failure(e),
        }
    }
}

/// Record store bound to one collection root.
///
/// No lock serializes mutations on the same record; concurrent status
/// changes race and the last write wins, possibly leaving a duplicate.
pub struct RecordStore<F: RecordFs = OsFs> {
    store: Store,
    fs: F,
    broker: Option<MutationBroker>,
}

impl RecordStore<OsFs> {
    pub fn new(store: Store) -> Self {
        Self::with_fs(store, OsFs)
    }
}

impl<F: RecordFs> RecordStore<F> {
    pub fn with_fs(store: Store, fs: F) -> Self {
        Self {
            store,
            fs,
            broker: None,
        }
    }

    pub fn with_broker(mut self, broker: MutationBroker) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Canonical root, re-derived on every call.
    fn canonical_root(&self) -> PathBuf {
        self.fs
            .canonicalize(&self.store.root)
            .unwrap_or_else(|_| lexical_absolute(&self.store.root))
    }

    /// Containment check. Returns `(canonical_root, canonical_location)`.
    ///
    /// Only read-only lookups happen here; a path outside the root fails
    /// before anything is written.
    fn contain(&self, location: &Path) -> Result<(PathBuf, PathBuf), ExocortexError> {
        let root = self.canonical_root();
        let lexical = lexical_absolute(location);
        let resolved = self.fs.canonicalize(&lexical).unwrap_or(lexical);

        // Component-wise, so `<root>-evil/x.yaml` is outside `<root>`.
        if resolved == root || !resolved.starts_with(&root) {
            return Err(ExocortexError::PathEscape {
                path: location.to_path_buf(),
                root,
            });
        }
        Ok((root, resolved))
    }

    /// Resolve an existing path and require it to stay strictly under `root`.
    ///
    /// A path that does not exist yet comes back unchanged, unless it is a
    /// dangling symlink: writing through one would create its target.
    fn within_root(&self, root: &Path, path: &Path) -> Result<PathBuf, ExocortexError> {
        let escape = || ExocortexError::PathEscape {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        };
        let resolved = match self.fs.canonicalize(path) {
            Ok(resolved) => resolved,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if self.fs.is_symlink(path) {
                    return Err(escape());
                }
                return Ok(path.to_path_buf());
            }
            Err(e) => return Err(ExocortexError::io(IoStep::Canonicalize, path, e)),
        };
        if resolved == root || !resolved.starts_with(root) {
            return Err(escape());
        }
        Ok(resolved)
    }

    fn read_mapping(&self, path: &Path) -> Result<Mapping, ExocortexError> {
        let content = self
            .fs
            .read_to_string(path)
            .map_err(|e| ExocortexError::io(IoStep::Read, path, e))?;
        parse_record(path, &content)
    }

    fn write(&self, path: &Path, content: &str) -> Result<(), ExocortexError> {
        self.fs
            .write(path, content)
            .map_err(|e| ExocortexError::io(IoStep::Write, path, e))
    }

    pub fn load(&self, location: &Path) -> Result<Record, ExocortexError> {
        let (_, path) = self.contain(location)?;
        let data = self.read_mapping(&path)?;
        Ok(Record {
            location: path,
            data,
        })
    }

    /// Set `status` and move the file into the matching status folder.
    pub fn set_status(
        &self,
        location: &Path,
        new_status: &str,
    ) -> Result<StatusChange, ExocortexError> {
        match &self.broker {
            Some(broker) => broker.with_mutation(
                "records.set_status",
                self.store.collection.name(),
                location,
                |c: &StatusChange| MutationTrace {
                    record_id: Some(c.record_id.clone()),
                    to: Some(c.location.clone()),
                    content_hash: Some(c.content_hash.clone()),
                },
                || self.apply_status(location, new_status),
            ),
            None => self.apply_status(location, new_status),
        }
    }

    fn apply_status(
        &self,
        location: &Path,
        new_status: &str,
    ) -> Result<StatusChange, ExocortexError> {
        let folder = status_folder(new_status);
        if folder.is_empty() {
            return Err(ExocortexError::InvalidStatus(
                "status must contain a non-whitespace character".into(),
            ));
        }

        let (root, current) = self.contain(location)?;

        let mut folder_parts = Path::new(&folder).components();
        let single_normal = matches!(
            (folder_parts.next(), folder_parts.next()),
            (Some(Component::Normal(_)), None)
        );
        if !single_normal || folder.contains(['/', '\\', '\0']) {
            return Err(ExocortexError::PathEscape {
                path: root.join(&folder),
                root,
            });
        }

        // An existing status folder may be a symlink leading out of the root.
        let target_dir = root.join(&folder);
        self.within_root(&root, &target_dir)?;

        let mut data = self.read_mapping(&current)?;
        data.insert(
            Value::String(STATUS_KEY.into()),
            Value::String(new_status.to_string()),
        );
        let rendered = render_record(&current, &data)?;

        self.fs
            .create_dir_all(&target_dir)
            .map_err(|e| ExocortexError::io(IoStep::CreateDir, &target_dir, e))?;
        // A symlinked status folder that already points at the current one
        // must compare equal, or the remove below would delete the record.
        let target_dir = self.within_root(&root, &target_dir)?;

        let file_name = current
            .file_name()
            .ok_or_else(|| ExocortexError::PathEscape {
                path: location.to_path_buf(),
                root: root.clone(),
            })?;
        let target = self.within_root(&root, &target_dir.join(file_name))?;

        let relocated = target != current;
        if relocated {
            // Write first: interruption leaves a duplicate, not a loss.
            self.write(&target, &rendered)?;
            self.fs
                .remove_file(&current)
                .map_err(|e| ExocortexError::io(IoStep::Remove, &current, e))?;
        } else {
            self.write(&current, &rendered)?;
        }

        let old_id = record_id(&current);
        let new_id = record_id(&target);
        let mut stale_ids = vec![old_id];
        if !stale_ids.contains(&new_id) {
            stale_ids.push(new_id.clone());
        }

        Ok(StatusChange {
            location: target,
            previous_location: current,
            record_id: new_id,
            relocated,
            stale_ids,
            content_hash: content_hash(&rendered),
        })
    }

    /// Replace `tags` with the normalized set. Never moves the file.
    pub fn set_tags<S: AsRef<str>>(
        &self,
        location: &Path,
        tags: &[S],
    ) -> Result<TagsChange, ExocortexError> {
        match &self.broker {
            Some(broker) => broker.with_mutation(
                "records.set_tags",
                self.store.collection.name(),
                location,
                |c: &TagsChange| MutationTrace {
                    record_id: Some(c.record_id.clone()),
                    to: Some(c.location.clone()),
                    content_hash: Some(c.content_hash.clone()),
                },
                || self.apply_tags(location, tags),
            ),
            None => self.apply_tags(location, tags),
        }
    }

    fn apply_tags<S: AsRef<str>>(
        &self,
        location: &Path,
        tags: &[S],
    ) -> Result<TagsChange, ExocortexError> {
        let (_, current) = self.contain(location)?;
        let mut data = self.read_mapping(&current)?;

        let normalized = normalize_tags(tags);
        data.insert(
            Value::String(TAGS_KEY.into()),
            Value::Sequence(normalized.iter().cloned().map(Value::String).collect()),
        );
        let rendered = render_record(&current, &data)?;
        self.write(&current, &rendered)?;

        let id = record_id(&current);
        Ok(TagsChange {
            location: current,
            record_id: id.clone(),
            tags: normalized,
            stale_ids: vec![id],
            content_hash: content_hash(&rendered),
        })
    }

    fn record_files(&self, dir: &Path) -> Result<Vec<PathBuf>, ExocortexError> {
        Ok(self
            .fs
            .read_dir(dir)
            .map_err(|e| ExocortexError::io(IoStep::Read, dir, e))?
            .into_iter()
            .filter(|p| is_record_file(p) && !self.fs.is_dir(p))
            .collect())
    }

    /// Records in status folders, sorted by folder then file name.
    ///
    /// `status` filters by folder name, so `"To Try"` matches `to-try/`.
    /// A missing root lists as empty. Unreadable folders and files, and
    /// symlinks resolving outside the root, land in `skipped` unread.
    pub fn list(&self, status: Option<&str>) -> Result<Listing, ExocortexError> {
        let root = self.canonical_root();
        let wanted = status.map(status_folder);
        let mut listing = Listing::default();

        let entries = match self.fs.read_dir(&root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(listing),
            Err(e) => return Err(ExocortexError::io(IoStep::Read, &root, e)),
        };

        for dir in entries.into_iter().filter(|p| self.fs.is_dir(p)) {
            let name = dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if name.starts_with('.') {
                continue;
            }
            if wanted.as_deref().is_some_and(|w| w != name) {
                continue;
            }
            let files = match self
                .within_root(&root, &dir)
                .and_then(|_| self.record_files(&dir))
            {
                Ok(files) => files,
                Err(e) => {
                    listing.skipped.push((dir, e.to_string()));
                    continue;
                }
            };
            for path in files {
                match self
                    .within_root(&root, &path)
                    .and_then(|resolved| self.read_mapping(&resolved))
                {
                    Ok(data) => listing.records.push(Record {
                        location: path,
                        data,
                    }),
                    Err(e) => listing.skipped.push((path, e.to_string())),
                }
            }
        }
        Ok(listing)
    }

    /// Every record with this id. More than one hit means a duplicate.
    pub fn find(&self, id: &str) -> Result<Vec<Record>, ExocortexError> {
        Ok(self
            .list(None)?
            .records
            .into_iter()
            .filter(|r| r.id() == id)
            .collect())
    }

    /// Records whose `name` contains `query`, ignoring case.
    pub fn find_by_name(&self, query: &str) -> Result<Vec<Record>, ExocortexError> {
        let query = query.trim().to_lowercase();
        Ok(self
            .list(None)?
            .records
            .into_iter()
            .filter(|r| {
                r.get_str("name")
                    .is_some_and(|name| name.to_lowercase().contains(&query))
            })
            .collect())
    }

    /// Scan the collection for records breaking the store's invariants.
    pub fn check_invariants(&self) -> Result<Vec<InvariantViolation>, ExocortexError> {
        let root = self.canonical_root();
        let listing = self.list(None)?;
        let mut violations = Vec::new();

        let loose = if self.fs.is_dir(&root) {
            self.record_files(&root)?
        } else {
            Vec::new()
        };
        for path in loose {
            violations.push(InvariantViolation {
                kind: ViolationKind::Unfiled,
                record_id: record_id(&path),
                detail: "record sits directly under the root".into(),
                location: path,
            });
        }

        for (path, reason) in &listing.skipped {
            violations.push(InvariantViolation {
                kind: ViolationKind::Unreadable,
                location: path.clone(),
                record_id: record_id(path),
                detail: reason.clone(),
            });
        }

        let mut by_id: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for record in &listing.records {
            let id = record.id();
            by_id
                .entry(id.clone())
                .or_default()
                .push(record.location.clone());
            violations.extend(record_violations(record, &id));
        }

        for (id, locations) in by_id {
            if locations.len() > 1 {
                let all = locations
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                for location in locations {
                    violations.push(InvariantViolation {
                        kind: ViolationKind::DuplicateRecord,
                        location,
                        record_id: id.clone(),
                        detail: format!("id present at {}", all),
                    });
                }
            }
        }

        Ok(violations)
    }
}

fn record_violations(record: &Record, id: &str) -> Vec<InvariantViolation> {
    let mut out = Vec::new();
    let mut push = |kind, detail: String| {
        out.push(InvariantViolation {
            kind,
            location: record.location.clone(),
            record_id: id.to_string(),
            detail,
        })
    };

    match record.status() {
        Some(status) => {
            let expected = status_folder(status);
            let actual = record.folder().unwrap_or_default();
            if expected != actual {
                push(
                    ViolationKind::FolderMismatch,
                    format!("status '{}' belongs in '{}/', found in '{}/'", status, expected, actual),
                );
            }
        }
        None => push(ViolationKind::MissingStatus, "no string `status` field".into()),
    }

    if let Some(Value::Sequence(seq)) = record.get(TAGS_KEY) {
        let mut seen = HashSet::new();
        for tag in seq {
            match tag.as_str() {
                None => push(ViolationKind::NonStringTag, format!("tag {:?} is not a string", tag)),
                Some(t) if t.trim().is_empty() => {
                    push(ViolationKind::EmptyTag, "empty or whitespace-only tag".into())
                }
                Some(t) => {
                    if t != t.trim() {
                        push(ViolationKind::EmptyTag, format!("tag '{}' has surrounding whitespace", t));
                    }
                    if !seen.insert(t.trim()) {
                        push(ViolationKind::DuplicateTag, format!("tag '{}' repeats", t.trim()));
                    }
                }
            }
        }
    }

    out
}
