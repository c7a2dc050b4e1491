use exocortex::core::broker::MutationBroker;
use exocortex::core::error::{ExocortexError, IoStep};
use exocortex::core::fsops::{OsFs, RecordFs};
use exocortex::core::store::{Collection, Store};
use exocortex::plugins::records::{
    MutationReport, RecordStore, StatusChange, ViolationKind, normalize_tags, parse_record,
    status_folder,
};
use serde_yaml::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::tempdir;

#[derive(Debug, Clone, PartialEq, Eq)]
enum FsOp {
    Canonicalize(PathBuf),
    Read(PathBuf),
    CreateDir(PathBuf),
    Write(PathBuf),
    Remove(PathBuf),
    ReadDir(PathBuf),
}

impl FsOp {
    fn mutates(&self) -> bool {
        matches!(self, FsOp::CreateDir(_) | FsOp::Write(_) | FsOp::Remove(_))
    }
}

/// Real filesystem that records every call and can fail one step on demand.
#[derive(Default)]
struct SpyFs {
    ops: Mutex<Vec<FsOp>>,
    fail_remove: bool,
    fail_read_dir: Option<PathBuf>,
    fail_canonicalize: Option<PathBuf>,
}

impl SpyFs {
    fn failing_remove() -> Self {
        Self {
            fail_remove: true,
            ..Self::default()
        }
    }

    fn failing_read_dir(dir: &Path) -> Self {
        Self {
            fail_read_dir: Some(dir.to_path_buf()),
            ..Self::default()
        }
    }

    fn failing_canonicalize(path: &Path) -> Self {
        Self {
            fail_canonicalize: Some(path.to_path_buf()),
            ..Self::default()
        }
    }

    fn ops(&self) -> Vec<FsOp> {
        self.ops.lock().unwrap().clone()
    }

    fn log(&self, op: FsOp) {
        self.ops.lock().unwrap().push(op);
    }
}

impl RecordFs for SpyFs {
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        self.log(FsOp::Canonicalize(path.to_path_buf()));
        if self.fail_canonicalize.as_deref() == Some(path) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "spy: lookup denied"));
        }
        OsFs.canonicalize(path)
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.log(FsOp::Read(path.to_path_buf()));
        OsFs.read_to_string(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.log(FsOp::CreateDir(path.to_path_buf()));
        OsFs.create_dir_all(path)
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        self.log(FsOp::Write(path.to_path_buf()));
        OsFs.write(path, contents)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.log(FsOp::Remove(path.to_path_buf()));
        if self.fail_remove {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "spy: remove denied"));
        }
        OsFs.remove_file(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        self.log(FsOp::ReadDir(path.to_path_buf()));
        if self.fail_read_dir.as_deref() == Some(path) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "spy: listing denied"));
        }
        OsFs.read_dir(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        OsFs.is_dir(path)
    }

    fn is_symlink(&self, path: &Path) -> bool {
        OsFs.is_symlink(path)
    }
}

fn recipes(root: &Path) -> Store {
    Store {
        collection: Collection::Recipes,
        root: root.to_path_buf(),
    }
}

fn seed(root: &Path, rel: &str, body: &str) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, body).unwrap();
    path
}

fn read_yaml(path: &Path) -> serde_yaml::Mapping {
    parse_record(path, &fs::read_to_string(path).unwrap()).unwrap()
}

fn yaml_files(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for dir in fs::read_dir(root).unwrap() {
        let dir = dir.unwrap().path();
        if dir.is_dir() {
            for f in fs::read_dir(&dir).unwrap() {
                out.push(f.unwrap().path());
            }
        } else {
            out.push(dir);
        }
    }
    out.sort();
    out
}

#[test]
fn test_applied_record_moves_to_in_progress() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    let original = seed(&root, "applied/foo.yaml", "company: Acme\nstatus: Applied\n");

    let store = RecordStore::new(recipes(&root));
    let change = store.set_status(&original, "In Progress").unwrap();

    let expected = root.join("in-progress/foo.yaml");
    assert_eq!(change.location, expected);
    assert_eq!(change.record_id, "foo");
    assert!(change.relocated);
    assert!(!original.exists());

    let data = read_yaml(&expected);
    assert_eq!(data.get("status").and_then(Value::as_str), Some("In Progress"));
    assert_eq!(data.get("company").and_then(Value::as_str), Some("Acme"));
    assert_eq!(yaml_files(&root), vec![expected]);
}

#[test]
fn test_equivalent_statuses_share_one_folder() {
    assert_eq!(status_folder("To Try"), status_folder("to try"));
    assert_eq!(status_folder("to try"), status_folder("  to   try  "));

    let tmp = tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    let path = seed(&root, "tried/a.yaml", "status: Tried\n");
    let store = RecordStore::new(recipes(&root));

    let first = store.set_status(&path, "To Try").unwrap();
    let second = store.set_status(&first.location, "  to   try  ").unwrap();
    let third = store.set_status(&second.location, "to try").unwrap();

    assert_eq!(first.location, root.join("to-try/a.yaml"));
    assert_eq!(second.location, first.location);
    assert_eq!(third.location, first.location);
    assert!(!second.relocated);
    assert_eq!(
        read_yaml(&third.location).get("status").and_then(Value::as_str),
        Some("to try")
    );
}

#[test]
fn test_repeating_a_status_is_an_in_place_write() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    let path = seed(&root, "to-try/a.yaml", "status: To try\nname: A\n");

    let spy = SpyFs::default();
    let store = RecordStore::with_fs(recipes(&root), &spy);
    let first = store.set_status(&path, "Perfected").unwrap();
    let ops_before = spy.ops().len();
    let again = store.set_status(&first.location, "Perfected").unwrap();

    assert_eq!(again.location, first.location);
    assert!(!again.relocated);
    assert_eq!(again.stale_ids, vec!["a".to_string()]);
    let second_call: Vec<_> = spy.ops()[ops_before..].to_vec();
    assert!(!second_call.iter().any(|op| matches!(op, FsOp::Remove(_))));
    assert_eq!(
        second_call.iter().filter(|op| matches!(op, FsOp::Write(_))).count(),
        1
    );
}

#[test]
fn test_relocation_writes_before_removing() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    let path = seed(&root, "to-try/a.yaml", "status: To try\n");

    let spy = SpyFs::default();
    let store = RecordStore::with_fs(recipes(&root), &spy);
    store.set_status(&path, "Tried").unwrap();

    let mutating: Vec<_> = spy.ops().into_iter().filter(FsOp::mutates).collect();
    assert_eq!(
        mutating,
        vec![
            FsOp::CreateDir(root.join("tried")),
            FsOp::Write(root.join("tried/a.yaml")),
            FsOp::Remove(root.join("to-try/a.yaml")),
        ]
    );
}

#[test]
fn test_failed_remove_leaves_duplicate_not_loss() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    let path = seed(&root, "to-try/a.yaml", "status: To try\n");

    let spy = SpyFs::failing_remove();
    let store = RecordStore::with_fs(recipes(&root), &spy);
    let err = store.set_status(&path, "Tried").unwrap_err();

    match &err {
        ExocortexError::IoFailure { step, .. } => assert_eq!(*step, IoStep::Remove),
        other => panic!("expected IoFailure, got {:?}", other),
    }
    assert!(path.exists());
    assert!(root.join("tried/a.yaml").exists());

    let result: Result<StatusChange, ExocortexError> = Err(err);
    let report = MutationReport::from(&result);
    assert!(!report.success);
    assert_eq!(report.failed_step.as_deref(), Some("remove"));

    // Readers see the duplicate and can surface it.
    assert_eq!(RecordStore::new(recipes(&root)).find("a").unwrap().len(), 2);
}

#[test]
fn test_outside_root_fails_without_writes() {
    let tmp = tempdir().unwrap();
    let base = tmp.path().canonicalize().unwrap();
    let root = base.join("recipes");
    fs::create_dir_all(&root).unwrap();
    let outside = seed(&base, "elsewhere/a.yaml", "status: To try\n");
    let sneaky = root.join("to-try/../../elsewhere/a.yaml");

    for location in [outside.clone(), sneaky] {
        let spy = SpyFs::default();
        let store = RecordStore::with_fs(recipes(&root), &spy);

        let err = store.set_status(&location, "Tried").unwrap_err();
        assert!(matches!(err, ExocortexError::PathEscape { .. }), "{:?}", err);
        let err = store.set_tags(&location, &["x"]).unwrap_err();
        assert!(matches!(err, ExocortexError::PathEscape { .. }), "{:?}", err);

        let ops = spy.ops();
        assert!(!ops.iter().any(FsOp::mutates), "unexpected writes: {:?}", ops);
        assert!(!ops.iter().any(|op| matches!(op, FsOp::Read(_))));
    }
    assert_eq!(fs::read_to_string(&outside).unwrap(), "status: To try\n");
    assert!(!base.join("tried").exists());
}

#[cfg(unix)]
#[test]
fn test_symlink_out_of_root_is_an_escape() {
    let tmp = tempdir().unwrap();
    let base = tmp.path().canonicalize().unwrap();
    let root = base.join("recipes");
    let outside = seed(&base, "secret.yaml", "status: To try\n");
    fs::create_dir_all(root.join("to-try")).unwrap();
    let link = root.join("to-try/link.yaml");
    std::os::unix::fs::symlink(&outside, &link).unwrap();

    let err = RecordStore::new(recipes(&root))
        .set_tags(&link, &["x"])
        .unwrap_err();
    assert!(matches!(err, ExocortexError::PathEscape { .. }));
    assert_eq!(fs::read_to_string(&outside).unwrap(), "status: To try\n");
}

#[cfg(unix)]
#[test]
fn test_symlinked_status_folder_out_of_root_is_an_escape() {
    let tmp = tempdir().unwrap();
    let base = tmp.path().canonicalize().unwrap();
    let root = base.join("recipes");
    let outside = base.join("outside");
    fs::create_dir_all(&outside).unwrap();
    let original = seed(&root, "to-try/a.yaml", "status: To try\n");
    std::os::unix::fs::symlink(&outside, root.join("tried")).unwrap();

    let spy = SpyFs::default();
    let err = RecordStore::with_fs(recipes(&root), &spy)
        .set_status(&original, "Tried")
        .unwrap_err();

    assert!(matches!(err, ExocortexError::PathEscape { .. }), "{err:?}");
    assert!(!outside.join("a.yaml").exists());
    assert_eq!(fs::read_to_string(&original).unwrap(), "status: To try\n");
    assert!(
        spy.ops().iter().all(|op| !op.mutates()),
        "mutating call before the escape was caught: {:?}",
        spy.ops()
    );
}

#[cfg(unix)]
#[test]
fn test_symlinked_target_file_out_of_root_is_an_escape() {
    let tmp = tempdir().unwrap();
    let base = tmp.path().canonicalize().unwrap();
    let root = base.join("recipes");
    let original = seed(&root, "to-try/a.yaml", "status: To try\n");
    fs::create_dir_all(root.join("tried")).unwrap();
    let victim = seed(&base, "victim.yaml", "keep: me\n");
    std::os::unix::fs::symlink(&victim, root.join("tried/a.yaml")).unwrap();
    std::os::unix::fs::symlink(base.join("ghost.yaml"), root.join("tried/b.yaml")).unwrap();
    let second = seed(&root, "to-try/b.yaml", "status: To try\n");

    let store = RecordStore::new(recipes(&root));
    let err = store.set_status(&original, "Tried").unwrap_err();
    assert!(matches!(err, ExocortexError::PathEscape { .. }), "{err:?}");
    assert_eq!(fs::read_to_string(&victim).unwrap(), "keep: me\n");
    assert!(original.exists());

    // A dangling link would create its target on write.
    let err = store.set_status(&second, "Tried").unwrap_err();
    assert!(matches!(err, ExocortexError::PathEscape { .. }), "{err:?}");
    assert!(!base.join("ghost.yaml").exists());
    assert!(second.exists());
}

#[cfg(unix)]
#[test]
fn test_list_never_reads_through_symlinks_out_of_root() {
    let tmp = tempdir().unwrap();
    let base = tmp.path().canonicalize().unwrap();
    let root = base.join("recipes");
    let secret = seed(&base, "secret.yaml", "status: To try\nname: Secret\n");
    seed(&base, "elsewhere/b.yaml", "status: Tried\nname: Elsewhere\n");
    seed(&root, "to-try/a.yaml", "status: To try\nname: Kept\n");
    std::os::unix::fs::symlink(&secret, root.join("to-try/leak.yaml")).unwrap();
    std::os::unix::fs::symlink(base.join("elsewhere"), root.join("tried")).unwrap();

    let spy = SpyFs::default();
    let store = RecordStore::with_fs(recipes(&root), &spy);
    let listing = store.list(None).unwrap();

    let ids: Vec<_> = listing.records.iter().map(|r| r.id()).collect();
    assert_eq!(ids, vec!["a"]);
    assert_eq!(listing.skipped.len(), 2, "{:?}", listing.skipped);
    assert!(listing.skipped.iter().all(|(_, reason)| reason.contains("Path escapes")));
    let reads: Vec<_> = spy
        .ops()
        .into_iter()
        .filter(|op| matches!(op, FsOp::Read(_)))
        .collect();
    assert_eq!(reads, vec![FsOp::Read(root.join("to-try/a.yaml"))]);
    assert!(!spy.ops().contains(&FsOp::ReadDir(root.join("tried"))));

    assert!(store.find_by_name("secret").unwrap().is_empty());
    let violations = store.check_invariants().unwrap();
    let unreadable = violations
        .iter()
        .filter(|v| v.kind == ViolationKind::Unreadable)
        .count();
    assert_eq!(unreadable, 2);
}

#[test]
fn test_unresolvable_status_folder_fails_at_canonicalize_step() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    let path = seed(&root, "to-try/a.yaml", "status: To try\n");
    fs::create_dir_all(root.join("tried")).unwrap();

    let spy = SpyFs::failing_canonicalize(&root.join("tried"));
    let result = RecordStore::with_fs(recipes(&root), &spy).set_status(&path, "Tried");

    let report = MutationReport::from(&result);
    assert!(!report.success);
    assert_eq!(report.failed_step.as_deref(), Some("canonicalize"));
    assert!(matches!(
        result,
        Err(ExocortexError::IoFailure {
            step: IoStep::Canonicalize,
            ..
        })
    ));
    assert!(!spy.ops().iter().any(FsOp::mutates));
    assert_eq!(fs::read_to_string(&path).unwrap(), "status: To try\n");
}

#[test]
fn test_unlistable_status_folder_is_reported_not_hidden() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    seed(&root, "to-try/a.yaml", "status: To try\n");
    seed(&root, "tried/b.yaml", "status: Tried\n");

    let spy = SpyFs::failing_read_dir(&root.join("tried"));
    let store = RecordStore::with_fs(recipes(&root), &spy);
    let listing = store.list(None).unwrap();

    let ids: Vec<_> = listing.records.iter().map(|r| r.id()).collect();
    assert_eq!(ids, vec!["a"]);
    assert_eq!(listing.skipped.len(), 1);
    assert_eq!(listing.skipped[0].0, root.join("tried"));
    assert!(listing.skipped[0].1.contains("listing denied"), "{}", listing.skipped[0].1);

    let violations = store.check_invariants().unwrap();
    assert!(violations.iter().any(|v| {
        v.kind == ViolationKind::Unreadable && v.location == root.join("tried")
    }));
}

#[test]
fn test_unlistable_root_fails_check() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    seed(&root, "to-try/a.yaml", "status: To try\n");

    let spy = SpyFs::failing_read_dir(&root);
    let store = RecordStore::with_fs(recipes(&root), &spy);
    let err = store.list(None).unwrap_err();
    assert!(matches!(
        err,
        ExocortexError::IoFailure {
            step: IoStep::Read,
            ..
        }
    ));
    assert!(store.check_invariants().is_err());
}

#[test]
fn test_dev_tags_scenario() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    let path = seed(
        &root,
        "to-try/a.yaml",
        "status: To try\ntags:\n- Dev\n- 'dev '\n- ''\n- Dev\n",
    );

    let change = RecordStore::new(recipes(&root))
        .set_tags(&path, &["Dev", "dev ", "", "Dev"])
        .unwrap();

    assert_eq!(change.tags, vec!["Dev", "dev"]);
    assert_eq!(change.location, path);
    let stored: Vec<_> = read_yaml(&path)
        .get("tags")
        .and_then(Value::as_sequence)
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();
    assert_eq!(stored, vec!["Dev", "dev"]);
}

#[test]
fn test_normalized_tags_cover_every_distinct_input() {
    let inputs = [
        vec!["a", "b", "a", " b ", "\t", "C", "c"],
        vec!["", "  ", ""],
        vec!["x"; 5],
        vec!["  spaced out  ", "spaced out", "Spaced Out"],
    ];
    for input in inputs {
        let out = normalize_tags(&input);
        let mut seen = std::collections::HashSet::new();
        for tag in &out {
            assert!(!tag.trim().is_empty());
            assert_eq!(tag, tag.trim());
            assert!(seen.insert(tag.clone()), "duplicate {:?} in {:?}", tag, out);
        }
        for raw in &input {
            let t = raw.trim();
            if !t.is_empty() {
                assert_eq!(out.iter().filter(|o| *o == t).count(), 1);
            }
        }
    }
}

#[test]
fn test_tags_never_relocate_and_keep_status() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    let path = seed(&root, "to-try/a.yaml", "status: To try\nname: A\n");

    let spy = SpyFs::default();
    let change = RecordStore::with_fs(recipes(&root), &spy)
        .set_tags(&path, &["breakfast"])
        .unwrap();

    assert_eq!(change.location, path);
    let mutating: Vec<_> = spy.ops().into_iter().filter(FsOp::mutates).collect();
    assert_eq!(mutating, vec![FsOp::Write(path.clone())]);
    assert_eq!(
        read_yaml(&path).get("status").and_then(Value::as_str),
        Some("To try")
    );
}

#[test]
fn test_empty_record_file_is_treated_as_empty_mapping() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    let path = seed(&root, "inbox/blank.yaml", "");

    let change = RecordStore::new(recipes(&root))
        .set_status(&path, "To try")
        .unwrap();
    let data = read_yaml(&change.location);
    assert_eq!(data.len(), 1);
    assert_eq!(data.get("status").and_then(Value::as_str), Some("To try"));
}

#[test]
fn test_malformed_record_is_left_untouched() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    let body = "status: [To try\nname: broken\n";
    let path = seed(&root, "to-try/bad.yaml", body);

    let spy = SpyFs::default();
    let store = RecordStore::with_fs(recipes(&root), &spy);
    let err = store.set_status(&path, "Tried").unwrap_err();
    assert!(matches!(err, ExocortexError::MalformedRecord { .. }));
    let err = store.set_tags(&path, &["x"]).unwrap_err();
    assert!(matches!(err, ExocortexError::MalformedRecord { .. }));

    assert!(!spy.ops().iter().any(FsOp::mutates));
    assert_eq!(fs::read_to_string(&path).unwrap(), body);
    assert!(!root.join("tried").exists());
}

#[test]
fn test_root_is_rederived_on_every_call() {
    let tmp = tempdir().unwrap();
    let base = tmp.path().canonicalize().unwrap();
    let root = base.join("recipes");
    let store = RecordStore::new(recipes(&root));

    // Root did not exist when the store was built.
    let path = seed(&root, "to-try/a.yaml", "status: To try\n");
    let change = store.set_status(&path, "Tried").unwrap();
    assert_eq!(change.location, root.join("tried/a.yaml"));
}

#[test]
fn test_list_filters_by_status_folder_and_skips_broken_files() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    seed(&root, "to-try/b.yaml", "status: To try\n");
    seed(&root, "to-try/a.yml", "status: To try\n");
    seed(&root, "to-try/notes.txt", "not a record");
    seed(&root, "tried/c.yaml", "status: Tried\n");
    seed(&root, "tried/broken.yaml", "- just\n- a list\n");
    seed(&root, ".exocortex/hidden.yaml", "status: x\n");

    let store = RecordStore::new(recipes(&root));
    let all = store.list(None).unwrap();
    let ids: Vec<_> = all.records.iter().map(|r| r.id()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert_eq!(all.skipped.len(), 1);
    assert!(all.skipped[0].0.ends_with("tried/broken.yaml"));

    let to_try = store.list(Some("To Try")).unwrap();
    assert_eq!(to_try.records.len(), 2);

    let missing = RecordStore::new(recipes(&root.join("nope"))).list(None).unwrap();
    assert!(missing.records.is_empty());
}

#[test]
fn test_broker_audits_each_attempt() {
    let tmp = tempdir().unwrap();
    let base = tmp.path().canonicalize().unwrap();
    let root = base.join("recipes");
    let path = seed(&root, "to-try/a.yaml", "status: To try\n");
    let log = base.join("state/records.events.jsonl");

    let store = RecordStore::new(recipes(&root)).with_broker(MutationBroker::new(&log, "tester"));
    store.set_status(&path, "Tried").unwrap();
    store
        .set_status(&base.join("elsewhere.yaml"), "Tried")
        .unwrap_err();

    let events = MutationBroker::new(&log, "tester").read_events().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].op, "records.set_status");
    assert_eq!(events[0].status, "success");
    assert_eq!(events[0].record_id.as_deref(), Some("a"));
    assert_eq!(events[0].collection, "recipes");
    assert!(events[0].to.as_deref().unwrap().ends_with("tried/a.yaml"));
    assert_eq!(events[0].content_hash.as_ref().map(String::len), Some(64));
    assert_eq!(events[1].status, "error");
    assert!(events[1].error.as_deref().unwrap().starts_with("path_escape"));
}
