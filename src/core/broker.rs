use crate::core::error::ExocortexError;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only audit trail for record mutations.
///
/// Every mutation attempt, successful or not, becomes one JSON line. The log
/// sits outside the record folders so listings never see it.
pub struct MutationBroker {
    audit_log_path: PathBuf,
    actor: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MutationEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub op: String,
    pub collection: String,
    pub record_id: Option<String>,
    pub from: String,
    pub to: Option<String>,
    pub status: String,
    pub content_hash: Option<String>,
    pub error: Option<String>,
}

/// What a finished mutation looked like, as seen by the broker.
#[derive(Debug, Clone, Default)]
pub struct MutationTrace {
    pub record_id: Option<String>,
    pub to: Option<PathBuf>,
    pub content_hash: Option<String>,
}

impl MutationBroker {
    pub fn new(audit_log_path: &Path, actor: &str) -> Self {
        Self {
            audit_log_path: audit_log_path.to_path_buf(),
            actor: actor.to_string(),
        }
    }

    /// Run a mutation and record its outcome.
    ///
    /// The mutation result is returned untouched. A failure to append the
    /// event is reported on stderr; it never turns a completed mutation into
    /// an error.
    pub fn with_mutation<F, R>(
        &self,
        op: &str,
        collection: &str,
        from: &Path,
        trace: impl Fn(&R) -> MutationTrace,
        f: F,
    ) -> Result<R, ExocortexError>
    where
        F: FnOnce() -> Result<R, ExocortexError>,
    {
        let result = f();

        let event = match &result {
            Ok(value) => {
                let t = trace(value);
                self.event(op, collection, from, "success", t, None)
            }
            Err(e) => self.event(op, collection, from, "error", MutationTrace::default(), Some(e)),
        };

        if let Err(e) = self.append(&event) {
            use colored::Colorize;
            eprintln!(
                "{} audit log append failed ({}): {}",
                "⚠".bright_yellow(),
                self.audit_log_path.display(),
                e
            );
        }

        result
    }

    fn event(
        &self,
        op: &str,
        collection: &str,
        from: &Path,
        status: &str,
        trace: MutationTrace,
        error: Option<&ExocortexError>,
    ) -> MutationEvent {
        MutationEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            actor: self.actor.clone(),
            op: op.to_string(),
            collection: collection.to_string(),
            record_id: trace.record_id,
            from: from.to_string_lossy().to_string(),
            to: trace.to.map(|p| p.to_string_lossy().to_string()),
            status: status.to_string(),
            content_hash: trace.content_hash,
            error: error.map(|e| format!("{}: {}", e.kind(), e)),
        }
    }

    fn append(&self, event: &MutationEvent) -> Result<(), ExocortexError> {
        if let Some(parent) = self.audit_log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(event)
            .map_err(|e| ExocortexError::ValidationError(format!("audit event encode: {}", e)))?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)?;
        writeln!(f, "{}", line)?;
        Ok(())
    }

    /// Read back every event, skipping lines that do not parse.
    pub fn read_events(&self) -> Result<Vec<MutationEvent>, ExocortexError> {
        if !self.audit_log_path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.audit_log_path)?;
        Ok(content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}
