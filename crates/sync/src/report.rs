//! Run report.

use serde::Serialize;
use std::fmt;
use std::io::{self, Write};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncOp {
    Upload,
    Delete,
    IndexCommit,
}

impl fmt::Display for SyncOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncOp::Upload => "upload",
            SyncOp::Delete => "delete",
            SyncOp::IndexCommit => "index-commit",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub op: SyncOp,
    pub path: String,
    pub attempts: u32,
    pub cause: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SkippedOp {
    pub op: SyncOp,
    pub path: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOutcome {
    /// The remote matches the local build.
    Converged,
    /// Some operations failed or were skipped.
    Partial,
    /// A fatal error or cancellation stopped the run.
    Aborted,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SyncReport {
    pub dry_run: bool,
    /// Planned uploads; for a dry run these are the only ones listed.
    pub planned_uploads: Vec<String>,
    pub planned_deletes: Vec<String>,
    pub uploaded: Vec<String>,
    pub deleted: Vec<String>,
    pub skipped: Vec<SkippedOp>,
    pub unchanged: usize,
    pub failures: Vec<SyncFailure>,
    pub index_committed: bool,
    pub fatal: Option<String>,
    pub cancelled: bool,
}

impl SyncReport {
    pub fn outcome(&self) -> SyncOutcome {
        if self.fatal.is_some() || self.cancelled {
            SyncOutcome::Aborted
        } else if !self.failures.is_empty() || !self.skipped.is_empty() {
            SyncOutcome::Partial
        } else {
            SyncOutcome::Converged
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome() == SyncOutcome::Converged
    }

    /// Order every list by path so reports are reproducible.
    pub(crate) fn normalize(&mut self) {
        self.uploaded.sort();
        self.deleted.sort();
        self.skipped.sort_by(|a, b| a.path.cmp(&b.path));
        self.failures.sort_by(|a, b| a.path.cmp(&b.path));
    }

    /// One line per item, then a summary line.
    pub fn write_lines<W: Write>(&self, out: &mut W) -> io::Result<()> {
        if self.dry_run {
            for path in &self.planned_uploads {
                writeln!(out, "would upload {path}")?;
            }
            for path in &self.planned_deletes {
                writeln!(out, "would delete {path}")?;
            }
        }
        for path in &self.uploaded {
            writeln!(out, "uploaded {path}")?;
        }
        for path in &self.deleted {
            writeln!(out, "deleted {path}")?;
        }
        for skipped in &self.skipped {
            writeln!(out, "skipped {} {}", skipped.op, skipped.path)?;
        }
        for failure in &self.failures {
            writeln!(out, "FAILED {} {}: {}", failure.op, failure.path, failure.cause)?;
        }
        if let Some(fatal) = &self.fatal {
            writeln!(out, "FATAL {fatal}")?;
        }
        writeln!(
            out,
            "summary: uploaded={} deleted={} unchanged={} skipped={} failed={} index={} outcome={}",
            self.uploaded.len(),
            self.deleted.len(),
            self.unchanged,
            self.skipped.len(),
            self.failures.len(),
            if self.index_committed { "committed" } else { "unchanged" },
            match self.outcome() {
                SyncOutcome::Converged => "converged",
                SyncOutcome::Partial => "partial",
                SyncOutcome::Aborted => "aborted",
            }
        )
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct Document<'a> {
            outcome: SyncOutcome,
            #[serde(flatten)]
            report: &'a SyncReport,
        }
        serde_json::to_string_pretty(&Document {
            outcome: self.outcome(),
            report: self,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome() {
        let mut report = SyncReport::default();
        assert_eq!(report.outcome(), SyncOutcome::Converged);

        report.skipped.push(SkippedOp {
            op: SyncOp::Delete,
            path: "old.html".to_string(),
        });
        assert_eq!(report.outcome(), SyncOutcome::Partial);

        report.fatal = Some("access denied".to_string());
        assert_eq!(report.outcome(), SyncOutcome::Aborted);
    }

    #[test]
    fn test_lines_are_greppable() {
        let report = SyncReport {
            uploaded: vec!["index.html".to_string()],
            deleted: vec!["old.zip".to_string()],
            unchanged: 4,
            failures: vec![SyncFailure {
                op: SyncOp::Upload,
                path: "big.zip".to_string(),
                attempts: 5,
                cause: "transient store error: 503".to_string(),
            }],
            ..Default::default()
        };
        let mut out = Vec::new();
        report.write_lines(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "uploaded index.html");
        assert_eq!(lines[1], "deleted old.zip");
        assert_eq!(lines[2], "FAILED upload big.zip: transient store error: 503");
        assert!(lines[3].ends_with("outcome=partial"));

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["outcome"], "partial");
        assert_eq!(json["failures"][0]["op"], "upload");
        assert_eq!(json["failures"][0]["attempts"], 5);
    }
}
