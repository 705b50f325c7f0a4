//! Markdown report rendering and emission.
//!
//! Rendering reads only the aggregate state carried by a [`Checkpoint`], so a
//! report rendered twice from the same checkpoint is byte-identical.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::checkpoint::{Checkpoint, CheckpointStatus, write_atomically};
use crate::constants::report::REPORT_TITLE;
use crate::errors::AuditError;
use crate::metrics::reason_breakdown;

/// Render the full report for `checkpoint`.
pub fn render_report(checkpoint: &Checkpoint) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_report(&mut out, checkpoint);
    out
}

fn write_report(out: &mut String, checkpoint: &Checkpoint) -> std::fmt::Result {
    let totals = &checkpoint.totals;
    let scope = &checkpoint.scope;

    writeln!(out, "# {REPORT_TITLE}")?;
    writeln!(out)?;
    if checkpoint.status == CheckpointStatus::InProgress {
        writeln!(
            out,
            "> **Partial results.** The scan has not reached the end of the collection; \
             rerun without `--finalize-only` to continue after the last key."
        )?;
        writeln!(out)?;
    }
    writeln!(out, "- Collection: `{}`", escape_cell(&scope.collection))?;
    writeln!(
        out,
        "- Time range (`{}`): {} to {}",
        escape_cell(&scope.time_field),
        fmt_bound(scope.start_date, "beginning"),
        fmt_bound(scope.end_date, "end")
    )?;
    writeln!(
        out,
        "- Scan status: {}",
        match checkpoint.status {
            CheckpointStatus::InProgress => "in progress",
            CheckpointStatus::Complete => "complete",
        }
    )?;
    writeln!(
        out,
        "- Last key: {}",
        checkpoint
            .last_key
            .as_deref()
            .map(|key| format!("`{}`", escape_cell(key)))
            .unwrap_or_else(|| "none".to_string())
    )?;
    writeln!(out, "- Batches completed: {}", checkpoint.batches_completed)?;
    writeln!(out)?;

    writeln!(out, "## Summary")?;
    writeln!(out)?;
    writeln!(out, "| Metric | Rows |")?;
    writeln!(out, "| --- | ---: |")?;
    writeln!(out, "| Scanned | {} |", totals.scanned)?;
    writeln!(out, "| Classified | {} |", totals.classified)?;
    writeln!(out, "| Consistent | {} |", totals.consistent)?;
    writeln!(out, "| Violations | {} |", totals.violations)?;
    writeln!(out, "| Excluded (undeterminable) | {} |", totals.excluded)?;
    writeln!(out)?;

    writeln!(out, "## Violations by reason")?;
    writeln!(out)?;
    let breakdown = reason_breakdown(&checkpoint.reasons);
    if breakdown.is_empty() {
        writeln!(out, "No violations found.")?;
    } else {
        writeln!(
            out,
            "| Reason | Description | Occurrences | Distinct entities | Share |"
        )?;
        writeln!(out, "| --- | --- | ---: | ---: | ---: |")?;
        for row in &breakdown {
            writeln!(
                out,
                "| `{}` | {} | {} | {} | {:.1}% |",
                row.reason.code(),
                row.reason.description(),
                row.count,
                row.distinct_entities,
                row.share * 100.0
            )?;
        }
    }
    writeln!(out)?;

    writeln!(out, "## Excluded rows")?;
    writeln!(out)?;
    if checkpoint.excluded.is_empty() {
        writeln!(out, "No rows were excluded.")?;
    } else {
        writeln!(out, "| Cause | Rows |")?;
        writeln!(out, "| --- | ---: |")?;
        for (cause, count) in &checkpoint.excluded {
            writeln!(out, "| `{}` | {} |", cause.code(), count)?;
        }
    }
    writeln!(out)?;

    writeln!(out, "## Sample violations")?;
    writeln!(out)?;
    if checkpoint.samples.is_empty() {
        writeln!(out, "No samples recorded.")?;
        return Ok(());
    }
    writeln!(
        out,
        "Showing {} of {} violations.",
        checkpoint.samples.len(),
        totals.violations
    )?;
    for row in &breakdown {
        writeln!(out)?;
        writeln!(
            out,
            "### `{}` ({})",
            row.reason.code(),
            row.reason.description()
        )?;
        writeln!(out)?;
        let mut samples = checkpoint
            .samples
            .iter()
            .filter(|record| record.reason == row.reason)
            .peekable();
        if samples.peek().is_none() {
            writeln!(out, "No samples recorded for this reason.")?;
            continue;
        }
        writeln!(
            out,
            "| Document | Repository | Item | Expected body | Linked bodies |"
        )?;
        writeln!(out, "| --- | --- | --- | --- | --- |")?;
        for record in samples {
            writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                escape_cell(&record.document_key),
                escape_cell(&record.repository),
                escape_cell(&record.item),
                record
                    .expected_body
                    .as_deref()
                    .map(escape_cell)
                    .unwrap_or_else(|| "-".to_string()),
                if record.linked_bodies.is_empty() {
                    "-".to_string()
                } else {
                    escape_cell(&record.linked_bodies.join(", "))
                }
            )?;
        }
    }
    Ok(())
}

fn fmt_bound(bound: Option<DateTime<Utc>>, open: &str) -> String {
    match bound {
        Some(ts) => ts.format("%Y-%m-%d").to_string(),
        None => open.to_string(),
    }
}

/// Make arbitrary text safe inside a Markdown table cell.
fn escape_cell(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('|', "\\|")
        .replace("\r\n", " ")
        .replace(['\n', '\r'], " ")
}

/// Writes rendered reports to a fixed location.
#[derive(Clone, Debug)]
pub struct ReportEmitter {
    path: PathBuf,
}

impl ReportEmitter {
    /// Emit reports to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Report file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Render `checkpoint` and atomically replace the report file.
    pub fn emit(&self, checkpoint: &Checkpoint) -> Result<PathBuf, AuditError> {
        let rendered = render_report(checkpoint);
        write_atomically(&self.path, rendered.as_bytes()).map_err(|err| {
            AuditError::Report(format!("failed writing {}: {err}", self.path.display()))
        })?;
        info!(
            "[crossref:report] wrote {} ({} violations, {} samples)",
            self.path.display(),
            checkpoint.totals.violations,
            checkpoint.samples.len()
        );
        Ok(self.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregator;
    use crate::checkpoint::ScanScope;
    use crate::detector::{Classification, ExclusionCause, MismatchRecord, ReasonCode};
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn checkpoint(status: CheckpointStatus) -> Checkpoint {
        let mut agg = Aggregator::new(10);
        agg.observe(Classification::Consistent);
        agg.observe(Classification::Violation(MismatchRecord {
            document_key: "D2".into(),
            repository: "R1".into(),
            item: "I|2".into(),
            reason: ReasonCode::LinkedEntityMismatch,
            expected_body: Some("bodyA".into()),
            linked_bodies: vec!["bodyB".into(), "line\nbreak".into()],
        }));
        agg.observe(Classification::Undeterminable(ExclusionCause::NoLinkingData));
        agg.complete_batch(Some(&"D3".to_string()));
        agg.snapshot(
            ScanScope {
                collection: "documents".into(),
                time_field: "createdAt".into(),
                start_date: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
                end_date: None,
            },
            status,
        )
    }

    #[test]
    fn sections_appear_in_order() {
        let text = render_report(&checkpoint(CheckpointStatus::Complete));
        let positions: Vec<usize> = [
            "# Cross-reference audit",
            "## Summary",
            "## Violations by reason",
            "## Excluded rows",
            "## Sample violations",
        ]
        .iter()
        .map(|heading| text.find(heading).expect(heading))
        .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(text.contains("| Classified | 2 |"));
        assert!(text.contains("| `linked_entity_mismatch` | linked-entity mismatch | 1 | 1 | 100.0% |"));
        assert!(text.contains("| `no_linking_data` | 1 |"));
        assert!(text.contains("2024-01-01 to end"));
        assert!(text.contains("| D2 | R1 | I\\|2 | bodyA | bodyB, line break |"));
        assert!(!text.contains("Partial results"));
    }

    #[test]
    fn cells_are_escaped() {
        let text = render_report(&checkpoint(CheckpointStatus::Complete));
        assert!(text.contains("I\\|2"));
        assert!(text.contains("bodyB, line break"));
    }

    #[test]
    fn samples_are_grouped_per_reason() {
        let mut agg = Aggregator::new(1);
        for key in ["D1", "D2"] {
            agg.observe(Classification::Violation(MismatchRecord {
                document_key: key.into(),
                repository: "R9".into(),
                item: "I1".into(),
                reason: ReasonCode::DanglingRepository,
                expected_body: None,
                linked_bodies: Vec::new(),
            }));
        }
        agg.observe(Classification::Violation(MismatchRecord {
            document_key: "D3".into(),
            repository: "R1".into(),
            item: "I2".into(),
            reason: ReasonCode::LinkedEntityMismatch,
            expected_body: Some("bodyA".into()),
            linked_bodies: vec!["bodyB".into()],
        }));
        agg.complete_batch(Some(&"D3".to_string()));
        let text = render_report(&agg.snapshot(
            ScanScope {
                collection: "documents".into(),
                time_field: "createdAt".into(),
                start_date: None,
                end_date: None,
            },
            CheckpointStatus::Complete,
        ));

        let dangling = text
            .find("### `dangling_repository` (repository reference not found)")
            .expect("dangling heading");
        let mismatch = text
            .find("### `linked_entity_mismatch` (linked-entity mismatch)")
            .expect("mismatch heading");
        assert!(dangling < mismatch);
        assert!(text.contains("Showing 1 of 3 violations."));
        assert!(text[dangling..mismatch].contains("| D1 | R9 | I1 | - | - |"));
        assert!(text[mismatch..].contains("No samples recorded for this reason."));
    }

    #[test]
    fn partial_scan_is_labelled() {
        let text = render_report(&checkpoint(CheckpointStatus::InProgress));
        assert!(text.contains("Partial results"));
        assert!(text.contains("- Scan status: in progress"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let state = checkpoint(CheckpointStatus::Complete);
        assert_eq!(render_report(&state), render_report(&state.clone()));
    }

    #[test]
    fn emitter_writes_report_file() {
        let dir = tempdir().unwrap();
        let emitter = ReportEmitter::new(dir.path().join("reports").join("audit.md"));
        let path = emitter.emit(&checkpoint(CheckpointStatus::Complete)).unwrap();
        let written = std::fs::read_to_string(path).unwrap();
        assert_eq!(written, render_report(&checkpoint(CheckpointStatus::Complete)));
    }
}
