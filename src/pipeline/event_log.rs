// src/pipeline/event_log.rs
//
// JSONL sink: one record per applied crossing, then a closing summary.

use crate::counting::CountSnapshot;
use crate::pipeline::metrics::MetricsSummary;
use crate::types::CrossingDecision;
use anyhow::{Context, Result};
use serde_json::json;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

pub struct EventLog {
    path: PathBuf,
    writer: BufWriter<File>,
    records: u64,
}

impl EventLog {
    /// Opens `path` for appending, creating parent directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open event log {}", path.display()))?;

        info!("📄 Event log: {}", path.display());
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            records: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn write_crossing(&mut self, decision: &CrossingDecision, counts: &CountSnapshot) -> Result<()> {
        let record = json!({
            "type": "crossing",
            "logged_at": chrono::Utc::now().to_rfc3339(),
            "track_id": decision.track_id,
            "line": decision.line_name,
            "direction": decision.direction,
            "timestamp_ms": decision.timestamp_ms,
            "frame_seq": decision.frame_seq,
            "entries": counts.entries,
            "exits": counts.exits,
            "net": counts.net,
        });
        self.write_record(&record)
    }

    pub fn write_summary(&mut self, counts: &CountSnapshot, metrics: &MetricsSummary) -> Result<()> {
        let record = json!({
            "type": "summary",
            "logged_at": chrono::Utc::now().to_rfc3339(),
            "counts": counts,
            "metrics": metrics,
        });
        self.write_record(&record)?;
        self.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))
    }

    fn write_record(&mut self, record: &serde_json::Value) -> Result<()> {
        writeln!(self.writer, "{}", record)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        self.records += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::metrics::PipelineMetrics;
    use crate::types::Direction;
    use serde_json::Value;

    #[test]
    fn test_writes_crossings_then_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("events.jsonl");
        let mut log = EventLog::open(&path).unwrap();

        let decision = CrossingDecision {
            track_id: 4,
            line: 0,
            line_name: "door".to_string(),
            direction: Direction::Exiting,
            timestamp_ms: 1234.0,
            frame_seq: 19,
        };
        let counts = CountSnapshot {
            exits: 1,
            net: -1,
            ..CountSnapshot::default()
        };
        log.write_crossing(&decision, &counts).unwrap();
        log.write_summary(&counts, &PipelineMetrics::new().summary())
            .unwrap();
        assert_eq!(log.records(), 2);

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "crossing");
        assert_eq!(lines[0]["direction"], "exiting");
        assert_eq!(lines[0]["track_id"], 4);
        assert_eq!(lines[0]["net"], -1);
        assert_eq!(lines[1]["type"], "summary");
        assert_eq!(lines[1]["counts"]["exits"], 1);
    }
}
