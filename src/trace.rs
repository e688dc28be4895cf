//! Session trace recorder — timestamped record of everything crossing the
//! daemon's boundaries, dumpable as JSON lines for offline tuning.
//!
//! Bounded: past the cap the oldest entries fall off, so a long session
//! cannot grow without limit.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Which boundary a traced payload crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceDirection {
    /// Message received from the gaze source.
    UpstreamIn,
    /// Command sent to the gaze source.
    UpstreamOut,
    /// Event broadcast to UI clients.
    UiOut,
}

impl TraceDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpstreamIn => "upstream_in",
            Self::UpstreamOut => "upstream_out",
            Self::UiOut => "ui_out",
        }
    }
}

/// One traced message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub t_ms: f64,
    pub dir: TraceDirection,
    pub payload: String,
}

/// In-memory recorder with a bounded entry count.
pub struct TraceRecorder {
    entries: VecDeque<TraceEntry>,
    capacity: usize,
    /// Entries discarded because the buffer was full.
    pub dropped: u64,
}

impl TraceRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            dropped: 0,
        }
    }

    pub fn record(&mut self, t_ms: f64, dir: TraceDirection, payload: &str) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(TraceEntry {
            t_ms,
            dir,
            payload: payload.to_string(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &TraceEntry> {
        self.entries.iter()
    }

    /// Serialize all entries as JSON lines.
    pub fn write_jsonl<W: Write>(&self, mut out: W) -> io::Result<()> {
        for entry in &self.entries {
            let line = serde_json::to_string(entry).expect("trace entry always serializes");
            writeln!(out, "{}", line)?;
        }
        Ok(())
    }

    /// Dump the trace to a file (called at shutdown).
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write_jsonl(&mut writer)?;
        writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_iterate() {
        let mut rec = TraceRecorder::new(16);
        rec.record(1.0, TraceDirection::UpstreamIn, r#"{"type":"gaze"}"#);
        rec.record(2.0, TraceDirection::UiOut, r#"{"type":"activate"}"#);
        assert_eq!(rec.len(), 2);
        let dirs: Vec<_> = rec.entries().map(|e| e.dir).collect();
        assert_eq!(
            dirs,
            vec![TraceDirection::UpstreamIn, TraceDirection::UiOut]
        );
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut rec = TraceRecorder::new(3);
        for i in 0..5 {
            rec.record(i as f64, TraceDirection::UiOut, "x");
        }
        assert_eq!(rec.len(), 3);
        assert_eq!(rec.dropped, 2);
        assert_eq!(rec.entries().next().unwrap().t_ms, 2.0);
    }

    #[test]
    fn test_jsonl_output_parses_back() {
        let mut rec = TraceRecorder::new(8);
        rec.record(10.5, TraceDirection::UpstreamOut, r#"{"type":"start_tracking"}"#);
        rec.record(11.0, TraceDirection::UpstreamIn, r#"{"type":"gaze","x":1,"y":2}"#);

        let mut buf = Vec::new();
        rec.write_jsonl(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: TraceEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.dir, TraceDirection::UpstreamOut);
        assert!((first.t_ms - 10.5).abs() < 1e-9);
    }
}
