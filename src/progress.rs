//! Enrichment progress reporting.
//!
//! Progress is emitted on **stderr** so stdout remains parseable for
//! scripts. The pipeline reports once at start, after every checkpointed
//! chunk, and once when the run ends.

use serde::Serialize;
use std::io::Write;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum EnrichProgressEvent {
    Started { total: usize, done: usize, resumed: bool },
    Checkpoint { done: usize, total: usize, failed: usize },
    Finished { processed: usize, enriched: usize, failed: usize },
}

/// Receives progress events from the enrichment pipeline.
pub trait EnrichProgressReporter: Send + Sync {
    fn report(&self, event: EnrichProgressEvent);
}

/// Human-friendly progress on stderr.
pub struct StderrProgress;

impl EnrichProgressReporter for StderrProgress {
    fn report(&self, event: EnrichProgressEvent) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", render_human(&event));
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl EnrichProgressReporter for JsonProgress {
    fn report(&self, event: EnrichProgressEvent) {
        if let Ok(line) = render_json(&event) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl EnrichProgressReporter for NoProgress {
    fn report(&self, _event: EnrichProgressEvent) {}
}

fn render_human(event: &EnrichProgressEvent) -> String {
    match event {
        EnrichProgressEvent::Started {
            total,
            done,
            resumed,
        } => format!(
            "enrich  {}  {} / {} repos",
            if *resumed { "resuming" } else { "starting" },
            format_number(*done),
            format_number(*total)
        ),
        EnrichProgressEvent::Checkpoint {
            done,
            total,
            failed,
        } => format!(
            "enrich  {:>3}%  {} / {} repos, {} failed",
            percent(*done, *total),
            format_number(*done),
            format_number(*total),
            failed
        ),
        EnrichProgressEvent::Finished {
            processed,
            enriched,
            failed,
        } => format!(
            "enrich  done  {} processed, {} enriched, {} failed",
            format_number(*processed),
            format_number(*enriched),
            failed
        ),
    }
}

fn render_json(event: &EnrichProgressEvent) -> serde_json::Result<String> {
    let mut value = serde_json::to_value(event)?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("event".into(), "enrich".into());
    }
    serde_json::to_string(&value)
}

fn percent(done: usize, total: usize) -> usize {
    if total == 0 {
        100
    } else {
        done * 100 / total
    }
}

fn format_number(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn EnrichProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_get_thousands_separators() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn checkpoint_line_shows_percent() {
        let line = render_human(&EnrichProgressEvent::Checkpoint {
            done: 600,
            total: 1200,
            failed: 2,
        });
        assert_eq!(line, "enrich   50%  600 / 1,200 repos, 2 failed");
    }

    #[test]
    fn json_lines_are_tagged() {
        let line = render_json(&EnrichProgressEvent::Started {
            total: 10,
            done: 4,
            resumed: true,
        })
        .unwrap();
        let v: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["event"], "enrich");
        assert_eq!(v["phase"], "started");
        assert_eq!(v["done"], 4);
        assert_eq!(v["resumed"], true);
    }
}
