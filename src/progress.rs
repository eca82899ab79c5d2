//! Index build progress reporting.
//!
//! Building an index embeds every chunk of the corpus, which can take a
//! while against a local model server. Progress goes to **stderr** so
//! stdout stays clean for answers and scripts.

use std::io::Write;

/// A single progress event during an index build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexProgressEvent {
    /// Walking the corpus. Total unknown.
    Scanning { location: String },
    /// `n` of `total` chunks embedded.
    Embedding { n: u64, total: u64 },
    /// Index written to disk.
    Persisted { documents: u64, chunks: u64 },
}

pub trait IndexProgressReporter: Send + Sync {
    fn report(&self, event: IndexProgressEvent);
}

/// Human-friendly lines: "index  embedding  1,024 / 2,048 chunks".
pub struct StderrProgress;

impl IndexProgressReporter for StderrProgress {
    fn report(&self, event: IndexProgressEvent) {
        let line = match &event {
            IndexProgressEvent::Scanning { location } => {
                format!("index  scanning {}...\n", location)
            }
            IndexProgressEvent::Embedding { n, total } => format!(
                "index  embedding  {} / {} chunks\n",
                format_number(*n),
                format_number(*total)
            ),
            IndexProgressEvent::Persisted { documents, chunks } => format!(
                "index  saved  {} documents, {} chunks\n",
                format_number(*documents),
                format_number(*chunks)
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// One JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn to_json(event: &IndexProgressEvent) -> serde_json::Value {
        match event {
            IndexProgressEvent::Scanning { location } => serde_json::json!({
                "event": "progress",
                "phase": "scanning",
                "location": location
            }),
            IndexProgressEvent::Embedding { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "n": n,
                "total": total
            }),
            IndexProgressEvent::Persisted { documents, chunks } => serde_json::json!({
                "event": "progress",
                "phase": "persisted",
                "documents": documents,
                "chunks": chunks
            }),
        }
    }
}

impl IndexProgressReporter for JsonProgress {
    fn report(&self, event: IndexProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::to_json(&event)) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

pub struct NoProgress;

impl IndexProgressReporter for NoProgress {
    fn report(&self, _event: IndexProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut out = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Selected with `--progress`.
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

    pub fn reporter(&self) -> Box<dyn IndexProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
