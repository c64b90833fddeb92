//! Step progress reporting.
//!
//! Reports which external tool is running and how long each step took, so a
//! multi-hour reconstruction does not look hung. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;
use std::time::Duration;

/// A single progress event for a pipeline run.
#[derive(Clone, Debug, PartialEq)]
pub enum StepEvent {
    /// Step `index` of `total` is about to launch.
    Started {
        step: String,
        index: usize,
        total: usize,
    },
    /// Step finished with a zero exit status.
    Finished { step: String, elapsed: Duration },
    /// Step failed; the pipeline stops here.
    Failed { step: String, elapsed: Duration },
}

/// Reports step progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter {
    fn report(&self, event: StepEvent);
}

/// Human-friendly progress on stderr: "[2/4] feature matching ...".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: StepEvent) {
        let line = match &event {
            StepEvent::Started { step, index, total } => {
                format!("[{}/{}] {} ...\n", index, total, step)
            }
            StepEvent::Finished { step, elapsed } => {
                format!("      done {} in {}\n", step, format_elapsed(*elapsed))
            }
            StepEvent::Failed { step, elapsed } => {
                format!("      FAILED {} after {}\n", step, format_elapsed(*elapsed))
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: StepEvent) {
        if let Ok(line) = serde_json::to_string(&event_json(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

fn event_json(event: &StepEvent) -> serde_json::Value {
    match event {
        StepEvent::Started { step, index, total } => serde_json::json!({
            "event": "step",
            "step": step,
            "status": "started",
            "index": index,
            "total": total
        }),
        StepEvent::Finished { step, elapsed } => serde_json::json!({
            "event": "step",
            "step": step,
            "status": "finished",
            "elapsed_ms": elapsed.as_millis() as u64
        }),
        StepEvent::Failed { step, elapsed } => serde_json::json!({
            "event": "step",
            "step": step,
            "status": "failed",
            "elapsed_ms": elapsed.as_millis() as u64
        }),
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: StepEvent) {}
}

/// "4.2s", "3m 07s", "1h 02m 05s".
pub fn format_elapsed(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        return format!("{:.1}s", d.as_secs_f64());
    }
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else {
        format!("{}m {:02}s", m, s)
    }
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
