//! Output formatting for the `swap` and `validate` commands.
//!
//! Human-readable status lines on stdout by default; `--json` prints one
//! serialized [`WorkflowEvent`] per line instead.

use crate::upload::{FileInfo, ValidationOutcome};
use crate::workflow::{Notice, WorkflowEvent};

const BAR_WIDTH: usize = 20;

/// Render one event as a human-readable line. `None` for events not
/// worth showing.
pub fn event_line(event: &WorkflowEvent) -> Option<String> {
    match event {
        WorkflowEvent::SlotUpdated { slot, file } => Some(format!("{slot}: {}", describe_file(file))),
        WorkflowEvent::SlotCleared { slot } => Some(format!("{slot}: cleared")),
        WorkflowEvent::Cleared => Some("cleared".to_string()),
        WorkflowEvent::RunStarted { run } => Some(format!("{run}: processing")),
        WorkflowEvent::Progress { percent, .. } => Some(progress_bar(*percent)),
        WorkflowEvent::Completed { artifact, .. } => Some(format!("result: {}", artifact.id)),
        WorkflowEvent::ResultDismissed | WorkflowEvent::NoticeCleared => None,
        WorkflowEvent::Notice { notice } => Some(notice_line(notice)),
    }
}

/// Print one event in the chosen format.
pub fn print_event(event: &WorkflowEvent, json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    } else if let Some(line) = event_line(event) {
        println!("{line}");
    }
    Ok(())
}

/// Print the outcome of `validate` for one file.
pub fn print_validation(path: &str, file: &FileInfo, outcome: ValidationOutcome) {
    match outcome {
        ValidationOutcome::Accepted => {
            println!("{path}: accepted ({})", describe_file(file));
        }
        ValidationOutcome::Rejected(reason) => {
            println!("{path}: rejected, {reason} ({})", describe_file(file));
        }
    }
}

fn notice_line(notice: &Notice) -> String {
    match notice {
        Notice::Error(m) => format!("error: {m}"),
        Notice::Success(m) => format!("ok: {m}"),
    }
}

fn describe_file(file: &FileInfo) -> String {
    format!("{} ({}, {})", file.name, format_size(file.size), file.media_type)
}

/// `[##########..........]  50%`
fn progress_bar(percent: u8) -> String {
    let percent = percent.min(100);
    let filled = usize::from(percent) * BAR_WIDTH / 100;
    format!(
        "[{}{}] {:>3}%",
        "#".repeat(filled),
        ".".repeat(BAR_WIDTH - filled),
        percent
    )
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
