//! Human-readable progress and result formatting.
//!
//! # Output Format
//!
//! ## Search progress
//!
//! ```text
//!     probe q95: 41.2 KB (source 58.0 KB)
//!     #1 q67: SSIM 0.999874 rejected, 21.7 KB
//!     #2 q81: SSIM 0.999931 accepted, 28.3 KB
//!     #3 q74: encode failed: ...
//! ```
//!
//! ## Outcome
//!
//! ```text
//! photo.jpg
//!     Recompressed: quality 81, SSIM 0.999931
//!     Size: 58.0 KB -> 28.3 KB (51.2% smaller)
//!     Subsampling: 4:2:0, 6 attempts
//! ```
//!
//! # Architecture
//!
//! Each view has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::outcome::{Outcome, OutcomeStatus};
use crate::search::SearchEvent;

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Binary-prefixed size with one decimal above a kilobyte.
///
/// ```text
/// 512      -> 512 B
/// 1536     -> 1.5 KB
/// 3145728  -> 3.0 MB
/// ```
pub fn format_size(bytes: usize) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{bytes} B")
    } else if b < MB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{:.1} MB", b / MB)
    }
}

// ============================================================================
// Search progress
// ============================================================================

/// Format a single search progress event as display lines.
pub fn format_search_event(event: &SearchEvent) -> Vec<String> {
    let line = match event {
        SearchEvent::Probe {
            quality,
            size,
            source_size,
        } => format!(
            "probe q{}: {} (source {})",
            quality,
            format_size(*size),
            format_size(*source_size)
        ),
        SearchEvent::Scored {
            attempt,
            quality,
            size,
            similarity,
            accepted,
        } => format!(
            "#{} q{}: SSIM {:.6} {}, {}",
            attempt,
            quality,
            similarity,
            if *accepted { "accepted" } else { "rejected" },
            format_size(*size)
        ),
        SearchEvent::Rejected {
            attempt,
            quality,
            reason,
        } => format!("#{attempt} q{quality}: {reason}"),
    };
    vec![format!("{}{}", indent(1), line)]
}

// ============================================================================
// Outcome
// ============================================================================

/// Format a session outcome, headed by `label` (usually the file name).
pub fn format_outcome(label: &str, outcome: &Outcome) -> Vec<String> {
    let mut lines = vec![label.to_string()];
    let pad = indent(1);

    match outcome.status {
        OutcomeStatus::Recompressed => {
            let target = if outcome.met_target {
                ""
            } else {
                " (below target, best candidate)"
            };
            lines.push(format!(
                "{pad}Recompressed: quality {}, SSIM {}{target}",
                display_quality(outcome),
                display_similarity(outcome)
            ));
            if let Some(size) = outcome.output_size() {
                let savings = outcome.savings_percent().unwrap_or(0.0);
                lines.push(format!(
                    "{pad}Size: {} -> {} ({:.1}% smaller)",
                    format_size(outcome.source_size),
                    format_size(size),
                    savings
                ));
            }
            lines.push(format!(
                "{pad}Subsampling: {}, {} attempts",
                outcome
                    .subsampling
                    .map(|s| s.as_str())
                    .unwrap_or("grayscale"),
                outcome.attempts
            ));
        }
        OutcomeStatus::KeptOriginal(reason) => {
            lines.push(format!("{pad}Kept original: {}", reason.as_str()));
            lines.push(format!("{pad}Size: {}", format_size(outcome.source_size)));
        }
        OutcomeStatus::TargetUnreachable => {
            lines.push(format!(
                "{pad}Target unreachable: best quality {}, SSIM {}",
                display_quality(outcome),
                display_similarity(outcome)
            ));
        }
        OutcomeStatus::Failed => {
            let (kind, message) = match &outcome.failure {
                Some(failure) => (failure.kind.as_str(), failure.message.as_str()),
                None => ("unknown", ""),
            };
            lines.push(format!("{pad}Failed ({kind}): {message}"));
        }
    }
    lines
}

fn display_quality(outcome: &Outcome) -> String {
    outcome
        .quality
        .map(|q| q.to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn display_similarity(outcome: &Outcome) -> String {
    outcome
        .similarity
        .map(|s| format!("{s:.6}"))
        .unwrap_or_else(|| "-".to_string())
}

pub fn print_search_event(event: &SearchEvent) {
    for line in format_search_event(event) {
        println!("{}", line);
    }
}

pub fn print_outcome(label: &str, outcome: &Outcome) {
    for line in format_outcome(label, outcome) {
        println!("{}", line);
    }
}
