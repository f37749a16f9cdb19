// src/cli/progress.rs — Terminal progress renderer for real-time run feedback

use crate::core::types::ProgressEvent;

/// One line of progress output for an event.
pub fn format_event(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::RunStart {
            run_id,
            max_iterations,
        } => format!("[run] {} (up to {} iteration(s))", run_id, max_iterations),
        ProgressEvent::IterationStart {
            index,
            max_iterations,
        } => format!("[iter {}/{}] simulating...", index + 1, max_iterations),
        ProgressEvent::StageRetry {
            index,
            stage,
            attempt,
            reason,
        } => format!(
            "[iter {}]   retry {} (attempt {}): {}",
            index + 1,
            stage,
            attempt,
            crate::util::truncate_str(&crate::util::single_line(reason), 120),
        ),
        ProgressEvent::IterationEnd {
            index,
            decision,
            failure,
        } => match failure {
            Some(reason) => format!("[iter {}] -> {:<10} ({})", index + 1, decision, reason),
            None => format!("[iter {}] -> {}", index + 1, decision),
        },
        ProgressEvent::Complete {
            status,
            iterations,
            targets_met,
        } => format!(
            "[done] status={} iterations={} targets_met={}",
            status, iterations, targets_met,
        ),
    }
}

/// Build a progress callback that writes formatted output to stderr.
///
/// All progress output goes to stderr so stdout remains clean for the final
/// circuit. Returns a closure suitable for `IterationController::with_progress()`.
pub fn terminal_progress() -> impl Fn(ProgressEvent) + Send + Sync + 'static {
    move |event| eprintln!("{}", format_event(&event))
}
