//! Post-run summary and Gantt-style timeline rendering (`spec.md` §4.2
//! "Observability"). Grounded in the teacher's `FlowAnalytics`/`ExecutionStep`
//! bookkeeping: a per-step duration/status list, plus an aggregate ratio of
//! serial work to actual wall-clock time.

use std::time::Duration;

use flowctl_core::model::{StepRecord, StepStatus};

/// An ordered, one-line-per-step summary: name, status, duration.
pub fn render_summary(steps: &[StepRecord]) -> String {
    let mut out = String::new();
    for step in steps {
        let duration = (step.finished_at - step.started_at).to_std().unwrap_or_default();
        out.push_str(&format!(
            "{:<28} {:<10} {:>8.3}s\n",
            step.name,
            status_label(step.status),
            duration.as_secs_f64(),
        ));
    }
    out
}

fn status_label(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Succeeded => "succeeded",
        StepStatus::Failed => "failed",
        StepStatus::Skipped => "skipped",
        StepStatus::Cancelled => "cancelled",
    }
}

const GANTT_WIDTH: usize = 40;

/// Renders an ASCII Gantt chart scaled to `wall_clock`, followed by the
/// speedup ratio `Σ(step durations) / wall-clock` (`spec.md` §4.2).
pub fn render_timeline(steps: &[StepRecord], wall_clock: Duration) -> String {
    if steps.is_empty() || wall_clock.is_zero() {
        return "(no steps executed)\n".to_string();
    }

    let origin = steps.iter().map(|s| s.started_at).min().expect("non-empty");
    let mut out = String::new();
    let mut total_step_duration = Duration::ZERO;

    for step in steps {
        let offset = (step.started_at - origin).to_std().unwrap_or_default();
        let duration = (step.finished_at - step.started_at).to_std().unwrap_or_default();
        total_step_duration += duration;

        let start_cell = scale(offset, wall_clock).min(GANTT_WIDTH.saturating_sub(1));
        let span_cells = scale(duration, wall_clock).max(1).min(GANTT_WIDTH - start_cell);
        let bar = format!("{}{}", " ".repeat(start_cell), "#".repeat(span_cells));

        out.push_str(&format!("{:<28} |{:<width$}|\n", step.name, bar, width = GANTT_WIDTH));
    }

    let wall_secs = wall_clock.as_secs_f64();
    let speedup = if wall_secs > 0.0 {
        total_step_duration.as_secs_f64() / wall_secs
    } else {
        1.0
    };

    out.push_str(&format!(
        "\nwall-clock: {:.3}s  sum(step durations): {:.3}s  speedup: {:.2}x\n",
        wall_secs,
        total_step_duration.as_secs_f64(),
        speedup,
    ));

    out
}

fn scale(value: Duration, total: Duration) -> usize {
    if total.is_zero() {
        return 0;
    }
    ((value.as_secs_f64() / total.as_secs_f64()) * GANTT_WIDTH as f64).round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(name: &str, offset_ms: i64, duration_ms: i64, status: StepStatus) -> StepRecord {
        let base = Utc::now();
        StepRecord {
            name: name.to_string(),
            status,
            output: String::new(),
            started_at: base + chrono::Duration::milliseconds(offset_ms),
            finished_at: base + chrono::Duration::milliseconds(offset_ms + duration_ms),
            error: None,
            provider_used: None,
            model_used: None,
            tool_loop_iterations: 0,
        }
    }

    #[test]
    fn summary_lists_every_step_with_its_status() {
        let steps = vec![
            record("a", 0, 100, StepStatus::Succeeded),
            record("b", 100, 50, StepStatus::Failed),
        ];
        let summary = render_summary(&steps);
        assert!(summary.contains("a") && summary.contains("succeeded"));
        assert!(summary.contains("b") && summary.contains("failed"));
    }

    #[test]
    fn timeline_reports_a_speedup_above_one_for_overlapping_steps() {
        let steps = vec![
            record("a", 0, 100, StepStatus::Succeeded),
            record("b", 0, 100, StepStatus::Succeeded),
        ];
        let timeline = render_timeline(&steps, Duration::from_millis(100));
        assert!(timeline.contains("speedup: 2.00x"));
    }

    #[test]
    fn empty_run_does_not_panic() {
        assert_eq!(render_timeline(&[], Duration::ZERO), "(no steps executed)\n");
    }
}
