//! CLI output formatting

use crate::{
    core::{ExecutionStatus, Pipeline, StageState},
    execution::ExecutionEvent,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static BROOM: Emoji<'_, '_> = Emoji("🧹 ", "- ");

/// Create a progress bar over pipeline stages
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a stage state for display
pub fn format_stage_state(state: &StageState) -> String {
    match state {
        StageState::Pending => style("PENDING").dim().to_string(),
        StageState::Running { .. } => style("RUNNING").yellow().to_string(),
        StageState::Succeeded { .. } => style("SUCCEEDED").green().to_string(),
        StageState::Failed { .. } => style("FAILED").red().to_string(),
        StageState::Skipped { .. } => style("SKIPPED").dim().to_string(),
    }
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name,
        } => format!(
            "{} Starting pipeline {} ({})",
            ROCKET,
            style(pipeline_name).bold(),
            style(&execution_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::StageStarted { stage } => {
            format!("{} Stage {}", SPINNER, style(stage).cyan())
        }
        ExecutionEvent::StageSucceeded { stage } => {
            format!("{} Stage {}", CHECK, style(stage).green())
        }
        ExecutionEvent::StageFailed { stage, error } => {
            format!("{} Stage {}: {}", CROSS, style(stage).red(), style(error).dim())
        }
        ExecutionEvent::StageSkipped { stage, reason } => {
            format!(
                "{} Stage {} skipped ({})",
                WARN,
                style(stage).dim(),
                style(reason).dim()
            )
        }
        ExecutionEvent::StepStarted { stage, step } => {
            format!("{}   {}/{}", SPINNER, style(stage).dim(), style(step).cyan())
        }
        ExecutionEvent::StepOutput { stage, step, output } => {
            format!(
                "{} Output from {}/{}:\n{}",
                INFO,
                style(stage).dim(),
                style(step).dim(),
                output
            )
        }
        ExecutionEvent::StepSkipped { stage, step } => {
            format!(
                "{}   {}/{} (condition not met)",
                INFO,
                style(stage).dim(),
                style(step).dim()
            )
        }
        ExecutionEvent::StepFailed { stage, step, error } => {
            format!(
                "{}   {}/{}: {}",
                CROSS,
                style(stage).dim(),
                style(step).red(),
                style(error).dim()
            )
        }
        ExecutionEvent::TeardownStepFailed { stage, step, error } => {
            format!(
                "{} Teardown {}/{} failed: {}",
                BROOM,
                style(stage).dim(),
                style(step).yellow(),
                style(error).dim()
            )
        }
        ExecutionEvent::PipelineCompleted {
            execution_id,
            status,
        } => {
            let status_str = match status {
                ExecutionStatus::Succeeded => {
                    format!("completed {}", style("successfully").green())
                }
                ExecutionStatus::Failed => style("failed").red().to_string(),
                ExecutionStatus::Cancelled => style("cancelled").yellow().to_string(),
                _ => format!("{:?}", status),
            };
            format!(
                "{} Pipeline ({}) {}",
                INFO,
                style(&execution_id.to_string()[..8]).dim(),
                status_str
            )
        }
    }
}

/// Print the per-stage summary table after a run
pub fn print_run_summary(pipeline: &Pipeline) {
    println!("\n{}", style("Stages:").bold());
    for name in pipeline.execution_order() {
        let Some(stage) = pipeline.stage(name) else {
            continue;
        };
        println!("  {} - {}", style(name).bold(), format_stage_state(&stage.state));
        match &stage.state {
            StageState::Failed { error, stderr, .. } => {
                println!("      {}", style(error).red());
                for line in stderr.lines().take(5) {
                    println!("      {}", style(line).dim());
                }
            }
            StageState::Skipped { reason } => {
                println!("      {}", style(reason).dim());
            }
            StageState::Succeeded { outputs, .. } if !outputs.is_empty() => {
                for (key, value) in outputs {
                    println!("      {} = {}", style(key).cyan(), style(value).dim());
                }
            }
            _ => {}
        }
    }
}

/// Format step output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}

/// Human-readable duration
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
