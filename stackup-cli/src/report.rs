//! Run reports: printed after every run, written to disk after real ones.

use anyhow::{Context, Result};
use stackup_core::{RunOutcome, RunReport, StepReport, StepStatus};
use std::fs;
use std::path::{Path, PathBuf};

/// `<dir>/<plan>-<UTC timestamp>.toml`
pub fn report_path(dir: &Path, report: &RunReport) -> PathBuf {
    let plan: String = report
        .plan
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let stamp = report.started_at.format("%Y%m%dT%H%M%SZ");
    dir.join(format!("{plan}-{stamp}.toml"))
}

/// Serialize the report as TOML into `dir`, returning the file written.
pub fn write_report(report: &RunReport, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create report directory: {}", dir.display()))?;

    let content = toml::to_string_pretty(report).context("Failed to serialize run report")?;
    let path = report_path(dir, report);
    fs::write(&path, content)
        .with_context(|| format!("Failed to write run report to {}", path.display()))?;
    Ok(path)
}

fn status_icon(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Succeeded => "✅",
        StepStatus::Warned => "⚠️ ",
        StepStatus::Failed => "❌",
        StepStatus::Planned => "📝",
    }
}

fn print_step(step: &StepReport) {
    let optional = if step.required { "" } else { " (optional)" };
    #[allow(clippy::cast_precision_loss)]
    let secs = step.elapsed_ms as f64 / 1000.0;
    println!(
        "  {} {}. {}{optional} [{secs:.1}s]",
        status_icon(step.status),
        step.position + 1,
        step.name
    );
    for object in &step.applied {
        println!("       {object}");
    }
    if let Some(error) = &step.error {
        println!("       {error}");
    }
}

/// Print a run report to stdout in human-readable format
pub fn print_run_report(report: &RunReport, total_steps: usize) {
    println!();
    println!(
        "🚀 stackup {}{}",
        report.plan,
        if report.dry_run { " (dry run)" } else { "" }
    );
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Run: {}", report.run_id);
    println!("Started: {}", report.started_at.to_rfc3339());
    println!();

    for step in &report.steps {
        print_step(step);
    }

    let skipped = total_steps.saturating_sub(report.steps.len());
    if skipped > 0 {
        println!("  ⏭️  {skipped} step(s) not attempted");
    }

    println!();
    let warnings = report.warnings().count();
    match report.outcome {
        RunOutcome::Succeeded if report.dry_run => {
            println!("✅ Dry run complete: {} step(s) planned", report.steps.len());
        }
        RunOutcome::Succeeded if warnings > 0 => {
            println!("✅ Deployment complete with {warnings} warning(s)");
        }
        RunOutcome::Succeeded => println!("✅ Deployment complete!"),
        RunOutcome::Aborted | RunOutcome::Running => {
            let failed = report.failed_step().map_or("unknown", |s| s.name.as_str());
            println!("❌ Deployment aborted at required step '{failed}'");
        }
    }
}
