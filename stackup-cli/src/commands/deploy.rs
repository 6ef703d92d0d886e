//! The deploy command: preflight, connect, sequence, report.

use anyhow::{Context, Result};
use stackup_core::{Plan, Sequencer, SequencerOptions};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::config::{StackupConfig, load_config};
use crate::detection;
use crate::preflight::{PrereqResult, check_prerequisites, print_preflight_report};
use crate::report::{print_run_report, write_report};

/// Resolve the plan path from the command line or the config.
pub(crate) fn plan_path(arg: Option<PathBuf>, config: &StackupConfig) -> PathBuf {
    arg.unwrap_or_else(|| {
        PathBuf::from(shellexpand::tilde(&config.plan.to_string_lossy()).as_ref())
    })
}

pub(crate) fn load_plan(path: &Path) -> Result<Plan> {
    if !path.exists() {
        anyhow::bail!(
            "Plan not found: {}\nPass a plan file or set `plan` in the stackup config",
            path.display()
        );
    }
    Plan::load(path).with_context(|| format!("Invalid plan {}", path.display()))
}

pub(crate) async fn run_preflight(plan: &Plan) -> Result<PrereqResult> {
    let preflight = plan.preflight.clone();
    tokio::task::spawn_blocking(move || check_prerequisites(&preflight))
        .await
        .context("Preflight check panicked")
}

pub async fn run_deploy(plan_arg: Option<PathBuf>, dry_run: bool) -> Result<()> {
    let config = load_config()?;
    let path = plan_path(plan_arg, &config);
    let plan = load_plan(&path)?;

    println!(
        "🥾 stackup {} - {} step(s){}",
        plan.name,
        plan.steps.len(),
        if dry_run { " (dry run)" } else { "" }
    );

    if !dry_run && !plan.preflight.is_empty() {
        println!();
        println!("📋 Checking prerequisites...");
        let prereqs = run_preflight(&plan).await?;
        if !prereqs.all_required_met {
            print_preflight_report(&prereqs);
            anyhow::bail!("⚠️  Required prerequisites missing, nothing was deployed");
        }
        for missing in prereqs.missing_optional() {
            warn!(binary = %missing.name, "optional prerequisite missing");
        }
        println!("✅ Prerequisites met");
    }

    let cluster = detection::connect(&config, dry_run).await?;
    let options = SequencerOptions {
        dry_run,
        poll_interval: plan.poll_interval,
        http_timeout: config.http_timeout(),
        command_timeout: plan.command_timeout,
    };
    let total_steps = plan.steps.len();
    let mut sequencer = Sequencer::new(cluster, plan.steps, options).with_label(plan.name);

    println!();
    println!("🚀 Deploying...");
    let result = sequencer.run().await;
    let report = match &result {
        Ok(report) => report,
        Err(e) => e.report(),
    };

    print_run_report(report, total_steps);
    if !dry_run {
        // The run's own outcome decides the exit status, not the report file
        match write_report(report, &config.report_dir()) {
            Ok(written) => {
                println!();
                println!("📄 Report written to: {}", written.display());
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "run report not written");
                println!();
                println!("⚠️  Report not written: {e:#}");
            }
        }
    }

    result.map(|_| ()).map_err(anyhow::Error::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_path_prefers_argument() {
        let config = StackupConfig::default();
        assert_eq!(
            plan_path(Some(PathBuf::from("other.toml")), &config),
            PathBuf::from("other.toml")
        );
        assert_eq!(plan_path(None, &config), PathBuf::from("stackup.toml"));
    }

    #[test]
    fn test_missing_plan_is_an_error() {
        let err = load_plan(Path::new("/nonexistent/stackup.toml")).unwrap_err();
        assert!(err.to_string().contains("Plan not found"));
    }
}
