use anyhow::Result;
use std::path::PathBuf;

use super::deploy::{load_plan, plan_path, run_preflight};
use crate::config::load_config;
use crate::detection::list_available_backends;
use crate::preflight::{print_backends, print_preflight_report};

/// Check prerequisites and report which backends are usable
pub async fn check_only(plan_arg: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let path = plan_path(plan_arg, &config);
    let plan = load_plan(&path)?;

    println!("📋 Checking prerequisites for {}...", plan.name);
    println!();
    let prereqs = run_preflight(&plan).await?;
    print_preflight_report(&prereqs);

    println!();
    print_backends(&list_available_backends().await);

    if !prereqs.all_required_met {
        let missing: Vec<_> = prereqs
            .missing_required()
            .iter()
            .map(|b| b.name.clone())
            .collect();
        anyhow::bail!("Missing required binaries: {}", missing.join(", "));
    }
    Ok(())
}
