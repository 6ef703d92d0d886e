//! Human-readable preflight output.

use super::prereq::{BinaryCheck, PrereqResult};
use crate::detection::Backend;

fn print_required(bin: &BinaryCheck) {
    let status = if bin.found && bin.meets_requirement {
        "✅"
    } else if bin.found {
        "⚠️"
    } else {
        "❌"
    };

    print!("  {status} {} ", bin.name);
    match &bin.installed_version {
        Some(installed) if bin.meets_requirement => println!("(installed: {installed}, OK)"),
        Some(installed) => println!(
            "(installed: {installed}, requires: {}) ⚠️",
            bin.required_version
        ),
        None => {
            println!("(not installed) - requires: {}", bin.required_version);
            if let Some(hint) = &bin.install_hint {
                println!("      💡 {hint}");
            }
        }
    }
}

fn print_optional(bin: &BinaryCheck) {
    let status = if bin.found && bin.meets_requirement {
        "✅"
    } else {
        "  "
    };

    print!("  {status} {} ", bin.name);
    match (&bin.installed_version, &bin.install_hint) {
        (Some(installed), _) => println!("({installed})"),
        (None, Some(hint)) => println!("- {hint}"),
        (None, None) => println!("(not installed)"),
    }
}

/// Print prerequisite results to stdout
pub fn print_preflight_report(result: &PrereqResult) {
    if !result.required.is_empty() {
        println!("📦 Required Binaries:");
        for bin in &result.required {
            print_required(bin);
        }
    }

    if !result.optional.is_empty() {
        println!();
        println!("🔧 Optional Binaries:");
        for bin in &result.optional {
            print_optional(bin);
        }
    }

    if result.required.is_empty() && result.optional.is_empty() {
        println!("  (plan declares no prerequisites)");
    }

    println!();
    if result.all_required_met {
        println!("✅ All required prerequisites met!");
    } else {
        println!("⚠️  Some required prerequisites are missing");
    }
}

/// Print which backends could serve a real run
pub fn print_backends(backends: &[(Backend, bool)]) {
    println!("☸️  Cluster Backends:");
    for (backend, available) in backends {
        let status = if *available { "✅" } else { "❌" };
        println!("  {status} {backend}");
    }
}
