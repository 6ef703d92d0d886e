//! Host binary checks run before a deployment.
//!
//! A plan's `[preflight]` table names the binaries it needs (`kubectl`,
//! `minikube`, `docker`) with semver requirements.

use anyhow::{Context, Result};
use semver::{Version, VersionReq};
use stackup_core::{BinarySpec, Preflight};
use std::path::{Path, PathBuf};

/// Result of prerequisite check for a single binary
#[derive(Debug, Clone)]
pub struct BinaryCheck {
    pub name: String,
    pub found: bool,
    pub installed_version: Option<String>,
    pub required_version: String,
    pub meets_requirement: bool,
    pub path: Option<PathBuf>,
    pub install_hint: Option<String>,
    priority: u8,
}

/// Overall prerequisite check result
#[derive(Debug, Default)]
pub struct PrereqResult {
    pub required: Vec<BinaryCheck>,
    pub optional: Vec<BinaryCheck>,
    pub all_required_met: bool,
}

impl PrereqResult {
    pub fn missing_required(&self) -> Vec<&BinaryCheck> {
        self.required
            .iter()
            .filter(|b| !b.found || !b.meets_requirement)
            .collect()
    }

    pub fn missing_optional(&self) -> Vec<&BinaryCheck> {
        self.optional
            .iter()
            .filter(|b| !b.found || !b.meets_requirement)
            .collect()
    }
}

/// Locate `name` on `PATH`; names containing a slash are taken as paths.
fn find_binary(name: &str) -> Option<PathBuf> {
    which::which(shellexpand::tilde(name).as_ref()).ok()
}

/// Arguments that make a well-known binary print its version.
fn default_version_args(name: &str) -> Vec<String> {
    let args: &[&str] = match name {
        "kubectl" => &["version", "--client"],
        "minikube" | "helm" => &["version"],
        _ => &["--version"],
    };
    args.iter().map(ToString::to_string).collect()
}

/// Run the binary's version command and pull a semver out of its output
fn get_version(path: &Path, args: &[String]) -> Option<String> {
    let output = duct::cmd(path, args)
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .run()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    // Some tools print their version on stderr
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    extract_version(&text)
}

/// Extract semantic version from version output
/// Handles various formats:
///   "Client Version: v1.30.2" -> "1.30.2"
///   "minikube version: v1.33.1" -> "1.33.1"
///   "Docker version 26.1.4, build 5650f9b" -> "26.1.4"
fn extract_version(output: &str) -> Option<String> {
    let re = regex::Regex::new(r"v?(\d+\.\d+\.\d+)").ok()?;
    re.captures(output)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
}

/// Check if installed version satisfies a requirement such as `>=1.25.0`
fn version_meets_requirement(installed: &str, requirement: &str) -> Result<bool> {
    let installed_ver = Version::parse(installed.trim())
        .with_context(|| format!("Failed to parse installed version: {installed}"))?;
    let req = VersionReq::parse(requirement.trim())
        .with_context(|| format!("Failed to parse required version: {requirement}"))?;
    Ok(req.matches(&installed_ver))
}

/// Check a single binary against its requirement
fn check_binary(name: &str, spec: &BinarySpec) -> BinaryCheck {
    let mut display_name = name.to_string();
    let mut version_args = spec
        .version_args
        .clone()
        .unwrap_or_else(|| default_version_args(name));
    let mut using_alternative = false;

    let mut path = find_binary(name);
    if path.is_none() {
        // First alternative on PATH stands in (docker -> podman)
        if let Some((alt, alt_path)) = spec
            .alternatives
            .iter()
            .find_map(|alt| find_binary(alt).map(|p| (alt, p)))
        {
            display_name = format!("{alt} ({name} alternative)");
            version_args = default_version_args(alt);
            using_alternative = true;
            path = Some(alt_path);
        }
    }

    let (installed_version, meets_requirement) = match &path {
        Some(found) => match get_version(found, &version_args) {
            Some(version) => {
                // Alternatives version independently; being present is enough
                let meets = using_alternative
                    || version_meets_requirement(&version, &spec.version).unwrap_or(false);
                (Some(version), meets)
            }
            // Found but version unknown - assume OK
            None => (Some("unknown".to_string()), true),
        },
        None => (None, false),
    };

    BinaryCheck {
        name: display_name,
        found: path.is_some(),
        installed_version,
        required_version: spec.version.clone(),
        meets_requirement,
        path,
        install_hint: spec.install_hint.clone(),
        priority: spec.priority,
    }
}

fn check_all<'a>(bins: impl IntoIterator<Item = (&'a String, &'a BinarySpec)>) -> Vec<BinaryCheck> {
    let mut checks: Vec<BinaryCheck> = bins
        .into_iter()
        .map(|(name, spec)| check_binary(name, spec))
        .collect();
    // Lower number = higher priority; names break ties
    checks.sort_by(|a, b| (a.priority, &a.name).cmp(&(b.priority, &b.name)));
    checks
}

/// Check every binary a plan declares.
pub fn check_prerequisites(preflight: &Preflight) -> PrereqResult {
    let required = check_all(&preflight.required_bins);
    let optional = check_all(&preflight.optional_bins);
    let all_required_met = required
        .iter()
        .all(|check| check.found && check.meets_requirement);

    PrereqResult {
        required,
        optional,
        all_required_met,
    }
}
