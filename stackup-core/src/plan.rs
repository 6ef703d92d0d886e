//! Plan files: the TOML description of a deployment.
//!
//! ```toml
//! [plan]
//! name = "microservices"
//! namespace = "microservices"
//!
//! [[steps]]
//! name = "postgres"
//! apply = ["manifests/postgres.yaml"]
//! ready = { kind = "deployment", name = "postgres", for = "condition=Available", timeout_secs = 120 }
//! ```
//!
//! Relative paths resolve against the directory holding the plan file.

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cluster::is_deployment_kind;
use crate::error::{
    DuplicateStepSnafu, EmptyPlanSnafu, EmptyStepSnafu, InvalidReadinessSnafu, ParsePlanSnafu,
    PlanError, ReadPlanSnafu, TimeoutTooLongSnafu, UnnamedStepSnafu, ZeroTimeoutSnafu,
};
use crate::readiness::{ReadinessCheck, ResourceQuery, Target, WaitFor};
use crate::step::{CommandSpec, DeploymentStep, ResourceRef};

const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 600;
/// One week; anything longer is a typo, and keeps deadline arithmetic in range.
pub const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// A loaded, validated plan.
#[derive(Debug, Clone)]
pub struct Plan {
    pub name: String,
    pub namespace: Option<String>,
    pub poll_interval: Duration,
    pub default_timeout: Duration,
    /// Bound for commands without their own `timeout_secs`.
    pub command_timeout: Duration,
    pub preflight: Preflight,
    pub steps: Vec<DeploymentStep>,
}

/// Host binaries the plan expects, checked before a real run.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Preflight {
    #[serde(default)]
    pub required_bins: BTreeMap<String, BinarySpec>,
    #[serde(default)]
    pub optional_bins: BTreeMap<String, BinarySpec>,
}

impl Preflight {
    pub fn is_empty(&self) -> bool {
        self.required_bins.is_empty() && self.optional_bins.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BinarySpec {
    /// A semver requirement such as `>=1.25.0`.
    pub version: String,
    /// Lower sorts first in reports.
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub install_hint: Option<String>,
    /// Arguments that make the binary print its version.
    #[serde(default)]
    pub version_args: Option<Vec<String>>,
    /// Binaries that satisfy this one when it is missing (`docker` -> `podman`).
    #[serde(default)]
    pub alternatives: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlanFile {
    plan: PlanSection,
    #[serde(default)]
    preflight: Preflight,
    #[serde(default)]
    steps: Vec<StepFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlanSection {
    name: String,
    namespace: Option<String>,
    #[serde(default = "default_poll_interval_secs")]
    poll_interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    default_timeout_secs: u64,
    #[serde(default = "default_command_timeout_secs")]
    command_timeout_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_command_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StepFile {
    name: String,
    #[serde(default = "default_true")]
    required: bool,
    namespace: Option<String>,
    #[serde(default)]
    run: Vec<CommandFile>,
    #[serde(default)]
    apply: Vec<ResourceFile>,
    ready: Option<ReadyFile>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResourceFile {
    Location(String),
    Inline { inline: String },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CommandFile {
    program: String,
    #[serde(default)]
    args: Vec<String>,
    cwd: Option<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReadyFile {
    url: Option<String>,
    status: Option<u16>,
    kind: Option<String>,
    api_version: Option<String>,
    namespace: Option<String>,
    name: Option<String>,
    selector: Option<String>,
    #[serde(rename = "for")]
    wait_for: Option<String>,
    timeout_secs: Option<u64>,
}

impl Plan {
    /// Read, parse and validate a plan file.
    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let text = std::fs::read_to_string(path).context(ReadPlanSnafu { path })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&path.display().to_string(), &text, base_dir)
    }

    /// Parse plan text; relative paths resolve against `base_dir`.
    pub fn parse(origin: &str, text: &str, base_dir: &Path) -> Result<Self, PlanError> {
        let file: PlanFile = toml::from_str(text).context(ParsePlanSnafu { origin })?;
        let section = file.plan;

        ensure!(!file.steps.is_empty(), EmptyPlanSnafu { plan: &section.name });
        let default_timeout = checked_secs("[plan]", section.default_timeout_secs)?;
        let command_timeout = checked_secs("[plan]", section.command_timeout_secs)?;
        let poll_interval = checked_secs("[plan]", section.poll_interval_secs)?;

        let defaults = Defaults {
            namespace: section.namespace.as_deref(),
            timeout: default_timeout,
            command_timeout,
            base_dir,
        };

        let mut seen = HashSet::new();
        let mut steps = Vec::with_capacity(file.steps.len());
        for (position, raw) in file.steps.into_iter().enumerate() {
            ensure!(!raw.name.trim().is_empty(), UnnamedStepSnafu { position: position + 1 });
            ensure!(seen.insert(raw.name.clone()), DuplicateStepSnafu { name: &raw.name });
            steps.push(build_step(raw, &defaults)?);
        }

        Ok(Self {
            name: section.name,
            namespace: section.namespace,
            poll_interval,
            default_timeout,
            command_timeout,
            preflight: file.preflight,
            steps,
        })
    }
}

struct Defaults<'a> {
    namespace: Option<&'a str>,
    timeout: Duration,
    command_timeout: Duration,
    base_dir: &'a Path,
}

impl Defaults<'_> {
    fn resolve_path(&self, location: &str) -> PathBuf {
        let expanded = shellexpand::tilde(location);
        let path = Path::new(expanded.as_ref());
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    fn resource(&self, raw: ResourceFile) -> ResourceRef {
        match raw {
            ResourceFile::Inline { inline } => ResourceRef::Inline(inline),
            ResourceFile::Location(location)
                if location.starts_with("http://") || location.starts_with("https://") =>
            {
                ResourceRef::Url(location)
            }
            ResourceFile::Location(location) => {
                let path = self.resolve_path(&location);
                if path.is_dir() {
                    ResourceRef::Directory(path)
                } else {
                    ResourceRef::File(path)
                }
            }
        }
    }
}

fn checked_secs(step: &str, secs: u64) -> Result<Duration, PlanError> {
    ensure!(secs > 0, ZeroTimeoutSnafu { step });
    ensure!(
        secs <= MAX_TIMEOUT_SECS,
        TimeoutTooLongSnafu {
            step,
            max_secs: MAX_TIMEOUT_SECS,
        }
    );
    Ok(Duration::from_secs(secs))
}

fn timeout_for(step: &str, secs: Option<u64>) -> Result<Option<Duration>, PlanError> {
    secs.map(|secs| checked_secs(step, secs)).transpose()
}

fn build_step(raw: StepFile, defaults: &Defaults<'_>) -> Result<DeploymentStep, PlanError> {
    let name = raw.name;
    ensure!(
        !raw.run.is_empty() || !raw.apply.is_empty(),
        EmptyStepSnafu { step: &name }
    );
    let namespace = raw
        .namespace
        .or_else(|| defaults.namespace.map(str::to_string));

    let mut commands = Vec::with_capacity(raw.run.len());
    for cmd in raw.run {
        commands.push(CommandSpec {
            program: cmd.program,
            args: cmd.args,
            cwd: cmd.cwd.map(|cwd| defaults.resolve_path(&cwd)),
            env: cmd.env,
            timeout: Some(timeout_for(&name, cmd.timeout_secs)?.unwrap_or(defaults.command_timeout)),
        });
    }

    let resources = raw
        .apply
        .into_iter()
        .map(|r| defaults.resource(r))
        .collect();

    let readiness = match raw.ready {
        Some(ready) => Some(build_readiness(&name, ready, namespace.as_deref(), defaults)?),
        None => None,
    };

    Ok(DeploymentStep {
        name,
        commands,
        resources,
        readiness,
        required: raw.required,
        namespace,
    })
}

fn build_readiness(
    step: &str,
    ready: ReadyFile,
    step_namespace: Option<&str>,
    defaults: &Defaults<'_>,
) -> Result<ReadinessCheck, PlanError> {
    let invalid = |reason: &str| {
        InvalidReadinessSnafu {
            step,
            reason: reason.to_string(),
        }
        .fail()
    };
    let timeout = timeout_for(step, ready.timeout_secs)?.unwrap_or(defaults.timeout);

    if let Some(url) = ready.url {
        if ready.kind.is_some() || ready.name.is_some() || ready.selector.is_some() {
            return invalid("a readiness check takes either `url` or `kind`, not both");
        }
        if ready.wait_for.is_some() {
            return invalid("`for` only applies to resource checks");
        }
        return Ok(ReadinessCheck::Http {
            url,
            expect_status: ready.status,
            timeout,
        });
    }

    let Some(kind) = ready.kind else {
        return invalid("a readiness check needs `url` or `kind`");
    };
    if ready.status.is_some() {
        return invalid("`status` only applies to `url` checks");
    }
    let target = match (ready.name, ready.selector) {
        (Some(name), None) => Target::Name(name),
        (None, Some(selector)) => Target::Selector(selector),
        _ => return invalid("a resource check needs exactly one of `name` or `selector`"),
    };
    let wait_for = match ready.wait_for {
        Some(expr) => match expr.parse::<WaitFor>() {
            Ok(wait_for) => wait_for,
            Err(e) => return invalid(&e.to_string()),
        },
        None if is_deployment_kind(&kind) => WaitFor::condition("Available"),
        None => WaitFor::Exists,
    };

    Ok(ReadinessCheck::Resource {
        query: ResourceQuery {
            kind,
            api_version: ready.api_version,
            namespace: ready.namespace.or_else(|| step_namespace.map(str::to_string)),
            target,
        },
        wait_for,
        timeout,
    })
}
