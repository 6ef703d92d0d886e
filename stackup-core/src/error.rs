//! Error types for stackup-core.
//!
//! Every fallible layer has its own `snafu` enum so callers can tell a broken
//! plan file from an unreachable cluster from a step that never became ready.

use snafu::Snafu;
use std::path::PathBuf;
use std::time::Duration;

use crate::sequencer::RunReport;

/// Errors raised while loading or validating a plan file.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PlanError {
    #[snafu(display("failed to read plan {}: {source}", path.display()))]
    ReadPlan {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to parse plan {origin}: {source}"))]
    ParsePlan {
        origin: String,
        source: toml::de::Error,
    },

    #[snafu(display("plan '{plan}' has no steps"))]
    EmptyPlan { plan: String },

    #[snafu(display("step #{position} has an empty name"))]
    UnnamedStep { position: usize },

    #[snafu(display("step name '{name}' is used more than once"))]
    DuplicateStep { name: String },

    #[snafu(display("step '{step}' has nothing to do: give it `run` commands or `apply` resources"))]
    EmptyStep { step: String },

    #[snafu(display("step '{step}': {reason}"))]
    InvalidReadiness { step: String, reason: String },

    #[snafu(display("step '{step}': timeouts must be greater than zero"))]
    ZeroTimeout { step: String },

    #[snafu(display("step '{step}': timeouts may not exceed {max_secs}s"))]
    TimeoutTooLong { step: String, max_secs: u64 },
}

/// Errors raised while reading manifests into objects.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ManifestError {
    #[snafu(display("failed to read manifest {}: {source}", path.display()))]
    ReadManifest {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to fetch manifest {url}: {source}"))]
    FetchManifest { url: String, source: reqwest::Error },

    #[snafu(display("failed to parse manifest {origin}: {source}"))]
    ParseManifest {
        origin: String,
        source: serde_yaml::Error,
    },

    #[snafu(display("object in {origin} is missing `{field}`"))]
    MissingField {
        origin: String,
        field: &'static str,
    },
}

/// Errors raised by a cluster backend.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ClusterError {
    #[snafu(display("failed to connect to the cluster: {source}"))]
    Connect { source: kube::Error },

    #[snafu(display("failed to load kubeconfig context: {source}"))]
    Kubeconfig {
        source: kube::config::KubeconfigError,
    },

    #[snafu(display("{source}"))]
    Manifest { source: ManifestError },

    #[snafu(display("unknown resource kind '{kind}'"))]
    UnknownKind { kind: String },

    #[snafu(display("{operation} failed: {source}"))]
    Api {
        operation: String,
        source: kube::Error,
    },

    #[snafu(display("`{command}` failed ({}): {stderr}", code.map_or_else(|| "signal".to_string(), |c| format!("exit {c}"))))]
    Kubectl {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[snafu(display("failed to run `{command}`: {source}"))]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("`{command}` returned malformed JSON: {source}"))]
    Decode {
        command: String,
        source: serde_json::Error,
    },

    #[snafu(display("failed to encode object: {source}"))]
    Encode { source: serde_json::Error },

    #[snafu(display("background task failed: {source}"))]
    ClusterJoin { source: tokio::task::JoinError },
}

/// Errors raised by opaque external commands.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CommandError {
    #[snafu(display("failed to start `{command}`: {source}"))]
    Start {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("`{command}` {}", code.map_or_else(|| "was killed by a signal".to_string(), |c| format!("exited with status {c}"))))]
    Exit { command: String, code: Option<i32> },

    #[snafu(display("`{command}` did not finish within {}s and was killed", timeout.as_secs()))]
    TimedOut { command: String, timeout: Duration },

    #[snafu(display("command task failed: {source}"))]
    CommandJoin { source: tokio::task::JoinError },
}

/// Why a single step failed.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StepError {
    #[snafu(display("{source}"))]
    Command { source: CommandError },

    #[snafu(display("failed to apply {resource}: {source}"))]
    Apply {
        resource: String,
        source: ClusterError,
    },

    #[snafu(display(
        "{target} was not ready within {}s{}",
        timeout.as_secs(),
        last_error.as_deref().map(|e| format!(" (last probe: {e})")).unwrap_or_default()
    ))]
    NotReady {
        target: String,
        timeout: Duration,
        last_error: Option<String>,
    },
}

/// A run that stopped early.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SequenceError {
    #[snafu(display("required step '{step}' (#{}) failed: {source}", position + 1))]
    RequiredStepFailed {
        step: String,
        position: usize,
        source: StepError,
        /// Everything that happened up to and including the failing step.
        report: Box<RunReport>,
    },
}

impl SequenceError {
    /// The partial report of the aborted run.
    pub fn report(&self) -> &RunReport {
        match self {
            SequenceError::RequiredStepFailed { report, .. } => report,
        }
    }
}
