//! The deployment sequencer.
//!
//! Walks an ordered list of [`DeploymentStep`]s strictly one at a time:
//! commands, then resources, then the readiness poll. A required step that
//! fails aborts the run; an optional one is recorded as a warning and the
//! run moves on. Nothing is rolled back.

use chrono::{DateTime, Utc};
use serde::Serialize;
use snafu::ResultExt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cluster::Cluster;
use crate::command;
use crate::error::{ApplySnafu, CommandSnafu, NotReadySnafu, SequenceError, StepError};
use crate::readiness::{self, ReadinessCheck};
use crate::step::DeploymentStep;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SequencerOptions {
    /// Skip commands and readiness polls; applies go to whatever cluster was given.
    pub dry_run: bool,
    /// Pause between readiness probes.
    pub poll_interval: Duration,
    /// Per-request bound for HTTP readiness probes.
    pub http_timeout: Duration,
    /// Kill bound for commands that set no timeout of their own.
    pub command_timeout: Duration,
}

impl Default for SequencerOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            command_timeout: command::DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Succeeded,
    /// An optional step failed.
    Warned,
    /// A required step failed; the run stopped here.
    Failed,
    /// Dry run: the step was only planned.
    Planned,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub position: usize,
    pub name: String,
    pub required: bool,
    pub status: StepStatus,
    pub applied: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Running,
    Succeeded,
    Aborted,
}

/// What happened during one run, step by step.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub plan: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: RunOutcome,
    pub steps: Vec<StepReport>,
}

impl RunReport {
    fn start(plan: String, dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            plan,
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            outcome: RunOutcome::Running,
            steps: Vec::new(),
        }
    }

    fn finish(&mut self, outcome: RunOutcome) {
        self.outcome = outcome;
        self.finished_at = Some(Utc::now());
    }

    /// Optional steps that failed.
    pub fn warnings(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|s| s.status == StepStatus::Warned)
    }

    /// The required step that aborted the run, if any.
    pub fn failed_step(&self) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.status == StepStatus::Failed)
    }

    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }
}

pub struct Sequencer<C> {
    cluster: C,
    steps: Vec<DeploymentStep>,
    cursor: usize,
    options: SequencerOptions,
    label: String,
    http: reqwest::Client,
}

impl<C: Cluster> Sequencer<C> {
    pub fn new(cluster: C, steps: Vec<DeploymentStep>, options: SequencerOptions) -> Self {
        let http = match reqwest::Client::builder()
            .timeout(options.http_timeout)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "failed to build HTTP client, readiness requests use defaults");
                reqwest::Client::default()
            }
        };
        Self {
            cluster,
            steps,
            cursor: 0,
            options,
            label: "unnamed".to_string(),
            http,
        }
    }

    /// Name recorded in the run report.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Index of the next step to execute. Never decreases.
    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn steps(&self) -> &[DeploymentStep] {
        &self.steps
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    /// Execute every remaining step in order.
    pub async fn run(&mut self) -> Result<RunReport, SequenceError> {
        let mut report = RunReport::start(self.label.clone(), self.options.dry_run);
        info!(
            plan = %self.label,
            steps = self.steps.len() - self.cursor,
            dry_run = self.options.dry_run,
            "starting deployment"
        );

        while let Some(step) = self.steps.get(self.cursor) {
            let position = self.cursor;
            let started = Instant::now();
            info!(step = %step.name, position, required = step.required, "starting step");

            let mut applied = Vec::new();
            let result = self.execute(step, &mut applied).await;
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            let mut step_report = StepReport {
                position,
                name: step.name.clone(),
                required: step.required,
                status: StepStatus::Succeeded,
                applied,
                error: None,
                elapsed_ms,
            };

            match result {
                Ok(()) => {
                    if self.options.dry_run {
                        step_report.status = StepStatus::Planned;
                    }
                    info!(step = %step.name, elapsed_ms, "step complete");
                    report.steps.push(step_report);
                }
                Err(e) if !step.required => {
                    warn!(step = %step.name, error = %e, "optional step failed, continuing");
                    step_report.status = StepStatus::Warned;
                    step_report.error = Some(e.to_string());
                    report.steps.push(step_report);
                }
                Err(e) => {
                    error!(step = %step.name, error = %e, "required step failed, aborting");
                    step_report.status = StepStatus::Failed;
                    step_report.error = Some(e.to_string());
                    report.steps.push(step_report);
                    report.finish(RunOutcome::Aborted);

                    let step = step.name.clone();
                    self.cursor += 1;
                    return Err(SequenceError::RequiredStepFailed {
                        step,
                        position,
                        source: e,
                        report: Box::new(report),
                    });
                }
            }
            self.cursor += 1;
        }

        report.finish(RunOutcome::Succeeded);
        info!(
            plan = %self.label,
            warnings = report.warnings().count(),
            "deployment finished"
        );
        Ok(report)
    }

    async fn execute(
        &self,
        step: &DeploymentStep,
        applied: &mut Vec<String>,
    ) -> Result<(), StepError> {
        for spec in &step.commands {
            if self.options.dry_run {
                info!(step = %step.name, command = %spec, "dry run: would run command");
                continue;
            }
            if spec.timeout.is_some() {
                command::run(spec).await.context(CommandSnafu)?;
            } else {
                let bounded = spec.clone().with_timeout(self.options.command_timeout);
                command::run(&bounded).await.context(CommandSnafu)?;
            }
        }

        for resource in &step.resources {
            let objects = self
                .cluster
                .apply(resource, step.namespace.as_deref())
                .await
                .context(ApplySnafu {
                    resource: resource.to_string(),
                })?;
            applied.extend(objects);
        }

        if let Some(check) = &step.readiness {
            if self.options.dry_run {
                info!(step = %step.name, check = %check, "dry run: would wait");
            } else {
                self.wait_until_ready(check).await?;
            }
        }
        Ok(())
    }

    /// Poll `check` until it holds or its timeout elapses.
    ///
    /// Every probe is bounded by the time left, so a hung API call or
    /// endpoint cannot stretch the wait past the timeout.
    async fn wait_until_ready(&self, check: &ReadinessCheck) -> Result<(), StepError> {
        let timeout = check.timeout();
        // No deadline when the timeout runs past the clock's range
        let deadline = Instant::now().checked_add(timeout);
        let time_left =
            || deadline.map_or(Duration::MAX, |d| d.saturating_duration_since(Instant::now()));
        let mut last_error = None;
        let mut attempts = 0u32;

        info!(check = %check, timeout_secs = timeout.as_secs(), "waiting for readiness");
        loop {
            let remaining = time_left();
            if remaining.is_zero() {
                break;
            }
            attempts += 1;
            match tokio::time::timeout(remaining, self.probe(check)).await {
                Ok(Ok(true)) => {
                    info!(check = %check, attempts, "ready");
                    return Ok(());
                }
                Ok(Ok(false)) => debug!(check = %check, attempts, "not ready yet"),
                Ok(Err(e)) => {
                    debug!(check = %check, attempts, error = %e, "probe failed");
                    last_error = Some(e);
                }
                Err(_) => {
                    last_error = Some("probe still pending at the deadline".to_string());
                    break;
                }
            }

            let remaining = time_left();
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(self.options.poll_interval.min(remaining)).await;
        }

        NotReadySnafu {
            target: check.to_string(),
            timeout,
            last_error,
        }
        .fail()
    }

    async fn probe(&self, check: &ReadinessCheck) -> Result<bool, String> {
        match check {
            ReadinessCheck::Resource {
                query, wait_for, ..
            } => {
                let objects = self.cluster.fetch(query).await.map_err(|e| e.to_string())?;
                Ok(wait_for.is_satisfied(&objects))
            }
            ReadinessCheck::Http {
                url, expect_status, ..
            } => readiness::http_ready(&self.http, url, *expect_status)
                .await
                .map_err(|e| e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_with(statuses: &[StepStatus]) -> RunReport {
        let mut report = RunReport::start("demo".to_string(), false);
        for (position, status) in statuses.iter().enumerate() {
            report.steps.push(StepReport {
                position,
                name: format!("step-{position}"),
                required: *status != StepStatus::Warned,
                status: *status,
                applied: Vec::new(),
                error: None,
                elapsed_ms: 0,
            });
        }
        report
    }

    #[test]
    fn test_report_helpers() {
        let mut report = report_with(&[
            StepStatus::Succeeded,
            StepStatus::Warned,
            StepStatus::Failed,
        ]);
        report.finish(RunOutcome::Aborted);
        assert_eq!(report.warnings().count(), 1);
        assert_eq!(report.failed_step().map(|s| s.position), Some(2));
        assert!(!report.is_success());
        assert!(report.finished_at.is_some());
    }

    #[test]
    fn test_report_serializes_to_toml() {
        let mut report = report_with(&[StepStatus::Succeeded]);
        report.steps[0].applied.push("namespace/microservices".to_string());
        report.finish(RunOutcome::Succeeded);
        let text = toml::to_string_pretty(&report).unwrap();
        assert!(text.contains("outcome = \"succeeded\""));
        assert!(text.contains("status = \"succeeded\""));
        assert!(text.contains("namespace/microservices"));
        assert!(!text.contains("error"));
    }
}
