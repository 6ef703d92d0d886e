//! Sequencer behaviour against an in-memory cluster.

use async_trait::async_trait;
use serde_json::{Value, json};
use stackup_core::{
    Cluster, ClusterError, CommandError, CommandSpec, DeploymentStep, ReadinessCheck, ResourceQuery,
    ResourceRef, RunOutcome, SequenceError, Sequencer, SequencerOptions, StepError, StepStatus,
    WaitFor,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Upserting fake: applies never fail on "already exists".
#[derive(Clone, Default)]
struct FakeCluster {
    state: Arc<Mutex<FakeState>>,
}

#[derive(Default)]
struct FakeState {
    log: Vec<String>,
    applied: BTreeMap<String, u32>,
    failing: HashSet<String>,
    ready_after: HashMap<String, usize>,
    fetches: HashMap<String, usize>,
    hang_fetch: bool,
}

impl FakeCluster {
    fn failing(self, resource: &str) -> Self {
        self.state.lock().unwrap().failing.insert(resource.to_string());
        self
    }

    fn ready_after(self, query: &ResourceQuery, fetches: usize) -> Self {
        self.state
            .lock()
            .unwrap()
            .ready_after
            .insert(query.to_string(), fetches);
        self
    }

    fn hanging(self) -> Self {
        self.state.lock().unwrap().hang_fetch = true;
        self
    }

    fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    fn applies(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|l| l.strip_prefix("apply ").map(str::to_string))
            .collect()
    }
}

fn available_deployment() -> Value {
    json!({
        "kind": "Deployment",
        "status": { "conditions": [{ "type": "Available", "status": "True" }] }
    })
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn apply(
        &self,
        resource: &ResourceRef,
        _namespace: Option<&str>,
    ) -> Result<Vec<String>, ClusterError> {
        let key = resource.to_string();
        let mut state = self.state.lock().unwrap();
        state.log.push(format!("apply {key}"));
        if state.failing.contains(&key) {
            return Err(ClusterError::Kubectl {
                command: format!("kubectl apply -f {key}"),
                code: Some(1),
                stderr: "admission webhook denied the request".to_string(),
            });
        }
        *state.applied.entry(key.clone()).or_insert(0) += 1;
        Ok(vec![key])
    }

    async fn fetch(&self, query: &ResourceQuery) -> Result<Vec<Value>, ClusterError> {
        let key = query.to_string();
        let hang = {
            let mut state = self.state.lock().unwrap();
            state.log.push(format!("fetch {key}"));
            state.hang_fetch
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();
        let seen = state.fetches.entry(key.clone()).or_insert(0);
        *seen += 1;
        let seen = *seen;
        match state.ready_after.get(&key) {
            Some(needed) if seen >= *needed => Ok(vec![available_deployment()]),
            _ => Ok(Vec::new()),
        }
    }
}

fn file(name: &str) -> ResourceRef {
    ResourceRef::File(name.into())
}

fn step(name: &str) -> DeploymentStep {
    DeploymentStep::new(name).with_resource(file(&format!("{name}.yaml")))
}

fn postgres_query() -> ResourceQuery {
    ResourceQuery::named("deployment", "postgres").in_namespace("microservices")
}

fn available(query: ResourceQuery, timeout: Duration) -> ReadinessCheck {
    ReadinessCheck::Resource {
        query,
        wait_for: WaitFor::condition("Available"),
        timeout,
    }
}

fn options() -> SequencerOptions {
    SequencerOptions {
        poll_interval: Duration::from_secs(2),
        ..SequencerOptions::default()
    }
}

#[tokio::test]
async fn test_steps_run_in_declared_order() {
    let cluster = FakeCluster::default();
    let names = ["namespace", "postgres", "user-service", "api-gateway", "monitoring"];
    let steps = names.iter().map(|n| step(n)).collect();

    let mut sequencer = Sequencer::new(cluster.clone(), steps, options()).with_label("demo");
    let report = sequencer.run().await.unwrap();

    let expected: Vec<String> = names.iter().map(|n| format!("{n}.yaml")).collect();
    assert_eq!(cluster.applies(), expected);
    assert_eq!(sequencer.position(), names.len());
    assert_eq!(report.plan, "demo");
    assert_eq!(report.outcome, RunOutcome::Succeeded);
    let positions: Vec<_> = report.steps.iter().map(|s| s.position).collect();
    assert_eq!(positions, [0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_resources_within_a_step_keep_their_order() {
    let cluster = FakeCluster::default();
    let steps = vec![
        DeploymentStep::new("monitoring")
            .with_resource(file("prometheus-config.yaml"))
            .with_resource(file("prometheus.yaml"))
            .with_resource(file("grafana.yaml")),
    ];
    Sequencer::new(cluster.clone(), steps, options())
        .run()
        .await
        .unwrap();
    assert_eq!(
        cluster.applies(),
        ["prometheus-config.yaml", "prometheus.yaml", "grafana.yaml"]
    );
}

#[tokio::test]
async fn test_required_failure_halts_before_next_step() {
    let cluster = FakeCluster::default().failing("user-service.yaml");
    let steps = vec![step("postgres"), step("user-service"), step("api-gateway")];

    let mut sequencer = Sequencer::new(cluster.clone(), steps, options());
    let err = sequencer.run().await.unwrap_err();

    let SequenceError::RequiredStepFailed {
        step,
        position,
        source,
        report,
    } = err;
    assert_eq!(step, "user-service");
    assert_eq!(position, 1);
    assert!(matches!(source, StepError::Apply { .. }));
    assert_eq!(report.outcome, RunOutcome::Aborted);
    assert_eq!(report.steps.len(), 2);
    assert_eq!(report.failed_step().map(|s| s.name.as_str()), Some("user-service"));
    assert!(
        report.steps[1]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("admission webhook"))
    );

    assert!(!cluster.applies().contains(&"api-gateway.yaml".to_string()));
    assert_eq!(sequencer.position(), 2);
}

#[tokio::test]
async fn test_second_run_resumes_after_the_failed_step() {
    let cluster = FakeCluster::default().failing("user-service.yaml");
    let steps = vec![step("postgres"), step("user-service"), step("api-gateway")];
    let mut sequencer = Sequencer::new(cluster.clone(), steps, options());

    assert!(sequencer.run().await.is_err());
    assert_eq!(sequencer.position(), 2);
    let applied_before = cluster.applies().len();

    let report = sequencer.run().await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Succeeded);
    let ran: Vec<_> = report.steps.iter().map(|s| (s.position, s.name.as_str())).collect();
    assert_eq!(ran, [(2, "api-gateway")]);
    assert_eq!(cluster.applies()[applied_before..], ["api-gateway.yaml"]);
    assert_eq!(sequencer.position(), 3);

    // Nothing left to do
    let report = sequencer.run().await.unwrap();
    assert!(report.steps.is_empty());
    assert_eq!(cluster.applies().len(), applied_before + 1);
}

#[tokio::test(start_paused = true)]
async fn test_optional_failure_reports_success_with_one_warning() {
    let cluster = FakeCluster::default()
        .ready_after(&postgres_query(), 3)
        .failing("ingress.yaml");
    let steps = vec![
        step("namespace"),
        step("database").with_readiness(available(postgres_query(), Duration::from_secs(120))),
        step("ingress").optional(),
    ];

    let mut sequencer = Sequencer::new(cluster.clone(), steps, options());
    let report = sequencer.run().await.unwrap();

    assert!(report.is_success());
    let warnings: Vec<_> = report.warnings().collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].name, "ingress");
    assert_eq!(report.steps[1].status, StepStatus::Succeeded);
    assert_eq!(sequencer.position(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_optional_failure_does_not_stop_later_steps() {
    let cluster = FakeCluster::default().failing("grafana-dashboards.yaml");
    let steps = vec![
        step("grafana-dashboards").optional(),
        step("load-generator"),
    ];
    let report = Sequencer::new(cluster.clone(), steps, options())
        .run()
        .await
        .unwrap();
    assert_eq!(report.steps[0].status, StepStatus::Warned);
    assert_eq!(report.steps[1].status, StepStatus::Succeeded);
    assert!(cluster.applies().contains(&"load-generator.yaml".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_readiness_poll_is_bounded_by_timeout() {
    let cluster = FakeCluster::default();
    let timeout = Duration::from_secs(10);
    let steps = vec![step("database").with_readiness(available(postgres_query(), timeout))];

    let started = Instant::now();
    let err = Sequencer::new(cluster.clone(), steps, options())
        .run()
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    let SequenceError::RequiredStepFailed { source, .. } = err;
    assert!(matches!(source, StepError::NotReady { .. }));
    assert!(elapsed <= timeout, "waited {elapsed:?}");
    assert!(elapsed >= timeout - Duration::from_secs(2));

    let fetches = cluster.log().iter().filter(|l| l.starts_with("fetch")).count();
    assert!((5..=6).contains(&fetches), "{fetches} probes");
}

#[tokio::test(start_paused = true)]
async fn test_hung_probe_is_cut_off_at_timeout() {
    let cluster = FakeCluster::default().hanging();
    let timeout = Duration::from_secs(5);
    let steps = vec![step("database").with_readiness(available(postgres_query(), timeout))];

    let started = Instant::now();
    let err = Sequencer::new(cluster, steps, options())
        .run()
        .await
        .unwrap_err();

    assert!(started.elapsed() <= timeout);
    let SequenceError::RequiredStepFailed { source, .. } = err;
    match source {
        StepError::NotReady { last_error, .. } => {
            assert!(last_error.is_some_and(|e| e.contains("pending")));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_readiness_timeout_on_optional_step_is_a_warning() {
    let cluster = FakeCluster::default();
    let steps = vec![
        step("grafana")
            .optional()
            .with_readiness(available(
                ResourceQuery::named("deployment", "grafana"),
                Duration::from_secs(4),
            )),
        step("load-generator"),
    ];
    let report = Sequencer::new(cluster, steps, options())
        .run()
        .await
        .unwrap();
    assert_eq!(report.warnings().count(), 1);
    assert!(
        report.steps[0]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("not ready within 4s"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_rerun_against_deployed_cluster_is_clean() {
    let cluster = FakeCluster::default().ready_after(&postgres_query(), 1);
    let steps = vec![
        step("namespace"),
        step("database").with_readiness(available(postgres_query(), Duration::from_secs(30))),
        step("user-service"),
    ];

    for _ in 0..2 {
        let report = Sequencer::new(cluster.clone(), steps.clone(), options())
            .run()
            .await
            .unwrap();
        assert!(report.is_success());
        assert_eq!(report.warnings().count(), 0);
    }

    let state = cluster.state.lock().unwrap();
    assert_eq!(state.applied.len(), 3);
    assert!(state.applied.values().all(|count| *count == 2));
}

#[tokio::test(start_paused = true)]
async fn test_dry_run_skips_commands_and_readiness() {
    let cluster = FakeCluster::default();
    let steps = vec![
        DeploymentStep::new("image")
            .with_command(CommandSpec::new("false", Vec::<String>::new())),
        step("database").with_readiness(available(postgres_query(), Duration::from_secs(30))),
    ];
    let options = SequencerOptions {
        dry_run: true,
        ..options()
    };

    let report = Sequencer::new(cluster.clone(), steps, options)
        .run()
        .await
        .unwrap();

    assert!(report.dry_run);
    assert!(report.steps.iter().all(|s| s.status == StepStatus::Planned));
    assert!(!cluster.log().iter().any(|l| l.starts_with("fetch")));
    assert_eq!(cluster.applies(), ["database.yaml"]);
}

#[tokio::test]
async fn test_failing_required_command_aborts_before_apply() {
    let cluster = FakeCluster::default();
    let steps = vec![
        DeploymentStep::new("user-service")
            .with_command(CommandSpec::new("sh", ["-c", "exit 2"]))
            .with_resource(file("user-service.yaml")),
        step("api-gateway"),
    ];
    let err = Sequencer::new(cluster.clone(), steps, options())
        .run()
        .await
        .unwrap_err();

    let SequenceError::RequiredStepFailed { source, .. } = err;
    assert!(matches!(source, StepError::Command { .. }));
    assert!(cluster.applies().is_empty());
}

#[tokio::test]
async fn test_unreachable_http_check_times_out() {
    let cluster = FakeCluster::default();
    let steps = vec![step("api-gateway").optional().with_readiness(ReadinessCheck::Http {
        url: "http://127.0.0.1:9/health".to_string(),
        expect_status: None,
        timeout: Duration::from_secs(1),
    })];
    let options = SequencerOptions {
        poll_interval: Duration::from_millis(100),
        http_timeout: Duration::from_millis(200),
        ..SequencerOptions::default()
    };

    let started = std::time::Instant::now();
    let report = Sequencer::new(cluster, steps, options)
        .run()
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(report.steps[0].status, StepStatus::Warned);
}

#[tokio::test(start_paused = true)]
async fn test_out_of_range_readiness_timeout_still_waits() {
    let cluster = FakeCluster::default().ready_after(&postgres_query(), 2);
    let steps = vec![step("database").with_readiness(available(postgres_query(), Duration::MAX))];

    let report = Sequencer::new(cluster, steps, options())
        .run()
        .await
        .unwrap();
    assert_eq!(report.steps[0].status, StepStatus::Succeeded);
}

#[tokio::test]
async fn test_command_without_timeout_is_killed_at_the_default_bound() {
    let cluster = FakeCluster::default();
    let steps = vec![
        DeploymentStep::new("image").with_command(CommandSpec::new("sleep", ["30"])),
        step("after"),
    ];
    let options = SequencerOptions {
        command_timeout: Duration::from_millis(300),
        ..options()
    };

    let started = std::time::Instant::now();
    let err = Sequencer::new(cluster.clone(), steps, options)
        .run()
        .await
        .unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(10));

    let SequenceError::RequiredStepFailed { step, source, .. } = err;
    assert_eq!(step, "image");
    assert!(matches!(
        source,
        StepError::Command {
            source: CommandError::TimedOut { .. }
        }
    ));
    assert!(cluster.applies().is_empty());
}
