//! `kubectl` backend: the same verbs the shell scripts used, with real
//! error handling around them.

use async_trait::async_trait;
use serde_json::Value;
use snafu::ResultExt;
use std::process::Output;
use std::time::Duration;
use tracing::debug;

use super::Cluster;
use crate::error::{ClusterError, ClusterJoinSnafu, DecodeSnafu, KubectlSnafu, SpawnSnafu};
use crate::manifest::split_api_version;
use crate::readiness::{ResourceQuery, Target};
use crate::step::ResourceRef;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct KubectlCluster {
    binary: String,
    context: Option<String>,
    request_timeout: Duration,
}

impl Default for KubectlCluster {
    fn default() -> Self {
        Self {
            binary: "kubectl".to_string(),
            context: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl KubectlCluster {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    /// Bound on every single kubectl call (`--request-timeout`).
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn global_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(context) = &self.context {
            args.push(format!("--context={context}"));
        }
        args.push(format!(
            "--request-timeout={}s",
            self.request_timeout.as_secs().max(1)
        ));
        args
    }

    pub(crate) fn apply_args(&self, resource: &ResourceRef, namespace: Option<&str>) -> Vec<String> {
        let mut args = vec!["apply".to_string()];
        args.extend(self.global_args());
        args.push("-f".to_string());
        args.push(match resource {
            ResourceRef::File(path) | ResourceRef::Directory(path) => path.display().to_string(),
            ResourceRef::Url(url) => url.clone(),
            ResourceRef::Inline(_) => "-".to_string(),
        });
        if let Some(ns) = namespace {
            args.push(format!("--namespace={ns}"));
        }
        args.push("--output=name".to_string());
        args
    }

    pub(crate) fn get_args(&self, query: &ResourceQuery) -> Vec<String> {
        let mut args = vec!["get".to_string()];
        args.extend(self.global_args());

        // Pin the group/version with kubectl's `kind.version.group` form
        match query.api_version.as_deref().map(split_api_version) {
            Some((group, version)) if !group.is_empty() => {
                args.push(format!("{}.{version}.{group}", query.kind));
            }
            _ => args.push(query.kind.clone()),
        }

        match &query.target {
            Target::Name(name) => args.push(name.clone()),
            Target::Selector(selector) => args.push(format!("--selector={selector}")),
        }
        if let Some(ns) = &query.namespace {
            args.push(format!("--namespace={ns}"));
        }
        args.push("--output=json".to_string());
        args
    }

    async fn kubectl(&self, args: Vec<String>, stdin: Option<String>) -> Result<Output, ClusterError> {
        let binary = self.binary.clone();
        let command = format!("{binary} {}", args.join(" "));
        debug!(command = %command, "running kubectl");
        tokio::task::spawn_blocking(move || {
            let mut expr = duct::cmd(binary.as_str(), &args)
                .stdout_capture()
                .stderr_capture()
                .unchecked();
            if let Some(input) = stdin {
                expr = expr.stdin_bytes(input);
            }
            expr.run().context(SpawnSnafu { command })
        })
        .await
        .context(ClusterJoinSnafu)?
    }
}

fn failure(args: &[String], output: &Output) -> ClusterError {
    KubectlSnafu {
        command: format!("kubectl {}", args.join(" ")),
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
    .build()
}

/// Objects from `kubectl get -o json`, which prints either one object or a `List`.
pub(crate) fn parse_get_output(command: &str, stdout: &[u8]) -> Result<Vec<Value>, ClusterError> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_slice(stdout).context(DecodeSnafu { command })?;
    match value.get("items").and_then(Value::as_array) {
        Some(items) if value.get("kind").and_then(Value::as_str).is_some_and(|k| k.ends_with("List")) => {
            Ok(items.clone())
        }
        _ => Ok(vec![value]),
    }
}

fn is_not_found(output: &Output) -> bool {
    let stderr = String::from_utf8_lossy(&output.stderr);
    stderr.contains("NotFound") || stderr.contains("not found")
}

#[async_trait]
impl Cluster for KubectlCluster {
    async fn apply(
        &self,
        resource: &ResourceRef,
        namespace: Option<&str>,
    ) -> Result<Vec<String>, ClusterError> {
        let args = self.apply_args(resource, namespace);
        let stdin = match resource {
            ResourceRef::Inline(text) => Some(text.clone()),
            _ => None,
        };
        let output = self.kubectl(args.clone(), stdin).await?;
        if !output.status.success() {
            return Err(failure(&args, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn fetch(&self, query: &ResourceQuery) -> Result<Vec<Value>, ClusterError> {
        let args = self.get_args(query);
        let output = self.kubectl(args.clone(), None).await?;
        if !output.status.success() {
            if is_not_found(&output) {
                return Ok(Vec::new());
            }
            return Err(failure(&args, &output));
        }
        parse_get_output(&format!("kubectl {}", args.join(" ")), &output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_apply_args_for_file() {
        let cluster = KubectlCluster::new().with_context(Some("minikube".to_string()));
        let args = cluster.apply_args(
            &ResourceRef::File(PathBuf::from("manifests/postgres.yaml")),
            Some("microservices"),
        );
        assert_eq!(
            args,
            [
                "apply",
                "--context=minikube",
                "--request-timeout=30s",
                "-f",
                "manifests/postgres.yaml",
                "--namespace=microservices",
                "--output=name",
            ]
        );
    }

    #[test]
    fn test_apply_args_inline_reads_stdin() {
        let args = KubectlCluster::new().apply_args(&ResourceRef::Inline("kind: x".into()), None);
        assert!(args.windows(2).any(|w| w == ["-f", "-"]));
        assert!(!args.iter().any(|a| a.starts_with("--namespace")));
    }

    #[test]
    fn test_get_args() {
        let cluster = KubectlCluster::new().with_request_timeout(Duration::from_secs(5));
        let query = ResourceQuery::named("deployment", "postgres").in_namespace("microservices");
        assert_eq!(
            cluster.get_args(&query),
            [
                "get",
                "--request-timeout=5s",
                "deployment",
                "postgres",
                "--namespace=microservices",
                "--output=json",
            ]
        );

        let mut query = ResourceQuery::selected("deployment", "app=grafana");
        query.api_version = Some("apps/v1".to_string());
        let args = cluster.get_args(&query);
        assert!(args.contains(&"deployment.v1.apps".to_string()));
        assert!(args.contains(&"--selector=app=grafana".to_string()));

        query.kind = "pod".to_string();
        query.api_version = Some("v1".to_string());
        assert!(cluster.get_args(&query).contains(&"pod".to_string()));
    }

    #[test]
    fn test_parse_get_output() {
        let single = br#"{"kind": "Deployment", "metadata": {"name": "postgres"}}"#;
        assert_eq!(parse_get_output("get", single).unwrap().len(), 1);

        let list = br#"{"kind": "List", "items": [{"kind": "Pod"}, {"kind": "Pod"}]}"#;
        assert_eq!(parse_get_output("get", list).unwrap().len(), 2);

        let empty = br#"{"apiVersion": "v1", "kind": "List", "items": []}"#;
        assert!(parse_get_output("get", empty).unwrap().is_empty());

        assert!(parse_get_output("get", b"  \n").unwrap().is_empty());
        assert!(parse_get_output("get", b"not json").is_err());
    }
}
