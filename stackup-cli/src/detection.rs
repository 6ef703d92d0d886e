// Backend auto-detection
// Decides which cluster backend a run talks to

use anyhow::{Context, Result};
use std::fmt;
use tracing::{debug, info};

use crate::config::{BackendChoice, StackupConfig};
use stackup_core::{Cluster, DryRunCluster, KubeCluster, KubectlCluster};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Native client over the kubeconfig.
    Kube,
    /// The `kubectl` binary.
    Kubectl,
    /// No cluster at all.
    DryRun,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Kube => "kube",
            Backend::Kubectl => "kubectl",
            Backend::DryRun => "dry-run",
        })
    }
}

/// Detect the best available backend
pub async fn detect_backend() -> Result<Backend> {
    // Priority order: kube client > kubectl
    if check_kube_config().await {
        return Ok(Backend::Kube);
    }
    if kubectl_available().await {
        return Ok(Backend::Kubectl);
    }
    anyhow::bail!(
        "No cluster found: no kubeconfig could be loaded and `kubectl config current-context` failed\n\
         Start one with `minikube start`, or use --dry-run"
    )
}

/// List all backends and whether each is usable right now
pub async fn list_available_backends() -> Vec<(Backend, bool)> {
    vec![
        (Backend::Kube, check_kube_config().await),
        (Backend::Kubectl, kubectl_available().await),
        (Backend::DryRun, true),
    ]
}

async fn check_kube_config() -> bool {
    match kube::Config::infer().await {
        Ok(config) => {
            debug!(cluster_url = %config.cluster_url, "kubeconfig inferred");
            true
        }
        Err(e) => {
            debug!(error = %e, "no kubeconfig");
            false
        }
    }
}

async fn kubectl_available() -> bool {
    tokio::task::spawn_blocking(check_kubectl)
        .await
        .unwrap_or(false)
}

fn check_kubectl() -> bool {
    // Installed and pointed at a context
    duct::cmd!("kubectl", "config", "current-context")
        .stdout_null()
        .stderr_null()
        .unchecked()
        .run()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Build the cluster handle for a run.
pub async fn connect(config: &StackupConfig, dry_run: bool) -> Result<Box<dyn Cluster>> {
    let backend = if dry_run {
        Backend::DryRun
    } else {
        match config.backend {
            BackendChoice::Kube => Backend::Kube,
            BackendChoice::Kubectl => Backend::Kubectl,
            BackendChoice::Auto => detect_backend().await?,
        }
    };
    info!(%backend, context = config.context.as_deref().unwrap_or("current"), "selected backend");

    Ok(match backend {
        Backend::DryRun => Box::new(DryRunCluster),
        Backend::Kube => Box::new(
            KubeCluster::connect(config.context.as_deref())
                .await
                .context("Failed to connect to the cluster")?,
        ),
        Backend::Kubectl => Box::new(
            KubectlCluster::new()
                .with_context(config.context.clone())
                .with_request_timeout(config.request_timeout()),
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_available() {
        let list = list_available_backends().await;
        assert_eq!(list.len(), 3);

        // Dry run should always be available
        let (backend, available) = list.last().unwrap();
        assert_eq!(*backend, Backend::DryRun);
        assert!(available);
    }

    #[tokio::test]
    async fn test_dry_run_never_detects() {
        let config = StackupConfig {
            backend: BackendChoice::Kube,
            context: Some("does-not-exist".to_string()),
            ..StackupConfig::default()
        };
        assert!(connect(&config, true).await.is_ok());
    }

    #[tokio::test]
    async fn test_explicit_kubectl_needs_no_cluster() {
        let config = StackupConfig {
            backend: BackendChoice::Kubectl,
            ..StackupConfig::default()
        };
        assert!(connect(&config, false).await.is_ok());
    }

    #[test]
    fn test_backend_names() {
        assert_eq!(Backend::Kubectl.to_string(), "kubectl");
        assert_eq!(Backend::DryRun.to_string(), "dry-run");
    }
}
