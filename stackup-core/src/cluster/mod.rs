//! Cluster API abstraction.
//!
//! The sequencer only needs two verbs, modeled on `kubectl apply` and the
//! read half of `kubectl wait`. Backends:
//! - [`KubeCluster`]: native API via `kube`, server-side apply
//! - [`KubectlCluster`]: shells out to `kubectl`
//! - [`DryRunCluster`]: parses manifests, touches nothing

pub mod dry_run;
pub mod k8s;
pub mod kubectl;

pub use dry_run::DryRunCluster;
pub use k8s::KubeCluster;
pub use kubectl::KubectlCluster;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ClusterError;
use crate::readiness::ResourceQuery;
use crate::step::ResourceRef;

/// Field manager recorded on server-side applies.
pub const FIELD_MANAGER: &str = "stackup";

#[async_trait]
pub trait Cluster: Send + Sync {
    /// Declaratively upsert every object behind `resource`.
    ///
    /// `namespace` applies to objects that do not name one. Returns
    /// `kind.group/name` descriptors of what was applied.
    async fn apply(
        &self,
        resource: &ResourceRef,
        namespace: Option<&str>,
    ) -> Result<Vec<String>, ClusterError>;

    /// Current state of the objects matching `query`.
    ///
    /// A named object that does not exist yet yields an empty list.
    async fn fetch(&self, query: &ResourceQuery) -> Result<Vec<Value>, ClusterError>;
}

#[async_trait]
impl<T: Cluster + ?Sized> Cluster for Box<T> {
    async fn apply(
        &self,
        resource: &ResourceRef,
        namespace: Option<&str>,
    ) -> Result<Vec<String>, ClusterError> {
        (**self).apply(resource, namespace).await
    }

    async fn fetch(&self, query: &ResourceQuery) -> Result<Vec<Value>, ClusterError> {
        (**self).fetch(query).await
    }
}

/// Group, version and canonical kind for the kinds people usually wait on,
/// keyed by every spelling kubectl accepts.
pub(crate) fn well_known_kind(name: &str) -> Option<(&'static str, &'static str, &'static str)> {
    let found = match name.to_ascii_lowercase().as_str() {
        "deployment" | "deployments" | "deploy" => ("apps", "v1", "Deployment"),
        "statefulset" | "statefulsets" | "sts" => ("apps", "v1", "StatefulSet"),
        "daemonset" | "daemonsets" | "ds" => ("apps", "v1", "DaemonSet"),
        "replicaset" | "replicasets" | "rs" => ("apps", "v1", "ReplicaSet"),
        "pod" | "pods" | "po" => ("", "v1", "Pod"),
        "service" | "services" | "svc" => ("", "v1", "Service"),
        "configmap" | "configmaps" | "cm" => ("", "v1", "ConfigMap"),
        "secret" | "secrets" => ("", "v1", "Secret"),
        "namespace" | "namespaces" | "ns" => ("", "v1", "Namespace"),
        "persistentvolumeclaim" | "persistentvolumeclaims" | "pvc" => {
            ("", "v1", "PersistentVolumeClaim")
        }
        "serviceaccount" | "serviceaccounts" | "sa" => ("", "v1", "ServiceAccount"),
        "job" | "jobs" => ("batch", "v1", "Job"),
        "cronjob" | "cronjobs" | "cj" => ("batch", "v1", "CronJob"),
        "ingress" | "ingresses" | "ing" => ("networking.k8s.io", "v1", "Ingress"),
        _ => return None,
    };
    Some(found)
}

/// True for kind spellings that mean Deployment.
pub fn is_deployment_kind(name: &str) -> bool {
    well_known_kind(name).is_some_and(|(_, _, kind)| kind == "Deployment")
}
