//! A backend that never contacts a cluster.
//!
//! Applies read and parse the manifests so a dry run still catches missing
//! files and malformed YAML.

use async_trait::async_trait;
use serde_json::Value;
use snafu::ResultExt;
use tracing::info;

use super::Cluster;
use crate::error::{ClusterError, ManifestSnafu};
use crate::manifest::{self, ManifestObject};
use crate::readiness::ResourceQuery;
use crate::step::ResourceRef;

#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunCluster;

#[async_trait]
impl Cluster for DryRunCluster {
    async fn apply(
        &self,
        resource: &ResourceRef,
        namespace: Option<&str>,
    ) -> Result<Vec<String>, ClusterError> {
        let objects = manifest::load(resource).await.context(ManifestSnafu)?;
        let descriptors: Vec<String> = objects.iter().map(ManifestObject::descriptor).collect();
        for (object, descriptor) in objects.iter().zip(&descriptors) {
            let ns = object.namespace.as_deref().or(namespace).unwrap_or("-");
            info!(object = %descriptor, namespace = ns, "dry run: would apply");
        }
        Ok(descriptors)
    }

    async fn fetch(&self, _query: &ResourceQuery) -> Result<Vec<Value>, ClusterError> {
        Ok(Vec::new())
    }
}
