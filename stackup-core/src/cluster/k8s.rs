//! Native Kubernetes backend built on `kube`.
//!
//! Applies use server-side apply with a forced field manager, so re-running a
//! plan against a cluster that already has the objects is a no-op upsert.

use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject, ListParams, Patch, PatchParams};
use kube::config::KubeConfigOptions;
use kube::core::GroupVersionKind;
use kube::discovery::{self, ApiCapabilities, Discovery, Scope};
use kube::{Api, Client, Config};
use serde_json::Value;
use snafu::ResultExt;
use tracing::debug;

use super::{Cluster, FIELD_MANAGER, well_known_kind};
use crate::error::{
    ApiSnafu, ClusterError, ConnectSnafu, EncodeSnafu, KubeconfigSnafu, ManifestSnafu,
    UnknownKindSnafu,
};
use crate::manifest::{self, ManifestObject, split_api_version};
use crate::readiness::{ResourceQuery, Target};
use crate::step::ResourceRef;

pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Connect using the inferred config (kubeconfig current context or
    /// in-cluster), or a named kubeconfig context.
    pub async fn connect(context: Option<&str>) -> Result<Self, ClusterError> {
        let client = match context {
            None => Client::try_default().await.context(ConnectSnafu)?,
            Some(context) => {
                let options = KubeConfigOptions {
                    context: Some(context.to_string()),
                    ..KubeConfigOptions::default()
                };
                let config = Config::from_kubeconfig(&options)
                    .await
                    .context(KubeconfigSnafu)?;
                Client::try_from(config).context(ConnectSnafu)?
            }
        };
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, ar: &ApiResource, caps: &ApiCapabilities, namespace: Option<&str>) -> Api<DynamicObject> {
        match (&caps.scope, namespace) {
            (Scope::Cluster, _) => Api::all_with(self.client.clone(), ar),
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, ar),
            (Scope::Namespaced, None) => Api::default_namespaced_with(self.client.clone(), ar),
        }
    }

    async fn apply_object(
        &self,
        object: &ManifestObject,
        namespace: Option<&str>,
    ) -> Result<String, ClusterError> {
        let gvk = GroupVersionKind::gvk(object.group(), object.version(), &object.kind);
        let (ar, caps) = discovery::pinned_kind(&self.client, &gvk)
            .await
            .context(ApiSnafu {
                operation: format!("discovery of {}", object.api_version),
            })?;

        let api = self.api(&ar, &caps, object.namespace.as_deref().or(namespace));
        let params = PatchParams::apply(FIELD_MANAGER).force();
        let descriptor = object.descriptor();
        api.patch(&object.name, &params, &Patch::Apply(&object.body))
            .await
            .context(ApiSnafu {
                operation: format!("apply of {descriptor}"),
            })?;
        debug!(object = %descriptor, "applied");
        Ok(descriptor)
    }

    /// Resolve a kubectl-style kind name to an API resource.
    async fn resolve_kind(
        &self,
        kind: &str,
        api_version: Option<&str>,
    ) -> Result<(ApiResource, ApiCapabilities), ClusterError> {
        if api_version.is_none() {
            if let Some((group, version, canonical)) = well_known_kind(kind) {
                let gvk = GroupVersionKind::gvk(group, version, canonical);
                return discovery::pinned_kind(&self.client, &gvk)
                    .await
                    .context(ApiSnafu {
                        operation: format!("discovery of {canonical}"),
                    });
            }
        }

        let mut discovery = Discovery::new(self.client.clone());
        if let Some(api_version) = api_version {
            let (group, _) = split_api_version(api_version);
            discovery = discovery.filter(&[group]);
        }
        let discovery = discovery.run().await.context(ApiSnafu {
            operation: format!("discovery of {kind}"),
        })?;

        let wanted = kind.to_ascii_lowercase();
        for group in discovery.groups() {
            for (ar, caps) in group.recommended_resources() {
                let version_matches =
                    api_version.is_none_or(|v| split_api_version(v).1 == ar.version);
                if version_matches && kind_matches(&ar, &wanted) {
                    return Ok((ar, caps));
                }
            }
        }
        UnknownKindSnafu { kind }.fail()
    }
}

fn kind_matches(ar: &ApiResource, wanted: &str) -> bool {
    ar.kind.to_ascii_lowercase() == wanted
        || ar.plural == wanted
        || ar.plural.strip_suffix('s') == Some(wanted)
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn apply(
        &self,
        resource: &ResourceRef,
        namespace: Option<&str>,
    ) -> Result<Vec<String>, ClusterError> {
        let objects = manifest::load(resource).await.context(ManifestSnafu)?;
        let mut applied = Vec::with_capacity(objects.len());
        for object in &objects {
            applied.push(self.apply_object(object, namespace).await?);
        }
        Ok(applied)
    }

    async fn fetch(&self, query: &ResourceQuery) -> Result<Vec<Value>, ClusterError> {
        let (ar, caps) = self
            .resolve_kind(&query.kind, query.api_version.as_deref())
            .await?;
        let api = self.api(&ar, &caps, query.namespace.as_deref());

        let objects: Vec<DynamicObject> = match &query.target {
            Target::Name(name) => api
                .get_opt(name)
                .await
                .context(ApiSnafu {
                    operation: format!("get {query}"),
                })?
                .into_iter()
                .collect(),
            Target::Selector(selector) => {
                api.list(&ListParams::default().labels(selector))
                    .await
                    .context(ApiSnafu {
                        operation: format!("list {query}"),
                    })?
                    .items
            }
        };

        objects
            .iter()
            .map(|object| serde_json::to_value(object).context(EncodeSnafu))
            .collect()
    }
}
