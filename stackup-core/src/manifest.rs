//! Manifest reading: turn a [`ResourceRef`] into Kubernetes objects.

use serde::Deserialize;
use serde_json::Value;
use snafu::{OptionExt, ResultExt};
use std::path::Path;
use std::time::Duration;

use crate::error::{
    FetchManifestSnafu, ManifestError, MissingFieldSnafu, ParseManifestSnafu, ReadManifestSnafu,
};
use crate::step::ResourceRef;

const MANIFEST_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Upper bound on fetching a URL manifest, connect through body.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// One object from a manifest document.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestObject {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
    /// The full document, sent as-is on apply.
    pub body: Value,
}

impl ManifestObject {
    fn from_value(origin: &str, body: Value) -> Result<Self, ManifestError> {
        let field = |pointer: &str| body.pointer(pointer).and_then(Value::as_str).map(str::to_string);

        let api_version = field("/apiVersion").context(MissingFieldSnafu {
            origin,
            field: "apiVersion",
        })?;
        let kind = field("/kind").context(MissingFieldSnafu {
            origin,
            field: "kind",
        })?;
        let name = field("/metadata/name").context(MissingFieldSnafu {
            origin,
            field: "metadata.name",
        })?;
        let namespace = field("/metadata/namespace");

        Ok(Self {
            api_version,
            kind,
            name,
            namespace,
            body,
        })
    }

    /// API group, empty for the core group.
    pub fn group(&self) -> &str {
        split_api_version(&self.api_version).0
    }

    pub fn version(&self) -> &str {
        split_api_version(&self.api_version).1
    }

    /// `kind.group/name`, the form `kubectl apply -o name` prints.
    pub fn descriptor(&self) -> String {
        let kind = self.kind.to_lowercase();
        match self.group() {
            "" => format!("{kind}/{}", self.name),
            group => format!("{kind}.{group}/{}", self.name),
        }
    }
}

/// Split `apps/v1` into `("apps", "v1")` and `v1` into `("", "v1")`.
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    api_version.split_once('/').unwrap_or(("", api_version))
}

/// Parse every document in a (possibly multi-document) YAML or JSON text.
///
/// Empty documents are skipped and `kind: List` documents are flattened into
/// their items.
pub fn parse_documents(origin: &str, text: &str) -> Result<Vec<ManifestObject>, ManifestError> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = Value::deserialize(document).context(ParseManifestSnafu { origin })?;
        if value.is_null() {
            continue;
        }
        if value.get("kind").and_then(Value::as_str) == Some("List") {
            let items = value
                .get("items")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for item in items {
                objects.push(ManifestObject::from_value(origin, item)?);
            }
        } else {
            objects.push(ManifestObject::from_value(origin, value)?);
        }
    }
    Ok(objects)
}

/// Read and parse the objects behind a resource reference.
pub async fn load(resource: &ResourceRef) -> Result<Vec<ManifestObject>, ManifestError> {
    load_with_timeout(resource, FETCH_TIMEOUT).await
}

/// Like [`load`], with an explicit bound on URL fetches.
pub async fn load_with_timeout(
    resource: &ResourceRef,
    fetch_timeout: Duration,
) -> Result<Vec<ManifestObject>, ManifestError> {
    match resource {
        ResourceRef::File(path) => {
            let text = read_file(path).await?;
            parse_documents(&path.display().to_string(), &text)
        }
        ResourceRef::Directory(dir) => {
            let mut objects = Vec::new();
            for path in manifest_files(dir)? {
                let text = read_file(&path).await?;
                objects.extend(parse_documents(&path.display().to_string(), &text)?);
            }
            Ok(objects)
        }
        ResourceRef::Url(url) => {
            let client = reqwest::Client::builder()
                .timeout(fetch_timeout)
                .build()
                .context(FetchManifestSnafu { url })?;
            let text = client
                .get(url)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .context(FetchManifestSnafu { url })?
                .text()
                .await
                .context(FetchManifestSnafu { url })?;
            parse_documents(url, &text)
        }
        ResourceRef::Inline(text) => parse_documents("inline manifest", text),
    }
}

async fn read_file(path: &Path) -> Result<String, ManifestError> {
    tokio::fs::read_to_string(path)
        .await
        .context(ReadManifestSnafu { path })
}

/// Manifest files directly inside `dir`, sorted by name like `kubectl apply -f <dir>`.
fn manifest_files(dir: &Path) -> Result<Vec<std::path::PathBuf>, ManifestError> {
    let entries = std::fs::read_dir(dir).context(ReadManifestSnafu { path: dir })?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.context(ReadManifestSnafu { path: dir })?.path();
        let is_manifest = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| MANIFEST_EXTENSIONS.contains(&e));
        if path.is_file() && is_manifest {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
