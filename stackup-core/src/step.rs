//! Deployment steps, the unit the sequencer walks through.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::readiness::ReadinessCheck;

/// One entry of a deployment plan.
///
/// A step runs its commands, then applies its resources, then waits on its
/// readiness check. Steps are immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentStep {
    pub name: String,
    /// Opaque external commands (image builds, host setup) run before applying.
    pub commands: Vec<CommandSpec>,
    pub resources: Vec<ResourceRef>,
    pub readiness: Option<ReadinessCheck>,
    /// When false a failure is recorded as a warning and the run continues.
    pub required: bool,
    /// Namespace for resources that do not name one.
    pub namespace: Option<String>,
}

impl DeploymentStep {
    /// A required step with nothing in it yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commands: Vec::new(),
            resources: Vec::new(),
            readiness: None,
            required: true,
            namespace: None,
        }
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    #[must_use]
    pub fn with_command(mut self, command: CommandSpec) -> Self {
        self.commands.push(command);
        self
    }

    #[must_use]
    pub fn with_resource(mut self, resource: ResourceRef) -> Self {
        self.resources.push(resource);
        self
    }

    #[must_use]
    pub fn with_readiness(mut self, check: ReadinessCheck) -> Self {
        self.readiness = Some(check);
        self
    }

    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// Where the manifests of a step come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceRef {
    File(PathBuf),
    /// Every `.yaml`, `.yml` and `.json` file directly inside the directory.
    Directory(PathBuf),
    Url(String),
    /// Manifest text embedded in the plan.
    Inline(String),
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceRef::File(path) | ResourceRef::Directory(path) => {
                write!(f, "{}", path.display())
            }
            ResourceRef::Url(url) => f.write_str(url),
            ResourceRef::Inline(text) => {
                let first = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
                write!(f, "inline manifest ({})", first.trim())
            }
        }
    }
}

/// An external command. Only its exit status matters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}
