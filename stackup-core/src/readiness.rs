//! Readiness checks: when may a step be considered complete.
//!
//! Resource checks are evaluated by [`WaitFor::is_satisfied`], a pure function
//! over the objects a cluster backend returns, so every backend shares the
//! same semantics. HTTP checks replace the fixed sleeps a shell script would
//! use to "give the gateway a moment".

use serde_json::Value;
use snafu::Snafu;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// A predicate the sequencer polls after a step's resources are applied.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadinessCheck {
    Resource {
        query: ResourceQuery,
        wait_for: WaitFor,
        timeout: Duration,
    },
    Http {
        url: String,
        /// Exact status to expect; any 2xx when unset.
        expect_status: Option<u16>,
        timeout: Duration,
    },
}

impl ReadinessCheck {
    pub fn timeout(&self) -> Duration {
        match self {
            ReadinessCheck::Resource { timeout, .. } | ReadinessCheck::Http { timeout, .. } => {
                *timeout
            }
        }
    }
}

impl fmt::Display for ReadinessCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessCheck::Resource {
                query, wait_for, ..
            } => write!(f, "{query} ({wait_for})"),
            ReadinessCheck::Http {
                url, expect_status, ..
            } => match expect_status {
                Some(status) => write!(f, "GET {url} (status {status})"),
                None => write!(f, "GET {url}"),
            },
        }
    }
}

/// Which objects a resource check looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceQuery {
    /// Kind as kubectl accepts it: `deployment`, `deploy`, `Deployment`, `pods`.
    pub kind: String,
    /// Pins the group/version when the kind name is ambiguous.
    pub api_version: Option<String>,
    pub namespace: Option<String>,
    pub target: Target,
}

impl ResourceQuery {
    pub fn named(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            api_version: None,
            namespace: None,
            target: Target::Name(name.into()),
        }
    }

    pub fn selected(kind: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            api_version: None,
            namespace: None,
            target: Target::Selector(selector.into()),
        }
    }

    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

impl fmt::Display for ResourceQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Target::Name(name) => write!(f, "{}/{name}", self.kind)?,
            Target::Selector(selector) => write!(f, "{} -l {selector}", self.kind)?,
        }
        if let Some(ns) = &self.namespace {
            write!(f, " -n {ns}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Name(String),
    /// A label selector such as `app=postgres`.
    Selector(String),
}

/// What the matched objects must look like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitFor {
    /// `status.conditions[type]` has the given status (case-insensitive).
    Condition { type_: String, status: String },
    /// At least one object matches.
    Exists,
    /// Every desired replica is updated and available at the current generation.
    Rollout,
}

impl WaitFor {
    pub fn condition(type_: impl Into<String>) -> Self {
        WaitFor::Condition {
            type_: type_.into(),
            status: "True".to_string(),
        }
    }

    /// True when the matched objects satisfy this predicate.
    ///
    /// An empty match set never satisfies anything: a check on a deployment
    /// that has not been created yet must keep polling.
    pub fn is_satisfied(&self, objects: &[Value]) -> bool {
        if objects.is_empty() {
            return false;
        }
        match self {
            WaitFor::Exists => true,
            WaitFor::Condition { type_, status } => objects
                .iter()
                .all(|object| has_condition(object, type_, status)),
            WaitFor::Rollout => objects.iter().all(rollout_complete),
        }
    }
}

impl fmt::Display for WaitFor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitFor::Condition { type_, status } if status.eq_ignore_ascii_case("true") => {
                write!(f, "condition={type_}")
            }
            WaitFor::Condition { type_, status } => write!(f, "condition={type_}={status}"),
            WaitFor::Exists => f.write_str("exists"),
            WaitFor::Rollout => f.write_str("rollout"),
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(display(
    "unknown wait expression '{expr}' (expected condition=<Type>[=<Status>], exists or rollout)"
))]
pub struct ParseWaitForError {
    expr: String,
}

impl FromStr for WaitFor {
    type Err = ParseWaitForError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let expr = s.trim();
        let invalid = || ParseWaitForError {
            expr: s.to_string(),
        };

        if expr.eq_ignore_ascii_case("exists") || expr.eq_ignore_ascii_case("create") {
            return Ok(WaitFor::Exists);
        }
        if expr.eq_ignore_ascii_case("rollout") {
            return Ok(WaitFor::Rollout);
        }

        let body = match expr.split_once('=') {
            Some((prefix, rest)) if prefix.eq_ignore_ascii_case("condition") => rest,
            Some(_) => return Err(invalid()),
            None => expr,
        };
        let (type_, status) = match body.split_once('=') {
            Some((t, s)) => (t.trim(), s.trim()),
            None => (body.trim(), "True"),
        };
        let is_word = |v: &str| {
            !v.is_empty()
                && v
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        };
        if !is_word(type_) || !is_word(status) {
            return Err(invalid());
        }
        Ok(WaitFor::Condition {
            type_: type_.to_string(),
            status: status.to_string(),
        })
    }
}

fn has_condition(object: &Value, type_: &str, status: &str) -> bool {
    object
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .is_some_and(|conditions| {
            conditions.iter().any(|c| {
                let field_is = |key: &str, want: &str| {
                    c.get(key)
                        .and_then(Value::as_str)
                        .is_some_and(|v| v.eq_ignore_ascii_case(want))
                };
                field_is("type", type_) && field_is("status", status)
            })
        })
}

fn int_at(object: &Value, pointer: &str) -> Option<i64> {
    object.pointer(pointer).and_then(Value::as_i64)
}

fn rollout_complete(object: &Value) -> bool {
    let generation = int_at(object, "/metadata/generation").unwrap_or(0);
    let observed = int_at(object, "/status/observedGeneration").unwrap_or(0);
    if observed < generation {
        return false;
    }

    // DaemonSets report scheduling counts instead of replicas
    if let Some(desired) = int_at(object, "/status/desiredNumberScheduled") {
        let updated = int_at(object, "/status/updatedNumberScheduled").unwrap_or(0);
        let available = int_at(object, "/status/numberAvailable").unwrap_or(0);
        return updated >= desired && available >= desired;
    }

    let desired = int_at(object, "/spec/replicas").unwrap_or(1);
    let updated = int_at(object, "/status/updatedReplicas").unwrap_or(0);
    let available = int_at(object, "/status/availableReplicas").unwrap_or(0);
    updated >= desired && available >= desired
}

/// Probe an HTTP endpoint once.
///
/// `Ok(false)` means the endpoint answered with the wrong status; transport
/// failures (connection refused, timeouts) are errors.
pub async fn http_ready(
    client: &reqwest::Client,
    url: &str,
    expect_status: Option<u16>,
) -> Result<bool, reqwest::Error> {
    let status = client.get(url).send().await?.status();
    Ok(match expect_status {
        Some(expected) => status.as_u16() == expected,
        None => status.is_success(),
    })
}
