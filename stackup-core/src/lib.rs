//! # stackup-core
//!
//! Ordered apply-and-wait over a Kubernetes-style cluster API.
//!
//! A [`Plan`] is an ordered list of [`DeploymentStep`]s. The [`Sequencer`]
//! applies each step's resources through a [`Cluster`] backend, polls its
//! readiness check with a bounded timeout, and treats optional steps as
//! warnings instead of failures.

pub mod cluster;
pub mod command;
pub mod error;
pub mod manifest;
pub mod plan;
pub mod readiness;
pub mod sequencer;
pub mod step;

pub use cluster::{Cluster, DryRunCluster, KubeCluster, KubectlCluster};
pub use error::{ClusterError, CommandError, ManifestError, PlanError, SequenceError, StepError};
pub use plan::{BinarySpec, Plan, Preflight};
pub use readiness::{ReadinessCheck, ResourceQuery, Target, WaitFor};
pub use sequencer::{RunOutcome, RunReport, Sequencer, SequencerOptions, StepReport, StepStatus};
pub use step::{CommandSpec, DeploymentStep, ResourceRef};
