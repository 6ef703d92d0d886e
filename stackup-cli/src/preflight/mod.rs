//! Preflight: verify host binaries before touching the cluster.

pub mod prereq;
pub mod report;

pub use prereq::{BinaryCheck, PrereqResult, check_prerequisites};
pub use report::{print_backends, print_preflight_report};
