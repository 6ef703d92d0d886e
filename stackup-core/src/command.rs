//! Opaque external commands (image builds, host setup).
//!
//! Output is inherited, never parsed; only the exit status decides success.

use snafu::ResultExt;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::error::{CommandError, CommandJoinSnafu, ExitSnafu, StartSnafu, TimedOutSnafu};
use crate::step::CommandSpec;

const WAIT_TICK: Duration = Duration::from_millis(50);

/// Bound for a command that carries no timeout of its own.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Run a command to completion on the blocking pool.
pub async fn run(spec: &CommandSpec) -> Result<(), CommandError> {
    let spec = spec.clone();
    tokio::task::spawn_blocking(move || run_blocking(&spec))
        .await
        .context(CommandJoinSnafu)?
}

fn run_blocking(spec: &CommandSpec) -> Result<(), CommandError> {
    let command = spec.to_string();
    info!(command = %command, "running command");

    let mut expr = duct::cmd(&spec.program, &spec.args).unchecked();
    if let Some(dir) = &spec.cwd {
        expr = expr.dir(dir);
    }
    for (key, value) in &spec.env {
        expr = expr.env(key, value);
    }

    let handle = expr.start().context(StartSnafu { command: &command })?;

    let timeout = spec.timeout.unwrap_or(DEFAULT_TIMEOUT);
    // A deadline past the clock's range never arrives
    let deadline = Instant::now().checked_add(timeout);
    let status = loop {
        let finished = handle
            .try_wait()
            .context(StartSnafu { command: &command })?
            .map(|output| output.status);
        if let Some(status) = finished {
            break status;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            warn!(command = %command, timeout_secs = timeout.as_secs(), "command timed out, killing it");
            if let Err(e) = handle.kill() {
                warn!(command = %command, error = %e, "failed to kill command");
            }
            return TimedOutSnafu { command, timeout }.fail();
        }
        std::thread::sleep(WAIT_TICK);
    };

    if status.success() {
        Ok(())
    } else {
        ExitSnafu {
            command,
            code: status.code(),
        }
        .fail()
    }
}
