//! Activation tool runner.

use std::process::Command;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use tracing::debug;

use vpnsync_core::{CommandFailure, CommandRunner, ToolCommand};

/// Runs the activation tool as a child process on GLib's blocking pool.
///
/// The program is executed directly, never through a shell, so connection
/// names reach it as a single argument whatever they contain.
#[derive(Debug, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(
        &self,
        command: &ToolCommand,
    ) -> LocalBoxFuture<'static, Result<String, CommandFailure>> {
        let command = command.clone();
        async move {
            gio::spawn_blocking(move || run_blocking(&command))
                .await
                .unwrap_or_else(|_| Err(CommandFailure::spawn("command runner panicked")))
        }
        .boxed_local()
    }
}

fn run_blocking(command: &ToolCommand) -> Result<String, CommandFailure> {
    debug!("VPN: exec {}", command);
    let output = Command::new(&command.program)
        .args(&command.args)
        .output()
        .map_err(|e| CommandFailure::spawn(format!("{}: {}", command.program, e)))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let message = if stderr.trim().is_empty() { stdout } else { stderr };
        Err(CommandFailure::new(output.status.code(), message.trim()))
    }
}
