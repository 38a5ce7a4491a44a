//! Controller - connect/disconnect/toggle on top of the sync engine.
//!
//! At most one operation is in flight per engine. While one is pending,
//! every other control call returns [`Outcome::Busy`] without running
//! anything, including a disconnect aimed at a connection still coming up.
//! Once the tool exits the engine reconciles from the manager, so the
//! snapshot reflects what actually happened rather than what was asked for.

use std::rc::Rc;

use futures::future::LocalBoxFuture;
use tracing::{debug, info, warn};

use super::command::ToolCommand;
use super::engine::SyncEngine;
use crate::config::Config;
use crate::error::{CommandFailure, Error, Result};

/// Runs the activation tool.
pub trait CommandRunner {
    /// Run `command` to completion, resolving to its stdout.
    fn run(
        &self,
        command: &ToolCommand,
    ) -> LocalBoxFuture<'static, std::result::Result<String, CommandFailure>>;
}

/// Desktop notification sink. Fire-and-forget.
pub trait Notifier {
    fn notify(&self, summary: &str, body: &str);
}

/// What a control call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The tool ran and succeeded.
    Completed,
    /// The connection was already in the requested state.
    Unchanged,
    /// Another operation was in flight; nothing was run.
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Activation tool, e.g. `nmcli`.
    pub tool: String,
    pub notifications: bool,
    pub summary: String,
}

impl ControllerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tool: config.vpn.tool.clone(),
            notifications: config.notifications.enabled,
            summary: config.notifications.summary.clone(),
        }
    }
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Up,
    Down,
}

impl Action {
    fn verb(self) -> &'static str {
        match self {
            Action::Up => "connect",
            Action::Down => "disconnect",
        }
    }

    fn command(self, tool: &str, name: &str) -> ToolCommand {
        match self {
            Action::Up => ToolCommand::up(tool, name),
            Action::Down => ToolCommand::down(tool, name),
        }
    }

    fn success_message(self, name: &str) -> String {
        match self {
            Action::Up => format!("Connected to {}", name),
            Action::Down => format!("Disconnected from {}", name),
        }
    }

    fn failure_message(self, name: &str, failure: &CommandFailure) -> String {
        match self {
            Action::Up => format!("Failed to connect to {}: {}", name, failure),
            Action::Down => format!("Failed to disconnect from {}: {}", name, failure),
        }
    }
}

/// Clears the engine's pending marker when dropped, including when the
/// operation's future is dropped mid-flight.
struct PendingGuard<'a> {
    engine: &'a SyncEngine,
}

impl<'a> PendingGuard<'a> {
    fn new(engine: &'a SyncEngine, name: &str) -> Self {
        engine.set_pending(name);
        Self { engine }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.engine.clear_pending();
    }
}

/// User-facing VPN control operations.
#[derive(Clone)]
pub struct Controller {
    engine: Rc<SyncEngine>,
    runner: Rc<dyn CommandRunner>,
    notifier: Rc<dyn Notifier>,
    options: Rc<ControllerOptions>,
}

impl Controller {
    pub fn new(
        engine: Rc<SyncEngine>,
        runner: Rc<dyn CommandRunner>,
        notifier: Rc<dyn Notifier>,
        options: ControllerOptions,
    ) -> Self {
        Self {
            engine,
            runner,
            notifier,
            options: Rc::new(options),
        }
    }

    pub fn engine(&self) -> &Rc<SyncEngine> {
        &self.engine
    }

    /// Bring `name` up unless it is already active or already being
    /// brought up.
    pub async fn connect(&self, name: &str) -> Result<Outcome> {
        let snapshot = self.engine.snapshot();
        if snapshot.is_active(name) || snapshot.is_connecting(name) {
            debug!("VPN: {} already connected or connecting", name);
            return Ok(Outcome::Unchanged);
        }
        self.run(Action::Up, name).await
    }

    /// Take `name` down if it is active. Rejected while any operation is
    /// pending, including a connect of `name` itself.
    pub async fn disconnect(&self, name: &str) -> Result<Outcome> {
        let snapshot = self.engine.snapshot();
        if snapshot.pending.is_none() && !snapshot.is_active(name) {
            debug!("VPN: {} not connected", name);
            return Ok(Outcome::Unchanged);
        }
        self.run(Action::Down, name).await
    }

    /// Disconnect `name` if active, connect it otherwise.
    pub async fn toggle(&self, name: &str) -> Result<Outcome> {
        if self.engine.snapshot().is_active(name) {
            self.disconnect(name).await
        } else {
            self.connect(name).await
        }
    }

    /// Force a rebuild of the snapshot from the manager.
    pub fn refresh(&self) {
        self.engine.reconcile();
    }

    async fn run(&self, action: Action, name: &str) -> Result<Outcome> {
        if let Some(pending) = self.engine.pending() {
            debug!(
                "VPN: ignoring {} of {} while {} is in progress",
                action.verb(),
                name,
                pending
            );
            return Ok(Outcome::Busy);
        }

        let command = action.command(&self.options.tool, name);
        let guard = PendingGuard::new(&self.engine, name);
        info!("VPN: running {}", command);

        match self.runner.run(&command).await {
            Ok(_stdout) => {
                self.engine.reconcile();
                drop(guard);
                self.notify(&action.success_message(name));
                Ok(Outcome::Completed)
            }
            Err(failure) => {
                drop(guard);
                warn!("VPN: {} failed: {}", command, failure);
                self.notify(&action.failure_message(name, &failure));
                Err(Error::Command {
                    action: action.verb(),
                    target: name.to_string(),
                    failure,
                })
            }
        }
    }

    fn notify(&self, body: &str) {
        if self.options.notifications {
            self.notifier.notify(&self.options.summary, body);
        }
    }
}
