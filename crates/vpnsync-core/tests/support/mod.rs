//! In-memory connection manager, command runner and notifier for tests.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::{self, LocalBoxFuture};

use vpnsync_core::vpn::{ControllerOptions, EventHandler, StateChangedHandler};
use vpnsync_core::{
    ActiveConnectionRecord, CommandFailure, CommandRunner, ConnectionManager, ConnectionRecord,
    Controller, Error, ManagerEvent, Notifier, Result, SubscriptionToken, SyncEngine,
    ToolCommand, VpnSnapshot, VpnTypes,
};

pub const ACTIVATING: u32 = 1;
pub const ACTIVATED: u32 = 2;
pub const DEACTIVATING: u32 = 3;

/// Connection manager whose state tests edit directly. Mutators emit the
/// same events a real manager would.
#[derive(Default)]
pub struct FakeManager {
    connections: RefCell<Vec<ConnectionRecord>>,
    active: RefCell<Vec<ActiveConnectionRecord>>,
    event_handlers: RefCell<Vec<(SubscriptionToken, Rc<dyn Fn(ManagerEvent)>)>>,
    state_handlers: RefCell<Vec<(SubscriptionToken, String, Rc<dyn Fn()>)>>,
    next_id: Cell<u64>,
    next_object: Cell<u64>,
    failing: Cell<bool>,
    /// Activated behind the engine's back while it registers for events.
    late_activation: RefCell<Option<(ConnectionRecord, u32)>>,
}

impl FakeManager {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    fn object_path(&self, kind: &str) -> String {
        self.next_object.set(self.next_object.get() + 1);
        format!("/org/freedesktop/NetworkManager/{}/{}", kind, self.next_object.get())
    }

    fn token(&self) -> SubscriptionToken {
        self.next_id.set(self.next_id.get() + 1);
        SubscriptionToken::new(self.next_id.get())
    }

    /// Add a profile without emitting anything (state before binding).
    pub fn insert_connection(&self, id: &str, connection_type: &str) -> ConnectionRecord {
        let record = ConnectionRecord::new(self.object_path("Settings"), id, connection_type);
        self.connections.borrow_mut().push(record.clone());
        record
    }

    /// Add an active connection without emitting anything.
    pub fn insert_active(
        &self,
        connection: &ConnectionRecord,
        state: u32,
        devices: &[&str],
    ) -> ActiveConnectionRecord {
        let record =
            ActiveConnectionRecord::new(self.object_path("ActiveConnection"), connection, state, devices);
        self.active.borrow_mut().push(record.clone());
        record
    }

    pub fn add_connection(&self, id: &str, connection_type: &str) -> ConnectionRecord {
        let record = self.insert_connection(id, connection_type);
        self.emit(ManagerEvent::ConnectionAdded);
        record
    }

    pub fn remove_connection(&self, path: &str) {
        self.connections.borrow_mut().retain(|c| c.path != path);
        self.emit(ManagerEvent::ConnectionRemoved);
    }

    pub fn activate(
        &self,
        connection: &ConnectionRecord,
        state: u32,
        devices: &[&str],
    ) -> ActiveConnectionRecord {
        let record = self.insert_active(connection, state, devices);
        self.emit(ManagerEvent::ActiveConnectionAdded(record.clone()));
        record
    }

    pub fn set_state(&self, active_path: &str, state: u32) {
        for active in self.active.borrow_mut().iter_mut() {
            if active.path == active_path {
                active.state = state;
            }
        }
        let handlers: Vec<Rc<dyn Fn()>> = self
            .state_handlers
            .borrow()
            .iter()
            .filter(|(_, path, _)| path == active_path)
            .map(|(_, _, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler();
        }
    }

    pub fn deactivate(&self, active_path: &str) {
        self.active.borrow_mut().retain(|a| a.path != active_path);
        self.emit(ManagerEvent::ActiveConnectionRemoved(ActiveConnectionRecord::removed(
            active_path,
        )));
    }

    /// Active connection backed by the profile called `id`.
    pub fn active_for(&self, id: &str) -> Option<ActiveConnectionRecord> {
        let path = self
            .connections
            .borrow()
            .iter()
            .find(|c| c.id.as_deref() == Some(id))?
            .path
            .clone();
        self.active
            .borrow()
            .iter()
            .find(|a| a.connection_path.as_deref() == Some(path.as_str()))
            .cloned()
    }

    pub fn connection(&self, id: &str) -> Option<ConnectionRecord> {
        self.connections
            .borrow()
            .iter()
            .find(|c| c.id.as_deref() == Some(id))
            .cloned()
    }

    pub fn emit(&self, event: ManagerEvent) {
        let handlers: Vec<Rc<dyn Fn(ManagerEvent)>> = self
            .event_handlers
            .borrow()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(event.clone());
        }
    }

    /// Activate `connection` silently while the next event listener is
    /// being registered, then replay every active connection to it the way
    /// the NetworkManager client catches up.
    pub fn activate_during_registration(&self, connection: &ConnectionRecord, state: u32) {
        *self.late_activation.borrow_mut() = Some((connection.clone(), state));
    }

    /// Make every query fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }

    pub fn event_listener_count(&self) -> usize {
        self.event_handlers.borrow().len()
    }

    pub fn state_listener_count(&self, active_path: &str) -> usize {
        self.state_handlers
            .borrow()
            .iter()
            .filter(|(_, path, _)| path == active_path)
            .count()
    }

    pub fn total_state_listeners(&self) -> usize {
        self.state_handlers.borrow().len()
    }
}

impl ConnectionManager for FakeManager {
    fn connections(&self) -> Result<Vec<ConnectionRecord>> {
        if self.failing.get() {
            return Err(Error::Manager("ListConnections timed out".into()));
        }
        Ok(self.connections.borrow().clone())
    }

    fn active_connections(&self) -> Result<Vec<ActiveConnectionRecord>> {
        if self.failing.get() {
            return Err(Error::Manager("ActiveConnections unavailable".into()));
        }
        Ok(self.active.borrow().clone())
    }

    fn connect_events(&self, handler: EventHandler) -> SubscriptionToken {
        let token = self.token();
        self.event_handlers
            .borrow_mut()
            .push((token, Rc::from(handler)));

        let late = self.late_activation.borrow_mut().take();
        if let Some((connection, state)) = late {
            self.insert_active(&connection, state, &[]);
            let active = self.active.borrow().clone();
            for record in active {
                self.emit(ManagerEvent::ActiveConnectionAdded(record));
            }
        }
        token
    }

    fn connect_state_changed(
        &self,
        active_path: &str,
        handler: StateChangedHandler,
    ) -> SubscriptionToken {
        let token = self.token();
        self.state_handlers
            .borrow_mut()
            .push((token, active_path.to_string(), Rc::from(handler)));
        token
    }

    fn disconnect(&self, token: SubscriptionToken) {
        self.event_handlers.borrow_mut().retain(|(t, _)| *t != token);
        self.state_handlers.borrow_mut().retain(|(t, _, _)| *t != token);
    }
}

enum RunnerMode {
    Succeed,
    Fail(CommandFailure),
    /// Stay pending until [`FakeRunner::finish`].
    Hold,
}

type RunHook = Box<dyn Fn(&ToolCommand)>;
type Pending = oneshot::Sender<std::result::Result<String, CommandFailure>>;

/// Records every command; succeeds, fails, or holds depending on its mode.
pub struct FakeRunner {
    commands: RefCell<Vec<ToolCommand>>,
    mode: RefCell<RunnerMode>,
    held: RefCell<Vec<Pending>>,
    on_run: RefCell<Option<RunHook>>,
}

impl FakeRunner {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            commands: RefCell::new(Vec::new()),
            mode: RefCell::new(RunnerMode::Succeed),
            held: RefCell::new(Vec::new()),
            on_run: RefCell::new(None),
        })
    }

    pub fn fail_with(&self, failure: CommandFailure) {
        *self.mode.borrow_mut() = RunnerMode::Fail(failure);
    }

    pub fn succeed(&self) {
        *self.mode.borrow_mut() = RunnerMode::Succeed;
    }

    pub fn hold(&self) {
        *self.mode.borrow_mut() = RunnerMode::Hold;
    }

    /// Called with each command as it starts, before it completes.
    pub fn on_run<F>(&self, hook: F)
    where
        F: Fn(&ToolCommand) + 'static,
    {
        *self.on_run.borrow_mut() = Some(Box::new(hook));
    }

    /// Complete the oldest held command.
    pub fn finish(&self, result: std::result::Result<String, CommandFailure>) {
        let sender = self.held.borrow_mut().remove(0);
        let _ = sender.send(result);
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.borrow().iter().map(|c| c.to_string()).collect()
    }
}

impl CommandRunner for FakeRunner {
    fn run(
        &self,
        command: &ToolCommand,
    ) -> LocalBoxFuture<'static, std::result::Result<String, CommandFailure>> {
        self.commands.borrow_mut().push(command.clone());
        if let Some(hook) = self.on_run.borrow().as_ref() {
            hook(command);
        }

        match &*self.mode.borrow() {
            RunnerMode::Succeed => future::ready(Ok(String::new())).boxed_local(),
            RunnerMode::Fail(failure) => future::ready(Err(failure.clone())).boxed_local(),
            RunnerMode::Hold => {
                let (tx, rx) = oneshot::channel();
                self.held.borrow_mut().push(tx);
                async move {
                    rx.await
                        .unwrap_or_else(|_| Err(CommandFailure::spawn("runner dropped")))
                }
                .boxed_local()
            }
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: RefCell<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn bodies(&self) -> Vec<String> {
        self.sent.borrow().iter().map(|(_, body)| body.clone()).collect()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.borrow().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, summary: &str, body: &str) {
        self.sent
            .borrow_mut()
            .push((summary.to_string(), body.to_string()));
    }
}

/// Engine bound to a fake manager, plus a controller on top.
pub struct Harness {
    pub manager: Rc<FakeManager>,
    pub engine: Rc<SyncEngine>,
    pub runner: Rc<FakeRunner>,
    pub notifier: Rc<RecordingNotifier>,
    pub controller: Controller,
    pub published: Rc<RefCell<Vec<VpnSnapshot>>>,
}

impl Harness {
    /// Build the harness; `setup` prepares manager state before binding.
    pub fn new<F>(setup: F) -> Self
    where
        F: FnOnce(&FakeManager),
    {
        Self::with_options(ControllerOptions::default(), setup)
    }

    pub fn with_options<F>(options: ControllerOptions, setup: F) -> Self
    where
        F: FnOnce(&FakeManager),
    {
        let manager = FakeManager::new();
        setup(&manager);

        let engine = SyncEngine::new(VpnTypes::default());
        let published = Rc::new(RefCell::new(Vec::new()));
        let sink = published.clone();
        engine.subscribe(move |snapshot: &VpnSnapshot| sink.borrow_mut().push(snapshot.clone()));

        let as_manager: Rc<dyn ConnectionManager> = manager.clone();
        engine.bind(Some(as_manager));

        let runner = FakeRunner::new();
        let notifier = Rc::new(RecordingNotifier::default());
        let controller = Controller::new(engine.clone(), runner.clone(), notifier.clone(), options);

        Self {
            manager,
            engine,
            runner,
            notifier,
            controller,
            published,
        }
    }

    /// Make the runner behave like NetworkManager: `up` activates the named
    /// profile in `state`, `down` removes its active connection.
    pub fn simulate_tool(&self, up_state: u32) {
        let manager = Rc::downgrade(&self.manager);
        self.runner.on_run(move |command| {
            let Some(manager) = manager.upgrade() else {
                return;
            };
            let name = &command.args[2];
            match command.args[1].as_str() {
                "up" => {
                    if let Some(profile) = manager.connection(name) {
                        manager.activate(&profile, up_state, &["tun0"]);
                    }
                }
                "down" => {
                    if let Some(active) = manager.active_for(name) {
                        manager.deactivate(&active.path);
                    }
                }
                _ => {}
            }
        });
    }
}
