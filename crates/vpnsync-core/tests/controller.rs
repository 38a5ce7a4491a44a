//! Controller operations driven through local executors.

mod support;

use std::cell::RefCell;
use std::rc::Rc;

use futures::FutureExt;
use futures::executor::{LocalPool, block_on};
use futures::task::LocalSpawnExt;

use support::{ACTIVATED, ACTIVATING, Harness};
use vpnsync_core::vpn::ControllerOptions;
use vpnsync_core::{CommandFailure, ConnectionState, Error, Outcome, Result};

fn with_corp_vpn(active: bool) -> Harness {
    Harness::new(|m| {
        let corp = m.insert_connection("corp-vpn", "vpn");
        m.insert_connection("home-wg", "wireguard");
        if active {
            m.insert_active(&corp, ACTIVATED, &["tun0"]);
        }
    })
}

type Slot = Rc<RefCell<Option<Result<Outcome>>>>;

/// Spawn `connect(name)` on `pool` and return where its result lands.
fn spawn_connect(pool: &LocalPool, h: &Harness, name: &'static str) -> Slot {
    let slot: Slot = Rc::new(RefCell::new(None));
    let out = slot.clone();
    let controller = h.controller.clone();
    pool.spawner()
        .spawn_local(async move {
            let result = controller.connect(name).await;
            *out.borrow_mut() = Some(result);
        })
        .unwrap();
    slot
}

#[test]
fn test_connect_when_active_runs_nothing() {
    let h = with_corp_vpn(true);

    let outcome = block_on(h.controller.connect("corp-vpn")).unwrap();

    assert_eq!(outcome, Outcome::Unchanged);
    assert!(h.runner.commands().is_empty());
    assert!(h.notifier.sent().is_empty());
}

#[test]
fn test_connect_success() {
    let h = with_corp_vpn(false);
    h.simulate_tool(ACTIVATED);

    let outcome = block_on(h.controller.connect("corp-vpn")).unwrap();

    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(h.runner.commands(), ["nmcli connection up corp-vpn"]);
    assert_eq!(
        h.notifier.sent(),
        [("VPN".to_string(), "Connected to corp-vpn".to_string())]
    );

    let snapshot = h.engine.snapshot();
    assert_eq!(snapshot.pending, None);
    assert_eq!(snapshot.active.as_deref(), Some("corp-vpn"));
    assert_eq!(snapshot.state_text(&snapshot.connections[0]), "Connected");

    // The pending marker was published while the command ran.
    assert!(
        h.published
            .borrow()
            .iter()
            .any(|s| s.pending.as_deref() == Some("corp-vpn"))
    );
}

#[test]
fn test_failure_clears_pending_and_allows_retry() {
    let h = with_corp_vpn(false);
    h.runner
        .fail_with(CommandFailure::new(Some(4), "Timeout expired"));

    let err = block_on(h.controller.connect("corp-vpn")).unwrap_err();
    match &err {
        Error::Command { action, target, failure } => {
            assert_eq!(*action, "connect");
            assert_eq!(target, "corp-vpn");
            assert_eq!(failure.status, Some(4));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(h.engine.snapshot().pending, None);
    assert_eq!(
        h.notifier.bodies(),
        ["Failed to connect to corp-vpn: Timeout expired (exit status 4)"]
    );

    // A second attempt is not swallowed as "already pending".
    h.runner.succeed();
    let outcome = block_on(h.controller.connect("corp-vpn")).unwrap();
    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(h.runner.commands().len(), 2);
}

#[test]
fn test_toggle_when_active_disconnects() {
    let h = with_corp_vpn(true);
    h.simulate_tool(ACTIVATED);

    let outcome = block_on(h.controller.toggle("corp-vpn")).unwrap();

    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(h.runner.commands(), ["nmcli connection down corp-vpn"]);
    assert_eq!(h.notifier.bodies(), ["Disconnected from corp-vpn"]);
    assert_eq!(h.engine.snapshot().active, None);
    assert_eq!(h.engine.monitored_count(), 0);
}

#[test]
fn test_toggle_when_inactive_connects() {
    let h = with_corp_vpn(false);

    block_on(h.controller.toggle("home-wg")).unwrap();

    assert_eq!(h.runner.commands(), ["nmcli connection up home-wg"]);
}

#[test]
fn test_disconnect_when_inactive_is_noop() {
    let h = with_corp_vpn(false);

    let outcome = block_on(h.controller.disconnect("corp-vpn")).unwrap();

    assert_eq!(outcome, Outcome::Unchanged);
    assert!(h.runner.commands().is_empty());
}

#[test]
fn test_disconnect_during_pending_connect_is_rejected() {
    let h = with_corp_vpn(false);
    h.simulate_tool(ACTIVATING);
    h.runner.hold();

    let mut pool = LocalPool::new();
    let slot = spawn_connect(&pool, &h, "corp-vpn");
    pool.run_until_stalled();
    assert_eq!(h.engine.snapshot().pending.as_deref(), Some("corp-vpn"));

    let outcome = block_on(h.controller.disconnect("corp-vpn")).unwrap();
    assert_eq!(outcome, Outcome::Busy);
    assert_eq!(h.runner.commands(), ["nmcli connection up corp-vpn"]);

    h.runner.finish(Ok(String::new()));
    pool.run_until_stalled();
    assert!(matches!(*slot.borrow(), Some(Ok(Outcome::Completed))));
    assert_eq!(h.engine.snapshot().pending, None);
}

#[test]
fn test_second_connect_while_pending() {
    let h = with_corp_vpn(false);
    h.runner.hold();

    let mut pool = LocalPool::new();
    let _slot = spawn_connect(&pool, &h, "corp-vpn");
    pool.run_until_stalled();

    // Same target: already connecting. Other target: busy.
    let same = block_on(h.controller.connect("corp-vpn")).unwrap();
    let other = block_on(h.controller.connect("home-wg")).unwrap();
    assert_eq!(same, Outcome::Unchanged);
    assert_eq!(other, Outcome::Busy);
    assert_eq!(h.runner.commands().len(), 1);

    h.runner.finish(Ok(String::new()));
    pool.run_until_stalled();
}

#[test]
fn test_intermediate_state_published_while_in_flight() {
    let h = with_corp_vpn(false);
    h.simulate_tool(ACTIVATING);
    h.runner.hold();

    let mut pool = LocalPool::new();
    let slot = spawn_connect(&pool, &h, "corp-vpn");
    pool.run_until_stalled();

    let snapshot = h.engine.snapshot();
    assert_eq!(snapshot.connections[0].state, ConnectionState::Activating);
    assert_eq!(snapshot.state_text(&snapshot.connections[0]), "Connecting...");
    assert!(snapshot.is_connecting("corp-vpn"));

    // The manager finishes bringing the tunnel up before the tool exits.
    let active = h.manager.active_for("corp-vpn").unwrap();
    h.manager.set_state(&active.path, ACTIVATED);
    assert_eq!(h.engine.snapshot().active.as_deref(), Some("corp-vpn"));
    assert!(h.engine.snapshot().pending.is_some());

    h.runner.finish(Ok(String::new()));
    pool.run_until_stalled();

    assert!(matches!(*slot.borrow(), Some(Ok(Outcome::Completed))));
    let snapshot = h.engine.snapshot();
    assert_eq!(snapshot.pending, None);
    assert_eq!(snapshot.state_text(&snapshot.connections[0]), "Connected");
}

#[test]
fn test_notifications_disabled() {
    let options = ControllerOptions {
        notifications: false,
        ..ControllerOptions::default()
    };
    let h = Harness::with_options(options, |m| {
        m.insert_connection("corp-vpn", "vpn");
    });
    h.runner.fail_with(CommandFailure::spawn("nmcli: not found"));

    assert!(block_on(h.controller.connect("corp-vpn")).is_err());
    assert!(h.notifier.sent().is_empty());
}

#[test]
fn test_custom_tool_and_summary() {
    let options = ControllerOptions {
        tool: "/usr/local/bin/nmcli".into(),
        notifications: true,
        summary: "Network".into(),
    };
    let h = Harness::with_options(options, |m| {
        m.insert_connection("Office VPN", "vpn");
    });

    block_on(h.controller.connect("Office VPN")).unwrap();

    assert_eq!(
        h.runner.commands(),
        ["/usr/local/bin/nmcli connection up 'Office VPN'"]
    );
    assert_eq!(h.notifier.sent()[0].0, "Network");
}

#[test]
fn test_dropped_operation_clears_pending() {
    let h = with_corp_vpn(false);
    h.runner.hold();

    let mut operation = Box::pin(h.controller.connect("corp-vpn"));
    assert!(operation.as_mut().now_or_never().is_none());
    assert_eq!(h.engine.snapshot().pending.as_deref(), Some("corp-vpn"));

    drop(operation);
    assert_eq!(h.engine.snapshot().pending, None);

    h.runner.succeed();
    let outcome = block_on(h.controller.connect("corp-vpn")).unwrap();
    assert_eq!(outcome, Outcome::Completed);
}

#[test]
fn test_refresh_republishes() {
    let h = with_corp_vpn(true);
    let before = h.published.borrow().len();

    h.controller.refresh();

    assert_eq!(h.published.borrow().len(), before + 1);
    assert_eq!(h.published.borrow().last(), Some(&h.engine.snapshot()));
}
