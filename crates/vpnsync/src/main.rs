//! vpnsync - VPN connection state for NetworkManager
//!
//! Prints or follows the VPN snapshot kept by the sync engine, and brings
//! VPN profiles up and down through the configured activation tool.

mod output;
mod services;

use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

use vpnsync_core::vpn::ControllerOptions;
use vpnsync_core::{
    Config, ConnectionManager, Controller, Outcome, SyncEngine, VpnSnapshot, VpnTypes, logging,
};

use services::network_manager::{self, NetworkManagerClient};
use services::notifications::DesktopNotifier;
use services::process::ProcessRunner;

/// vpnsync - VPN connection state for NetworkManager
#[derive(Parser, Debug)]
#[command(name = "vpnsync", version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (uses XDG lookup if not specified)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print example configuration and exit
    #[arg(long)]
    print_example_config: bool,

    /// Validate configuration and exit (returns non-zero on errors)
    #[arg(long)]
    check_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current VPN state (default)
    Status {
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the VPN state every time it changes, until interrupted
    Watch {
        /// Print one JSON snapshot per line
        #[arg(long)]
        json: bool,
    },
    /// Bring a VPN connection up
    Connect {
        /// Connection name as shown by `status`
        name: String,
    },
    /// Take a VPN connection down
    Disconnect {
        /// Connection name as shown by `status`
        name: String,
    },
    /// Disconnect the connection if it is active, connect it otherwise
    Toggle {
        /// Connection name as shown by `status`
        name: String,
    },
}

#[derive(Debug, Clone, Copy)]
enum Control {
    Connect,
    Disconnect,
    Toggle,
}

fn main() -> ExitCode {
    let args = Args::parse();

    logging::init(args.verbose);

    // --print-example-config: print the example config with comments
    if args.print_example_config {
        print!("{}", vpnsync_core::config::DEFAULT_CONFIG_TOML);
        return ExitCode::SUCCESS;
    }

    // If --config is specified, it must exist and be valid (no fallback)
    let load_result = match Config::find_and_load(args.config.as_deref()) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(ref source) = load_result.source {
        info!("Loaded configuration from {:?}", source);
    } else if load_result.used_defaults {
        debug!("Using default configuration (no config file found)");
    }

    let config = load_result.config;

    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    if args.check_config {
        if let Some(ref source) = load_result.source {
            println!("Configuration valid: {}", source.display());
        } else {
            println!("Configuration valid (using defaults)");
        }
        println!("{}", config.summary());
        return ExitCode::SUCCESS;
    }

    let command = args.command.unwrap_or(Command::Status { json: false });
    let session = Session::start(&config);

    match command {
        Command::Status { json } => {
            print_snapshot(&session.engine.snapshot(), json);
            ExitCode::SUCCESS
        }
        Command::Watch { json } => session.watch(json),
        Command::Connect { name } => session.control(Control::Connect, &name),
        Command::Disconnect { name } => session.control(Control::Disconnect, &name),
        Command::Toggle { name } => session.control(Control::Toggle, &name),
    }
}

/// Engine bound to the system's NetworkManager, with a controller on top.
struct Session {
    bus: Option<gio::DBusConnection>,
    engine: Rc<SyncEngine>,
    controller: Controller,
}

impl Session {
    fn start(config: &Config) -> Self {
        let bus = match system_bus() {
            Ok(bus) => Some(bus),
            Err(e) => {
                warn!("VPN: {:#}", e);
                None
            }
        };

        let engine = SyncEngine::new(VpnTypes::new(&config.vpn.types));
        engine.bind(bus.as_ref().and_then(manager_on));

        let controller = Controller::new(
            engine.clone(),
            Rc::new(ProcessRunner),
            Rc::new(DesktopNotifier::session()),
            ControllerOptions::from_config(config),
        );

        Self {
            bus,
            engine,
            controller,
        }
    }

    /// Follow the snapshot until SIGINT/SIGTERM.
    fn watch(&self, json: bool) -> ExitCode {
        let main_loop = glib::MainLoop::new(None, false);

        let listener = self
            .engine
            .subscribe(move |snapshot| print_snapshot(snapshot, json));

        // Rebind whenever NetworkManager restarts.
        let engine = Rc::downgrade(&self.engine);
        let _service_watch = self.bus.as_ref().and_then(|bus| {
            network_manager::watch_service(bus, move |client| {
                if let Some(engine) = engine.upgrade() {
                    engine.on_manager_replaced(client.map(|c| c as Rc<dyn ConnectionManager>));
                }
            })
        });

        for signum in [libc::SIGINT, libc::SIGTERM] {
            let main_loop = main_loop.clone();
            glib::unix_signal_add_local(signum, move || {
                debug!("Received signal {}, exiting", signum);
                main_loop.quit();
                glib::ControlFlow::Break
            });
        }

        main_loop.run();

        self.engine.unsubscribe(listener);
        self.engine.teardown();
        ExitCode::SUCCESS
    }

    /// Run one control operation to completion on the default main context.
    fn control(&self, control: Control, name: &str) -> ExitCode {
        if self.engine.snapshot().find(name).is_none() {
            warn!("VPN: no VPN connection named '{}' is known", name);
        }

        let controller = self.controller.clone();
        let result = glib::MainContext::default().block_on(async move {
            match control {
                Control::Connect => controller.connect(name).await,
                Control::Disconnect => controller.disconnect(name).await,
                Control::Toggle => controller.toggle(name).await,
            }
        });

        let snapshot = self.engine.snapshot();
        self.engine.teardown();

        match result {
            Ok(Outcome::Completed) => {
                let state = snapshot
                    .find(name)
                    .map(|c| snapshot.state_text(c))
                    .unwrap_or("Disconnected");
                println!("{}: {}", name, state);
                ExitCode::SUCCESS
            }
            Ok(Outcome::Unchanged) => {
                let state = if snapshot.is_active(name) {
                    "already connected"
                } else {
                    "not connected"
                };
                println!("{}: {}", name, state);
                ExitCode::SUCCESS
            }
            Ok(Outcome::Busy) => {
                eprintln!("Error: another VPN operation is in progress");
                ExitCode::FAILURE
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        }
    }
}

fn system_bus() -> anyhow::Result<gio::DBusConnection> {
    gio::bus_get_sync(gio::BusType::System, None::<&gio::Cancellable>)
        .context("failed to connect to the system bus")
}

fn manager_on(bus: &gio::DBusConnection) -> Option<Rc<dyn ConnectionManager>> {
    NetworkManagerClient::on_bus(bus).map(|c| c as Rc<dyn ConnectionManager>)
}

fn print_snapshot(snapshot: &VpnSnapshot, json: bool) {
    if json {
        println!("{}", output::render_json(snapshot));
    } else {
        println!("{}", output::render_text(snapshot));
    }
}
