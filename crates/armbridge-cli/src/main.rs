//! `armbridge` – bridge between the message bus and the arm controller.
//!
//! ```text
//! armbridge <serial_port>
//! ```
//!
//! 1. Opens the serial port and waits for the controller to settle.
//! 2. Starts the bridge: bus commands become wire commands, controller
//!    status lines update the arm status, and joint states plus status are
//!    published every 100 ms.
//! 3. Serves the rosbridge-style WebSocket gateway (port 9090 by default).
//! 4. Shuts down cleanly on Ctrl-C or SIGTERM.

mod args;
mod config;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use armbridge_hal::SerialLink;
use armbridge_middleware::{EventBus, RosbridgeGateway};
use armbridge_runtime::{Bridge, init_tracing};

fn main() -> ExitCode {
    // Checked before anything touches the device or the bus.
    let port = match args::parse_args(std::env::args()) {
        Ok(args) => args.serial_port,
        Err((message, code)) => {
            println!("{}", message.trim_end());
            return code;
        }
    };

    let _tracing = init_tracing("armbridge");

    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(error = %e, path = %config::config_path().display(), "ignoring config file; using defaults");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    println!(
        "{} {} @ {} baud",
        "armbridge".bold().cyan(),
        port.bold(),
        cfg.baud_rate
    );

    let link = match SerialLink::open(&cfg.serial(&port)) {
        Ok(link) => link,
        Err(e) => {
            error!(error = %e, "could not open serial port");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "could not start async runtime");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(run(link, cfg))
}

async fn run(link: SerialLink, cfg: config::Config) -> ExitCode {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let handler_tx = Arc::clone(&shutdown_tx);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = handler_tx.send(true);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; listening for Ctrl-C only");
        let tx = Arc::clone(&shutdown_tx);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(true);
            }
        });
    }

    let bus = Arc::new(EventBus::default());
    let running = match Bridge::start(link, Arc::clone(&bus), cfg.bridge()) {
        Ok(running) => running,
        Err(e) => {
            error!(error = %e, "could not start serial threads");
            return ExitCode::FAILURE;
        }
    };

    let gateway = (cfg.gateway_port != 0).then(|| {
        let addr = SocketAddr::from(([0, 0, 0, 0], cfg.gateway_port));
        println!("  gateway  {}", format!("ws://{addr}").dimmed());
        let gateway = RosbridgeGateway::new(Arc::clone(&bus));
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = gateway.run(addr, shutdown).await {
                error!(error = %e, "gateway stopped");
            }
        })
    });

    println!("  {}", "ready – Ctrl-C to stop".green());

    // The sender lives in this scope, so this only returns on a signal.
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
    info!("shutting down");

    running.shutdown().await;
    if let Some(gateway) = gateway {
        let _ = gateway.await;
    }

    println!("  {}", "stopped".green());
    ExitCode::SUCCESS
}
