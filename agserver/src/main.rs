//! Autoguider daemon entry point
//!
//! Loads the configuration, starts the command server and sweeps status to
//! the SDB until interrupted.

use std::env;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use agserver_lib::config::{constants, load_config};
use agserver_lib::{CommandServer, StatusReporter};
use ngatcil::types::AgsState;

fn main() {
    env_logger::init();

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| constants::DEFAULT_CONFIG_PATH.to_string());

    println!("agserver starting...");
    println!("Loading configuration from: {}", config_path);

    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    println!(
        "Command port {}, TCS at {} (reply {}, guide {}), SDB at {}:{}",
        config.command_port,
        config.tcs_host,
        config.tcs_reply_port,
        config.tcs_guide_port,
        config.sdb_host,
        config.sdb_port
    );

    let reporter = match StatusReporter::new(&config) {
        Ok(reporter) => Arc::new(reporter),
        Err(e) => {
            eprintln!("Error creating status reporter: {}", e);
            process::exit(1);
        }
    };

    let mut server = match CommandServer::start(&config, reporter.clone()) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Error starting command server: {}", e);
            process::exit(1);
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        shutdown_flag.store(true, Ordering::SeqCst);
    }) {
        eprintln!("Error installing signal handler: {}", e);
        process::exit(1);
    }

    if let Err(e) = reporter.set_state(AgsState::Idle) {
        eprintln!("Error initialising status: {}", e);
        process::exit(1);
    }

    println!("agserver initialized, entering main loop...");

    while !shutdown.load(Ordering::SeqCst) && server.is_running() {
        reporter.sweep();
        thread::sleep(constants::SDB_SWEEP_INTERVAL);
    }

    println!("agserver shutting down...");
    if let Err(e) = server.stop() {
        eprintln!("Error during shutdown: {}", e);
        process::exit(1);
    }
    if reporter.set_state(AgsState::Off).is_ok() {
        reporter.sweep();
    }

    println!("agserver shutdown complete");
}
