//! A headless server running the terraform water engine against a generated world.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod console;
pub mod terrain;

// The world streams chunks and drives the engine, commands act on it.
pub mod world;
pub mod command;

// This module link the previous ones to make a fully functional server.
pub mod server;


pub fn main() {

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    let running = Arc::new(AtomicBool::new(true));
    let handler_running = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || handler_running.store(false, Ordering::Relaxed)) {
        warn!("failed to set interrupt handler: {e}");
    }

    let mut server = match server::Server::new() {
        Ok(server) => server,
        Err(e) => {
            error!("failed to start server: {e}");
            return;
        }
    };

    info!("server started, type help for the list of commands");

    while running.load(Ordering::Relaxed) {
        server.tick_padded();
    }

    info!("stopping server...");
    server.stop();

}
