//! A thread-based console reader, lines typed on the standard input are forwarded to
//! the server tick loop through a channel.

use std::io::{self, BufRead};
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

use tracing::{debug, warn};


/// Handle to the console reader thread.
pub struct Console {
    /// Receiver of lines read by the worker.
    line_receiver: Receiver<String>,
    /// Set to true when the worker has exited, because standard input has been closed.
    closed: bool,
}

impl Console {

    /// Spawn the console worker reading from the standard input.
    pub fn new() -> Self {

        let (line_sender, line_receiver) = unbounded();

        let spawned = thread::Builder::new()
            .name("Console Worker".to_string())
            .spawn(move || run_worker(line_sender));

        // The console is optional, the server can still run without it.
        let closed = match spawned {
            Ok(_) => false,
            Err(e) => {
                warn!("failed to spawn console worker: {e}");
                true
            }
        };

        Self { line_receiver, closed }

    }

    /// Poll the next non-empty command line typed in the console, if any.
    pub fn poll(&mut self) -> Option<String> {

        if self.closed {
            return None;
        }

        loop {
            match self.line_receiver.try_recv() {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => return Some(line),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    debug!("console input closed");
                    self.closed = true;
                    return None;
                }
            }
        }

    }

}

/// Worker loop, returning when the standard input is closed or the handle is dropped.
fn run_worker(line_sender: Sender<String>) {
    for line in io::stdin().lock().lines() {
        match line {
            Ok(line) => {
                if line_sender.send(line).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("failed to read console: {e}");
                break;
            }
        }
    }
}
