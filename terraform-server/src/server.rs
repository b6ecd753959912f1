//! The server running the world ticks and dispatching console commands.

use std::time::{Duration, Instant};
use std::fs;
use std::io;

use tracing::{warn, info};

use crate::command::{self, CommandContext};
use crate::console::Console;
use crate::world::ServerWorld;
use crate::config;


/// Target tick duration. Currently 20 TPS, so 50 ms/tick.
const TICK_DURATION: Duration = Duration::from_millis(50);


/// This structure manages a whole server, its world and the console that controls it.
pub struct Server {
    /// The console receiving commands.
    console: Console,
    /// The single world of this server.
    world: ServerWorld,
}

impl Server {

    /// Create the server, ensuring that the data directory exists.
    pub fn new() -> io::Result<Self> {

        let data_dir = config::data_dir();
        fs::create_dir_all(data_dir)?;
        info!("server data directory: {}", data_dir.display());

        Ok(Self {
            console: Console::new(),
            world: ServerWorld::new("overworld"),
        })

    }

    /// Force save this server's world.
    pub fn stop(&mut self) {
        if !self.world.save() {
            warn!("terraform state of the world not saved on stop");
        }
    }

    /// Run a single tick on the server console and world. This function also waits for
    /// this function to approximately last for 50 ms (20 TPS), there is no sleep of the
    /// tick was too long, in such case a warning is logged.
    pub fn tick_padded(&mut self) {

        let start = Instant::now();
        self.tick();
        let elapsed = start.elapsed();

        if let Some(missing) = TICK_DURATION.checked_sub(elapsed) {
            std::thread::sleep(missing);
        } else {
            warn!("tick too long {:?}, expected {:?}", elapsed, TICK_DURATION);
        }

    }

    /// Run a single tick on the server console and world.
    pub fn tick(&mut self) {

        // Start by handling every command typed since the last tick.
        while let Some(line) = self.console.poll() {
            self.handle_line(&line);
        }

        self.world.tick();

    }

    fn handle_line(&mut self, line: &str) {

        let line = line.trim();
        let line = line.strip_prefix('/').unwrap_or(line);
        let parts = line.split_whitespace().collect::<Vec<_>>();

        let mut output = Vec::new();
        command::handle_command(CommandContext {
            parts: &parts,
            world: &mut self.world,
            output: &mut output,
        });

        for line in output {
            println!("{line}");
        }

    }

}
