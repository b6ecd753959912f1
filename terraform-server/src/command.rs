//! Module for command handlers.

use glam::IVec3;

use arcstr::ArcStr;

use terraform::manager::PlaceVerdict;
use terraform::world::World;
use terraform::block;

use crate::world::{ServerWorld, ServerWorldState, TickMode};


/// Describe all the context when a command is executed from the console.
pub struct CommandContext<'a> {
    /// The command parts.
    pub parts: &'a [&'a str],
    /// The world to run the command in.
    pub world: &'a mut ServerWorld,
    /// Lines to print back to the command sender.
    pub output: &'a mut Vec<String>,
}

impl CommandContext<'_> {

    /// Send a line back to the command sender.
    fn send(&mut self, line: impl Into<String>) {
        self.output.push(line.into());
    }

    #[inline]
    fn inner(&mut self) -> (&mut World, &mut ServerWorldState) {
        (&mut self.world.world, &mut self.world.state)
    }

}

/// Handle a command and execute it.
pub fn handle_command(ctx: CommandContext) {

    let Some(&cmd_name) = ctx.parts.first() else {
        ctx.output.push(format!("No command, type help!"));
        return;
    };

    for cmd in COMMANDS {
        if cmd.name == cmd_name {

            let res = (cmd.handler)(CommandContext {
                parts: &ctx.parts[1..],
                world: ctx.world,
                output: ctx.output,
            });

            match res {
                Err(Some(message)) =>
                    ctx.output.push(message),
                Err(None) =>
                    ctx.output.push(format!("Usage: {} {}", cmd.name, cmd.usage)),
                _ => {}
            }

            return;

        }
    }

    ctx.output.push(format!("Unknown command, type help!"));

}

/// The result of a command, if the result is ok, nothing is done, if the result is an
/// error, the optional message is printed, if no message is given the command usage
/// is displayed.
type CommandResult = Result<(), Option<String>>;

/// Describe a command.
struct Command {
    /// The command name.
    name: &'static str,
    /// The command usage.
    usage: &'static str,
    /// The command description for help message.
    description: &'static str,
    /// The command handler to call when executing it.
    handler: fn(CommandContext) -> CommandResult,
}

/// Internal array of commands.
const COMMANDS: &'static [Command] = &[
    Command {
        name: "help",
        usage: "",
        description: "Print all available commands",
        handler: cmd_help
    },
    Command {
        name: "terraform",
        usage: "get|{setWaterLevel <y>}|{setIndex <n>}|{addIndex <n>}",
        description: "Display or change the terraform index and water level",
        handler: cmd_terraform
    },
    Command {
        name: "observer",
        usage: "{add <name> <x> <z>}|{move <name> <x> <z>}|{remove <name>}|list",
        description: "Manage the observers around which chunks are loaded",
        handler: cmd_observer
    },
    Command {
        name: "place",
        usage: "<block> <x> <y> <z>",
        description: "Place a block as an observer would",
        handler: cmd_place
    },
    Command {
        name: "tick",
        usage: "freeze|auto|{step [n]}",
        description: "Control how the terraform engine is being stepped",
        handler: cmd_tick
    },
    Command {
        name: "stats",
        usage: "",
        description: "Display world and engine statistics",
        handler: cmd_stats
    },
    Command {
        name: "save",
        usage: "",
        description: "Save the terraform state now",
        handler: cmd_save
    },
];

fn cmd_help(mut ctx: CommandContext) -> CommandResult {

    ctx.send("=====================================================");

    for cmd in COMMANDS {
        if cmd.usage.is_empty() {
            ctx.send(format!("{}: {}", cmd.name, cmd.description));
        } else {
            ctx.send(format!("{} {}: {}", cmd.name, cmd.usage, cmd.description));
        }
    }

    Ok(())

}

fn cmd_terraform(mut ctx: CommandContext) -> CommandResult {
    match ctx.parts {
        ["get"] => {
            let info = ctx.world.state.manager.info();
            ctx.send(format!("Terraform index: {}", info.terraform_index));
            ctx.send(format!("Water level: {}", info.water_level_y));
            Ok(())
        }
        ["setWaterLevel", y] => {

            let y = y.parse::<i32>()
                .map_err(|_| format!("Error: invalid water level: {y}"))?;

            match ctx.world.state.manager.set_water_level(y) {
                Ok(true) => ctx.send(format!("Water level set to: {y}")),
                Ok(false) => ctx.send(format!("Water level already at: {y}")),
                Err(e) => return Err(Some(format!("Error: {e}"))),
            }

            Ok(())

        }
        ["setIndex", n] => {

            let n = n.parse::<i64>()
                .map_err(|_| format!("Error: invalid terraform index: {n}"))?;

            ctx.world.state.manager.set_terraform_index(n);
            ctx.send(format!("Terraform index set to: {n}"));
            Ok(())

        }
        ["addIndex", n] => {

            let n = n.parse::<i64>()
                .map_err(|_| format!("Error: invalid terraform index delta: {n}"))?;

            let index = ctx.world.state.manager.add_terraform_index(n);
            ctx.send(format!("Terraform index set to: {index}"));
            Ok(())

        }
        _ => Err(None)
    }
}

/// Internal function to parse the horizontal position of an observer.
fn parse_xz(x: &str, z: &str) -> Result<(f64, f64), Option<String>> {
    match (x.parse::<f64>(), z.parse::<f64>()) {
        (Ok(x), Ok(z)) if x.is_finite() && z.is_finite() => Ok((x, z)),
        _ => Err(Some(format!("Error: invalid position: {x} {z}"))),
    }
}

fn cmd_observer(mut ctx: CommandContext) -> CommandResult {
    match ctx.parts {
        ["add", name, x, z] => {
            let (x, z) = parse_xz(x, z)?;
            if !ctx.world.add_observer(ArcStr::from(*name), x, z) {
                return Err(Some(format!("Error: observer already exists: {name}")));
            }
            let sync = ctx.world.state.manager.on_observer_joined();
            ctx.send(format!("Observer {name} added, terraform index: {}", sync.terraform_index));
            Ok(())
        }
        ["move", name, x, z] => {
            let (x, z) = parse_xz(x, z)?;
            if !ctx.world.move_observer(name, x, z) {
                return Err(Some(format!("Error: unknown observer: {name}")));
            }
            ctx.send(format!("Observer {name} moved to: {x} {z}"));
            Ok(())
        }
        ["remove", name] => {
            if !ctx.world.remove_observer(name) {
                return Err(Some(format!("Error: unknown observer: {name}")));
            }
            ctx.send(format!("Observer {name} removed"));
            Ok(())
        }
        ["list"] => {
            let mut lines = Vec::new();
            for (name, &id) in &ctx.world.state.observers {
                if let Some(pos) = ctx.world.world.get_observer(id) {
                    lines.push(format!("{name} (#{id}): {:.1} {:.1}", pos.x, pos.z));
                }
            }
            lines.sort();
            ctx.send(format!("Observers: {}", lines.len()));
            ctx.output.extend(lines);
            Ok(())
        }
        _ => Err(None)
    }
}

fn cmd_place(mut ctx: CommandContext) -> CommandResult {

    let [block_raw, x, y, z] = ctx.parts else {
        return Err(None);
    };

    let id = match *block_raw {
        "water" => block::WATER_STILL,
        name => block::from_name(name)
            .or_else(|| name.parse::<u8>().ok())
            .ok_or_else(|| format!("Error: unknown block: {name}"))?,
    };

    let pos = match (x.parse::<i32>(), y.parse::<i32>(), z.parse::<i32>()) {
        (Ok(x), Ok(y), Ok(z)) => IVec3::new(x, y, z),
        _ => return Err(Some(format!("Error: invalid position: {x} {y} {z}"))),
    };

    let (world, state) = ctx.inner();

    if world.set_block(pos, id, 0).is_none() {
        return Err(Some(format!("Error: chunk not loaded at: {pos}")));
    }

    match state.manager.on_block_placed(block::classify(id, 0)) {
        PlaceVerdict::Allow => {
            ctx.send(format!("Placed {} at: {pos}", block::name(id)));
        }
        PlaceVerdict::Revert => {
            world.set_block(pos, block::AIR, 0);
            ctx.send(format!("Placement of {} at {pos} reverted, terraform index too low", block::name(id)));
        }
    }

    Ok(())

}

fn cmd_tick(mut ctx: CommandContext) -> CommandResult {
    match ctx.parts {
        ["freeze"] => {
            ctx.send("Engine stepping: freeze");
            ctx.world.state.tick_mode = TickMode::Manual(0);
            Ok(())
        }
        ["auto"] => {
            ctx.send("Engine stepping: auto");
            ctx.world.state.tick_mode = TickMode::Auto;
            Ok(())
        }
        ["step"] => {
            ctx.send("Engine stepping: step");
            ctx.world.state.tick_mode = TickMode::Manual(1);
            Ok(())
        }
        ["step", step_count] => {

            let step_count = step_count.parse::<u32>()
                .map_err(|_| format!("Error: invalid step count: {step_count}"))?;

            ctx.send(format!("Engine stepping: {step_count} steps"));
            ctx.world.state.tick_mode = TickMode::Manual(step_count);
            Ok(())

        }
        _ => return Err(None)
    }
}

fn cmd_stats(mut ctx: CommandContext) -> CommandResult {

    let (world, state) = ctx.inner();
    let queue = state.manager.engine().queue();
    let sections = world.iter_chunks()
        .filter_map(|(cx, cz)| world.get_chunk(cx, cz))
        .map(|chunk| chunk.allocated_section_count())
        .sum::<usize>();

    let lines = [
        format!("World: {}, time: {}, tick mode: {:?}", state.name, state.time, state.tick_mode),
        format!("Tick duration: {:.1} ms, interval: {:.1} ms",
            state.tick_duration * 1000.0, state.tick_interval * 1000.0),
        format!("Chunks: {} loaded ({} sections), {} stashed, {} reconciled",
            world.get_chunk_count(), sections, state.stash_count(), state.manager.state().revisions().len()),
        format!("Queue: {} tasks, {} priority, {} normal",
            queue.len(), queue.priority_len(), queue.normal_len()),
        format!("Observers: {}", world.get_observer_count()),
        format!("Last step: {:?}", state.last_step),
        format!("Total: {:?}", state.total_step),
    ];

    ctx.output.extend(lines);
    Ok(())

}

fn cmd_save(mut ctx: CommandContext) -> CommandResult {
    if ctx.world.save() {
        ctx.send("Terraform state saved");
        Ok(())
    } else {
        Err(Some(format!("Error: failed to save, see logs")))
    }
}
