//! The configuration for the server, given from environment variables and lazy
//! initialized when needed.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::str::FromStr;
use std::env;

use once_cell::race::OnceBool;
use once_cell::sync::OnceCell;

use tracing::warn;

use terraform::water::WaterConfig;


/// Internal function to parse a numeric environment variable, falling back to the
/// default value if absent or invalid.
fn parse_env<T: FromStr + Copy>(name: &str, default: T) -> T {
    parse_var(name, env::var(name).ok(), default)
}

fn parse_var<T: FromStr + Copy>(name: &str, raw: Option<String>, default: T) -> T {
    match raw {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!("invalid value for {name}: {raw:?}, using default");
                default
            }
        },
        None => default,
    }
}

/// Return the water engine configuration.
///
/// - `TERRAFORM_CHUNKS_PER_STEP`: number of chunk tasks per tick (default 2).
/// - `TERRAFORM_PRIORITY_RADIUS`: chunk radius around observers (default 2).
/// - `TERRAFORM_SECTIONS_PER_CALL`: sections scanned per chunk task (default 8).
pub fn water_config() -> WaterConfig {
    static ENV: OnceCell<WaterConfig> = OnceCell::new();
    *ENV.get_or_init(|| read_water_config(|name| env::var(name).ok()))
}

/// Build the water engine configuration from the given variable lookup. Both the
/// chunks per step and the sections per call are at least 1, so the engine always
/// makes progress.
fn read_water_config(var: impl Fn(&str) -> Option<String>) -> WaterConfig {
    let default = WaterConfig::default();
    let get = |name: &str, default: usize| parse_var(name, var(name), default);
    WaterConfig {
        chunks_per_step: get("TERRAFORM_CHUNKS_PER_STEP", default.chunks_per_step).max(1),
        priority_radius: parse_var("TERRAFORM_PRIORITY_RADIUS", var("TERRAFORM_PRIORITY_RADIUS"), default.priority_radius),
        sections_per_call: get("TERRAFORM_SECTIONS_PER_CALL", default.sections_per_call).max(1),
    }
}

/// Return the view distance, in chunks, around each observer where chunks are loaded.
///
/// To change it, set `TERRAFORM_VIEW_DISTANCE` (default 4).
pub fn view_distance() -> u8 {
    static ENV: OnceCell<u8> = OnceCell::new();
    *ENV.get_or_init(|| parse_env("TERRAFORM_VIEW_DISTANCE", 4))
}

/// Return the directory where the terraform state is saved.
///
/// To change it, set `TERRAFORM_DATA_DIR` (default `world`).
pub fn data_dir() -> &'static Path {
    static ENV: OnceCell<PathBuf> = OnceCell::new();
    ENV.get_or_init(|| {
        env::var_os("TERRAFORM_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("world"))
    })
}

/// Return true if grass is replaced with dirt in freshly generated chunks.
///
/// To enable this feature, set `TERRAFORM_SURFACE_SWEEP=1`.
pub fn surface_sweep() -> bool {
    static ENV: OnceBool = OnceBool::new();
    ENV.get_or_init(|| {
        env::var_os("TERRAFORM_SURFACE_SWEEP")
            .map(|s| s.as_encoded_bytes() == b"1")
            .unwrap_or(false)
    })
}

/// Return the minimum interval between two saves of a dirty terraform state.
///
/// To change it, set `TERRAFORM_SAVE_INTERVAL` in seconds (default 30).
pub fn save_interval() -> Duration {
    static ENV: OnceCell<Duration> = OnceCell::new();
    *ENV.get_or_init(|| Duration::from_secs(parse_env("TERRAFORM_SAVE_INTERVAL", 30)))
}
