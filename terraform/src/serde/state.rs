//! Terraform state file, a gzip compressed NBT compound stored next to the world.

use std::io::{self, Read, Write, BufReader, BufWriter};
use std::path::Path;
use std::fs::{self, File};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use thiserror::Error;
use tracing::{instrument, debug, warn};

use crate::state::{TerraformState, RevisionStore, DEFAULT_WATER_LEVEL};

use super::nbt::{self, Nbt, NbtCompound, NbtError, NbtParseError};


/// Conventional name of the state file within a world directory.
pub const STATE_FILE_NAME: &str = "terraform.dat";

const TERRAFORM_INDEX: &str = "terraform_index";
const WATER_LEVEL_Y: &str = "water_level_y";
const HYDRATION_REVISION: &str = "hydration_revision";
const PROCESSED_CHUNK_KEYS: &str = "processed_chunk_keys";
const PROCESSED_WATER_LEVELS: &str = "processed_water_levels";


/// Encode the given state into its NBT compound.
pub fn to_nbt(state: &TerraformState) -> NbtCompound {

    let (keys, levels) = state.revisions().to_arrays();

    let mut comp = NbtCompound::new();
    comp.insert(TERRAFORM_INDEX, Nbt::Long(state.terraform_index()));
    comp.insert(WATER_LEVEL_Y, Nbt::Int(state.water_level_y()));
    comp.insert(HYDRATION_REVISION, Nbt::Int(state.format_revision()));
    comp.insert(PROCESSED_CHUNK_KEYS, Nbt::LongArray(keys));
    comp.insert(PROCESSED_WATER_LEVELS, Nbt::IntArray(levels));
    comp

}

/// Decode a state from its NBT tag. Missing fields fall back to their defaults, a
/// missing format revision reads as 0 and therefore discards the revision store. The
/// revision store fields are only a cache of progress, so when they have an unexpected
/// type they are discarded with a warning. Only a malformed index or water level is an
/// error.
pub fn from_nbt(tag: &Nbt) -> Result<TerraformState, NbtParseError> {

    let comp = tag.parse().as_compound()?;

    let terraform_index = match comp.get_opt(TERRAFORM_INDEX) {
        Some(parse) => parse.as_long()?,
        None => 0,
    };

    let water_level_y = match comp.get_opt(WATER_LEVEL_Y) {
        Some(parse) => parse.as_int()?,
        None => DEFAULT_WATER_LEVEL,
    };

    let format_revision = match comp.get_opt(HYDRATION_REVISION) {
        Some(parse) => discard_malformed(parse.as_int(), 0),
        None => 0,
    };

    let keys = match comp.get_opt(PROCESSED_CHUNK_KEYS) {
        Some(parse) => discard_malformed(parse.as_long_array(), &[][..]),
        None => &[][..],
    };

    let levels = match comp.get_opt(PROCESSED_WATER_LEVELS) {
        Some(parse) => discard_malformed(parse.as_int_array(), &[][..]),
        None => &[][..],
    };

    if keys.len() != levels.len() {
        warn!("revision store arrays have different lengths ({} keys, {} levels), truncating",
            keys.len(), levels.len());
    }

    Ok(TerraformState::from_parts(
        terraform_index,
        water_level_y,
        RevisionStore::from_arrays(keys, levels),
        format_revision))

}

/// Internal function to replace a malformed field value with the given default.
fn discard_malformed<T>(res: Result<T, NbtParseError>, default: T) -> T {
    res.unwrap_or_else(|err| {
        warn!("discarding malformed field: {err}");
        default
    })
}

/// Read a gzip compressed state from the given reader.
pub fn from_reader(reader: impl Read) -> Result<TerraformState, StateError> {
    let tag = nbt::from_reader(GzDecoder::new(reader))?;
    Ok(from_nbt(&tag)?)
}

/// Write the given state gzip compressed to the given writer.
pub fn to_writer(writer: impl Write, state: &TerraformState) -> Result<(), StateError> {
    let mut encoder = GzEncoder::new(writer, Compression::default());
    nbt::to_writer(&mut encoder, &Nbt::Compound(to_nbt(state)))?;
    encoder.finish()?;
    Ok(())
}

/// Load the state from the given file path, a missing file is not an error and return
/// a default state.
#[instrument(level = "debug")]
pub fn load(path: &Path) -> Result<TerraformState, StateError> {
    match File::open(path) {
        Ok(file) => {
            let state = from_reader(BufReader::new(file))?;
            debug!("loaded state: index {}, water level {}, {} revisions",
                state.terraform_index(), state.water_level_y(), state.revisions().len());
            Ok(state)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!("no state file, using default state");
            Ok(TerraformState::new())
        }
        Err(err) => Err(StateError::Io(err)),
    }
}

/// Save the state to the given file path, the state is first written to a temporary
/// sibling file that is then renamed over the previous one.
#[instrument(level = "debug", skip(state))]
pub fn save(path: &Path, state: &TerraformState) -> Result<(), StateError> {

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("dat.tmp");
    let mut writer = BufWriter::new(File::create(&tmp_path)?);
    to_writer(&mut writer, state)?;
    writer.flush()?;
    drop(writer);

    fs::rename(&tmp_path, path)?;
    Ok(())

}


/// Error type returned when loading or saving the state.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("nbt: {0}")]
    Nbt(#[from] NbtError),
    #[error("nbt parse: {0}")]
    NbtParse(#[from] NbtParseError),
}
