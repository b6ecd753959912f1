//! Block enumeration and functions to query their metadata state.

// Block specific functions for their metadata.
pub mod waterlog;
pub mod fluid;

use crate::voxel::Voxel;


/// Internal macro to easily define blocks registry.
macro_rules! blocks {
    (
        $($ident:ident / $id:literal : $name:literal),* $(,)?
    ) => {

        static NAMES: [&'static str; 256] = {
            let mut arr = [""; 256];
            $(arr[$id as usize] = $name;)*
            arr
        };

        $(pub const $ident: u8 = $id;)*

    };
}

blocks! {
    AIR/0:              "air",
    STONE/1:            "stone",
    GRASS/2:            "grass",
    DIRT/3:             "dirt",
    COBBLESTONE/4:      "cobblestone",
    WOOD/5:             "wood",
    SAPLING/6:          "sapling",
    BEDROCK/7:          "bedrock",
    WATER_MOVING/8:     "water_moving",
    WATER_STILL/9:      "water_still",
    LAVA_MOVING/10:     "lava_moving",
    LAVA_STILL/11:      "lava_still",
    SAND/12:            "sand",
    GRAVEL/13:          "gravel",
    LOG/17:             "log",
    LEAVES/18:          "leaves",
    GLASS/20:           "glass",
    SANDSTONE/24:       "sandstone",
    TALL_GRASS/31:      "tall_grass",
    SEAGRASS/32:        "seagrass",
    SLAB/44:            "slab",
    WOOD_STAIR/53:      "wood_stair",
    CHEST/54:           "chest",
    LADDER/65:          "ladder",
    COBBLESTONE_STAIR/67: "cobblestone_stair",
    FENCE/85:           "fence",
    GLASS_PANE/102:     "glass_pane",
}

/// Find a block name from its id.
#[inline]
pub const fn name(id: u8) -> &'static str {
    NAMES[id as usize]
}

/// Find a block id from its name.
pub fn from_name(name: &str) -> Option<u8> {
    if name.is_empty() {
        return None;
    }
    NAMES.iter()
        .position(|&n| n == name)
        .map(|n| n as u8)
}

/// Classify a block and its metadata into the closed voxel categories that the water
/// engine works with. Lava and every other non-air block that can't hold water are
/// solid as far as the engine is concerned.
pub fn classify(id: u8, metadata: u8) -> Voxel {
    match id {
        AIR => Voxel::Air,
        WATER_STILL | WATER_MOVING if fluid::is_source(metadata) => Voxel::WaterSource,
        WATER_STILL | WATER_MOVING => Voxel::WaterFlowing,
        _ if waterlog::is_waterloggable(id) => Voxel::Waterloggable {
            waterlogged: waterlog::is_waterlogged(metadata),
        },
        _ => Voxel::Solid,
    }
}
