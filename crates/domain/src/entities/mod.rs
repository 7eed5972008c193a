//! Domain entities

mod session;
mod tilemap;
mod token;

pub use session::{
    Background, Camera, MergeOutcome, PropertyEdit, SessionSnapshot, SessionState, TokenAction,
    PROTOCOL_VERSION,
};
pub use tilemap::{
    Tile, TileTrigger, TileType, Tilemap, TriggerKind, DEFAULT_MAP_HEIGHT, DEFAULT_MAP_WIDTH,
    DEFAULT_TILE_SIZE, WALL_EAST, WALL_MASK_KEY, WALL_NORTH, WALL_SOUTH, WALL_WEST,
};
pub use token::{BorderStyle, Token, TokenRecord, SPAWN_HIT_POINTS};
