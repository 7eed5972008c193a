//! Sparse dungeon tilemap

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::common::{int_or, lenient};

/// Wall-adjacency bits stored in `meta["wall_mask"]`
pub const WALL_NORTH: u8 = 1;
pub const WALL_EAST: u8 = 2;
pub const WALL_SOUTH: u8 = 4;
pub const WALL_WEST: u8 = 8;

/// Meta key holding the wall-adjacency bitmask
pub const WALL_MASK_KEY: &str = "wall_mask";

pub const DEFAULT_MAP_WIDTH: i64 = 100;
pub const DEFAULT_MAP_HEIGHT: i64 = 100;
pub const DEFAULT_TILE_SIZE: i64 = 64;

/// Type of terrain in a cell
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TileType {
    #[default]
    Empty,
    Floor,
    Wall,
    Door,
    Custom(String),
}

impl TileType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Empty => "empty",
            Self::Floor => "floor",
            Self::Wall => "wall",
            Self::Door => "door",
            Self::Custom(name) => name,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl From<&str> for TileType {
    fn from(value: &str) -> Self {
        match value {
            "" | "empty" => Self::Empty,
            "floor" => Self::Floor,
            "wall" => Self::Wall,
            "door" => Self::Door,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for TileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TileType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TileType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw.as_str()))
    }
}

/// When a tile trigger fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerKind {
    #[serde(rename = "onEnter")]
    Enter,
    #[serde(rename = "onLeave")]
    Leave,
    #[serde(rename = "onInteract")]
    Interact,
}

impl TriggerKind {
    /// Rules-engine event this trigger answers to.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Enter => "onEnterTile",
            Self::Leave => "onLeaveTile",
            Self::Interact => "onInteractTile",
        }
    }

    pub fn matches_event(&self, event: &str) -> bool {
        self.event_name() == event
    }
}

/// Script bound to a tile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileTrigger {
    #[serde(rename = "type", alias = "kind")]
    pub kind: TriggerKind,
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub once: bool,
    #[serde(default)]
    pub fired: bool,
}

impl TileTrigger {
    pub fn new(kind: TriggerKind, script: impl Into<String>) -> Self {
        Self {
            kind,
            script: script.into(),
            once: false,
            fired: false,
        }
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Whether the trigger should run for `event` right now.
    pub fn is_armed_for(&self, event: &str) -> bool {
        self.kind.matches_event(event) && !self.script.trim().is_empty() && !(self.once && self.fired)
    }
}

/// One stored cell of the grid; empty cells are never stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    #[serde(default, deserialize_with = "lenient_coord")]
    x: i64,
    #[serde(default, deserialize_with = "lenient_coord")]
    y: i64,
    #[serde(rename = "type", default)]
    tile_type: TileType,
    #[serde(default, deserialize_with = "lenient_string")]
    sprite: String,
    #[serde(default, deserialize_with = "lenient_object")]
    meta: Map<String, Value>,
    #[serde(default, deserialize_with = "lenient::optional", skip_serializing_if = "Option::is_none")]
    trigger: Option<TileTrigger>,
}

fn lenient_coord<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    Ok(lenient::optional_int(deserializer)?.unwrap_or(0))
}

fn lenient_string<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(lenient::optional::<D, String>(deserializer)?.unwrap_or_default())
}

fn lenient_object<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<Map<String, Value>, D::Error> {
    Ok(lenient::optional::<D, Map<String, Value>>(deserializer)?.unwrap_or_default())
}

impl Tile {
    pub fn new(x: i64, y: i64, tile_type: TileType) -> Self {
        Self {
            x,
            y,
            tile_type,
            sprite: String::new(),
            meta: Map::new(),
            trigger: None,
        }
    }

    pub fn with_sprite(mut self, sprite: impl Into<String>) -> Self {
        self.sprite = sprite.into();
        self
    }

    pub fn with_trigger(mut self, trigger: TileTrigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn with_meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = meta;
        self
    }

    pub fn x(&self) -> i64 {
        self.x
    }

    pub fn y(&self) -> i64 {
        self.y
    }

    pub fn tile_type(&self) -> &TileType {
        &self.tile_type
    }

    pub fn sprite(&self) -> &str {
        &self.sprite
    }

    pub fn meta(&self) -> &Map<String, Value> {
        &self.meta
    }

    pub fn trigger(&self) -> Option<&TileTrigger> {
        self.trigger.as_ref()
    }

    pub fn trigger_mut(&mut self) -> Option<&mut TileTrigger> {
        self.trigger.as_mut()
    }

    pub fn set_trigger(&mut self, trigger: Option<TileTrigger>) {
        self.trigger = trigger;
    }

    /// Stored wall-adjacency mask, if computed
    pub fn wall_mask(&self) -> Option<u8> {
        self.meta
            .get(WALL_MASK_KEY)
            .and_then(Value::as_u64)
            .and_then(|m| u8::try_from(m).ok())
    }

    pub fn is_wall(&self) -> bool {
        self.tile_type == TileType::Wall
    }
}

/// Dungeon grid in world space: `world = tile * tile_size`.
///
/// Storage is sparse and keyed by `(x, y)`; iteration order is row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Tilemap {
    width: i64,
    height: i64,
    tile_size: i64,
    tiles: BTreeMap<(i64, i64), Tile>,
}

impl Default for Tilemap {
    fn default() -> Self {
        Self::new(DEFAULT_MAP_WIDTH, DEFAULT_MAP_HEIGHT, DEFAULT_TILE_SIZE)
    }
}

impl Tilemap {
    pub fn new(width: i64, height: i64, tile_size: i64) -> Self {
        Self {
            width: width.max(0),
            height: height.max(0),
            tile_size: tile_size.max(1),
            tiles: BTreeMap::new(),
        }
    }

    pub fn width(&self) -> i64 {
        self.width
    }

    pub fn height(&self) -> i64 {
        self.height
    }

    pub fn tile_size(&self) -> i64 {
        self.tile_size
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < self.width && y < self.height
    }

    /// Stores `tile` at its coordinates. Out-of-bounds tiles are ignored and
    /// an empty tile erases the cell.
    pub fn set_tile(&mut self, tile: Tile) {
        if !self.in_bounds(tile.x, tile.y) {
            return;
        }
        let key = (tile.x, tile.y);
        if tile.tile_type.is_empty() {
            self.tiles.remove(&key);
        } else {
            self.tiles.insert(key, tile);
        }
    }

    pub fn erase_tile(&mut self, x: i64, y: i64) -> Option<Tile> {
        self.tiles.remove(&(x, y))
    }

    pub fn tile(&self, x: i64, y: i64) -> Option<&Tile> {
        self.tiles.get(&(x, y))
    }

    pub fn tile_mut(&mut self, x: i64, y: i64) -> Option<&mut Tile> {
        self.tiles.get_mut(&(x, y))
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }

    /// Tile coordinates containing the world point
    pub fn world_to_tile(&self, wx: f64, wy: f64) -> (i64, i64) {
        let size = self.tile_size as f64;
        ((wx / size).floor() as i64, (wy / size).floor() as i64)
    }

    pub fn tile_at_world(&self, wx: f64, wy: f64) -> Option<&Tile> {
        let (x, y) = self.world_to_tile(wx, wy);
        self.tile(x, y)
    }

    fn is_wall_at(&self, x: i64, y: i64) -> bool {
        self.tile(x, y).is_some_and(Tile::is_wall)
    }

    /// 4-neighbour wall bitmask of a cell
    pub fn neighbour_wall_mask(&self, x: i64, y: i64) -> u8 {
        let mut mask = 0;
        if self.is_wall_at(x, y - 1) {
            mask |= WALL_NORTH;
        }
        if self.is_wall_at(x + 1, y) {
            mask |= WALL_EAST;
        }
        if self.is_wall_at(x, y + 1) {
            mask |= WALL_SOUTH;
        }
        if self.is_wall_at(x - 1, y) {
            mask |= WALL_WEST;
        }
        mask
    }

    /// Recomputes `meta["wall_mask"]` for the walls in the rectangle between
    /// the two corners, widened by one cell so neighbours pick up the change.
    pub fn update_wall_masks(&mut self, (x1, y1): (i64, i64), (x2, y2): (i64, i64)) {
        let (min_x, max_x) = (x1.min(x2) - 1, x1.max(x2) + 1);
        let (min_y, max_y) = (y1.min(y2) - 1, y1.max(y2) + 1);

        let updates: Vec<((i64, i64), u8)> = self
            .tiles
            .range((min_x, min_y)..=(max_x, max_y))
            .filter(|((x, y), tile)| *y >= min_y && *y <= max_y && tile.is_wall() && *x >= min_x)
            .map(|(&(x, y), _)| ((x, y), self.neighbour_wall_mask(x, y)))
            .collect();

        for (key, mask) in updates {
            if let Some(tile) = self.tiles.get_mut(&key) {
                tile.meta.insert(WALL_MASK_KEY.to_string(), Value::from(mask));
            }
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "width": self.width,
            "height": self.height,
            "tile_size": self.tile_size,
            "tiles": self.tiles.values().collect::<Vec<_>>(),
        })
    }

    /// Lenient load: a non-object yields the default map, malformed tile
    /// entries are skipped, empty tiles are dropped.
    pub fn from_json(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            return Self::default();
        };
        let mut tilemap = Self::new(
            int_or(map, "width", DEFAULT_MAP_WIDTH),
            int_or(map, "height", DEFAULT_MAP_HEIGHT),
            int_or(map, "tile_size", DEFAULT_TILE_SIZE),
        );

        let entries = map.get("tiles").and_then(Value::as_array);
        for entry in entries.into_iter().flatten() {
            if !entry.is_object() {
                continue;
            }
            if let Ok(tile) = serde_json::from_value::<Tile>(entry.clone()) {
                if !tile.tile_type.is_empty() {
                    tilemap.tiles.insert((tile.x, tile.y), tile);
                }
            }
        }
        tilemap
    }
}

impl Serialize for Tilemap {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Tilemap {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_json(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_tile_is_never_stored() {
        let mut map = Tilemap::default();
        map.set_tile(Tile::new(2, 3, TileType::Floor));
        assert!(map.tile(2, 3).is_some());
        map.set_tile(Tile::new(2, 3, TileType::Empty));
        assert!(map.tile(2, 3).is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn test_out_of_bounds_ignored() {
        let mut map = Tilemap::new(4, 4, 32);
        map.set_tile(Tile::new(4, 0, TileType::Wall));
        map.set_tile(Tile::new(-1, 0, TileType::Wall));
        assert!(map.is_empty());
    }

    #[test]
    fn test_world_to_tile() {
        let map = Tilemap::new(10, 10, 64);
        assert_eq!(map.world_to_tile(65.0, 127.9), (1, 1));
        assert_eq!(map.world_to_tile(-1.0, 0.0), (-1, 0));
    }

    #[test]
    fn test_wall_masks() {
        let mut map = Tilemap::new(10, 10, 64);
        for (x, y) in [(1, 1), (2, 1), (1, 2)] {
            map.set_tile(Tile::new(x, y, TileType::Wall));
        }
        map.set_tile(Tile::new(2, 2, TileType::Floor));
        map.update_wall_masks((1, 1), (2, 2));

        let corner = map.tile(1, 1).and_then(Tile::wall_mask);
        assert_eq!(corner, Some(WALL_EAST | WALL_SOUTH));
        assert_eq!(map.tile(2, 1).and_then(Tile::wall_mask), Some(WALL_WEST));
        assert_eq!(map.tile(1, 2).and_then(Tile::wall_mask), Some(WALL_NORTH));
        assert_eq!(map.tile(2, 2).and_then(Tile::wall_mask), None);
    }

    #[test]
    fn test_trigger_accepts_kind_alias() {
        let tile: Tile = serde_json::from_value(json!({
            "x": 1, "y": 1, "type": "floor",
            "trigger": {"kind": "onEnter", "script": "damage(1)", "once": true}
        }))
        .expect("tile");
        let trigger = tile.trigger().expect("trigger");
        assert_eq!(trigger.kind, TriggerKind::Enter);
        assert!(trigger.is_armed_for("onEnterTile"));
        assert!(!trigger.is_armed_for("onLeaveTile"));
    }

    #[test]
    fn test_lenient_load() {
        let map = Tilemap::from_json(&json!({
            "width": 20,
            "tiles": [
                {"x": 1, "y": 2, "type": "wall", "sprite": "stone.png"},
                {"x": 3, "y": 3, "type": "empty"},
                "garbage",
                {"x": 4.0, "y": 5, "type": "lava", "meta": "nope"}
            ]
        }));
        assert_eq!(map.width(), 20);
        assert_eq!(map.height(), DEFAULT_MAP_HEIGHT);
        assert_eq!(map.len(), 2);
        assert_eq!(
            map.tile(4, 5).map(|t| t.tile_type().clone()),
            Some(TileType::Custom("lava".into()))
        );

        assert_eq!(Tilemap::from_json(&json!("nonsense")), Tilemap::default());
    }

    #[test]
    fn test_json_shape() {
        let mut map = Tilemap::new(5, 5, 32);
        map.set_tile(Tile::new(0, 0, TileType::Door).with_sprite("door.png"));
        assert_eq!(
            map.to_json(),
            json!({
                "width": 5, "height": 5, "tile_size": 32,
                "tiles": [{"x": 0, "y": 0, "type": "door", "sprite": "door.png", "meta": {}}]
            })
        );
    }
}
