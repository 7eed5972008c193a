//! Session state: tokens, tilemap, background and campaign metadata
//!
//! The same type backs the server's authoritative copy and each client's
//! mirror. Token updates merge field by field; everything else is replaced
//! wholesale by a full snapshot.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::tilemap::{Tile, Tilemap};
use super::token::{BorderStyle, Token, TokenRecord};
use crate::assets::AssetCatalog;
use crate::common::lenient;
use crate::error::DomainError;
use crate::ids::{short_id, TokenId};
use crate::value_objects::Tint;

/// Wire protocol version carried in `join` and every `state` snapshot.
pub const PROTOCOL_VERSION: u32 = 1;

const ROTATION_STEP: i64 = 45;
const SCALE_STEP: f64 = 1.1;

/// Camera transform saved with the background
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default = "default_zoom")]
    pub zoom: f64,
}

fn default_zoom() -> f64 {
    1.0
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            zoom: default_zoom(),
        }
    }
}

/// Background image reference plus camera transform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Background {
    #[serde(default, deserialize_with = "lenient::optional")]
    pub path: Option<String>,
    #[serde(default, deserialize_with = "camera_or_default")]
    pub camera: Camera,
}

fn camera_or_default<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<Camera, D::Error> {
    Ok(lenient::optional::<D, Camera>(deserializer)?.unwrap_or_default())
}

/// Everything a full `state` message carries besides the protocol version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(default, deserialize_with = "object_or_empty")]
    pub campaign_meta: Map<String, Value>,
    #[serde(default, deserialize_with = "records_or_empty")]
    pub tokens: Vec<TokenRecord>,
    #[serde(default, deserialize_with = "lenient::optional")]
    pub tilemap: Option<Tilemap>,
    #[serde(default, deserialize_with = "lenient::optional")]
    pub background: Option<Background>,
}

fn object_or_empty<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<Map<String, Value>, D::Error> {
    Ok(lenient::optional::<D, Map<String, Value>>(deserializer)?.unwrap_or_default())
}

/// Keeps every entry that is a JSON object; anything else is dropped.
fn records_or_empty<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<TokenRecord>, D::Error> {
    let entries = lenient::optional::<D, Vec<Value>>(deserializer)?.unwrap_or_default();
    Ok(entries.iter().filter_map(TokenRecord::from_value).collect())
}

/// Result of merging one token record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted(TokenId),
    Updated(TokenId),
}

impl MergeOutcome {
    pub fn token_id(&self) -> &TokenId {
        match self {
            Self::Inserted(id) | Self::Updated(id) => id,
        }
    }
}

/// Context-menu action on a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAction {
    RotateClockwise,
    RotateCounterClockwise,
    ScaleUp,
    ScaleDown,
    Lock,
    Unlock,
    Ungroup,
    BringToFront,
    SendToBack,
    MoveUp,
    MoveDown,
}

/// Edit from a properties dialog; `None` keeps the current value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyEdit {
    pub name: Option<String>,
    pub hp: Option<i64>,
    pub max_hp: Option<i64>,
    pub notes: Option<String>,
    pub gm_only_notes: Option<bool>,
    pub tint: Option<[f64; 3]>,
    pub border_style: Option<BorderStyle>,
}

/// In-memory session model.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    campaign_meta: Map<String, Value>,
    tokens: Vec<Token>,
    tilemap: Option<Tilemap>,
    background: Option<Background>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn protocol_version(&self) -> u32 {
        PROTOCOL_VERSION
    }

    pub fn campaign_meta(&self) -> &Map<String, Value> {
        &self.campaign_meta
    }

    pub fn tilemap(&self) -> Option<&Tilemap> {
        self.tilemap.as_ref()
    }

    pub fn tilemap_mut(&mut self) -> Option<&mut Tilemap> {
        self.tilemap.as_mut()
    }

    pub fn set_tilemap(&mut self, tilemap: Option<Tilemap>) {
        self.tilemap = tilemap;
    }

    pub fn background(&self) -> Option<&Background> {
        self.background.as_ref()
    }

    pub fn set_background(&mut self, background: Option<Background>) {
        self.background = background;
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn token(&self, id: &TokenId) -> Option<&Token> {
        self.tokens.iter().find(|t| t.id() == id)
    }

    pub fn token_mut(&mut self, id: &TokenId) -> Option<&mut Token> {
        self.tokens.iter_mut().find(|t| t.id() == id)
    }

    /// Borrows a token and a tile together, as a script dispatch needs both.
    /// `tile` is in tile coordinates; either side is `None` when absent.
    pub fn script_targets(
        &mut self,
        id: Option<&TokenId>,
        tile: Option<(i64, i64)>,
    ) -> (Option<&mut Token>, Option<&mut Tile>) {
        let token = id.and_then(|id| self.tokens.iter_mut().find(|t| t.id() == id));
        let tile = match (self.tilemap.as_mut(), tile) {
            (Some(map), Some((x, y))) => map.tile_mut(x, y),
            _ => None,
        };
        (token, tile)
    }

    fn index_of(&self, id: &TokenId) -> Result<usize, DomainError> {
        self.tokens
            .iter()
            .position(|t| t.id() == id)
            .ok_or_else(|| DomainError::not_found("Token", id.as_str()))
    }

    /// Tokens in draw order: ascending `z_index`, ties broken by id.
    pub fn tokens_by_z(&self) -> Vec<&Token> {
        let mut sorted: Vec<&Token> = self.tokens.iter().collect();
        sorted.sort_by(|a, b| a.z_index().cmp(&b.z_index()).then_with(|| a.id().cmp(b.id())));
        sorted
    }

    pub fn max_z(&self) -> i64 {
        self.tokens.iter().map(Token::z_index).max().unwrap_or(0)
    }

    fn min_z(&self) -> i64 {
        self.tokens.iter().map(Token::z_index).min().unwrap_or(0)
    }

    /// z for a token placed on top. Saturates, since peers may send any i64.
    fn top_z(&self) -> i64 {
        self.max_z().saturating_add(1)
    }

    /// Insert-or-update by id.
    ///
    /// Unknown ids insert a new token (on top of the stack unless the record
    /// says otherwise). Known ids get a field-level update. Merging the same
    /// record twice leaves the same state as merging it once.
    pub fn merge_token(
        &mut self,
        record: &TokenRecord,
        catalog: &dyn AssetCatalog,
    ) -> Result<MergeOutcome, DomainError> {
        let raw_id = record
            .id()
            .ok_or_else(|| DomainError::validation("token record is missing an id"))?;
        let id = TokenId::parse(raw_id)?;

        if let Some(token) = self.token_mut(&id) {
            token.apply_record(record);
            return Ok(MergeOutcome::Updated(id));
        }

        let token = Token::from_record(record, catalog, self.top_z())?;
        self.tokens.push(token);
        Ok(MergeOutcome::Inserted(id))
    }

    /// Spawns a token for a known asset, on top of the stack.
    pub fn spawn_token(
        &mut self,
        asset: &str,
        x: f64,
        y: f64,
        catalog: &dyn AssetCatalog,
    ) -> Result<&Token, DomainError> {
        if !catalog.contains(asset) {
            return Err(DomainError::not_found("Asset", asset));
        }
        let token = Token::spawn(asset, x, y, self.top_z());
        self.tokens.push(token);
        let last = self.tokens.len() - 1;
        Ok(&self.tokens[last])
    }

    /// Adds an already built token, giving it a fresh id if its id is taken.
    /// The token lands on top of the stack.
    pub fn insert_token(&mut self, token: Token, catalog: &dyn AssetCatalog) -> TokenId {
        let mut record = token.to_record();
        let id = if self.token(token.id()).is_some() {
            TokenId::new()
        } else {
            token.id().clone()
        };
        record.id = Some(id.to_string());
        record.z_index = Some(self.top_z());

        let mut inserted = Token::new(id.clone(), token.asset());
        inserted.apply_record(&record);
        inserted.refresh_placeholder(catalog);
        self.tokens.push(inserted);
        id
    }

    /// Local delete; there is no network message for it.
    pub fn remove_token(&mut self, id: &TokenId) -> Option<Token> {
        let index = self.index_of(id).ok()?;
        Some(self.tokens.remove(index))
    }

    /// Re-checks every token's asset, e.g. after the asset registry reloads.
    pub fn refresh_placeholders(&mut self, catalog: &dyn AssetCatalog) {
        for token in &mut self.tokens {
            token.refresh_placeholder(catalog);
        }
    }

    /// Replaces everything with a full snapshot.
    ///
    /// Records that fail to merge are skipped; their errors are returned so
    /// the caller can log them.
    pub fn replace_all(
        &mut self,
        snapshot: SessionSnapshot,
        catalog: &dyn AssetCatalog,
    ) -> Vec<DomainError> {
        self.campaign_meta = snapshot.campaign_meta;
        self.tilemap = snapshot.tilemap;
        self.background = snapshot.background;
        self.tokens.clear();
        snapshot
            .tokens
            .iter()
            .filter_map(|record| self.merge_token(record, catalog).err())
            .collect()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            campaign_meta: self.campaign_meta.clone(),
            tokens: self.to_records(),
            tilemap: self.tilemap.clone(),
            background: self.background.clone(),
        }
    }

    pub fn to_records(&self) -> Vec<TokenRecord> {
        self.tokens.iter().map(Token::to_record).collect()
    }

    fn group_members(&self, group_id: &str) -> Vec<usize> {
        self.tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| t.group_id() == Some(group_id))
            .map(|(i, _)| i)
            .collect()
    }

    /// The token plus, when grouped, every other member of its group.
    fn with_group(&self, index: usize) -> Vec<usize> {
        match self.tokens[index].group_id() {
            Some(group) => self.group_members(group),
            None => vec![index],
        }
    }

    /// Moves a token to `(x, y)` and drags its unlocked group members by the
    /// same delta. Locked tokens stay put. Returns the ids that moved.
    pub fn move_token(&mut self, id: &TokenId, x: f64, y: f64) -> Result<Vec<TokenId>, DomainError> {
        let index = self.index_of(id)?;
        let (old_x, old_y) = self.tokens[index].position();
        let (dx, dy) = (x - old_x, y - old_y);

        let mut moved = Vec::new();
        for i in self.with_group(index) {
            let token = &mut self.tokens[i];
            if token.is_locked() || (dx == 0.0 && dy == 0.0) {
                continue;
            }
            token.translate(dx, dy);
            moved.push(token.id().clone());
        }
        Ok(moved)
    }

    /// Applies a context-menu action. Returns the ids whose state changed.
    pub fn apply_action(
        &mut self,
        id: &TokenId,
        action: TokenAction,
    ) -> Result<Vec<TokenId>, DomainError> {
        let index = self.index_of(id)?;
        let changed = match action {
            TokenAction::RotateClockwise => self.transform(index, |t| t.rotate_by(-ROTATION_STEP)),
            TokenAction::RotateCounterClockwise => {
                self.transform(index, |t| t.rotate_by(ROTATION_STEP))
            }
            TokenAction::ScaleUp => self.transform(index, |t| {
                t.set_scale(round_to_thousandths(t.scale() * SCALE_STEP));
            }),
            TokenAction::ScaleDown => self.transform(index, |t| {
                t.set_scale(round_to_thousandths(t.scale() / SCALE_STEP));
            }),
            TokenAction::Lock => {
                self.tokens[index].set_locked(true);
                vec![index]
            }
            TokenAction::Unlock => {
                self.tokens[index].set_locked(false);
                vec![index]
            }
            TokenAction::Ungroup => {
                let members = self.with_group(index);
                for &i in &members {
                    self.tokens[i].set_group_id(None);
                }
                members
            }
            TokenAction::BringToFront => {
                let members = self.with_group(index);
                let top = self.top_z();
                for &i in &members {
                    self.tokens[i].set_z_index(top);
                }
                members
            }
            TokenAction::SendToBack => {
                let members = self.with_group(index);
                let bottom = self.min_z().saturating_sub(1);
                for &i in &members {
                    self.tokens[i].set_z_index(bottom);
                }
                members
            }
            TokenAction::MoveUp => self.step_z(index, true),
            TokenAction::MoveDown => self.step_z(index, false),
        };
        Ok(changed.into_iter().map(|i| self.tokens[i].id().clone()).collect())
    }

    /// Rotation and scale only touch unlocked tokens.
    fn transform(&mut self, index: usize, apply: impl FnOnce(&mut Token)) -> Vec<usize> {
        let token = &mut self.tokens[index];
        if token.is_locked() {
            return Vec::new();
        }
        apply(token);
        vec![index]
    }

    /// Moves one step up or down the stack. A lone token swaps z with its
    /// nearest neighbour; a group shifts as a block past the nearest outsider.
    fn step_z(&mut self, index: usize, up: bool) -> Vec<usize> {
        let members = self.with_group(index);
        let member_z: Vec<i64> = members.iter().map(|&i| self.tokens[i].z_index()).collect();
        let (low, high) = match (member_z.iter().min(), member_z.iter().max()) {
            (Some(&low), Some(&high)) => (low, high),
            _ => return Vec::new(),
        };

        let neighbour = self
            .tokens
            .iter()
            .enumerate()
            .filter(|(i, _)| !members.contains(i))
            .filter(|(_, t)| if up { t.z_index() > high } else { t.z_index() < low })
            .min_by_key(|(_, t)| t.z_index().abs_diff(if up { high } else { low }))
            .map(|(i, t)| (i, t.z_index()));
        let Some((other, other_z)) = neighbour else {
            return Vec::new();
        };

        if self.tokens[index].group_id().is_none() {
            let own_z = self.tokens[index].z_index();
            self.tokens[index].set_z_index(other_z);
            self.tokens[other].set_z_index(own_z);
            return vec![index, other];
        }

        let delta = other_z.saturating_sub(if up { high } else { low });
        for &i in &members {
            let z = self.tokens[i].z_index();
            self.tokens[i].set_z_index(z.saturating_add(delta));
        }
        members
    }

    /// Puts two or more tokens into a fresh group, all at the highest z among
    /// them. Returns the new group id.
    pub fn group_tokens(&mut self, ids: &[TokenId]) -> Result<String, DomainError> {
        if ids.len() < 2 {
            return Err(DomainError::validation("grouping needs at least two tokens"));
        }
        let indices = ids
            .iter()
            .map(|id| self.index_of(id))
            .collect::<Result<Vec<_>, _>>()?;
        let top = indices
            .iter()
            .map(|&i| self.tokens[i].z_index())
            .max()
            .unwrap_or(0);

        let group_id = short_id();
        for i in indices {
            self.tokens[i].set_group_id(Some(group_id.clone()));
            self.tokens[i].set_z_index(top);
        }
        Ok(group_id)
    }

    /// Applies a properties-dialog edit with the usual clamping.
    pub fn apply_properties(&mut self, id: &TokenId, edit: PropertyEdit) -> Result<(), DomainError> {
        let index = self.index_of(id)?;
        let token = &mut self.tokens[index];
        if let Some(name) = edit.name {
            token.set_name(name);
        }
        token.set_hit_points(
            edit.hp.unwrap_or(token.hp()),
            edit.max_hp.unwrap_or(token.max_hp()),
        );
        if let Some(notes) = edit.notes {
            token.set_notes(notes);
        }
        if let Some(gm_only) = edit.gm_only_notes {
            token.set_gm_only_notes(gm_only);
        }
        if let Some([r, g, b]) = edit.tint {
            token.set_tint(Tint::new(r, g, b));
        }
        if let Some(style) = edit.border_style {
            token.set_border_style(style);
        }
        Ok(())
    }
}

fn round_to_thousandths(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AnyAsset;
    use serde_json::json;

    fn record(value: Value) -> TokenRecord {
        serde_json::from_value(value).expect("record")
    }

    fn id(raw: &str) -> TokenId {
        TokenId::parse(raw).expect("id")
    }

    fn session_with(tokens: &[(&str, i64)]) -> SessionState {
        let mut session = SessionState::new();
        for (raw, z) in tokens {
            session
                .merge_token(&record(json!({"id": raw, "asset": "a.png", "z_index": z})), &AnyAsset)
                .expect("merge");
        }
        session
    }

    fn z_of(session: &SessionState, raw: &str) -> i64 {
        session.token(&id(raw)).map(Token::z_index).expect("token")
    }

    #[test]
    fn test_merge_inserts_then_updates() {
        let mut session = SessionState::new();
        let first = session
            .merge_token(
                &record(json!({"id": "abc123", "asset": "goblin.png", "x": 100, "y": 200, "hp": 5, "max_hp": 5})),
                &AnyAsset,
            )
            .expect("merge");
        assert_eq!(first, MergeOutcome::Inserted(id("abc123")));

        let second = session
            .merge_token(&record(json!({"id": "abc123", "x": 150})), &AnyAsset)
            .expect("merge");
        assert_eq!(second, MergeOutcome::Updated(id("abc123")));

        let token = session.token(&id("abc123")).expect("token");
        assert_eq!(token.position(), (150.0, 200.0));
        assert_eq!(token.asset(), "goblin.png");
        assert_eq!(session.token_count(), 1);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut once = session_with(&[("t1", 1)]);
        let update = record(json!({"id": "t1", "hp": 0, "name": "Bob", "tint": [0.2, 2.0, 0.5], "rotation": -90}));
        once.merge_token(&update, &AnyAsset).expect("merge");
        let mut twice = once.clone();
        twice.merge_token(&update, &AnyAsset).expect("merge");
        assert_eq!(once.tokens(), twice.tokens());
    }

    #[test]
    fn test_merge_preserves_absent_fields() {
        let mut session = SessionState::new();
        session
            .merge_token(
                &record(json!({
                    "id": "t1", "asset": "a.png", "name": "Orc", "notes": "angry",
                    "hp": 7, "max_hp": 9, "locked": true, "scripts": {"onMove": "say('hi')"}
                })),
                &AnyAsset,
            )
            .expect("merge");
        session
            .merge_token(&record(json!({"id": "t1", "hp": 3})), &AnyAsset)
            .expect("merge");

        let token = session.token(&id("t1")).expect("token");
        assert_eq!(token.name(), "Orc");
        assert_eq!(token.notes(), "angry");
        assert_eq!((token.hp(), token.max_hp()), (3, 9));
        assert!(token.is_locked());
        assert_eq!(token.script("onMove"), Some("say('hi')"));
    }

    #[test]
    fn test_merge_rejects_missing_id() {
        let mut session = SessionState::new();
        let result = session.merge_token(&record(json!({"asset": "a.png"})), &AnyAsset);
        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert_eq!(session.token_count(), 0);
    }

    #[test]
    fn test_new_tokens_land_on_top() {
        let mut session = session_with(&[("a", 4)]);
        session
            .merge_token(&record(json!({"id": "b"})), &AnyAsset)
            .expect("merge");
        assert_eq!(z_of(&session, "b"), 5);

        let spawned = session
            .spawn_token("orc.png", 0.0, 0.0, &AnyAsset)
            .expect("spawn")
            .z_index();
        assert_eq!(spawned, 6);
    }

    #[test]
    fn test_extreme_z_index_saturates() {
        let mut session = session_with(&[("a", i64::MAX), ("low", i64::MIN)]);
        session
            .merge_token(&record(json!({"id": "b"})), &AnyAsset)
            .expect("merge");
        assert_eq!(z_of(&session, "b"), i64::MAX);

        let spawned = session
            .spawn_token("orc.png", 0.0, 0.0, &AnyAsset)
            .expect("spawn")
            .z_index();
        assert_eq!(spawned, i64::MAX);

        session.apply_action(&id("b"), TokenAction::SendToBack).expect("back");
        assert_eq!(z_of(&session, "b"), i64::MIN);
        session.apply_action(&id("low"), TokenAction::BringToFront).expect("front");
        assert_eq!(z_of(&session, "low"), i64::MAX);
        session.apply_action(&id("b"), TokenAction::MoveUp).expect("move");
        assert_eq!(z_of(&session, "b"), i64::MAX);
    }

    #[test]
    fn test_spawn_unknown_asset_fails() {
        let mut session = SessionState::new();
        let nothing = |_: &str| false;
        assert!(session.spawn_token("ghost.png", 0.0, 0.0, &nothing).is_err());
    }

    #[test]
    fn test_tokens_by_z_breaks_ties_by_id() {
        let session = session_with(&[("b", 1), ("c", 0), ("a", 1)]);
        let order: Vec<&str> = session.tokens_by_z().iter().map(|t| t.id().as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_script_targets_borrow_token_and_tile() {
        let mut session = session_with(&[("t1", 1)]);
        let mut map = Tilemap::new(10, 10, 64);
        map.set_tile(crate::entities::Tile::new(2, 3, crate::entities::TileType::Floor));
        session.set_tilemap(Some(map));

        let (token, tile) = session.script_targets(Some(&id("t1")), Some((2, 3)));
        let (token, tile) = (token.expect("token"), tile.expect("tile"));
        token.set_name("Scout");
        assert_eq!((tile.x(), tile.y()), (2, 3));

        let (token, tile) = session.script_targets(Some(&id("nope")), Some((9, 9)));
        assert!(token.is_none() && tile.is_none());
        assert_eq!(session.token(&id("t1")).map(Token::name), Some("Scout"));
    }

    #[test]
    fn test_replace_all_drops_previous_tokens() {
        let mut session = session_with(&[("old", 0)]);
        let snapshot: SessionSnapshot = serde_json::from_value(json!({
            "campaign_meta": {"name": "Crypt"},
            "tokens": [{"id": "new", "asset": "a.png"}, "junk", {"asset": "no-id.png"}],
            "tilemap": {"width": 10, "height": 10, "tile_size": 32, "tiles": []},
            "background": {"path": "bg.png", "camera": {"x": 1, "y": 2, "zoom": 1.5}}
        }))
        .expect("snapshot");
        let rejected = session.replace_all(snapshot, &AnyAsset);

        assert_eq!(rejected.len(), 1);
        assert!(matches!(rejected[0], DomainError::Validation(_)));
        assert!(session.token(&id("old")).is_none());
        assert!(session.token(&id("new")).is_some());
        assert_eq!(session.token_count(), 1);
        assert_eq!(session.tilemap().map(Tilemap::width), Some(10));
        assert_eq!(session.background().map(|b| b.camera.zoom), Some(1.5));
        assert_eq!(session.campaign_meta().get("name"), Some(&json!("Crypt")));
    }

    #[test]
    fn test_rotate_and_scale_respect_lock() {
        let mut session = session_with(&[("t", 0)]);
        let t = id("t");
        session.apply_action(&t, TokenAction::RotateClockwise).expect("rotate");
        session.apply_action(&t, TokenAction::ScaleUp).expect("scale");
        let token = session.token(&t).expect("token");
        assert_eq!(token.rotation(), 315);
        assert_eq!(token.scale(), 1.1);

        session.apply_action(&t, TokenAction::Lock).expect("lock");
        let changed = session
            .apply_action(&t, TokenAction::RotateCounterClockwise)
            .expect("rotate");
        assert!(changed.is_empty());
        assert_eq!(session.token(&t).map(Token::rotation), Some(315));
    }

    #[test]
    fn test_move_up_swaps_with_neighbour() {
        let mut session = session_with(&[("a", 1), ("b", 3), ("c", 5)]);
        let changed = session.apply_action(&id("a"), TokenAction::MoveUp).expect("move");
        assert_eq!(changed.len(), 2);
        assert_eq!(z_of(&session, "a"), 3);
        assert_eq!(z_of(&session, "b"), 1);

        let unchanged = session.apply_action(&id("c"), TokenAction::MoveUp).expect("move");
        assert!(unchanged.is_empty());
    }

    #[test]
    fn test_group_moves_as_block() {
        let mut session = session_with(&[("a", 1), ("b", 2), ("c", 6)]);
        session.group_tokens(&[id("a"), id("b")]).expect("group");
        assert_eq!(z_of(&session, "a"), 2);
        assert_eq!(z_of(&session, "b"), 2);

        session.apply_action(&id("a"), TokenAction::MoveUp).expect("move");
        assert_eq!(z_of(&session, "a"), 6);
        assert_eq!(z_of(&session, "b"), 6);
        assert_eq!(z_of(&session, "c"), 6);

        session.apply_action(&id("b"), TokenAction::SendToBack).expect("back");
        assert_eq!(z_of(&session, "a"), 5);
        assert_eq!(z_of(&session, "b"), 5);
    }

    #[test]
    fn test_group_drag_skips_locked_members() {
        let mut session = session_with(&[("a", 0), ("b", 0)]);
        session.group_tokens(&[id("a"), id("b")]).expect("group");
        session.apply_action(&id("b"), TokenAction::Lock).expect("lock");

        let moved = session.move_token(&id("a"), 10.0, 5.0).expect("move");
        assert_eq!(moved, vec![id("a")]);
        assert_eq!(session.token(&id("b")).map(Token::position), Some((0.0, 0.0)));

        session.apply_action(&id("a"), TokenAction::Ungroup).expect("ungroup");
        assert!(session.tokens().iter().all(|t| t.group_id().is_none()));
    }

    #[test]
    fn test_grouping_needs_two_tokens() {
        let mut session = session_with(&[("a", 0)]);
        assert!(session.group_tokens(&[id("a")]).is_err());
    }

    #[test]
    fn test_insert_token_renames_duplicate() {
        let mut session = session_with(&[("a", 3)]);
        let copy = session.token(&id("a")).cloned().expect("token");
        let new_id = session.insert_token(copy, &AnyAsset);
        assert_ne!(new_id, id("a"));
        assert_eq!(session.token_count(), 2);
        assert_eq!(z_of(&session, new_id.as_str()), 4);
    }

    #[test]
    fn test_apply_properties_clamps() {
        let mut session = session_with(&[("a", 0)]);
        session
            .apply_properties(
                &id("a"),
                PropertyEdit {
                    hp: Some(50),
                    max_hp: Some(0),
                    tint: Some([2.0, 0.5, -1.0]),
                    border_style: Some(BorderStyle::Solid),
                    ..PropertyEdit::default()
                },
            )
            .expect("edit");
        let token = session.token(&id("a")).expect("token");
        assert_eq!((token.hp(), token.max_hp()), (1, 1));
        assert_eq!(token.tint().channels(), [1.0, 0.5, 0.0]);
        assert_eq!(token.border_style(), BorderStyle::Solid);
    }
}
