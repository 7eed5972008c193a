//! Tokens: movable pieces on the board

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::assets::{AssetCatalog, PLACEHOLDER_ASSET};
use crate::common::lenient;
use crate::error::DomainError;
use crate::ids::TokenId;
use crate::value_objects::Tint;

/// Hit points given to freshly spawned tokens.
pub const SPAWN_HIT_POINTS: i64 = 5;

const DEFAULT_NAME: &str = "Token";

/// Outline drawn around a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BorderStyle {
    #[default]
    None,
    Solid,
    Dotted,
}

impl BorderStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Solid => "solid",
            Self::Dotted => "dotted",
        }
    }
}

impl fmt::Display for BorderStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BorderStyle {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "solid" => Ok(Self::Solid),
            "dotted" => Ok(Self::Dotted),
            other => Err(DomainError::parse(format!("Unknown border style: {other}"))),
        }
    }
}

/// A movable game piece.
///
/// Fields are private so that `0 <= hp <= max_hp`, `max_hp >= 1`,
/// `0 <= rotation < 360` and `scale > 0` hold after every mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    id: TokenId,
    asset: String,
    x: f64,
    y: f64,
    rotation: i32,
    scale: f64,
    visible: bool,
    name: String,
    hp: i64,
    max_hp: i64,
    notes: String,
    gm_only_notes: bool,
    tint: Tint,
    border_style: BorderStyle,
    locked: bool,
    group_id: Option<String>,
    z_index: i64,
    scripts: BTreeMap<String, String>,
    /// Asset did not resolve locally; not part of the record
    placeholder: bool,
}

impl Token {
    pub fn new(id: TokenId, asset: impl Into<String>) -> Self {
        Self {
            id,
            asset: asset.into(),
            x: 0.0,
            y: 0.0,
            rotation: 0,
            scale: 1.0,
            visible: true,
            name: DEFAULT_NAME.to_string(),
            hp: 1,
            max_hp: 1,
            notes: String::new(),
            gm_only_notes: false,
            tint: Tint::WHITE,
            border_style: BorderStyle::None,
            locked: false,
            group_id: None,
            z_index: 0,
            scripts: BTreeMap::new(),
            placeholder: false,
        }
    }

    /// A freshly spawned token: new id, named after its asset, 5/5 hit points.
    pub fn spawn(asset: impl Into<String>, x: f64, y: f64, z_index: i64) -> Self {
        let asset = asset.into();
        let mut token = Self::new(TokenId::new(), asset.clone());
        token.name = asset;
        token.set_position(x, y);
        token.set_hit_points(SPAWN_HIT_POINTS, SPAWN_HIT_POINTS);
        token.z_index = z_index;
        token
    }

    /// Builds a token from a full or partial record.
    ///
    /// The record must carry an id. Unknown or missing assets produce a
    /// placeholder token instead of an error. `default_z` applies when the
    /// record has no `z_index`.
    pub fn from_record(
        record: &TokenRecord,
        catalog: &dyn AssetCatalog,
        default_z: i64,
    ) -> Result<Self, DomainError> {
        let id = TokenId::parse(record.id.clone().unwrap_or_default())
            .map_err(|_| DomainError::validation("token record is missing an id"))?;
        let asset = record
            .asset
            .clone()
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| PLACEHOLDER_ASSET.to_string());

        let mut token = Self::new(id, asset);
        token.z_index = default_z;
        token.refresh_placeholder(catalog);
        token.apply_record(record);
        Ok(token)
    }

    /// Overwrites every field present in `record`; absent fields keep their
    /// current values. `id` and `asset` never change. Values that would break
    /// an invariant are clamped or ignored.
    pub fn apply_record(&mut self, record: &TokenRecord) {
        if let Some(x) = record.x {
            self.x = x;
        }
        if let Some(y) = record.y {
            self.y = y;
        }
        if let Some(rotation) = record.rotation {
            self.set_rotation(rotation);
        }
        if let Some(scale) = record.scale {
            self.set_scale(scale);
        }
        if let Some(visible) = record.visible {
            self.visible = visible;
        }
        if let Some(name) = &record.name {
            self.name = name.clone();
        }
        if record.hp.is_some() || record.max_hp.is_some() {
            self.set_hit_points(
                record.hp.unwrap_or(self.hp),
                record.max_hp.unwrap_or(self.max_hp),
            );
        }
        if let Some(notes) = &record.notes {
            self.notes = notes.clone();
        }
        if let Some(gm_only) = record.gm_only_notes {
            self.gm_only_notes = gm_only;
        }
        if let Some(tint) = record.tint.as_deref().and_then(Tint::from_components) {
            self.tint = tint;
        }
        if let Some(style) = record
            .border_style
            .as_deref()
            .and_then(|s| s.parse::<BorderStyle>().ok())
        {
            self.border_style = style;
        }
        if let Some(locked) = record.locked {
            self.locked = locked;
        }
        if let Some(group) = &record.group_id {
            self.set_group_id(group.clone());
        }
        if let Some(z) = record.z_index {
            self.z_index = z;
        }
        if let Some(scripts) = &record.scripts {
            self.scripts = scripts.clone();
        }
    }

    /// Full record of the current state, as sent in `token_update` and `state`.
    pub fn to_record(&self) -> TokenRecord {
        TokenRecord {
            id: Some(self.id.to_string()),
            asset: Some(self.asset.clone()),
            x: Some(self.x),
            y: Some(self.y),
            rotation: Some(i64::from(self.rotation)),
            scale: Some(self.scale),
            visible: Some(self.visible),
            name: Some(self.name.clone()),
            hp: Some(self.hp),
            max_hp: Some(self.max_hp),
            notes: Some(self.notes.clone()),
            gm_only_notes: Some(self.gm_only_notes),
            tint: Some(self.tint.channels().to_vec()),
            border_style: Some(self.border_style.as_str().to_string()),
            locked: Some(self.locked),
            group_id: Some(self.group_id.clone()),
            z_index: Some(self.z_index),
            scripts: Some(self.scripts.clone()),
            extra: Map::new(),
        }
    }

    /// Re-checks the asset against `catalog`, e.g. after the registry reloads.
    pub fn refresh_placeholder(&mut self, catalog: &dyn AssetCatalog) {
        self.placeholder = self.asset == PLACEHOLDER_ASSET || !catalog.contains(&self.asset);
    }

    // Read-only accessors

    pub fn id(&self) -> &TokenId {
        &self.id
    }

    pub fn asset(&self) -> &str {
        &self.asset
    }

    /// Asset to draw: the placeholder when the real one is unknown locally.
    pub fn display_asset(&self) -> &str {
        if self.placeholder {
            PLACEHOLDER_ASSET
        } else {
            &self.asset
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    pub fn rotation(&self) -> i32 {
        self.rotation
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hp(&self) -> i64 {
        self.hp
    }

    pub fn max_hp(&self) -> i64 {
        self.max_hp
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn gm_only_notes(&self) -> bool {
        self.gm_only_notes
    }

    pub fn tint(&self) -> Tint {
        self.tint
    }

    pub fn border_style(&self) -> BorderStyle {
        self.border_style
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    pub fn z_index(&self) -> i64 {
        self.z_index
    }

    pub fn scripts(&self) -> &BTreeMap<String, String> {
        &self.scripts
    }

    /// Script bound to `event`, if any
    pub fn script(&self, event: &str) -> Option<&str> {
        self.scripts.get(event).map(String::as_str)
    }

    // Mutators

    pub fn set_position(&mut self, x: f64, y: f64) {
        if x.is_finite() && y.is_finite() {
            self.x = x;
            self.y = y;
        }
    }

    pub fn translate(&mut self, dx: f64, dy: f64) {
        self.set_position(self.x + dx, self.y + dy);
    }

    /// Sets the rotation in degrees, wrapped into `0..360`.
    pub fn set_rotation(&mut self, degrees: i64) {
        self.rotation = degrees.rem_euclid(360) as i32;
    }

    pub fn rotate_by(&mut self, degrees: i64) {
        self.set_rotation(i64::from(self.rotation) + degrees);
    }

    /// Sets the scale; non-positive or non-finite values are ignored.
    pub fn set_scale(&mut self, scale: f64) -> bool {
        if scale.is_finite() && scale > 0.0 {
            self.scale = scale;
            true
        } else {
            false
        }
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Floors `max_hp` at 1 and clamps `hp` into `[0, max_hp]`.
    pub fn set_hit_points(&mut self, hp: i64, max_hp: i64) {
        self.max_hp = max_hp.max(1);
        self.hp = hp.clamp(0, self.max_hp);
    }

    pub fn set_notes(&mut self, notes: impl Into<String>) {
        self.notes = notes.into();
    }

    pub fn set_gm_only_notes(&mut self, gm_only: bool) {
        self.gm_only_notes = gm_only;
    }

    pub fn set_tint(&mut self, tint: Tint) {
        self.tint = tint;
    }

    pub fn set_border_style(&mut self, style: BorderStyle) {
        self.border_style = style;
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    /// Sets or clears the group; an empty id clears it.
    pub fn set_group_id(&mut self, group_id: Option<String>) {
        self.group_id = group_id.filter(|g| !g.is_empty());
    }

    pub fn set_z_index(&mut self, z_index: i64) {
        self.z_index = z_index;
    }

    pub fn set_script(&mut self, event: impl Into<String>, source: impl Into<String>) {
        self.scripts.insert(event.into(), source.into());
    }

    pub fn remove_script(&mut self, event: &str) -> Option<String> {
        self.scripts.remove(event)
    }
}

/// Wire and file form of a token: every field optional.
///
/// Used both for full records and for partial updates. Unknown fields are
/// kept in `extra` so a relay can pass them on untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    #[serde(default, deserialize_with = "lenient::optional", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional", skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_float", skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, deserialize_with = "lenient::optional_float", skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, deserialize_with = "lenient::optional_int", skip_serializing_if = "Option::is_none")]
    pub rotation: Option<i64>,
    #[serde(default, deserialize_with = "lenient::optional_float", skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, deserialize_with = "lenient::optional", skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(default, deserialize_with = "lenient::optional", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional_int", skip_serializing_if = "Option::is_none")]
    pub hp: Option<i64>,
    #[serde(default, deserialize_with = "lenient::optional_int", skip_serializing_if = "Option::is_none")]
    pub max_hp: Option<i64>,
    #[serde(default, deserialize_with = "lenient::optional", skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional", skip_serializing_if = "Option::is_none")]
    pub gm_only_notes: Option<bool>,
    /// Either encoding; see [`Tint`]
    #[serde(default, deserialize_with = "lenient::optional", skip_serializing_if = "Option::is_none")]
    pub tint: Option<Vec<f64>>,
    #[serde(default, deserialize_with = "lenient::optional", skip_serializing_if = "Option::is_none")]
    pub border_style: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional", skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    /// `Some(None)` is an explicit `null` and clears the group
    #[serde(default, deserialize_with = "lenient::nullable", skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "lenient::optional_int", skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i64>,
    #[serde(default, deserialize_with = "lenient::optional", skip_serializing_if = "Option::is_none")]
    pub scripts: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenRecord {
    /// A record that only names its token; fill in the fields to update.
    pub fn for_token(id: &TokenId) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Self::default()
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.trim().is_empty())
    }

    /// Lenient conversion from an arbitrary JSON value; non-objects yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AnyAsset;
    use serde_json::json;

    fn record(value: Value) -> TokenRecord {
        serde_json::from_value(value).expect("record")
    }

    fn goblin() -> Token {
        Token::from_record(
            &record(json!({
                "id": "abc123", "asset": "goblin.png", "x": 100, "y": 200,
                "hp": 5, "max_hp": 5
            })),
            &AnyAsset,
            0,
        )
        .expect("valid record")
    }

    #[test]
    fn test_from_record_fills_defaults() {
        let token = goblin();
        assert_eq!(token.id().as_str(), "abc123");
        assert_eq!(token.position(), (100.0, 200.0));
        assert_eq!(token.scale(), 1.0);
        assert_eq!(token.name(), "Token");
        assert_eq!(token.tint(), Tint::WHITE);
        assert!(!token.is_placeholder());
    }

    #[test]
    fn test_from_record_requires_id() {
        let result = Token::from_record(&record(json!({"asset": "a.png"})), &AnyAsset, 0);
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_unknown_asset_becomes_placeholder() {
        let nothing_known = |_: &str| false;
        let token = Token::from_record(
            &record(json!({"id": "t1", "asset": "dragon.png"})),
            &nothing_known,
            0,
        )
        .expect("placeholder, not failure");
        assert!(token.is_placeholder());
        assert_eq!(token.asset(), "dragon.png");
        assert_eq!(token.display_asset(), PLACEHOLDER_ASSET);
    }

    #[test]
    fn test_spawn_defaults() {
        let token = Token::spawn("orc.png", 10.0, 20.0, 4);
        assert_eq!(token.name(), "orc.png");
        assert_eq!((token.hp(), token.max_hp()), (5, 5));
        assert_eq!(token.z_index(), 4);
        assert_eq!(token.id().as_str().len(), 8);
    }

    #[test]
    fn test_hit_point_invariant() {
        let mut token = goblin();
        token.set_hit_points(12, 0);
        assert_eq!((token.hp(), token.max_hp()), (1, 1));
        token.set_hit_points(-3, 10);
        assert_eq!((token.hp(), token.max_hp()), (0, 10));
    }

    #[test]
    fn test_rotation_wraps() {
        let mut token = goblin();
        token.rotate_by(-45);
        assert_eq!(token.rotation(), 315);
        token.set_rotation(765);
        assert_eq!(token.rotation(), 45);
    }

    #[test]
    fn test_apply_record_keeps_absent_fields() {
        let mut token = goblin();
        token.set_notes("keep me");
        token.apply_record(&record(json!({"id": "abc123", "x": 5, "hp": 2})));
        assert_eq!(token.position(), (5.0, 200.0));
        assert_eq!(token.hp(), 2);
        assert_eq!(token.max_hp(), 5);
        assert_eq!(token.notes(), "keep me");
    }

    #[test]
    fn test_apply_record_clamps_and_ignores_bad_values() {
        let mut token = goblin();
        token.apply_record(&record(json!({
            "hp": 99, "scale": -2, "tint": [255, 128, 0], "border_style": "wavy"
        })));
        assert_eq!(token.hp(), 5);
        assert_eq!(token.scale(), 1.0);
        assert_eq!(token.tint().to_bytes(), [255, 128, 0]);
        assert_eq!(token.border_style(), BorderStyle::None);
    }

    #[test]
    fn test_null_group_clears() {
        let mut token = goblin();
        token.set_group_id(Some("g1".into()));
        token.apply_record(&record(json!({"z_index": 3})));
        assert_eq!(token.group_id(), Some("g1"));
        token.apply_record(&record(json!({"group_id": null})));
        assert_eq!(token.group_id(), None);
    }

    #[test]
    fn test_record_keeps_unknown_fields() {
        let rec = record(json!({"id": "t1", "aura": {"radius": 3}}));
        assert_eq!(rec.extra.get("aura"), Some(&json!({"radius": 3})));
        let back = serde_json::to_value(&rec).expect("serialize");
        assert_eq!(back, json!({"id": "t1", "aura": {"radius": 3}}));
    }

    #[test]
    fn test_to_record_round_trips() {
        let mut token = goblin();
        token.set_script("onMove", "say('moved')");
        token.set_border_style(BorderStyle::Dotted);
        let rebuilt = Token::from_record(&token.to_record(), &AnyAsset, 0).expect("valid");
        assert_eq!(rebuilt, token);
    }
}
