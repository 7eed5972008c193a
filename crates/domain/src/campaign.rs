//! Campaign save files and single-token exports
//!
//! Pure data: reading and writing files, and checksum verification, live in
//! the player's persistence adapter.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::assets::AssetCatalog;
use crate::common::lenient;
use crate::entities::{Background, SessionSnapshot, SessionState, Tilemap, Token, TokenRecord};
use crate::error::DomainError;
use crate::ids::TokenId;
use crate::rules::RulesEngine;

pub const CAMPAIGN_FORMAT_VERSION: u32 = 2;
pub const TOKEN_EXPORT_VERSION: u32 = 1;

/// Prefix of the checksum strings stored in campaign files
pub const CHECKSUM_PREFIX: &str = "sha256:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignMetadata {
    #[serde(default)]
    pub campaign_name: String,
    #[serde(default, deserialize_with = "lenient::optional")]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub engine_version: String,
}

/// One asset as recorded in a campaign file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetEntry {
    pub path: String,
    /// `sha256:<hex>`; absent in version-1 files
    #[serde(default, deserialize_with = "lenient::optional")]
    pub checksum: Option<String>,
    #[serde(default, deserialize_with = "lenient::optional")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl AssetEntry {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            checksum: None,
            last_modified: None,
        }
    }

    /// Hex digest without the `sha256:` prefix
    pub fn checksum_hex(&self) -> Option<&str> {
        self.checksum
            .as_deref()
            .and_then(|c| c.strip_prefix(CHECKSUM_PREFIX))
    }
}

/// A saved campaign. Version 1 files (assets as bare `{path}`, no metadata
/// or rules) deserialize into the same shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignFile {
    #[serde(default = "legacy_version")]
    pub version: u32,
    #[serde(default, deserialize_with = "lenient::optional")]
    pub metadata: Option<CampaignMetadata>,
    #[serde(default, deserialize_with = "assets_or_empty")]
    pub assets: BTreeMap<String, AssetEntry>,
    #[serde(default, deserialize_with = "records_or_empty")]
    pub tokens: Vec<TokenRecord>,
    #[serde(default, deserialize_with = "lenient::optional")]
    pub background: Option<Background>,
    #[serde(default, deserialize_with = "lenient::optional")]
    pub tilemap: Option<Tilemap>,
    #[serde(default)]
    pub rules: Option<Value>,
}

fn legacy_version() -> u32 {
    1
}

/// Skips entries that are not `{path: string, ...}`.
fn assets_or_empty<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, AssetEntry>, D::Error> {
    let raw = lenient::optional::<D, BTreeMap<String, Value>>(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|(name, entry)| {
            serde_json::from_value::<AssetEntry>(entry)
                .ok()
                .map(|entry| (name, entry))
        })
        .collect())
}

fn records_or_empty<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<TokenRecord>, D::Error> {
    let entries = lenient::optional::<D, Vec<Value>>(deserializer)?.unwrap_or_default();
    Ok(entries.iter().filter_map(TokenRecord::from_value).collect())
}

/// Record with the tint in the 0-255 file encoding
fn file_record(token: &Token) -> TokenRecord {
    let mut record = token.to_record();
    record.tint = Some(token.tint().to_bytes().map(f64::from).to_vec());
    record
}

impl CampaignFile {
    /// Captures the session and rules as a current-version campaign.
    pub fn capture(
        campaign_name: impl Into<String>,
        session: &SessionState,
        assets: BTreeMap<String, AssetEntry>,
        rules: &RulesEngine,
        saved_at: DateTime<Utc>,
    ) -> Self {
        Self {
            version: CAMPAIGN_FORMAT_VERSION,
            metadata: Some(CampaignMetadata {
                campaign_name: campaign_name.into(),
                saved_at: Some(saved_at),
                engine_version: env!("CARGO_PKG_VERSION").to_string(),
            }),
            assets,
            tokens: session.tokens().iter().map(file_record).collect(),
            background: session.background().cloned(),
            tilemap: session.tilemap().cloned(),
            rules: Some(rules.to_json()),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, DomainError> {
        let value: Value = serde_json::from_str(json)?;
        if !value.is_object() {
            return Err(DomainError::parse("campaign file must be a JSON object"));
        }
        let file: Self = serde_json::from_value(value)?;
        if file.version > CAMPAIGN_FORMAT_VERSION {
            return Err(DomainError::validation(format!(
                "unsupported campaign version {} (newest known is {CAMPAIGN_FORMAT_VERSION})",
                file.version
            )));
        }
        Ok(file)
    }

    pub fn to_json_pretty(&self) -> Result<String, DomainError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn campaign_name(&self) -> Option<&str> {
        self.metadata.as_ref().map(|m| m.campaign_name.as_str())
    }

    /// Session content of the file, ready for [`SessionState::replace_all`].
    pub fn snapshot(&self) -> SessionSnapshot {
        let mut campaign_meta = serde_json::Map::new();
        if let Some(name) = self.campaign_name() {
            campaign_meta.insert("campaign_name".to_string(), Value::from(name));
        }
        SessionSnapshot {
            campaign_meta,
            tokens: self.tokens.clone(),
            tilemap: self.tilemap.clone(),
            background: self.background.clone(),
        }
    }

    /// Loads the saved global scripts; a file without rules clears them.
    pub fn restore_rules(&self, engine: &mut RulesEngine) {
        engine.load_from_json(self.rules.as_ref().unwrap_or(&Value::Null));
    }
}

/// Single token saved on its own
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenExport {
    #[serde(default = "legacy_version")]
    pub version: u32,
    #[serde(default)]
    pub asset: String,
    pub data: TokenRecord,
}

impl TokenExport {
    pub fn from_token(token: &Token) -> Self {
        Self {
            version: TOKEN_EXPORT_VERSION,
            asset: token.asset().to_string(),
            data: file_record(token),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, DomainError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, DomainError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Builds the token to import. The id is kept when present; the session
    /// assigns a fresh one on insert if it is already taken.
    pub fn into_token(self, catalog: &dyn AssetCatalog) -> Result<Token, DomainError> {
        let mut record = self.data;
        if record.id().is_none() {
            record.id = Some(TokenId::new().into_string());
        }
        if record.asset.as_deref().map_or(true, str::is_empty) {
            record.asset = Some(self.asset);
        }
        Token::from_record(&record, catalog, 0)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::assets::AnyAsset;
    use crate::entities::{Tile, TileType};
    use crate::value_objects::Tint;

    fn session_with_goblin() -> SessionState {
        let mut session = SessionState::new();
        let id = session
            .spawn_token("goblin.png", 64.0, 128.0, &AnyAsset)
            .expect("spawn")
            .id()
            .clone();
        let token = session.token_mut(&id).expect("token");
        token.set_tint(Tint::new(0.5, 1.0, 0.0));
        token.set_script("onDeath", "say('urk')");
        session
    }

    #[test]
    fn test_capture_writes_byte_tint_and_metadata() {
        let session = session_with_goblin();
        let mut rules = RulesEngine::new(|_| 1);
        rules.set_global_script("onSpawn", "heal(1)");
        let mut assets = BTreeMap::new();
        assets.insert("goblin.png".to_string(), AssetEntry::new("/assets/goblin.png"));

        let file = CampaignFile::capture("Crypt", &session, assets, &rules, Utc::now());
        let value: Value =
            serde_json::from_str(&file.to_json_pretty().expect("json")).expect("parse");

        assert_eq!(value["version"], json!(2));
        assert_eq!(value["metadata"]["campaign_name"], json!("Crypt"));
        assert_eq!(value["tokens"][0]["tint"], json!([128.0, 255.0, 0.0]));
        assert_eq!(value["rules"], json!({"global": {"onSpawn": "heal(1)"}}));
        assert_eq!(value["assets"]["goblin.png"]["path"], json!("/assets/goblin.png"));
    }

    #[test]
    fn test_save_load_round_trip_restores_session() {
        let mut session = session_with_goblin();
        let mut map = Tilemap::default();
        map.set_tile(Tile::new(1, 1, TileType::Wall));
        session.set_tilemap(Some(map));
        let rules = RulesEngine::new(|_| 1);

        let json = CampaignFile::capture("Crypt", &session, BTreeMap::new(), &rules, Utc::now())
            .to_json_pretty()
            .expect("json");
        let file = CampaignFile::from_json_str(&json).expect("load");

        let mut restored = SessionState::new();
        assert!(restored.replace_all(file.snapshot(), &AnyAsset).is_empty());

        assert_eq!(restored.token_count(), 1);
        let token = &restored.tokens()[0];
        assert_eq!(token.position(), (64.0, 128.0));
        assert_eq!(token.script("onDeath"), Some("say('urk')"));
        let [r, g, b] = token.tint().channels();
        assert!((r - 0.5).abs() <= 1.0 / 255.0);
        assert_eq!((g, b), (1.0, 0.0));
        assert!(restored.tilemap().is_some_and(|m| m.tile(1, 1).is_some()));
    }

    #[test]
    fn test_version_one_file_loads() {
        let json = r#"{
            "assets": {"goblin.png": {"path": "/a/goblin.png"}, "bad": 7},
            "tokens": [{"id": "t1", "asset": "goblin.png", "x": 5, "y": 6, "tint": [255, 0, 0]}, "junk"],
            "background": {"path": "/a/bg.png", "camera": {"x": 1, "y": 2, "zoom": 1.5}}
        }"#;
        let file = CampaignFile::from_json_str(json).expect("load");

        assert_eq!(file.version, 1);
        assert!(file.metadata.is_none());
        assert_eq!(file.assets.len(), 1);
        assert!(file.assets["goblin.png"].checksum.is_none());
        assert_eq!(file.tokens.len(), 1);
        assert_eq!(file.background.as_ref().and_then(|b| b.path.as_deref()), Some("/a/bg.png"));

        let mut rules = RulesEngine::new(|_| 1);
        rules.set_global_script("onSpawn", "heal(1)");
        file.restore_rules(&mut rules);
        assert!(rules.global_scripts().is_empty());
    }

    #[test]
    fn test_rejects_future_version_and_non_objects() {
        assert!(CampaignFile::from_json_str(r#"{"version": 3}"#).is_err());
        assert!(CampaignFile::from_json_str("[1, 2]").is_err());
        assert!(CampaignFile::from_json_str("not json").is_err());
    }

    #[test]
    fn test_checksum_hex() {
        let mut entry = AssetEntry::new("/a/x.png");
        entry.checksum = Some("sha256:abcd".to_string());
        assert_eq!(entry.checksum_hex(), Some("abcd"));
        entry.checksum = Some("md5:abcd".to_string());
        assert_eq!(entry.checksum_hex(), None);
    }

    #[test]
    fn test_token_export_import_gets_fresh_id_when_taken() {
        let mut session = session_with_goblin();
        let original_id = session.tokens()[0].id().clone();
        let export = TokenExport::from_token(&session.tokens()[0]);

        let json = export.to_json_pretty().expect("json");
        let value: Value = serde_json::from_str(&json).expect("parse");
        assert_eq!(value["version"], json!(1));
        assert_eq!(value["asset"], json!("goblin.png"));
        assert_eq!(value["data"]["tint"], json!([128.0, 255.0, 0.0]));

        let token = TokenExport::from_json_str(&json)
            .expect("read")
            .into_token(&AnyAsset)
            .expect("token");
        let new_id = session.insert_token(token, &AnyAsset);

        assert_ne!(new_id, original_id);
        assert_eq!(session.token_count(), 2);
        assert_eq!(session.token(&new_id).map(Token::z_index), Some(session.max_z()));
    }

    #[test]
    fn test_token_export_without_id_or_asset_in_data() {
        let json = r#"{"version": 1, "asset": "orc.png", "data": {"name": "Orc", "hp": 7, "max_hp": 9}}"#;
        let token = TokenExport::from_json_str(json)
            .expect("read")
            .into_token(&AnyAsset)
            .expect("token");
        assert_eq!(token.asset(), "orc.png");
        assert_eq!((token.hp(), token.max_hp()), (7, 9));
        assert!(!token.id().as_str().is_empty());
    }
}
