//! Tabletop domain: tokens, tilemap, session state, the script sandbox and
//! the rules engine. No I/O and no async; both binaries build on this.

pub mod assets;
pub mod campaign;
pub mod common;
pub mod entities;
pub mod error;
pub mod ids;
pub mod rules;
pub mod scripting;
pub mod value_objects;

pub use assets::{AnyAsset, AssetCatalog, PLACEHOLDER_ASSET};
pub use campaign::{
    AssetEntry, CampaignFile, CampaignMetadata, TokenExport, CAMPAIGN_FORMAT_VERSION,
    CHECKSUM_PREFIX, TOKEN_EXPORT_VERSION,
};
pub use entities::{
    Background, BorderStyle, Camera, MergeOutcome, PropertyEdit, SessionSnapshot, SessionState,
    Tile, TileTrigger, TileType, Tilemap, Token, TokenAction, TokenRecord, TriggerKind,
    PROTOCOL_VERSION,
};
pub use error::DomainError;
pub use ids::{short_id, ClientId, TokenId};
pub use rules::{
    DispatchReport, RulesEngine, ScriptFailure, ScriptOrigin, DEFAULT_MAX_TRIGGER_DEPTH,
    EVENT_DEATH, EVENT_HP_CHANGE, EVENT_MOVE, EVENT_SPAWN,
};
pub use scripting::{ForbiddenConstruct, ScriptError};
pub use value_objects::Tint;
