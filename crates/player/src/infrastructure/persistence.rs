//! Campaign and token files on disk.
//!
//! The document shapes live in `tabletop_domain::campaign`; this adapter reads
//! and writes them, hashes asset files, and turns integrity problems into
//! warnings instead of failures.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;

use tabletop_domain::{
    AssetCatalog, AssetEntry, CampaignFile, DomainError, RulesEngine, SessionState, Token,
    TokenExport, TokenId, CHECKSUM_PREFIX,
};

use crate::infrastructure::assets::AssetRegistry;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("File not found: {0}")]
    MissingFile(PathBuf),

    #[error("Invalid file format: {0}")]
    Format(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl PersistenceError {
    pub fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Problems found while loading that do not stop the load.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadWarning {
    MissingAsset { name: String, path: String },
    ChecksumMismatch { name: String, path: String },
    UnreadableAsset { name: String, path: String, error: String },
    /// Tokens whose asset is not available locally
    PlaceholderTokens(usize),
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAsset { name, path } => write!(f, "asset {name} missing at {path}"),
            Self::ChecksumMismatch { name, path } => {
                write!(f, "asset {name} at {path} changed since the campaign was saved")
            }
            Self::UnreadableAsset { name, path, error } => {
                write!(f, "asset {name} at {path} could not be read: {error}")
            }
            Self::PlaceholderTokens(count) => write!(f, "{count} token(s) shown as placeholders"),
        }
    }
}

/// Summary of a finished load
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedCampaign {
    pub campaign_name: Option<String>,
    /// Format version of the file as read
    pub version: u32,
    pub tokens: usize,
    pub warnings: Vec<LoadWarning>,
}

/// `sha256:<hex>` of a file's contents.
pub fn file_checksum(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(format!("{CHECKSUM_PREFIX}{}", hex::encode(Sha256::digest(&bytes))))
}

fn asset_entry(name: &str, path: &Path) -> AssetEntry {
    let mut entry = AssetEntry::new(path.to_string_lossy());
    match file_checksum(path) {
        Ok(checksum) => entry.checksum = Some(checksum),
        Err(e) => tracing::warn!(asset = %name, error = %e, "Saving asset without checksum"),
    }
    entry.last_modified = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .map(DateTime::<Utc>::from);
    entry
}

/// Writes the session, every registered asset and the global scripts.
pub fn save_campaign(
    path: &Path,
    campaign_name: &str,
    session: &SessionState,
    registry: &AssetRegistry,
    rules: &RulesEngine,
    saved_at: DateTime<Utc>,
) -> Result<CampaignFile, PersistenceError> {
    let assets = registry
        .iter()
        .map(|(name, file)| (name.to_string(), asset_entry(name, file)))
        .collect();
    let campaign = CampaignFile::capture(campaign_name, session, assets, rules, saved_at);

    write_file(path, &campaign.to_json_pretty()?)?;
    tracing::info!(
        path = %path.display(),
        tokens = campaign.tokens.len(),
        assets = campaign.assets.len(),
        "Campaign saved"
    );
    Ok(campaign)
}

/// Replaces the session and global scripts with a saved campaign.
///
/// The file's assets are verified and adopted into the registry where free.
/// Integrity problems come back as warnings; only unreadable or invalid
/// campaign files are errors, and then nothing is changed.
pub fn load_campaign(
    path: &Path,
    session: &mut SessionState,
    registry: &mut AssetRegistry,
    rules: &mut RulesEngine,
) -> Result<LoadedCampaign, PersistenceError> {
    let raw = read_file(path)?;
    let campaign = CampaignFile::from_json_str(&raw)?;

    let mut warnings = verify_assets(&campaign, registry);

    for error in session.replace_all(campaign.snapshot(), &*registry) {
        tracing::debug!(path = %path.display(), error = %error, "Skipped token record");
    }
    campaign.restore_rules(rules);

    let placeholders = session.tokens().iter().filter(|t| t.is_placeholder()).count();
    if placeholders > 0 {
        warnings.push(LoadWarning::PlaceholderTokens(placeholders));
    }
    for warning in &warnings {
        tracing::warn!(path = %path.display(), "{warning}");
    }

    tracing::info!(
        path = %path.display(),
        version = campaign.version,
        tokens = session.token_count(),
        "Campaign loaded"
    );
    Ok(LoadedCampaign {
        campaign_name: campaign.campaign_name().map(str::to_owned),
        version: campaign.version,
        tokens: session.token_count(),
        warnings,
    })
}

fn verify_assets(campaign: &CampaignFile, registry: &mut AssetRegistry) -> Vec<LoadWarning> {
    let mut warnings = Vec::new();
    for (name, entry) in &campaign.assets {
        let file = Path::new(&entry.path);
        if !file.exists() {
            warnings.push(LoadWarning::MissingAsset {
                name: name.clone(),
                path: entry.path.clone(),
            });
            continue;
        }

        if let Some(expected) = entry.checksum_hex() {
            match file_checksum(file) {
                Ok(actual) if actual.strip_prefix(CHECKSUM_PREFIX) == Some(expected) => {}
                Ok(_) => warnings.push(LoadWarning::ChecksumMismatch {
                    name: name.clone(),
                    path: entry.path.clone(),
                }),
                Err(e) => warnings.push(LoadWarning::UnreadableAsset {
                    name: name.clone(),
                    path: entry.path.clone(),
                    error: e.to_string(),
                }),
            }
        }

        registry.adopt(name, file);
    }
    warnings
}

pub fn export_token(path: &Path, token: &Token) -> Result<(), PersistenceError> {
    let export = TokenExport::from_token(token);
    write_file(path, &export.to_json_pretty()?)?;
    tracing::info!(path = %path.display(), token_id = %token.id(), "Token exported");
    Ok(())
}

/// Adds an exported token on top of the stack, under a fresh id if its own
/// is taken.
pub fn import_token(
    path: &Path,
    session: &mut SessionState,
    catalog: &dyn AssetCatalog,
) -> Result<TokenId, PersistenceError> {
    let raw = read_file(path)?;
    let token = TokenExport::from_json_str(&raw)?.into_token(catalog)?;
    let id = session.insert_token(token, catalog);
    tracing::info!(path = %path.display(), token_id = %id, "Token imported");
    Ok(id)
}

fn read_file(path: &Path) -> Result<String, PersistenceError> {
    fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => PersistenceError::MissingFile(path.to_path_buf()),
        _ => PersistenceError::io(path, e),
    })
}

fn write_file(path: &Path, contents: &str) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
    }
    fs::write(path, contents).map_err(|e| PersistenceError::io(path, e))
}
