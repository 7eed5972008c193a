//! Asset lookup seam.
//!
//! Image loading lives outside the domain. Token handling only needs to know
//! whether an asset name resolves locally.

/// Asset name substituted for display when a token's asset is unknown locally.
pub const PLACEHOLDER_ASSET: &str = "__placeholder__";

/// Answers `asset_name -> exists` for token validity checks.
pub trait AssetCatalog: Send + Sync {
    fn contains(&self, asset_name: &str) -> bool;
}

/// Catalog that accepts every asset name.
///
/// The server never renders, so every asset reference counts as resolved there.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnyAsset;

impl AssetCatalog for AnyAsset {
    fn contains(&self, _asset_name: &str) -> bool {
        true
    }
}

impl<F> AssetCatalog for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn contains(&self, asset_name: &str) -> bool {
        self(asset_name)
    }
}
