//! Infrastructure layer - network client, files on disk, randomness and
//! configuration.

pub mod assets;
pub mod config;
pub mod connection;
pub mod persistence;
pub mod ports;
pub mod random;

pub use assets::AssetRegistry;
pub use config::PlayerConfig;
pub use connection::{ClientError, ConnectionState, GameClient};
pub use persistence::{LoadWarning, LoadedCampaign, PersistenceError};
pub use random::SystemRandom;
