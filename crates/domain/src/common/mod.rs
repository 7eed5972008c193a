//! Common utility functions shared across the Tabletop engine and player.
//!
//! # Design Principles
//!
//! - **Pure functions only** - no side effects, no I/O
//! - **Lenient input** - peers and old save files send loosely typed JSON;
//!   readers here coerce what they can and drop what they cannot

pub mod lenient;

pub use lenient::{int_or, value_as_float, value_as_int};
