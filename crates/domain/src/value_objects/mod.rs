//! Value objects - immutable, validated values without identity

mod tint;

pub use tint::Tint;
