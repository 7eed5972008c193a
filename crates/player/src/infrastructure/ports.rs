//! Port traits for infrastructure boundaries.

/// Source of randomness for dice rolls.
pub trait RandomPort: Send + Sync {
    /// Uniform integer in `min..=max`.
    fn gen_range(&self, min: i64, max: i64) -> i64;
}
