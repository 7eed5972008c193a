//! Random implementations and the dice roller handed to the rules engine.

use std::sync::Arc;

use rand::Rng;

use crate::infrastructure::ports::RandomPort;

/// System random - uses real randomness.
pub struct SystemRandom;

impl SystemRandom {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomPort for SystemRandom {
    fn gen_range(&self, min: i64, max: i64) -> i64 {
        if max <= min {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }
}

/// `roll(sides)` for scripts: uniform in `1..=sides`, and 1 for fewer than
/// one side.
pub fn dice_roller(random: Arc<dyn RandomPort>) -> impl Fn(i64) -> i64 + Send + Sync + 'static {
    move |sides| random.gen_range(1, sides.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolls_stay_in_range() {
        let roll = dice_roller(Arc::new(SystemRandom::new()));
        for _ in 0..200 {
            let value = roll(6);
            assert!((1..=6).contains(&value));
        }
    }

    #[test]
    fn test_degenerate_dice_roll_one() {
        let roll = dice_roller(Arc::new(SystemRandom::new()));
        assert_eq!(roll(1), 1);
        assert_eq!(roll(0), 1);
        assert_eq!(roll(-4), 1);
    }
}
