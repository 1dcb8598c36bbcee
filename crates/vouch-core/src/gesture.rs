//! The closed gesture vocabulary and challenge-step sampling.

use std::fmt;
use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A facial gesture the subject can be challenged to perform.
///
/// `BrowRaise` and `TongueOut` are recognized tags with no detector behind
/// them; they are excluded from the default challenge pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gesture {
    Blink,
    TurnLeft,
    TurnRight,
    Smile,
    BrowRaise,
    TongueOut,
}

impl Gesture {
    /// Gestures with a working detector; the default challenge pool.
    pub const DEFAULT_POOL: [Gesture; 4] = [
        Gesture::Blink,
        Gesture::TurnLeft,
        Gesture::TurnRight,
        Gesture::Smile,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Gesture::Blink => "blink",
            Gesture::TurnLeft => "turn_left",
            Gesture::TurnRight => "turn_right",
            Gesture::Smile => "smile",
            Gesture::BrowRaise => "brow_raise",
            Gesture::TongueOut => "tongue_out",
        }
    }
}

impl fmt::Display for Gesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown gesture tag: {0}")]
pub struct UnknownGesture(pub String);

impl FromStr for Gesture {
    type Err = UnknownGesture;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blink" => Ok(Gesture::Blink),
            "turn_left" => Ok(Gesture::TurnLeft),
            "turn_right" => Ok(Gesture::TurnRight),
            "smile" => Ok(Gesture::Smile),
            "brow_raise" => Ok(Gesture::BrowRaise),
            "tongue_out" => Ok(Gesture::TongueOut),
            other => Err(UnknownGesture(other.to_string())),
        }
    }
}

/// Sample `count` distinct challenge steps from `pool` in random order.
///
/// The caller supplies the RNG: the daemon passes `OsRng`, tests pass a
/// seeded generator. When `count` exceeds the pool size the whole pool is
/// returned (shuffled).
pub fn sample_steps<R: Rng + ?Sized>(rng: &mut R, pool: &[Gesture], count: usize) -> Vec<Gesture> {
    let mut pool = pool.to_vec();
    let count = count.min(pool.len());
    let (picked, _) = pool.partial_shuffle(rng, count);
    picked.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn round_trips_through_strings() {
        for g in [
            Gesture::Blink,
            Gesture::TurnLeft,
            Gesture::TurnRight,
            Gesture::Smile,
            Gesture::BrowRaise,
            Gesture::TongueOut,
        ] {
            assert_eq!(g.as_str().parse::<Gesture>().unwrap(), g);
        }
        assert!("nod".parse::<Gesture>().is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        assert_eq!(
            serde_json::to_string(&Gesture::TurnRight).unwrap(),
            "\"turn_right\""
        );
        let g: Gesture = serde_json::from_str("\"brow_raise\"").unwrap();
        assert_eq!(g, Gesture::BrowRaise);
    }

    #[test]
    fn samples_distinct_steps() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let steps = sample_steps(&mut rng, &Gesture::DEFAULT_POOL, 3);
            assert_eq!(steps.len(), 3);
            let mut dedup = steps.clone();
            dedup.sort();
            dedup.dedup();
            assert_eq!(dedup.len(), 3, "steps must be distinct: {steps:?}");
        }
    }

    #[test]
    fn sample_count_capped_at_pool_size() {
        let mut rng = StdRng::seed_from_u64(7);
        let steps = sample_steps(&mut rng, &Gesture::DEFAULT_POOL, 10);
        assert_eq!(steps.len(), Gesture::DEFAULT_POOL.len());
    }

    #[test]
    fn sampling_covers_the_pool() {
        // Over many draws every pool gesture should appear first at least once.
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen_first = std::collections::HashSet::new();
        for _ in 0..200 {
            let steps = sample_steps(&mut rng, &Gesture::DEFAULT_POOL, 3);
            seen_first.insert(steps[0]);
        }
        assert_eq!(seen_first.len(), Gesture::DEFAULT_POOL.len());
    }
}
