//! Qualitative probability arguments.
//!
//! An [`Argument`] starts at a [`Likelihood`] and is nudged up by pro points and
//! down by con points. Resolving it draws once against the resulting ladder rung.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Likelihood {
    Impossible,
    VeryUnlikely,
    Unlikely,
    #[default]
    Neutral,
    Likely,
    VeryLikely,
    Certain,
}

impl Likelihood {
    pub const LADDER: [Likelihood; 7] = [
        Likelihood::Impossible,
        Likelihood::VeryUnlikely,
        Likelihood::Unlikely,
        Likelihood::Neutral,
        Likelihood::Likely,
        Likelihood::VeryLikely,
        Likelihood::Certain,
    ];

    pub fn rung(self) -> i32 {
        self as i32
    }

    pub fn from_rung(rung: i32) -> Likelihood {
        Self::LADDER[rung.clamp(0, 6) as usize]
    }

    /// Default success probability of each rung.
    pub fn probability(self) -> f64 {
        match self {
            Likelihood::Impossible => 0.0,
            Likelihood::VeryUnlikely => 0.05,
            Likelihood::Unlikely => 0.25,
            Likelihood::Neutral => 0.5,
            Likelihood::Likely => 0.75,
            Likelihood::VeryLikely => 0.95,
            Likelihood::Certain => 1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Likelihood::Impossible => "impossible",
            Likelihood::VeryUnlikely => "very_unlikely",
            Likelihood::Unlikely => "unlikely",
            Likelihood::Neutral => "neutral",
            Likelihood::Likely => "likely",
            Likelihood::VeryLikely => "very_likely",
            Likelihood::Certain => "certain",
        }
    }
}

impl fmt::Display for Likelihood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown likelihood `{0}`")]
pub struct UnknownLikelihood(pub String);

impl FromStr for Likelihood {
    type Err = UnknownLikelihood;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        Likelihood::LADDER
            .into_iter()
            .find(|level| level.as_str() == normalized)
            .ok_or_else(|| UnknownLikelihood(s.to_string()))
    }
}

/// Outcome of a resolved argument. `increment` is positive on success and
/// grows with the margin of the draw; negative on failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub success: bool,
    pub increment: i32,
    pub level: Likelihood,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Argument {
    base: Likelihood,
    pros: Vec<String>,
    cons: Vec<String>,
    weight: i32,
}

impl Argument {
    pub fn new(base: Likelihood) -> Self {
        Self {
            base,
            ..Self::default()
        }
    }

    pub fn add_pro(&mut self, reason: impl Into<String>, points: i32) -> &mut Self {
        self.pros.push(reason.into());
        self.weight += points;
        self
    }

    pub fn add_con(&mut self, reason: impl Into<String>, points: i32) -> &mut Self {
        self.cons.push(reason.into());
        self.weight -= points;
        self
    }

    pub fn pros(&self) -> &[String] {
        &self.pros
    }

    pub fn cons(&self) -> &[String] {
        &self.cons
    }

    /// Rung after applying pros and cons. `Impossible` never moves.
    pub fn level(&self) -> Likelihood {
        if self.base == Likelihood::Impossible {
            return Likelihood::Impossible;
        }
        Likelihood::from_rung(self.base.rung() + self.weight).max(Likelihood::VeryUnlikely)
    }

    pub fn resolve<R: Rng + ?Sized>(&self, rng: &mut R) -> Resolution {
        self.resolve_with(rng, Likelihood::probability)
    }

    /// Resolve using a caller-supplied probability per rung.
    pub fn resolve_with<R, F>(&self, rng: &mut R, probability: F) -> Resolution
    where
        R: Rng + ?Sized,
        F: Fn(Likelihood) -> f64,
    {
        let level = self.level();
        let p = probability(level).clamp(0.0, 1.0);
        let draw: f64 = rng.gen();
        let success = draw < p;
        let increment = if success {
            // One point per quarter of headroom the draw cleared.
            1 + ((p - draw) * 4.0).floor() as i32
        } else {
            -1 - ((draw - p) * 4.0).floor() as i32
        };
        Resolution {
            success,
            increment,
            level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn pros_and_cons_move_along_ladder() {
        let mut arg = Argument::new(Likelihood::Neutral);
        arg.add_pro("close", 1).add_pro("light", 1);
        assert_eq!(arg.level(), Likelihood::VeryLikely);
        arg.add_con("fog", 3);
        assert_eq!(arg.level(), Likelihood::Unlikely);
    }

    #[test]
    fn impossible_is_sticky_and_cons_floor_at_very_unlikely() {
        let mut arg = Argument::new(Likelihood::Impossible);
        arg.add_pro("close", 5);
        assert_eq!(arg.level(), Likelihood::Impossible);

        let mut weak = Argument::new(Likelihood::Unlikely);
        weak.add_con("deception", 4);
        assert_eq!(weak.level(), Likelihood::VeryUnlikely);
    }

    #[test]
    fn certain_always_succeeds_and_impossible_never_does() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut sure = Argument::new(Likelihood::VeryLikely);
        sure.add_pro("close", 1);
        let never = Argument::new(Likelihood::Impossible);
        for _ in 0..200 {
            let hit = sure.resolve(&mut rng);
            assert!(hit.success);
            assert!(hit.increment >= 1);
            let miss = never.resolve(&mut rng);
            assert!(!miss.success);
            assert!(miss.increment <= -1);
        }
    }

    #[test]
    fn likelihood_parses_loose_spellings() {
        assert_eq!("very likely".parse::<Likelihood>(), Ok(Likelihood::VeryLikely));
        assert_eq!("Very-Unlikely".parse::<Likelihood>(), Ok(Likelihood::VeryUnlikely));
        assert!("sometimes".parse::<Likelihood>().is_err());
    }
}
