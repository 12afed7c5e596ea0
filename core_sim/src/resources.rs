use std::fmt;
use std::ops::{Add, AddAssign, Sub};

use bevy::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::hashing::FnvHasher;
use std::hash::Hasher;

/// Seconds since the scenario epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SimTime(pub i64);

impl SimTime {
    pub const EPOCH: SimTime = SimTime(0);

    pub fn seconds(self) -> i64 {
        self.0
    }

    pub fn hours(self) -> f64 {
        self.0 as f64 / 3_600.0
    }

    pub fn saturating_since(self, earlier: SimTime) -> SimDuration {
        SimDuration((self.0 - earlier.0).max(0))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_minutes = self.0.div_euclid(60);
        let day = total_minutes.div_euclid(24 * 60);
        let minute_of_day = total_minutes.rem_euclid(24 * 60);
        write!(
            f,
            "D+{day} {:02}:{:02}",
            minute_of_day / 60,
            minute_of_day % 60
        )
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SimDuration(pub i64);

impl SimDuration {
    pub const ZERO: SimDuration = SimDuration(0);

    pub const fn from_seconds(seconds: i64) -> Self {
        Self(seconds)
    }

    pub const fn from_minutes(minutes: i64) -> Self {
        Self(minutes * 60)
    }

    pub fn from_hours(hours: f64) -> Self {
        Self((hours * 3_600.0).round() as i64)
    }

    pub fn seconds(self) -> i64 {
        self.0
    }

    pub fn hours(self) -> f64 {
        self.0 as f64 / 3_600.0
    }
}

impl Add<SimDuration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimDuration) -> SimTime {
        SimTime(self.0 + rhs.0)
    }
}

impl AddAssign<SimDuration> for SimTime {
    fn add_assign(&mut self, rhs: SimDuration) {
        self.0 += rhs.0;
    }
}

impl Sub<SimTime> for SimTime {
    type Output = SimDuration;

    fn sub(self, rhs: SimTime) -> SimDuration {
        SimDuration(self.0 - rhs.0)
    }
}

impl Add for SimDuration {
    type Output = SimDuration;

    fn add(self, rhs: SimDuration) -> SimDuration {
        SimDuration(self.0 + rhs.0)
    }
}

/// World clock. `now` is the timestamp of the event being processed.
#[derive(Resource, Debug, Clone, Serialize, Deserialize)]
pub struct SimClock {
    pub now: SimTime,
    pub last_pulse: SimTime,
    pub pulse: SimDuration,
    pub pulse_count: u64,
    /// Hour of day at the epoch, used for daylight.
    pub epoch_hour: f64,
}

impl SimClock {
    pub fn new(pulse: SimDuration, epoch_hour: f64) -> Self {
        Self {
            now: SimTime::EPOCH,
            last_pulse: SimTime::EPOCH,
            pulse,
            pulse_count: 0,
            epoch_hour,
        }
    }

    pub fn pulse_hours(&self) -> f64 {
        self.pulse.hours()
    }

    pub fn hour_of_day(&self, at: SimTime) -> f64 {
        (self.epoch_hour + at.hours()).rem_euclid(24.0)
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new(SimDuration::from_minutes(10), 8.0)
    }
}

/// Pulse-local random source. Reseeded at the start of every pulse from the
/// scenario seed and the pulse number, so a resumed world draws the same
/// numbers as an uninterrupted one.
#[derive(Resource, Debug, Clone)]
pub struct SimRng {
    seed: u64,
    rng: ChaCha8Rng,
}

impl SimRng {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn reseed_for_pulse(&mut self, pulse: u64) {
        let mut hasher = FnvHasher::new();
        hasher.write_u64(self.seed);
        hasher.write_u64(pulse);
        self.rng = ChaCha8Rng::seed_from_u64(hasher.finish());
    }

    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }
}

/// Monotonic identifier sequences shared by the whole world.
#[derive(Resource, Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdAllocator {
    next_unit: u64,
    next_task: u64,
    next_supply_request: u64,
    next_engagement: u64,
    next_message: u64,
}

impl IdAllocator {
    pub fn unit(&mut self) -> u64 {
        self.next_unit += 1;
        self.next_unit
    }

    pub fn task(&mut self) -> u64 {
        self.next_task += 1;
        self.next_task
    }

    pub fn supply_request(&mut self) -> u64 {
        self.next_supply_request += 1;
        self.next_supply_request
    }

    pub fn engagement(&mut self) -> u64 {
        self.next_engagement += 1;
        self.next_engagement
    }

    pub fn message(&mut self) -> u64 {
        self.next_message += 1;
        self.next_message
    }

    /// Make sure future unit ids never collide with `used`.
    pub fn observe_unit(&mut self, used: u64) {
        self.next_unit = self.next_unit.max(used);
    }

    pub fn observe_task(&mut self, used: u64) {
        self.next_task = self.next_task.max(used);
    }
}

/// Scenario-level side registry.
#[derive(Resource, Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sides {
    pub colours: std::collections::BTreeMap<String, String>,
}

impl Sides {
    pub fn hostile(a: &str, b: &str) -> bool {
        a != b && a != "neutral" && b != "neutral"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn time_display_shows_day_and_clock() {
        assert_eq!(SimTime(0).to_string(), "D+0 00:00");
        assert_eq!(SimTime(26 * 3_600 + 5 * 60).to_string(), "D+1 02:05");
    }

    #[test]
    fn reseeding_is_reproducible() {
        let mut a = SimRng::new(42);
        let mut b = SimRng::new(42);
        a.reseed_for_pulse(3);
        b.reseed_for_pulse(3);
        let x: u64 = a.rng().gen();
        let y: u64 = b.rng().gen();
        assert_eq!(x, y);
        b.reseed_for_pulse(4);
        let z: u64 = b.rng().gen();
        assert_ne!(x, z);
    }

    #[test]
    fn hour_of_day_wraps() {
        let clock = SimClock::new(SimDuration::from_minutes(10), 22.0);
        assert!((clock.hour_of_day(SimTime(3 * 3_600)) - 1.0).abs() < 1e-9);
    }
}
