//! Kink-and-optimise path planning over a friction field, memoised in a
//! [`PathCache`] that survives world saves.

use std::collections::BTreeMap;
use std::time::Instant;

use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};
use sim_runtime::{GeoTranslator, Point, Segment};

use crate::sim_config::PlannerConfig;
use crate::terrain::{FrictionVector, TerrainMap};

/// Cache key: coarse start cell, coarse end cell and quantised friction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PathKey {
    pub from: String,
    pub to: String,
    pub friction: [u16; 7],
}

impl PathKey {
    /// Coarse MGRS cells when the plane is bound to the globe, whole
    /// kilometres otherwise.
    pub fn new(
        geo: &GeoTranslator,
        from: Point,
        to: Point,
        friction: &FrictionVector,
        precision: usize,
    ) -> Self {
        let cell = |p: Point| {
            geo.xy_to_mgrs(p, precision)
                .unwrap_or_else(|_| format!("{:.0}:{:.0}", p.x.floor(), p.y.floor()))
        };
        Self {
            from: cell(from),
            to: cell(to),
            friction: friction.key(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedPath {
    pub path: Vec<Point>,
    pub hits: f64,
    /// Leg evaluations spent solving the path. Deterministic stand-in for
    /// the wall time when ranking entries.
    pub effort: u64,
    pub wall_secs: f64,
}

/// Inputs for one planning call.
pub struct PathRequest<'a> {
    pub terrain: &'a TerrainMap,
    pub geo: &'a GeoTranslator,
    pub friction: &'a FrictionVector,
    pub config: &'a PlannerConfig,
    pub precision: usize,
    pub from: Point,
    pub to: Point,
}

#[derive(Resource, Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathCache {
    entries: BTreeMap<PathKey, CachedPath>,
    #[serde(skip)]
    hits: u64,
    #[serde(skip)]
    misses: u64,
}

impl PathCache {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn get(&self, key: &PathKey) -> Option<&CachedPath> {
        self.entries.get(key)
    }

    /// Waypoints from `request.from` to `request.to`, solved or recalled.
    pub fn plan(&mut self, request: PathRequest<'_>) -> Vec<Point> {
        let key = PathKey::new(
            request.geo,
            request.from,
            request.to,
            request.friction,
            request.precision,
        );
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.hits += 1.0;
            self.hits += 1;
            tracing::trace!(target: "opsim::paths", from = %key.from, to = %key.to, "path.cache_hit");
            let mut path = entry.path.clone();
            if let Some(first) = path.first_mut() {
                *first = request.from;
            }
            if let Some(last) = path.last_mut() {
                *last = request.to;
            }
            if path.len() < 2 {
                path = vec![request.from, request.to];
            }
            return path;
        }

        self.misses += 1;
        let solved = plan_path(request.terrain, request.friction, request.from, request.to, request.config);
        tracing::debug!(
            target: "opsim::paths",
            from = %key.from,
            to = %key.to,
            waypoints = solved.path.len(),
            effort = solved.effort,
            "path.solved"
        );
        let path = solved.path.clone();
        self.entries.insert(
            key,
            CachedPath {
                path: solved.path,
                hits: 0.0,
                effort: solved.effort,
                wall_secs: solved.wall_secs,
            },
        );
        if self.entries.len() > request.config.cache_capacity {
            self.prune(request.config);
        }
        path
    }

    /// Keep the entries with the highest `hits × effort`, then decay the
    /// survivors' hit counts.
    pub fn prune(&mut self, config: &PlannerConfig) {
        let keep = ((config.cache_capacity as f64) * config.retained_fraction).floor() as usize;
        let mut ranked: Vec<(PathKey, f64)> = self
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.hits * entry.effort as f64))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        let before = self.entries.len();
        for (key, _) in ranked.into_iter().skip(keep) {
            self.entries.remove(&key);
        }
        for entry in self.entries.values_mut() {
            entry.hits *= config.hit_decay;
        }
        tracing::debug!(target: "opsim::paths", before, after = self.entries.len(), "path.cache_pruned");
    }

    pub fn to_bytes(&self) -> bincode::Result<Vec<u8>> {
        bincode::serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> bincode::Result<Self> {
        bincode::deserialize(bytes)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolvedPath {
    pub path: Vec<Point>,
    pub effort: u64,
    pub wall_secs: f64,
}

/// Solve a path without touching any cache.
pub fn plan_path(
    terrain: &TerrainMap,
    friction: &FrictionVector,
    from: Point,
    to: Point,
    config: &PlannerConfig,
) -> SolvedPath {
    let mut planner = Planner {
        terrain,
        friction,
        config,
        evaluations: 0,
        started: Instant::now(),
    };
    let kinked = planner.kink(from, to, 0);
    let path = planner.optimise(kinked);
    SolvedPath {
        path,
        effort: planner.evaluations,
        wall_secs: planner.started.elapsed().as_secs_f64(),
    }
}

struct Planner<'a> {
    terrain: &'a TerrainMap,
    friction: &'a FrictionVector,
    config: &'a PlannerConfig,
    evaluations: u64,
    started: Instant,
}

impl Planner<'_> {
    fn cost(&mut self, a: Point, b: Point) -> f64 {
        self.evaluations += 1;
        self.terrain
            .segment_cost(a, b, self.friction, self.config.sample_km)
    }

    fn out_of_time(&self) -> bool {
        self.started.elapsed() > self.config.wall_budget()
    }

    fn kink(&mut self, a: Point, b: Point, depth: u32) -> Vec<Point> {
        let length = a.distance(b);
        if length < self.config.cutoff_km || depth >= self.config.max_depth || self.out_of_time() {
            return vec![a, b];
        }
        let samples = Segment::new(a, b).sample(self.config.sample_km);
        if samples.len() < 3 {
            return vec![a, b];
        }
        let interior = &samples[1..samples.len() - 1];
        let costs: Vec<f64> = interior
            .iter()
            .map(|p| self.friction.cost(self.terrain.terrain_under(*p)))
            .collect();
        let (worst, worst_cost) = costs
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::MIN), |best, (i, c)| if c > best.1 { (i, c) } else { best });
        let cheapest = costs.iter().copied().fold(f64::MAX, f64::min);
        if worst_cost - cheapest < 1.0e-9 {
            return vec![a, b];
        }

        let Some(direction) = (b - a).normalized() else {
            return vec![a, b];
        };
        let across = direction.perpendicular();
        let pivot = interior[worst];
        let candidates = self.config.corridor_candidates.max(1);
        let step = self.config.corridor_factor * length / candidates as f64;
        let bounds = self.terrain.bounds();
        let direct = self.cost(a, b);
        let mut best: Option<(Point, f64)> = None;
        for k in 1..=candidates {
            for sign in [1.0, -1.0] {
                let p = pivot + across * (sign * k as f64 * step);
                if !bounds.contains(p) {
                    continue;
                }
                let via = self.cost(a, p) + self.cost(p, b);
                if best.map_or(true, |(_, c)| via < c) {
                    best = Some((p, via));
                }
            }
        }
        match best {
            Some((p, via)) if via < direct => {
                let mut left = self.kink(a, p, depth + 1);
                let right = self.kink(p, b, depth + 1);
                left.pop();
                left.extend(right);
                left
            }
            _ => vec![a, b],
        }
    }

    /// Greedily drop interior waypoints while the effective length stays
    /// within tolerance of the kinked path.
    fn optimise(&mut self, mut path: Vec<Point>) -> Vec<Point> {
        if path.len() <= 2 {
            return path;
        }
        let mut legs: Vec<f64> = path.windows(2).map(|w| self.cost(w[0], w[1])).collect();
        let mut total: f64 = legs.iter().sum();
        let limit = total * (1.0 + self.config.optimise_tolerance);
        loop {
            if path.len() <= 2 || self.out_of_time() {
                break;
            }
            let mut removed = false;
            for i in 1..path.len() - 1 {
                let shortcut = self.cost(path[i - 1], path[i + 1]);
                let candidate = total - legs[i - 1] - legs[i] + shortcut;
                if candidate <= limit {
                    path.remove(i);
                    legs.splice(i - 1..=i, [shortcut]);
                    total = candidate;
                    removed = true;
                    break;
                }
            }
            if !removed {
                break;
            }
        }
        path
    }
}
