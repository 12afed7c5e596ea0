//! Road network, named areas and the textual location grammar.
//!
//! A location is one of
//!
//! * `mgrs:18TXR1234567890` (also `utm:` and `ll:` forms),
//! * `xy:12.5,3`,
//! * `node:<name>` or `area:<name>` (the area centroid),
//! * `<distance>km <bearing> of <location>`, where the bearing is a compass
//!   point (`N`, `ENE`, ...) or degrees (`045`, `45deg`).
//!
//! Bare MGRS text without a prefix is accepted as a convenience.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};
use sim_runtime::{Circle, GeoError, GeoTranslator, Point, Polygon, Segment};
use thiserror::Error;

/// Default road corridor width when a link does not declare one.
pub const DEFAULT_ROAD_WIDTH_KM: f64 = 0.1;

const COMPASS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("no infrastructure is loaded for '{0}'")]
    DefaultInfrastructureNotFound(String),
    #[error("infrastructure has no node '{0}'")]
    InfrastructureNodeLookup(String),
    #[error("infrastructure has no area '{0}'")]
    InfrastructureAreaLookup(String),
    #[error("cannot resolve location '{0}'")]
    LocationLookup(String),
    #[error("invalid bearing '{0}'")]
    InvalidTextualBearing(String),
    #[error("location '{0}' has no type prefix")]
    NoTypedLocation(String),
    #[error("unsupported location type '{0}'")]
    UnsupportedLocationType(String),
    #[error(transparent)]
    Geo(#[from] GeoError),
    #[error("failed to read infrastructure file {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse infrastructure file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadLink {
    pub from: String,
    pub to: String,
    pub a: Point,
    pub b: Point,
    pub width_km: f64,
}

impl RoadLink {
    pub fn corridor_contains(&self, p: Point) -> bool {
        Segment::new(self.a, self.b).distance_to_point(p) <= self.width_km * 0.5
    }
}

#[derive(Resource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Infrastructure {
    loaded: bool,
    nodes: BTreeMap<String, Point>,
    links: Vec<RoadLink>,
    areas: BTreeMap<String, Polygon>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct InfrastructureDocument {
    nodes: BTreeMap<String, String>,
    links: Vec<LinkDocument>,
    /// Area name to vertex list, each vertex a location string.
    areas: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct LinkDocument {
    from: String,
    to: String,
    #[serde(default)]
    width_km: Option<f64>,
}

impl Infrastructure {
    pub fn from_file(path: &Path, geo: &GeoTranslator) -> Result<Self, LocationError> {
        let text = fs::read_to_string(path).map_err(|source| LocationError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text, geo)
    }

    pub fn from_json_str(json: &str, geo: &GeoTranslator) -> Result<Self, LocationError> {
        let doc: InfrastructureDocument = serde_json::from_str(json)?;
        let mut infra = Infrastructure {
            loaded: true,
            ..Default::default()
        };
        // Nodes may refer to earlier nodes, so resolve in declaration order
        // of the sorted map and retry once for forward references.
        let mut pending: Vec<(String, String)> = doc.nodes.into_iter().collect();
        for _ in 0..2 {
            let mut unresolved = Vec::new();
            for (name, text) in pending {
                match infra.resolve_location(&text, geo) {
                    Ok(p) => {
                        infra.nodes.insert(name, p);
                    }
                    Err(_) => unresolved.push((name, text)),
                }
            }
            pending = unresolved;
        }
        if let Some((_, text)) = pending.into_iter().next() {
            return Err(LocationError::LocationLookup(text));
        }
        for link in doc.links {
            let a = infra.node(&link.from)?;
            let b = infra.node(&link.to)?;
            infra.links.push(RoadLink {
                from: link.from,
                to: link.to,
                a,
                b,
                width_km: link.width_km.unwrap_or(DEFAULT_ROAD_WIDTH_KM),
            });
        }
        for (name, vertices) in doc.areas {
            let points = vertices
                .iter()
                .map(|v| infra.resolve_location(v, geo))
                .collect::<Result<Vec<_>, _>>()?;
            infra.areas.insert(name, Polygon::new(points));
        }
        Ok(infra)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn with_node(mut self, name: impl Into<String>, at: Point) -> Self {
        self.loaded = true;
        self.nodes.insert(name.into(), at);
        self
    }

    pub fn with_area(mut self, name: impl Into<String>, area: Polygon) -> Self {
        self.loaded = true;
        self.areas.insert(name.into(), area);
        self
    }

    pub fn with_road(mut self, from: &str, to: &str, width_km: f64) -> Result<Self, LocationError> {
        let a = self.node(from)?;
        let b = self.node(to)?;
        self.links.push(RoadLink {
            from: from.to_string(),
            to: to.to_string(),
            a,
            b,
            width_km,
        });
        Ok(self)
    }

    pub fn node(&self, name: &str) -> Result<Point, LocationError> {
        if !self.loaded {
            return Err(LocationError::DefaultInfrastructureNotFound(name.to_string()));
        }
        self.nodes
            .get(name)
            .copied()
            .ok_or_else(|| LocationError::InfrastructureNodeLookup(name.to_string()))
    }

    pub fn area(&self, name: &str) -> Result<&Polygon, LocationError> {
        if !self.loaded {
            return Err(LocationError::DefaultInfrastructureNotFound(name.to_string()));
        }
        self.areas
            .get(name)
            .ok_or_else(|| LocationError::InfrastructureAreaLookup(name.to_string()))
    }

    pub fn links(&self) -> &[RoadLink] {
        &self.links
    }

    pub fn on_road(&self, p: Point) -> bool {
        self.links.iter().any(|link| link.corridor_contains(p))
    }

    /// Resolve location text into a planar point.
    pub fn resolve_location(&self, text: &str, geo: &GeoTranslator) -> Result<Point, LocationError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(LocationError::NoTypedLocation(text.to_string()));
        }
        if let Some(relative) = parse_relative(trimmed) {
            let (distance, bearing_text, anchor) = relative?;
            let bearing = parse_bearing(bearing_text)?;
            let origin = self.resolve_location(anchor, geo)?;
            return Ok(origin.offset(bearing, distance));
        }
        let Some((kind, rest)) = trimmed.split_once(':') else {
            return match geo.parse_location(trimmed) {
                Ok(p) => Ok(p),
                Err(GeoError::Unbound) => Err(GeoError::Unbound.into()),
                Err(_) => Err(LocationError::NoTypedLocation(text.to_string())),
            };
        };
        let rest = rest.trim();
        match kind.trim().to_ascii_lowercase().as_str() {
            "mgrs" | "utm" | "ll" | "latlon" => Ok(geo.parse_location(rest)?),
            "xy" => parse_xy(rest).ok_or_else(|| LocationError::LocationLookup(text.to_string())),
            "node" => self.node(rest),
            "area" => Ok(self.area(rest)?.centroid()),
            other => Err(LocationError::UnsupportedLocationType(other.to_string())),
        }
    }

    /// Resolve area text: `area:<name>`, a `;`-separated vertex list, or a
    /// single location with an optional radius (`<location> r2km`).
    pub fn resolve_area(&self, text: &str, geo: &GeoTranslator) -> Result<Polygon, LocationError> {
        let trimmed = text.trim();
        if let Some(name) = trimmed.strip_prefix("area:") {
            return Ok(self.area(name.trim())?.clone());
        }
        if trimmed.contains(';') {
            let points = trimmed
                .split(';')
                .filter(|s| !s.trim().is_empty())
                .map(|s| self.resolve_location(s, geo))
                .collect::<Result<Vec<_>, _>>()?;
            if points.len() < 3 {
                return Err(LocationError::LocationLookup(text.to_string()));
            }
            return Ok(Polygon::new(points));
        }
        let (location, radius) = match trimmed.rsplit_once(" r") {
            Some((loc, r)) => match parse_km(r) {
                Some(radius) => (loc, radius),
                None => (trimmed, 0.5),
            },
            None => (trimmed, 0.5),
        };
        let center = self.resolve_location(location, geo)?;
        Ok(Circle::new(center, radius).to_polygon())
    }
}

fn parse_xy(text: &str) -> Option<Point> {
    let (x, y) = text.split_once(',')?;
    Some(Point::new(x.trim().parse().ok()?, y.trim().parse().ok()?))
}

fn parse_km(text: &str) -> Option<f64> {
    let t = text.trim().to_ascii_lowercase();
    if let Some(km) = t.strip_suffix("km") {
        return km.trim().parse().ok();
    }
    if let Some(m) = t.strip_suffix('m') {
        return m.trim().parse::<f64>().ok().map(|m| m / 1000.0);
    }
    None
}

type Relative<'a> = Result<(f64, &'a str, &'a str), LocationError>;

/// Split `"<distance> <bearing> of <anchor>"`. Returns `None` when the text
/// is not in relative form at all.
fn parse_relative(text: &str) -> Option<Relative<'_>> {
    let (head, anchor) = text.split_once(" of ")?;
    let mut parts = head.split_whitespace();
    let distance = parse_km(parts.next()?)?;
    let Some(bearing) = parts.next() else {
        return Some(Err(LocationError::InvalidTextualBearing(head.to_string())));
    };
    if parts.next().is_some() {
        return Some(Err(LocationError::InvalidTextualBearing(head.to_string())));
    }
    Some(Ok((distance, bearing, anchor.trim())))
}

/// Compass point or degrees clockwise from north, as radians.
pub fn parse_bearing(text: &str) -> Result<f64, LocationError> {
    let upper = text.trim().to_ascii_uppercase();
    if let Some(index) = COMPASS.iter().position(|c| *c == upper) {
        return Ok((index as f64 * 22.5).to_radians());
    }
    let degrees = upper
        .strip_suffix("DEG")
        .or_else(|| upper.strip_suffix('°'))
        .unwrap_or(&upper);
    match degrees.trim().parse::<f64>() {
        Ok(d) if (0.0..=360.0).contains(&d) => Ok(d.to_radians()),
        _ => Err(LocationError::InvalidTextualBearing(text.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Infrastructure {
        let doc = r#"{
            "nodes": { "bridge": "xy:5,5", "depot": "2km E of node:bridge" },
            "links": [ { "from": "bridge", "to": "depot", "width_km": 0.2 } ],
            "areas": { "AA Fox": ["xy:0,0", "xy:2,0", "xy:2,2", "xy:0,2"] }
        }"#;
        Infrastructure::from_json_str(doc, &GeoTranslator::new()).unwrap()
    }

    #[test]
    fn relative_locations_offset_from_anchor() {
        let infra = sample();
        let depot = infra.node("depot").unwrap();
        assert!(depot.approx_eq(Point::new(7.0, 5.0), 1e-9));
        let p = infra
            .resolve_location("500m 180 of node:bridge", &GeoTranslator::new())
            .unwrap();
        assert!(p.approx_eq(Point::new(5.0, 4.5), 1e-9));
    }

    #[test]
    fn areas_resolve_to_centroid_or_polygon() {
        let infra = sample();
        let geo = GeoTranslator::new();
        let c = infra.resolve_location("area:AA Fox", &geo).unwrap();
        assert!(c.approx_eq(Point::new(1.0, 1.0), 1e-9));
        let poly = infra.resolve_area("area:AA Fox", &geo).unwrap();
        assert!((poly.area() - 4.0).abs() < 1e-9);
        let circle = infra.resolve_area("xy:1,1 r2km", &geo).unwrap();
        assert!((circle.radius() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn road_corridor_membership() {
        let infra = sample();
        assert!(infra.on_road(Point::new(6.0, 5.05)));
        assert!(!infra.on_road(Point::new(6.0, 5.5)));
    }

    #[test]
    fn lookup_failures_are_typed() {
        let infra = sample();
        let geo = GeoTranslator::new();
        assert!(matches!(
            infra.resolve_location("node:ford", &geo),
            Err(LocationError::InfrastructureNodeLookup(_))
        ));
        assert!(matches!(
            infra.resolve_location("area:Objective", &geo),
            Err(LocationError::InfrastructureAreaLookup(_))
        ));
        assert!(matches!(
            infra.resolve_location("grid:1,2", &geo),
            Err(LocationError::UnsupportedLocationType(_))
        ));
        assert!(matches!(
            infra.resolve_location("2km sideways of xy:0,0", &geo),
            Err(LocationError::InvalidTextualBearing(_))
        ));
        assert!(matches!(
            Infrastructure::default().resolve_location("node:bridge", &geo),
            Err(LocationError::DefaultInfrastructureNotFound(_))
        ));
        assert!(matches!(
            infra.resolve_location("nowhere", &geo),
            Err(LocationError::Geo(GeoError::Unbound)) | Err(LocationError::NoTypedLocation(_))
        ));
    }

    #[test]
    fn compass_points_and_degrees() {
        assert!((parse_bearing("E").unwrap() - 90f64.to_radians()).abs() < 1e-12);
        assert!((parse_bearing("nw").unwrap() - 315f64.to_radians()).abs() < 1e-12);
        assert!((parse_bearing("045deg").unwrap() - 45f64.to_radians()).abs() < 1e-12);
        assert!(parse_bearing("up").is_err());
    }
}
