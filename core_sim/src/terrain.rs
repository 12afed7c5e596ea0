//! Raster terrain classification and friction sampling.
//!
//! The raster is a grid of [`TerrainClass`] cells with a linear transform to
//! the planar kilometre frame. Row 0 is the northern edge; `origin` is the
//! planar position of the south-west corner. Anything outside the raster is
//! [`TerrainClass::OffMap`], which has zero friction in every mode.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{fs, io};

use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};
use sim_runtime::{BoundingBox, GeoError, GeoTranslator, Point, Polygon, Segment};
use thiserror::Error;

use crate::infrastructure::{Infrastructure, LocationError};

/// Effective-length multiplier used for cells with zero friction.
pub const IMPASSABLE_COST: f64 = 1.0e4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerrainClass {
    Unrestricted,
    Restricted,
    SeverelyRestricted,
    Urban,
    Water,
    Impassable,
    OffMap,
}

impl TerrainClass {
    pub const ALL: [TerrainClass; 7] = [
        TerrainClass::Unrestricted,
        TerrainClass::Restricted,
        TerrainClass::SeverelyRestricted,
        TerrainClass::Urban,
        TerrainClass::Water,
        TerrainClass::Impassable,
        TerrainClass::OffMap,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TerrainClass::Unrestricted => "unrestricted",
            TerrainClass::Restricted => "restricted",
            TerrainClass::SeverelyRestricted => "severely_restricted",
            TerrainClass::Urban => "urban",
            TerrainClass::Water => "water",
            TerrainClass::Impassable => "impassable",
            TerrainClass::OffMap => "off_map",
        }
    }

    /// Character used when a raster is stored as text.
    pub fn glyph(self) -> char {
        match self {
            TerrainClass::Unrestricted => '.',
            TerrainClass::Restricted => 'r',
            TerrainClass::SeverelyRestricted => 's',
            TerrainClass::Urban => 'u',
            TerrainClass::Water => 'w',
            TerrainClass::Impassable => '#',
            TerrainClass::OffMap => ' ',
        }
    }

    pub fn from_glyph(glyph: char) -> Option<TerrainClass> {
        TerrainClass::ALL.into_iter().find(|c| c.glyph() == glyph)
    }

    /// Classes that break line of sight.
    pub fn blocks_sight(self) -> bool {
        matches!(
            self,
            TerrainClass::Urban | TerrainClass::SeverelyRestricted | TerrainClass::Impassable
        )
    }
}

impl fmt::Display for TerrainClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TerrainClass {
    type Err = MapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        TerrainClass::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| MapError::UnknownClass(s.to_string()))
    }
}

/// Fraction of an area occupied by each class. Fractions sum to 1.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TerrainSample(BTreeMap<TerrainClass, f64>);

impl TerrainSample {
    pub fn single(class: TerrainClass) -> Self {
        Self(BTreeMap::from([(class, 1.0)]))
    }

    pub fn fraction(&self, class: TerrainClass) -> f64 {
        self.0.get(&class).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TerrainClass, f64)> + '_ {
        self.0.iter().map(|(c, f)| (*c, *f))
    }

    pub fn dominant(&self) -> TerrainClass {
        self.0
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(c, _)| *c)
            .unwrap_or(TerrainClass::OffMap)
    }

    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }
}

/// Friction per terrain class for one movement mode. 1 is no slowdown,
/// 0 is impassable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrictionVector(pub [f64; 7]);

impl FrictionVector {
    pub const UNIFORM: FrictionVector = FrictionVector([1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0]);

    pub fn get(&self, class: TerrainClass) -> f64 {
        if class == TerrainClass::OffMap {
            0.0
        } else {
            self.0[class.index()]
        }
    }

    /// Effective length per kilometre travelled in `class`.
    pub fn cost(&self, class: TerrainClass) -> f64 {
        let f = self.get(class);
        if f <= 0.0 {
            IMPASSABLE_COST
        } else {
            1.0 / f
        }
    }

    /// Quantised form used as a cache key.
    pub fn key(&self) -> [u16; 7] {
        let mut out = [0u16; 7];
        for (slot, value) in out.iter_mut().zip(self.0.iter()) {
            *slot = (value.clamp(0.0, 1.0) * 1000.0).round() as u16;
        }
        out
    }
}

#[derive(Debug, Error)]
pub enum MapError {
    #[error("failed to read map file {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse map metadata: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("terrain raster row {row} has {found} cells, expected {expected}")]
    RaggedRaster {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("terrain raster is empty")]
    EmptyRaster,
    #[error("terrain raster uses undeclared glyph '{0}'")]
    UnknownGlyph(char),
    #[error("unknown terrain class '{0}'")]
    UnknownClass(String),
    #[error("map reference is invalid: {0}")]
    Geo(#[from] GeoError),
    #[error(transparent)]
    Infrastructure(#[from] LocationError),
}

#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "RasterDocument", try_from = "RasterDocument")]
pub struct TerrainMap {
    columns: usize,
    rows: usize,
    km_per_px: f64,
    origin: Point,
    cells: Vec<TerrainClass>,
}

impl TerrainMap {
    pub fn uniform(width_km: f64, height_km: f64, km_per_px: f64, class: TerrainClass) -> Self {
        let km_per_px = km_per_px.max(1.0e-3);
        let columns = (width_km / km_per_px).ceil().max(1.0) as usize;
        let rows = (height_km / km_per_px).ceil().max(1.0) as usize;
        Self {
            columns,
            rows,
            km_per_px,
            origin: Point::ORIGIN,
            cells: vec![class; columns * rows],
        }
    }

    /// Build from text rows (north first) using the default glyphs or `legend`.
    pub fn from_rows<S: AsRef<str>>(
        rows: &[S],
        legend: &BTreeMap<char, TerrainClass>,
        km_per_px: f64,
    ) -> Result<Self, MapError> {
        let first = rows.first().ok_or(MapError::EmptyRaster)?;
        let columns = first.as_ref().chars().count();
        if columns == 0 {
            return Err(MapError::EmptyRaster);
        }
        let mut cells = Vec::with_capacity(columns * rows.len());
        for (index, row) in rows.iter().enumerate() {
            let found = row.as_ref().chars().count();
            if found != columns {
                return Err(MapError::RaggedRaster {
                    row: index,
                    found,
                    expected: columns,
                });
            }
            for glyph in row.as_ref().chars() {
                let class = legend
                    .get(&glyph)
                    .copied()
                    .or_else(|| TerrainClass::from_glyph(glyph))
                    .ok_or(MapError::UnknownGlyph(glyph))?;
                cells.push(class);
            }
        }
        Ok(Self {
            columns,
            rows: rows.len(),
            km_per_px,
            origin: Point::ORIGIN,
            cells,
        })
    }

    pub fn with_origin(mut self, origin: Point) -> Self {
        self.origin = origin;
        self
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn km_per_px(&self) -> f64 {
        self.km_per_px
    }

    pub fn bounds(&self) -> BoundingBox {
        BoundingBox {
            min: self.origin,
            max: Point::new(
                self.origin.x + self.columns as f64 * self.km_per_px,
                self.origin.y + self.rows as f64 * self.km_per_px,
            ),
        }
    }

    /// Paint a rectangle of cells, for fixtures and scenario overrides.
    pub fn paint(&mut self, area: &Polygon, class: TerrainClass) {
        for row in 0..self.rows {
            for col in 0..self.columns {
                if area.point_inside(self.pixel_center(col as i64, row as i64)) {
                    self.cells[row * self.columns + col] = class;
                }
            }
        }
    }

    fn pixel_center(&self, col: i64, row: i64) -> Point {
        Point::new(
            self.origin.x + (col as f64 + 0.5) * self.km_per_px,
            self.origin.y + (self.rows as f64 - row as f64 - 0.5) * self.km_per_px,
        )
    }

    fn pixel_of(&self, p: Point) -> (i64, i64) {
        let col = ((p.x - self.origin.x) / self.km_per_px).floor() as i64;
        let row = self.rows as i64 - 1 - ((p.y - self.origin.y) / self.km_per_px).floor() as i64;
        (col, row)
    }

    fn class_at_pixel(&self, col: i64, row: i64) -> TerrainClass {
        if col < 0 || row < 0 || col as usize >= self.columns || row as usize >= self.rows {
            TerrainClass::OffMap
        } else {
            self.cells[row as usize * self.columns + col as usize]
        }
    }

    /// Class of the single pixel under `p`.
    pub fn terrain_under(&self, p: Point) -> TerrainClass {
        let (col, row) = self.pixel_of(p);
        self.class_at_pixel(col, row)
    }

    /// Class histogram of the pixels whose centres fall inside `area`.
    pub fn sample_terrain(&self, area: &Polygon) -> TerrainSample {
        let Some(bbox) = area.bounding_box() else {
            return TerrainSample::single(TerrainClass::OffMap);
        };
        let (col_min, row_max) = self.pixel_of(bbox.min);
        let (col_max, row_min) = self.pixel_of(bbox.max);
        let mut counts: BTreeMap<TerrainClass, usize> = BTreeMap::new();
        let mut total = 0usize;
        for row in row_min..=row_max {
            for col in col_min..=col_max {
                if area.point_inside(self.pixel_center(col, row)) {
                    *counts.entry(self.class_at_pixel(col, row)).or_default() += 1;
                    total += 1;
                }
            }
        }
        if total == 0 {
            return TerrainSample::single(self.terrain_under(area.centroid()));
        }
        TerrainSample(
            counts
                .into_iter()
                .map(|(class, n)| (class, n as f64 / total as f64))
                .collect(),
        )
    }

    pub fn mean_friction(&self, area: &Polygon, friction: &FrictionVector) -> f64 {
        self.sample_terrain(area)
            .iter()
            .map(|(class, fraction)| fraction * friction.get(class))
            .sum()
    }

    pub fn friction_at(&self, p: Point, friction: &FrictionVector) -> f64 {
        friction.get(self.terrain_under(p))
    }

    /// Effective length of a straight leg, sampling at `sample_km`.
    pub fn segment_cost(&self, a: Point, b: Point, friction: &FrictionVector, sample_km: f64) -> f64 {
        let segment = Segment::new(a, b);
        let length = segment.length();
        if length <= 0.0 {
            return 0.0;
        }
        let samples = segment.sample(sample_km);
        let step = length / (samples.len() - 1).max(1) as f64;
        samples
            .windows(2)
            .map(|pair| step * friction.cost(self.terrain_under(pair[0].lerp(pair[1], 0.5))))
            .sum()
    }

    /// Effective length of a waypoint list.
    pub fn path_cost(&self, path: &[Point], friction: &FrictionVector, sample_km: f64) -> f64 {
        path.windows(2)
            .map(|pair| self.segment_cost(pair[0], pair[1], friction, sample_km))
            .sum()
    }

    /// Share of interior samples along `a -> b` that block line of sight.
    pub fn blocked_fraction(&self, a: Point, b: Point, sample_km: f64) -> f64 {
        let samples = Segment::new(a, b).sample(sample_km);
        if samples.len() <= 2 {
            return 0.0;
        }
        let interior = &samples[1..samples.len() - 1];
        let blocked = interior
            .iter()
            .filter(|p| self.terrain_under(**p).blocks_sight())
            .count();
        blocked as f64 / interior.len() as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RasterDocument {
    km_per_px: f64,
    origin: Point,
    raster: Vec<String>,
}

impl From<TerrainMap> for RasterDocument {
    fn from(map: TerrainMap) -> Self {
        let raster = map
            .cells
            .chunks(map.columns.max(1))
            .map(|row| row.iter().map(|c| c.glyph()).collect())
            .collect();
        Self {
            km_per_px: map.km_per_px,
            origin: map.origin,
            raster,
        }
    }
}

impl TryFrom<RasterDocument> for TerrainMap {
    type Error = MapError;

    fn try_from(doc: RasterDocument) -> Result<Self, Self::Error> {
        Ok(TerrainMap::from_rows(&doc.raster, &BTreeMap::new(), doc.km_per_px)?.with_origin(doc.origin))
    }
}

/// `main.json` inside a map package.
#[derive(Debug, Clone, Deserialize)]
struct MapMetadata {
    #[serde(default)]
    name: String,
    width_km: f64,
    #[serde(default)]
    climate: String,
    reference: MapReference,
    #[serde(default = "default_raster_file")]
    terrain: String,
    #[serde(default)]
    legend: BTreeMap<char, String>,
    #[serde(default)]
    infrastructure: Option<String>,
}

fn default_raster_file() -> String {
    "terrain.txt".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct MapReference {
    mgrs: String,
    xy: [f64; 2],
}

/// A loaded map folder.
#[derive(Debug, Clone)]
pub struct MapPackage {
    pub name: String,
    pub climate: String,
    pub root: PathBuf,
    pub terrain: TerrainMap,
    pub geo: GeoTranslator,
    pub infrastructure: Infrastructure,
}

impl MapPackage {
    pub fn load(root: &Path) -> Result<Self, MapError> {
        let meta_path = root.join("main.json");
        let meta: MapMetadata = serde_json::from_str(&read(&meta_path)?)?;

        let mut legend = BTreeMap::new();
        for (glyph, class) in &meta.legend {
            legend.insert(*glyph, class.parse::<TerrainClass>()?);
        }
        let raster_text = read(&root.join(&meta.terrain))?;
        let rows: Vec<&str> = raster_text.lines().filter(|l| !l.is_empty()).collect();
        let columns = rows.first().map(|r| r.chars().count()).unwrap_or(0).max(1);
        let terrain = TerrainMap::from_rows(&rows, &legend, meta.width_km / columns as f64)?;

        let geo = GeoTranslator::bound(
            &meta.reference.mgrs,
            Point::new(meta.reference.xy[0], meta.reference.xy[1]),
        )?;

        let infrastructure = match &meta.infrastructure {
            Some(file) => Infrastructure::from_file(&root.join(file), &geo)?,
            None => Infrastructure::default(),
        };

        tracing::info!(
            target: "opsim::config",
            map = %meta.name,
            columns = terrain.columns(),
            rows = terrain.rows(),
            "map.loaded"
        );

        Ok(Self {
            name: meta.name,
            climate: meta.climate,
            root: root.to_path_buf(),
            terrain,
            geo,
            infrastructure,
        })
    }
}

fn read(path: &Path) -> Result<String, MapError> {
    fs::read_to_string(path).map_err(|source| MapError::ReadFailed {
        path: path.to_path_buf(),
        source,
    })
}
