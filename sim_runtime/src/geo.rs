//! Geographic translator: decimal lat/long, UTM and MGRS to and from the planar
//! kilometre frame used by the simulator.
//!
//! The planar frame is bound to one UTM zone by declaring that a given MGRS
//! string sits at a given planar point. Positions from neighbouring zones are
//! recast into the bound zone so the plane stays continuous across zone seams.
//! UPS (polar) coordinates are not supported.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::Point;

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

const MIN_LATITUDE: f64 = -80.0;
const MAX_LATITUDE: f64 = 84.0;

const BAND_LETTERS: &[u8; 20] = b"CDEFGHJKLMNPQRSTUVWX";
const COLUMN_SETS: [&[u8; 8]; 3] = [b"ABCDEFGH", b"JKLMNPQR", b"STUVWXYZ"];
const ROW_LETTERS: &[u8; 20] = b"ABCDEFGHJKLMNPQRSTUV";

/// Lowest northing (metres) found in each latitude band, in `BAND_LETTERS` order.
const BAND_MIN_NORTHING: [f64; 20] = [
    1_100_000.0,
    2_000_000.0,
    2_800_000.0,
    3_700_000.0,
    4_600_000.0,
    5_500_000.0,
    6_400_000.0,
    7_300_000.0,
    8_200_000.0,
    9_100_000.0,
    0.0,
    800_000.0,
    1_700_000.0,
    2_600_000.0,
    3_500_000.0,
    4_400_000.0,
    5_300_000.0,
    6_200_000.0,
    7_000_000.0,
    7_900_000.0,
];

const RECAST_ITERATIONS: usize = 12;
const RECAST_TOLERANCE_DEG: f64 = 1.0e-11;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeoError {
    #[error("invalid coordinate `{0}`")]
    InvalidCoordinate(String),
    #[error("latitude {0} is outside the UTM range [-80, 84]")]
    OutOfUtmRange(f64),
    #[error("geo translator has no planar binding")]
    Unbound,
}

/// Decimal degrees, WGS84.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Accepts `"45.5,-73.6"`, `"45.5 -73.6"` and hemisphere suffixes such as
    /// `"45.5N 73.6W"`.
    pub fn parse(text: &str) -> Result<Self, GeoError> {
        let invalid = || GeoError::InvalidCoordinate(text.to_string());
        let parts: Vec<&str> = text
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .collect();
        if parts.len() != 2 {
            return Err(invalid());
        }
        let lat = parse_hemisphere(parts[0], 'N', 'S').ok_or_else(invalid)?;
        let lon = parse_hemisphere(parts[1], 'E', 'W').ok_or_else(invalid)?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(invalid());
        }
        Ok(Self { lat, lon })
    }
}

fn parse_hemisphere(token: &str, positive: char, negative: char) -> Option<f64> {
    let upper = token.to_ascii_uppercase();
    if let Some(stripped) = upper.strip_suffix(positive) {
        stripped.parse().ok()
    } else if let Some(stripped) = upper.strip_suffix(negative) {
        stripped.parse::<f64>().ok().map(|v| -v)
    } else {
        upper.parse().ok()
    }
}

impl fmt::Display for LatLon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lon)
    }
}

/// A UTM coordinate. `northing` carries the southern false northing when the
/// band is south of the equator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Utm {
    pub zone: u8,
    pub band: char,
    pub easting: f64,
    pub northing: f64,
}

impl Utm {
    pub fn is_southern(&self) -> bool {
        self.band < 'N'
    }

    /// Northing relative to the equator, negative in the southern hemisphere.
    pub fn signed_northing(&self) -> f64 {
        if self.is_southern() {
            self.northing - FALSE_NORTHING_SOUTH
        } else {
            self.northing
        }
    }

    pub fn from_latlon(ll: LatLon) -> Result<Self, GeoError> {
        check_range(ll.lat)?;
        let zone = zone_for(ll);
        let (easting, signed) = forward(ll, zone);
        Ok(Self::from_signed(zone, band_for(ll.lat), easting, signed))
    }

    pub fn to_latlon(&self) -> LatLon {
        inverse(self.easting, self.signed_northing(), self.zone)
    }

    /// `"18T 611000 5040000"`.
    pub fn parse(text: &str) -> Result<Self, GeoError> {
        let invalid = || GeoError::InvalidCoordinate(text.to_string());
        let parts: Vec<&str> = text.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(invalid());
        }
        let (zone, band) = parse_zone_band(parts[0]).ok_or_else(invalid)?;
        let easting: f64 = parts[1].parse().map_err(|_| invalid())?;
        let northing: f64 = parts[2].parse().map_err(|_| invalid())?;
        Ok(Self {
            zone,
            band,
            easting,
            northing,
        })
    }

    /// MGRS with `precision` digits per axis (1 = 10 km, 5 = 1 m).
    pub fn to_mgrs(&self, precision: usize) -> String {
        let precision = precision.min(5);
        let set = COLUMN_SETS[((self.zone as usize) + 2) % 3];
        let col_index = ((self.easting / 100_000.0).floor() as i64 - 1).clamp(0, 7) as usize;
        let row_offset = if self.zone % 2 == 0 { 5 } else { 0 };
        let row_index = ((self.northing / 100_000.0).floor() as i64 + row_offset).rem_euclid(20) as usize;
        let mut out = format!(
            "{}{}{}{}",
            self.zone,
            self.band,
            set[col_index] as char,
            ROW_LETTERS[row_index] as char
        );
        if precision > 0 {
            let divisor = 10f64.powi(5 - precision as i32);
            let e = ((self.easting.rem_euclid(100_000.0)) / divisor).floor() as u64;
            let n = ((self.northing.rem_euclid(100_000.0)) / divisor).floor() as u64;
            out.push_str(&format!("{e:0width$}{n:0width$}", width = precision));
        }
        out
    }

    pub fn from_mgrs(text: &str) -> Result<Self, GeoError> {
        let invalid = || GeoError::InvalidCoordinate(text.to_string());
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let compact = compact.to_ascii_uppercase();
        if !compact.is_ascii() {
            return Err(invalid());
        }
        let digits_len = compact.chars().take_while(|c| c.is_ascii_digit()).count();
        if !(1..=2).contains(&digits_len) || compact.len() < digits_len + 3 {
            return Err(invalid());
        }
        let zone: u8 = compact[..digits_len].parse().map_err(|_| invalid())?;
        if !(1..=60).contains(&zone) {
            return Err(invalid());
        }
        let rest = compact[digits_len..].as_bytes();
        let band = rest[0] as char;
        let band_index = BAND_LETTERS
            .iter()
            .position(|b| *b as char == band)
            .ok_or_else(invalid)?;
        let set = COLUMN_SETS[((zone as usize) + 2) % 3];
        let col_index = set.iter().position(|b| *b == rest[1]).ok_or_else(invalid)?;
        let row_index = ROW_LETTERS
            .iter()
            .position(|b| *b == rest[2])
            .ok_or_else(invalid)?;
        let numeric = &compact[digits_len + 3..];
        if numeric.len() % 2 != 0
            || numeric.len() > 10
            || !numeric.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }
        let precision = numeric.len() / 2;
        let scale = 10f64.powi(5 - precision as i32);
        let (e_digits, n_digits) = numeric.split_at(precision);
        let e_offset = if precision == 0 {
            0.0
        } else {
            e_digits.parse::<f64>().map_err(|_| invalid())? * scale
        };
        let n_offset = if precision == 0 {
            0.0
        } else {
            n_digits.parse::<f64>().map_err(|_| invalid())? * scale
        };

        let easting = (col_index as f64 + 1.0) * 100_000.0 + e_offset;
        let row_offset = if zone % 2 == 0 { 5 } else { 0 };
        let hundred_k = (row_index as i64 - row_offset).rem_euclid(20) as f64;
        let mut northing = hundred_k * 100_000.0 + n_offset;
        let min_northing = BAND_MIN_NORTHING[band_index];
        while northing < min_northing {
            northing += 2_000_000.0;
        }
        Ok(Self {
            zone,
            band,
            easting,
            northing,
        })
    }

    fn from_signed(zone: u8, band: char, easting: f64, signed_northing: f64) -> Self {
        let northing = if band < 'N' {
            signed_northing + FALSE_NORTHING_SOUTH
        } else {
            signed_northing
        };
        Self {
            zone,
            band,
            easting,
            northing,
        }
    }
}

impl fmt::Display for Utm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{} {:.0} {:.0}",
            self.zone, self.band, self.easting, self.northing
        )
    }
}

fn parse_zone_band(token: &str) -> Option<(u8, char)> {
    let upper = token.to_ascii_uppercase();
    let band = upper.chars().last()?;
    if !BAND_LETTERS.contains(&(band as u8)) {
        return None;
    }
    let zone: u8 = upper[..upper.len() - 1].parse().ok()?;
    (1..=60).contains(&zone).then_some((zone, band))
}

fn check_range(lat: f64) -> Result<(), GeoError> {
    if (MIN_LATITUDE..=MAX_LATITUDE).contains(&lat) {
        Ok(())
    } else {
        Err(GeoError::OutOfUtmRange(lat))
    }
}

fn band_for(lat: f64) -> char {
    let index = ((lat - MIN_LATITUDE) / 8.0).floor().clamp(0.0, 19.0) as usize;
    BAND_LETTERS[index] as char
}

/// UTM zone including the Norway and Svalbard exceptions.
fn zone_for(ll: LatLon) -> u8 {
    let lon = if ll.lon >= 180.0 { ll.lon - 360.0 } else { ll.lon };
    let mut zone = ((lon + 180.0) / 6.0).floor() as i64 + 1;
    if (56.0..64.0).contains(&ll.lat) && (3.0..12.0).contains(&lon) {
        zone = 32;
    }
    if (72.0..=84.0).contains(&ll.lat) {
        zone = match lon {
            l if (0.0..9.0).contains(&l) => 31,
            l if (9.0..21.0).contains(&l) => 33,
            l if (21.0..33.0).contains(&l) => 35,
            l if (33.0..42.0).contains(&l) => 37,
            _ => zone,
        };
    }
    zone.clamp(1, 60) as u8
}

fn central_meridian(zone: u8) -> f64 {
    (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0
}

struct Ellipsoid {
    e2: f64,
    ep2: f64,
}

const fn ellipsoid() -> Ellipsoid {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    Ellipsoid {
        e2,
        ep2: e2 / (1.0 - e2),
    }
}

fn meridian_arc(phi: f64, e2: f64) -> f64 {
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    WGS84_A
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

/// Transverse Mercator forward projection onto `zone`; returns easting and
/// signed northing in metres.
fn forward(ll: LatLon, zone: u8) -> (f64, f64) {
    let Ellipsoid { e2, ep2 } = ellipsoid();
    let phi = ll.lat.to_radians();
    let lam = ll.lon.to_radians();
    let lam0 = central_meridian(zone).to_radians();
    let (sin_phi, cos_phi) = phi.sin_cos();
    let n = WGS84_A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let t = phi.tan().powi(2);
    let c = ep2 * cos_phi * cos_phi;
    let a = cos_phi * (lam - lam0);
    let m = meridian_arc(phi, e2);

    let easting = K0
        * n
        * (a + (1.0 - t + c) * a.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0)
        + FALSE_EASTING;
    let northing = K0
        * (m + n
            * phi.tan()
            * (a * a / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));
    (easting, northing)
}

fn inverse(easting: f64, signed_northing: f64, zone: u8) -> LatLon {
    let Ellipsoid { e2, ep2 } = ellipsoid();
    let x = easting - FALSE_EASTING;
    let m = signed_northing / K0;
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let mu = m / (WGS84_A * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));
    let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();
    let (sin1, cos1) = phi1.sin_cos();
    let n1 = WGS84_A / (1.0 - e2 * sin1 * sin1).sqrt();
    let t1 = phi1.tan().powi(2);
    let c1 = ep2 * cos1 * cos1;
    let r1 = WGS84_A * (1.0 - e2) / (1.0 - e2 * sin1 * sin1).powf(1.5);
    let d = x / (n1 * K0);

    let lat = phi1
        - (n1 * phi1.tan() / r1)
            * (d * d / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                    * d.powi(6)
                    / 720.0);
    let lon = central_meridian(zone).to_radians()
        + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1)
                * d.powi(5)
                / 120.0)
            / cos1;
    LatLon::new(lat.to_degrees(), lon.to_degrees())
}

/// Declares which UTM position corresponds to which planar point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub zone: u8,
    pub easting: f64,
    pub signed_northing: f64,
    pub origin: Point,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoTranslator {
    binding: Option<Binding>,
}

impl GeoTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bound(mgrs: &str, xy: Point) -> Result<Self, GeoError> {
        let mut translator = Self::new();
        translator.bind(mgrs, xy)?;
        Ok(translator)
    }

    /// Declare that MGRS string `mgrs` lies at planar point `xy` (km).
    pub fn bind(&mut self, mgrs: &str, xy: Point) -> Result<(), GeoError> {
        let utm = Utm::from_mgrs(mgrs)?;
        check_range(utm.to_latlon().lat)?;
        self.binding = Some(Binding {
            zone: utm.zone,
            easting: utm.easting,
            signed_northing: utm.signed_northing(),
            origin: xy,
        });
        Ok(())
    }

    pub fn binding(&self) -> Option<&Binding> {
        self.binding.as_ref()
    }

    fn require(&self) -> Result<&Binding, GeoError> {
        self.binding.as_ref().ok_or(GeoError::Unbound)
    }

    pub fn utm_to_xy(&self, utm: &Utm) -> Result<Point, GeoError> {
        let binding = *self.require()?;
        let (easting, northing) = if utm.zone == binding.zone {
            (utm.easting, utm.signed_northing())
        } else {
            let ll = utm.to_latlon();
            check_range(ll.lat)?;
            recast(ll, utm.signed_northing(), binding.zone)
        };
        Ok(Point::new(
            binding.origin.x + (easting - binding.easting) / 1000.0,
            binding.origin.y + (northing - binding.signed_northing) / 1000.0,
        ))
    }

    pub fn mgrs_to_xy(&self, mgrs: &str) -> Result<Point, GeoError> {
        self.utm_to_xy(&Utm::from_mgrs(mgrs)?)
    }

    pub fn latlon_to_xy(&self, ll: LatLon) -> Result<Point, GeoError> {
        self.utm_to_xy(&Utm::from_latlon(ll)?)
    }

    pub fn xy_to_latlon(&self, xy: Point) -> Result<LatLon, GeoError> {
        let binding = self.require()?;
        let easting = binding.easting + (xy.x - binding.origin.x) * 1000.0;
        let northing = binding.signed_northing + (xy.y - binding.origin.y) * 1000.0;
        let ll = inverse(easting, northing, binding.zone);
        check_range(ll.lat)?;
        Ok(ll)
    }

    /// UTM in the point's natural zone.
    pub fn xy_to_utm(&self, xy: Point) -> Result<Utm, GeoError> {
        Utm::from_latlon(self.xy_to_latlon(xy)?)
    }

    pub fn xy_to_mgrs(&self, xy: Point, precision: usize) -> Result<String, GeoError> {
        Ok(self.xy_to_utm(xy)?.to_mgrs(precision))
    }

    /// Parse MGRS, UTM (`"18T 611000 5040000"`) or lat/long text into the plane.
    pub fn parse_location(&self, text: &str) -> Result<Point, GeoError> {
        let trimmed = text.trim();
        if trimmed.split_whitespace().count() == 3 {
            if let Ok(utm) = Utm::parse(trimmed) {
                return self.utm_to_xy(&utm);
            }
        }
        if let Ok(utm) = Utm::from_mgrs(trimmed) {
            return self.utm_to_xy(&utm);
        }
        match LatLon::parse(trimmed) {
            Ok(ll) => self.latlon_to_xy(ll),
            Err(_) => Err(GeoError::InvalidCoordinate(text.to_string())),
        }
    }
}

/// Express a point in a foreign zone: start from the cos(lat)-scaled longitudinal
/// offset, then iterate round trips through the inverse projection until the
/// small-circle distortion is gone.
fn recast(ll: LatLon, signed_northing: f64, zone: u8) -> (f64, f64) {
    let metres_per_degree = WGS84_A.to_radians() * K0;
    let cos_lat = ll.lat.to_radians().cos();
    let mut easting =
        FALSE_EASTING + (ll.lon - central_meridian(zone)) * metres_per_degree * cos_lat;
    let mut northing = signed_northing;
    for _ in 0..RECAST_ITERATIONS {
        let back = inverse(easting, northing, zone);
        let dlon = ll.lon - back.lon;
        let dlat = ll.lat - back.lat;
        if dlon.abs() < RECAST_TOLERANCE_DEG && dlat.abs() < RECAST_TOLERANCE_DEG {
            break;
        }
        easting += dlon * metres_per_degree * back.lat.to_radians().cos();
        northing += dlat * metres_per_degree;
    }
    (easting, northing)
}

/// Grid bearing in radians clockwise from north between two planar points.
pub fn bearing(from: Point, to: Point) -> f64 {
    from.bearing_to(to)
}

/// Planar distance in kilometres.
pub fn distance(from: Point, to: Point) -> f64 {
    from.distance(to)
}
