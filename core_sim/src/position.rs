use serde::{Deserialize, Serialize};
use sim_runtime::{Point, Polygon};

/// Default footprint radius for a unit placed without one (km).
pub const DEFAULT_FOOTPRINT_KM: f64 = 0.25;

/// Planar position with course, rate and an owned footprint.
///
/// The footprint centroid follows `(x, y)`: every mutator re-centres it, so
/// callers never see the two drift apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionDescriptor {
    x: f64,
    y: f64,
    #[serde(default)]
    z: f64,
    /// Radians clockwise from grid north.
    #[serde(default)]
    course: f64,
    /// Kilometres per pulse.
    #[serde(default)]
    rate: f64,
    footprint: Polygon,
}

impl Default for PositionDescriptor {
    fn default() -> Self {
        Self::at(Point::ORIGIN, DEFAULT_FOOTPRINT_KM)
    }
}

impl PositionDescriptor {
    /// Circular footprint of `radius` km around `p`.
    pub fn at(p: Point, radius: f64) -> Self {
        Self::with_footprint(p, Polygon::regular(p, radius.max(1.0e-3), 16))
    }

    pub fn with_footprint(p: Point, footprint: Polygon) -> Self {
        let footprint = if footprint.is_empty() {
            Polygon::regular(p, DEFAULT_FOOTPRINT_KM, 16)
        } else {
            footprint.recentered(p)
        };
        Self {
            x: p.x,
            y: p.y,
            z: 0.0,
            course: 0.0,
            rate: 0.0,
            footprint,
        }
    }

    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn z(&self) -> f64 {
        self.z
    }

    pub fn course(&self) -> f64 {
        self.course
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn footprint(&self) -> &Polygon {
        &self.footprint
    }

    /// Move to `p`, dragging the footprint along.
    pub fn set_point(&mut self, p: Point) {
        self.footprint = self.footprint.translated(p - self.point());
        self.x = p.x;
        self.y = p.y;
    }

    pub fn set_z(&mut self, z: f64) {
        self.z = z;
    }

    pub fn set_motion(&mut self, course: f64, rate: f64) {
        self.course = course;
        self.rate = rate.max(0.0);
    }

    pub fn halt(&mut self) {
        self.rate = 0.0;
    }

    /// Replace the footprint shape; it is re-centred on the current point.
    pub fn set_footprint(&mut self, footprint: Polygon) {
        if !footprint.is_empty() {
            self.footprint = footprint.recentered(self.point());
        }
    }

    pub fn footprint_radius(&self) -> f64 {
        self.footprint.radius()
    }

    /// Half the bounding-box diagonal, the notional distance covered while
    /// redeploying in place.
    pub fn redeploy_displacement(&self) -> f64 {
        self.footprint
            .bounding_box()
            .map(|b| b.diagonal() * 0.5)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footprint_follows_point() {
        let mut pos = PositionDescriptor::at(Point::new(1.0, 1.0), 0.5);
        pos.set_point(Point::new(4.0, -2.0));
        assert!(pos.footprint().centroid().approx_eq(Point::new(4.0, -2.0), 1.0e-6));
        pos.set_footprint(Polygon::rectangle(Point::ORIGIN, 2.0, 1.0));
        assert!(pos.footprint().centroid().approx_eq(pos.point(), 1.0e-6));
    }

    #[test]
    fn displacement_is_half_diagonal() {
        let pos = PositionDescriptor::with_footprint(
            Point::ORIGIN,
            Polygon::rectangle(Point::ORIGIN, 3.0, 4.0),
        );
        assert!((pos.redeploy_displacement() - 2.5).abs() < 1e-9);
    }
}
