//! Planar geometry kernel.
//!
//! All coordinates are kilometres on the projected plane. Polygons are closed
//! ordered vertex loops; the closing vertex is implicit.

use std::f64::consts::PI;
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Tolerance used for degenerate and on-boundary tests (km).
pub const EPSILON: f64 = 1.0e-9;

/// Points closer than this to an edge count as lying on it.
const BOUNDARY_TOLERANCE: f64 = 1.0e-7;

/// Golden angle, used to rotate the probing ray when it grazes a vertex.
const GOLDEN_ANGLE: f64 = 2.399_963_229_728_653;

/// Vertex count of a materialised circle.
pub const CIRCLE_VERTICES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f64 {
        (other - self).length()
    }

    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn dot(self, other: Point) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// Z component of the 3D cross product.
    pub fn cross(self, other: Point) -> f64 {
        self.x * other.y - self.y * other.x
    }

    pub fn normalized(self) -> Option<Point> {
        let len = self.length();
        if len <= EPSILON {
            None
        } else {
            Some(Point::new(self.x / len, self.y / len))
        }
    }

    /// Left-hand perpendicular.
    pub fn perpendicular(self) -> Point {
        Point::new(-self.y, self.x)
    }

    pub fn lerp(self, other: Point, t: f64) -> Point {
        self + (other - self) * t
    }

    /// Bearing in radians, clockwise from grid north.
    pub fn bearing_to(self, other: Point) -> f64 {
        let d = other - self;
        d.x.atan2(d.y).rem_euclid(2.0 * PI)
    }

    /// Point at `distance` km along `bearing` (radians, clockwise from north).
    pub fn offset(self, bearing: f64, distance: f64) -> Point {
        Point::new(
            self.x + distance * bearing.sin(),
            self.y + distance * bearing.cos(),
        )
    }

    pub fn approx_eq(self, other: Point, tolerance: f64) -> bool {
        self.distance(other) <= tolerance
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Point {
    fn add_assign(&mut self, rhs: Point) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Point {
    type Output = Point;

    fn mul(self, rhs: f64) -> Point {
        Point::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for Point {
    type Output = Point;

    fn neg(self) -> Point {
        Point::new(-self.x, -self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub a: Point,
    pub b: Point,
}

impl Segment {
    pub const fn new(a: Point, b: Point) -> Self {
        Self { a, b }
    }

    pub fn length(&self) -> f64 {
        self.a.distance(self.b)
    }

    pub fn midpoint(&self) -> Point {
        self.a.lerp(self.b, 0.5)
    }

    pub fn distance_to_point(&self, p: Point) -> f64 {
        let ab = self.b - self.a;
        let len_sq = ab.dot(ab);
        if len_sq <= EPSILON * EPSILON {
            return self.a.distance(p);
        }
        let t = ((p - self.a).dot(ab) / len_sq).clamp(0.0, 1.0);
        self.a.lerp(self.b, t).distance(p)
    }

    /// Intersection point of two segments, including touching endpoints.
    pub fn intersection(&self, other: &Segment) -> Option<Point> {
        let r = self.b - self.a;
        let s = other.b - other.a;
        let denom = r.cross(s);
        let qp = other.a - self.a;
        if denom.abs() <= EPSILON {
            if qp.cross(r).abs() > EPSILON {
                return None;
            }
            // Collinear: report an endpoint that lies on the other segment.
            for candidate in [other.a, other.b] {
                if self.distance_to_point(candidate) <= BOUNDARY_TOLERANCE {
                    return Some(candidate);
                }
            }
            for candidate in [self.a, self.b] {
                if other.distance_to_point(candidate) <= BOUNDARY_TOLERANCE {
                    return Some(candidate);
                }
            }
            return None;
        }
        let t = qp.cross(s) / denom;
        let u = qp.cross(r) / denom;
        let slack = BOUNDARY_TOLERANCE / r.length().max(s.length()).max(EPSILON);
        if (-slack..=1.0 + slack).contains(&t) && (-slack..=1.0 + slack).contains(&u) {
            Some(self.a + r * t)
        } else {
            None
        }
    }

    pub fn intersects(&self, other: &Segment) -> bool {
        self.intersection(other).is_some()
    }

    /// Points spaced at most `spacing` apart along the segment, endpoints included.
    pub fn sample(&self, spacing: f64) -> Vec<Point> {
        let length = self.length();
        let steps = if spacing > EPSILON {
            (length / spacing).ceil().max(1.0) as usize
        } else {
            1
        };
        (0..=steps)
            .map(|i| self.a.lerp(self.b, i as f64 / steps as f64))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Point,
    pub max: Point,
}

impl BoundingBox {
    pub fn from_points(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = BoundingBox {
            min: *first,
            max: *first,
        };
        for p in &points[1..] {
            bbox.min.x = bbox.min.x.min(p.x);
            bbox.min.y = bbox.min.y.min(p.y);
            bbox.max.x = bbox.max.x.max(p.x);
            bbox.max.y = bbox.max.y.max(p.y);
        }
        Some(bbox)
    }

    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    pub fn diagonal(&self) -> f64 {
        self.min.distance(self.max)
    }

    pub fn center(&self) -> Point {
        self.min.lerp(self.max, 0.5)
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.min.x - BOUNDARY_TOLERANCE
            && p.x <= self.max.x + BOUNDARY_TOLERANCE
            && p.y >= self.min.y - BOUNDARY_TOLERANCE
            && p.y <= self.max.y + BOUNDARY_TOLERANCE
    }

    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        self.min.x <= other.max.x + BOUNDARY_TOLERANCE
            && other.min.x <= self.max.x + BOUNDARY_TOLERANCE
            && self.min.y <= other.max.y + BOUNDARY_TOLERANCE
            && other.min.y <= self.max.y + BOUNDARY_TOLERANCE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Triangle {
    pub a: Point,
    pub b: Point,
    pub c: Point,
}

impl Triangle {
    pub const fn new(a: Point, b: Point, c: Point) -> Self {
        Self { a, b, c }
    }

    pub fn signed_area(&self) -> f64 {
        0.5 * (self.b - self.a).cross(self.c - self.a)
    }

    pub fn area(&self) -> f64 {
        self.signed_area().abs()
    }

    pub fn centroid(&self) -> Point {
        Point::new(
            (self.a.x + self.b.x + self.c.x) / 3.0,
            (self.a.y + self.b.y + self.c.y) / 3.0,
        )
    }

    /// Centre of the circumscribed circle; `None` for collinear vertices.
    pub fn circumcenter(&self) -> Option<Point> {
        let d = 2.0
            * (self.a.x * (self.b.y - self.c.y)
                + self.b.x * (self.c.y - self.a.y)
                + self.c.x * (self.a.y - self.b.y));
        if d.abs() <= EPSILON {
            return None;
        }
        let a2 = self.a.dot(self.a);
        let b2 = self.b.dot(self.b);
        let c2 = self.c.dot(self.c);
        Some(Point::new(
            (a2 * (self.b.y - self.c.y) + b2 * (self.c.y - self.a.y) + c2 * (self.a.y - self.b.y))
                / d,
            (a2 * (self.c.x - self.b.x) + b2 * (self.a.x - self.c.x) + c2 * (self.b.x - self.a.x))
                / d,
        ))
    }

    pub fn circumradius(&self) -> Option<f64> {
        self.circumcenter().map(|center| center.distance(self.a))
    }

    /// Strict interior test used by ear clipping.
    fn contains_strict(&self, p: Point) -> bool {
        let d1 = (self.b - self.a).cross(p - self.a);
        let d2 = (self.c - self.b).cross(p - self.b);
        let d3 = (self.a - self.c).cross(p - self.c);
        let has_neg = d1 < -EPSILON || d2 < -EPSILON || d3 < -EPSILON;
        let has_pos = d1 > EPSILON || d2 > EPSILON || d3 > EPSILON;
        !(has_neg && has_pos) && d1.abs() > EPSILON && d2.abs() > EPSILON && d3.abs() > EPSILON
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub center: Point,
    pub radius: f64,
}

impl Circle {
    pub const fn new(center: Point, radius: f64) -> Self {
        Self { center, radius }
    }

    pub fn contains(&self, p: Point) -> bool {
        self.center.distance(p) <= self.radius + BOUNDARY_TOLERANCE
    }

    pub fn to_polygon(&self) -> Polygon {
        Polygon::regular(self.center, self.radius, CIRCLE_VERTICES)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Polygon {
    vertices: Vec<Point>,
}

impl Polygon {
    pub fn new(mut vertices: Vec<Point>) -> Self {
        if vertices.len() > 1 {
            let first = vertices[0];
            if vertices
                .last()
                .is_some_and(|last| last.approx_eq(first, EPSILON))
            {
                vertices.pop();
            }
        }
        Self { vertices }
    }

    /// Regular polygon with `sides` vertices on a circle.
    pub fn regular(center: Point, radius: f64, sides: usize) -> Self {
        let sides = sides.max(3);
        let vertices = (0..sides)
            .map(|i| {
                let angle = 2.0 * PI * i as f64 / sides as f64;
                Point::new(
                    center.x + radius * angle.cos(),
                    center.y + radius * angle.sin(),
                )
            })
            .collect();
        Self { vertices }
    }

    pub fn rectangle(center: Point, width: f64, height: f64) -> Self {
        let hw = width / 2.0;
        let hh = height / 2.0;
        Self::new(vec![
            Point::new(center.x - hw, center.y - hh),
            Point::new(center.x + hw, center.y - hh),
            Point::new(center.x + hw, center.y + hh),
            Point::new(center.x - hw, center.y + hh),
        ])
    }

    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn edges(&self) -> impl Iterator<Item = Segment> + '_ {
        let n = self.vertices.len();
        (0..n).filter_map(move |i| {
            if n < 2 {
                None
            } else {
                Some(Segment::new(self.vertices[i], self.vertices[(i + 1) % n]))
            }
        })
    }

    /// Shoelace area; positive for counter-clockwise loops.
    pub fn signed_area(&self) -> f64 {
        let n = self.vertices.len();
        if n < 3 {
            return 0.0;
        }
        let mut acc = 0.0;
        for i in 0..n {
            acc += self.vertices[i].cross(self.vertices[(i + 1) % n]);
        }
        acc / 2.0
    }

    /// Ear-clipping triangulation; `None` when the loop is not simple enough to clip.
    pub fn triangulate(&self) -> Option<Vec<Triangle>> {
        let n = self.vertices.len();
        if n < 3 {
            return None;
        }
        let mut indices: Vec<usize> = (0..n).collect();
        if self.signed_area() < 0.0 {
            indices.reverse();
        }
        let mut triangles = Vec::with_capacity(n - 2);
        while indices.len() > 3 {
            let m = indices.len();
            let mut clipped = None;
            for i in 0..m {
                let prev = indices[(i + m - 1) % m];
                let cur = indices[i];
                let next = indices[(i + 1) % m];
                let (a, b, c) = (self.vertices[prev], self.vertices[cur], self.vertices[next]);
                if (b - a).cross(c - b) <= EPSILON {
                    continue;
                }
                let candidate = Triangle::new(a, b, c);
                let blocked = indices.iter().any(|&k| {
                    k != prev && k != cur && k != next && candidate.contains_strict(self.vertices[k])
                });
                if !blocked {
                    triangles.push(candidate);
                    clipped = Some(i);
                    break;
                }
            }
            match clipped {
                Some(i) => {
                    indices.remove(i);
                }
                None => {
                    // Drop a collinear vertex if one is stalling the clip.
                    let collinear = (0..m).find(|&i| {
                        let a = self.vertices[indices[(i + m - 1) % m]];
                        let b = self.vertices[indices[i]];
                        let c = self.vertices[indices[(i + 1) % m]];
                        (b - a).cross(c - b).abs() <= EPSILON
                    });
                    match collinear {
                        Some(i) => {
                            indices.remove(i);
                        }
                        None => return None,
                    }
                }
            }
        }
        triangles.push(Triangle::new(
            self.vertices[indices[0]],
            self.vertices[indices[1]],
            self.vertices[indices[2]],
        ));
        Some(triangles)
    }

    pub fn area(&self) -> f64 {
        match self.triangulate() {
            Some(triangles) => triangles.iter().map(Triangle::area).sum(),
            None => self.signed_area().abs(),
        }
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(&self.vertices)
    }

    /// Area-weighted centroid; the vertex mean for degenerate loops.
    pub fn centroid(&self) -> Point {
        if self.vertices.is_empty() {
            return Point::ORIGIN;
        }
        if let Some(triangles) = self.triangulate() {
            let total: f64 = triangles.iter().map(Triangle::area).sum();
            if total > EPSILON {
                let mut acc = Point::ORIGIN;
                for tri in &triangles {
                    acc += tri.centroid() * tri.area();
                }
                return acc * (1.0 / total);
            }
        }
        let n = self.vertices.len() as f64;
        let sum = self
            .vertices
            .iter()
            .fold(Point::ORIGIN, |acc, v| acc + *v);
        sum * (1.0 / n)
    }

    /// Largest centroid-to-vertex distance.
    pub fn radius(&self) -> f64 {
        let c = self.centroid();
        self.vertices
            .iter()
            .map(|v| v.distance(c))
            .fold(0.0, f64::max)
    }

    pub fn on_boundary(&self, p: Point) -> bool {
        if self.vertices.len() == 1 {
            return self.vertices[0].approx_eq(p, BOUNDARY_TOLERANCE);
        }
        self.edges()
            .any(|edge| edge.distance_to_point(p) <= BOUNDARY_TOLERANCE)
    }

    /// Odd-crossing test. Boundary points count as inside. The probing ray is
    /// rotated whenever it would graze a vertex.
    pub fn point_inside(&self, p: Point) -> bool {
        if self.vertices.len() < 3 {
            return self.on_boundary(p);
        }
        if let Some(bbox) = self.bounding_box() {
            if !bbox.contains(p) {
                return false;
            }
        }
        if self.on_boundary(p) {
            return true;
        }
        let mut angle: f64 = 0.618_033_988_749_895;
        for _ in 0..16 {
            let dir = Point::new(angle.cos(), angle.sin());
            let grazes = self.vertices.iter().any(|v| {
                let rel = *v - p;
                rel.dot(dir) > 0.0 && dir.cross(rel).abs() <= BOUNDARY_TOLERANCE
            });
            if !grazes {
                return self.count_crossings(p, dir) % 2 == 1;
            }
            angle += GOLDEN_ANGLE;
        }
        self.count_crossings(p, Point::new(angle.cos(), angle.sin())) % 2 == 1
    }

    fn count_crossings(&self, p: Point, dir: Point) -> usize {
        self.edges()
            .filter(|edge| {
                let e = edge.b - edge.a;
                let denom = dir.cross(e);
                if denom.abs() <= EPSILON {
                    return false;
                }
                let ap = edge.a - p;
                let t = ap.cross(e) / denom;
                let s = ap.cross(dir) / denom;
                t > EPSILON && (0.0..1.0).contains(&s)
            })
            .count()
    }

    pub fn overlaps(&self, other: &Polygon) -> bool {
        match (self.bounding_box(), other.bounding_box()) {
            (Some(a), Some(b)) if a.overlaps(&b) => {}
            _ => return false,
        }
        if self.vertices.iter().any(|v| other.point_inside(*v))
            || other.vertices.iter().any(|v| self.point_inside(*v))
        {
            return true;
        }
        self.edges()
            .any(|e| other.edges().any(|f| e.intersects(&f)))
    }

    pub fn distance_to_point(&self, p: Point) -> f64 {
        if self.vertices.len() == 1 {
            return self.vertices[0].distance(p);
        }
        self.edges()
            .map(|edge| edge.distance_to_point(p))
            .fold(f64::INFINITY, f64::min)
    }

    /// Grow every vertex outward from the centroid by `offset` km.
    pub fn extend(&self, offset: f64) -> Polygon {
        let c = self.centroid();
        let vertices = self
            .vertices
            .iter()
            .map(|v| {
                let rel = *v - c;
                match rel.normalized() {
                    Some(dir) => c + dir * (rel.length() + offset).max(0.0),
                    None => *v,
                }
            })
            .collect();
        Polygon { vertices }
    }

    pub fn translated(&self, delta: Point) -> Polygon {
        Polygon {
            vertices: self.vertices.iter().map(|v| *v + delta).collect(),
        }
    }

    /// Translate so that the centroid lands on `center`.
    pub fn recentered(&self, center: Point) -> Polygon {
        if self.vertices.is_empty() {
            return self.clone();
        }
        self.translated(center - self.centroid())
    }

    /// Rejection sampling inside the bounding box; falls back to the centroid.
    pub fn random_point_inside<R: Rng + ?Sized>(&self, rng: &mut R) -> Point {
        let Some(bbox) = self.bounding_box() else {
            return Point::ORIGIN;
        };
        if bbox.width() <= EPSILON || bbox.height() <= EPSILON {
            return self.centroid();
        }
        for _ in 0..1000 {
            let candidate = Point::new(
                rng.gen_range(bbox.min.x..=bbox.max.x),
                rng.gen_range(bbox.min.y..=bbox.max.y),
            );
            if self.point_inside(candidate) {
                return candidate;
            }
        }
        self.centroid()
    }
}

/// Convex hull of `points` by angular sweep (gift wrapping) from the leftmost point.
/// The result is counter-clockwise.
pub fn rubberband(points: &[Point]) -> Polygon {
    let mut unique: Vec<Point> = Vec::with_capacity(points.len());
    for p in points {
        if !unique.iter().any(|u| u.approx_eq(*p, EPSILON)) {
            unique.push(*p);
        }
    }
    if unique.len() < 3 {
        return Polygon::new(unique);
    }
    let start = unique
        .iter()
        .copied()
        .min_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)))
        .unwrap_or(Point::ORIGIN);

    let mut hull = Vec::new();
    let mut current = start;
    loop {
        hull.push(current);
        let mut candidate = match unique.iter().find(|p| !p.approx_eq(current, EPSILON)) {
            Some(p) => *p,
            None => break,
        };
        for p in &unique {
            if p.approx_eq(current, EPSILON) {
                continue;
            }
            let turn = (candidate - current).cross(*p - current);
            if turn < -EPSILON
                || (turn.abs() <= EPSILON
                    && current.distance(*p) > current.distance(candidate))
            {
                candidate = *p;
            }
        }
        current = candidate;
        if current.approx_eq(start, EPSILON) || hull.len() > unique.len() {
            break;
        }
    }
    Polygon::new(hull)
}
