//! Closed-form 2D geometry used by avoidance, combat and projectile sweeps.
//!
//! Everything here is pure and allocation free so it can be called from
//! parallel batches.

use glam::Vec2;
use serde::{Deserialize, Serialize};

const EPSILON: f32 = 1e-6;

/// Linear remap of `value` from `[in_min, in_max]` to `[out_min, out_max]`.
///
/// Not clamped. A degenerate input range snaps to whichever end `value`
/// has reached.
#[inline]
pub fn remap(in_min: f32, in_max: f32, out_min: f32, out_max: f32, value: f32) -> f32 {
    let span = in_max - in_min;
    if span.abs() < EPSILON {
        return if value >= in_max { out_max } else { out_min };
    }
    out_min + (value - in_min) * (out_max - out_min) / span
}

/// Rotate `v` counter-clockwise by `angle` radians.
#[inline]
pub fn rotate(v: Vec2, angle: f32) -> Vec2 {
    Vec2::from_angle(angle).rotate(v)
}

/// Static obstacle outline in local space, centred on the obstacle origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObstacleShape {
    Rectangle { half_extents: Vec2 },
    Circle { radius: f32 },
    Triangle { a: Vec2, b: Vec2, c: Vec2 },
}

impl ObstacleShape {
    /// Nearest point on (or inside) the shape placed at `center` with
    /// `orientation` radians of rotation.
    pub fn closest_point(&self, center: Vec2, orientation: f32, point: Vec2) -> Vec2 {
        match *self {
            ObstacleShape::Rectangle { half_extents } => {
                let local = rotate(point - center, -orientation);
                let clamped = local.clamp(-half_extents, half_extents);
                center + rotate(clamped, orientation)
            }
            ObstacleShape::Circle { radius } => {
                let offset = point - center;
                if offset.length_squared() <= radius * radius {
                    point
                } else {
                    center + offset.normalize_or_zero() * radius
                }
            }
            ObstacleShape::Triangle { a, b, c } => {
                let local = rotate(point - center, -orientation);
                center + rotate(closest_point_on_triangle(local, a, b, c), orientation)
            }
        }
    }

    /// Radius of a circle that fully contains the shape.
    pub fn bounding_radius(&self) -> f32 {
        match *self {
            ObstacleShape::Rectangle { half_extents } => half_extents.length(),
            ObstacleShape::Circle { radius } => radius,
            ObstacleShape::Triangle { a, b, c } => a.length().max(b.length()).max(c.length()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ObstacleShape::Rectangle { .. } => "Rectangle",
            ObstacleShape::Circle { .. } => "Circle",
            ObstacleShape::Triangle { .. } => "Triangle",
        }
    }
}

/// Closest point on the solid triangle `abc` to `p` (Voronoi region walk).
pub fn closest_point_on_triangle(p: Vec2, a: Vec2, b: Vec2, c: Vec2) -> Vec2 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        return a + ab * (d1 / (d1 - d3));
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        return a + ac * (d2 / (d2 - d6));
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    // Inside: in 2D the projection is the point itself.
    let denom = 1.0 / (va + vb + vc);
    a + ab * (vb * denom) + ac * (vc * denom)
}

/// Sweep the segment `start -> end` against a circle.
///
/// Returns the normalized time of first contact in `[0, 1]`, or `None` if
/// the segment never touches the circle. A segment starting inside the
/// circle hits at `t = 0`.
pub fn sweep_circle(start: Vec2, end: Vec2, center: Vec2, radius: f32) -> Option<f32> {
    let d = end - start;
    let f = start - center;
    let c = f.length_squared() - radius * radius;
    if c <= 0.0 {
        return Some(0.0);
    }
    let a = d.length_squared();
    if a <= EPSILON {
        return None;
    }
    let b = f.dot(d);
    if b > 0.0 {
        return None;
    }
    let disc = b * b - a * c;
    if disc < 0.0 {
        return None;
    }
    let t = (-b - disc.sqrt()) / a;
    (t <= 1.0).then_some(t)
}

/// Deterministic separation direction for two actors at the exact same
/// position.
///
/// Each component lies in `[-0.1, 0.1]` and is never the zero vector.
/// Swapping the arguments negates the result, so the two actors of a pair
/// are always pushed apart.
pub fn pair_jitter(a: u64, b: u64) -> Vec2 {
    let (lo, hi, sign) = if a <= b { (a, b, 1.0) } else { (b, a, -1.0) };
    let hash = splitmix64(lo ^ hi.rotate_left(32));
    let x = ((hash & 0xFFFF) as f32 / 65535.0) * 0.2 - 0.1;
    let y = (((hash >> 16) & 0xFFFF) as f32 / 65535.0) * 0.2 - 0.1;
    let jitter = Vec2::new(x, y);
    let jitter = if jitter.length_squared() < EPSILON {
        Vec2::new(0.1, 0.0)
    } else {
        jitter
    };
    jitter * sign
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec2, b: Vec2) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn test_remap_midpoint_and_degenerate() {
        assert!((remap(0.0, 60.0, 2.0, 10.0, 30.0) - 6.0).abs() < 1e-5);
        assert!((remap(0.5, 3.0, 0.0, 1.0, 3.0) - 1.0).abs() < 1e-5);
        assert_eq!(remap(5.0, 5.0, 1.0, 9.0, 5.0), 9.0);
        assert_eq!(remap(5.0, 5.0, 1.0, 9.0, 4.0), 1.0);
    }

    #[test]
    fn test_rectangle_closest_point_rotated() {
        let rect = ObstacleShape::Rectangle {
            half_extents: Vec2::new(2.0, 1.0),
        };
        // Axis aligned: point to the right snaps to the right face.
        let p = rect.closest_point(Vec2::ZERO, 0.0, Vec2::new(5.0, 0.5));
        assert!(approx(p, Vec2::new(2.0, 0.5)));

        // Rotated 90 degrees: the long axis is now vertical.
        let p = rect.closest_point(
            Vec2::ZERO,
            std::f32::consts::FRAC_PI_2,
            Vec2::new(0.0, 5.0),
        );
        assert!(approx(p, Vec2::new(0.0, 2.0)));

        // Inside points project onto themselves.
        let p = rect.closest_point(Vec2::ZERO, 0.3, Vec2::new(0.1, 0.1));
        assert!(approx(p, Vec2::new(0.1, 0.1)));
    }

    #[test]
    fn test_circle_closest_point() {
        let circle = ObstacleShape::Circle { radius: 2.0 };
        let p = circle.closest_point(Vec2::new(1.0, 1.0), 0.0, Vec2::new(5.0, 1.0));
        assert!(approx(p, Vec2::new(3.0, 1.0)));
    }

    #[test]
    fn test_triangle_closest_point_regions() {
        let a = Vec2::new(0.0, 0.0);
        let b = Vec2::new(4.0, 0.0);
        let c = Vec2::new(0.0, 4.0);
        assert!(approx(closest_point_on_triangle(Vec2::new(-1.0, -1.0), a, b, c), a));
        assert!(approx(closest_point_on_triangle(Vec2::new(6.0, -1.0), a, b, c), b));
        assert!(approx(
            closest_point_on_triangle(Vec2::new(2.0, -3.0), a, b, c),
            Vec2::new(2.0, 0.0)
        ));
        assert!(approx(
            closest_point_on_triangle(Vec2::new(3.0, 3.0), a, b, c),
            Vec2::new(2.0, 2.0)
        ));
        let inside = Vec2::new(1.0, 1.0);
        assert!(approx(closest_point_on_triangle(inside, a, b, c), inside));
    }

    #[test]
    fn test_sweep_circle_hits_and_misses() {
        let hit = sweep_circle(Vec2::new(-5.0, 0.0), Vec2::new(5.0, 0.0), Vec2::ZERO, 1.0);
        assert!((hit.unwrap() - 0.4).abs() < 1e-4);

        let miss = sweep_circle(Vec2::new(-5.0, 3.0), Vec2::new(5.0, 3.0), Vec2::ZERO, 1.0);
        assert!(miss.is_none());

        let short = sweep_circle(Vec2::new(-5.0, 0.0), Vec2::new(-3.0, 0.0), Vec2::ZERO, 1.0);
        assert!(short.is_none());

        let inside = sweep_circle(Vec2::new(0.2, 0.0), Vec2::new(3.0, 0.0), Vec2::ZERO, 1.0);
        assert_eq!(inside, Some(0.0));
    }

    #[test]
    fn test_pair_jitter_is_antisymmetric_and_bounded() {
        for (a, b) in [(1u64, 2u64), (42, 7), (1 << 40, 3)] {
            let j = pair_jitter(a, b);
            assert!(j.length_squared() > 0.0);
            assert!(j.x.abs() <= 0.1 && j.y.abs() <= 0.1);
            assert!(approx(j, -pair_jitter(b, a)));
        }
    }
}
