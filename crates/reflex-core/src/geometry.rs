use glam::{Vec2, Vec3};

use crate::bounds::Aabb;

/// Direction components smaller than this are treated as parallel to a box plane.
pub const PARALLAX_EPSILON: f32 = 1e-6;

/// Stand-in distance for axes the ray never crosses. Matches the WGSL constant.
pub const PARALLAX_FAR: f32 = 1e30;

const SEGMENT_EPSILON: f32 = 1e-8;

/// Squared distance from `point` to the box given by `center` and full `size`.
///
/// Zero when the point is inside or on the box. Each axis is clamped then
/// subtracted, the same per-axis form the fragment shader uses.
pub fn squared_distance_to_aabb(point: Vec3, center: Vec3, size: Vec3) -> f32 {
    Aabb::from_center_size(center, size).distance_squared_to_point(point)
}

/// Box-projected lookup direction.
///
/// Intersects the ray `surface_point + t * direction` with the box planes,
/// taking for each axis the plane on the side the direction points to, and
/// keeps the smallest distance of the three. The returned vector is the hit
/// point relative to `center`, ready to sample a cube map captured there.
pub fn parallax_correct(direction: Vec3, center: Vec3, size: Vec3, surface_point: Vec3) -> Vec3 {
    let aabb = Aabb::from_center_size(center, size);
    let axis_distance = |d: f32, p: f32, min: f32, max: f32| -> f32 {
        if d.abs() < PARALLAX_EPSILON {
            PARALLAX_FAR
        } else if d > 0.0 {
            (max - p) / d
        } else {
            (min - p) / d
        }
    };

    let tx = axis_distance(direction.x, surface_point.x, aabb.min.x, aabb.max.x);
    let ty = axis_distance(direction.y, surface_point.y, aabb.min.y, aabb.max.y);
    let tz = axis_distance(direction.z, surface_point.z, aabb.min.z, aabb.max.z);
    let t = tx.min(ty).min(tz);

    surface_point + direction * t - center
}

/// Full result of a horizontal ray/segment test.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentHit {
    /// Intersection point on the horizontal plane.
    pub point: Vec2,
    /// Ray parameter; equals the distance when the ray direction is unit length.
    pub t: f32,
    /// Position along the segment, 0 at `start` and 1 at `end`.
    pub u: f32,
}

fn cross(a: Vec2, b: Vec2) -> f32 {
    a.x * b.y - a.y * b.x
}

/// Ray/segment test on the horizontal plane.
///
/// Rejects parallel configurations, hits behind the origin (`t < 0`) and hits
/// outside the segment (`u` outside `[0, 1]`).
pub fn ray_segment_hit(
    seg_start: Vec2,
    seg_end: Vec2,
    ray_origin: Vec2,
    ray_dir: Vec2,
) -> Option<SegmentHit> {
    let edge = seg_end - seg_start;
    let denom = cross(ray_dir, edge);
    if denom.abs() < SEGMENT_EPSILON {
        return None;
    }

    let to_start = seg_start - ray_origin;
    let t = cross(to_start, edge) / denom;
    let u = cross(to_start, ray_dir) / denom;
    if t < 0.0 || !(0.0..=1.0).contains(&u) {
        return None;
    }

    Some(SegmentHit {
        point: ray_origin + ray_dir * t,
        t,
        u,
    })
}

/// Intersection point of a horizontal ray with a segment, if any.
pub fn intersect_ray_segment(
    seg_start: Vec2,
    seg_end: Vec2,
    ray_origin: Vec2,
    ray_dir: Vec2,
) -> Option<Vec2> {
    ray_segment_hit(seg_start, seg_end, ray_origin, ray_dir).map(|hit| hit.point)
}

/// Projection onto the horizontal (x, z) plane that wall layouts live in.
pub fn horizontal(v: Vec3) -> Vec2 {
    Vec2::new(v.x, v.z)
}
