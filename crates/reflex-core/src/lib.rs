//! Geometry primitives shared by the reflection probe crates.
//!
//! Everything here is plain CPU math with no GPU dependency: box distance
//! used for nearest-probe ranking, box-projected parallax correction and the
//! horizontal-plane ray/segment test behind wall-routed floor reflections.

pub mod bounds;
pub mod geometry;

pub use bounds::Aabb;
pub use geometry::{
    horizontal, intersect_ray_segment, parallax_correct, ray_segment_hit, squared_distance_to_aabb,
    SegmentHit, PARALLAX_EPSILON, PARALLAX_FAR,
};
