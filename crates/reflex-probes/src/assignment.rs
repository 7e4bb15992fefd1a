//! Per-surface probe assignment
//!
//! Two policies decide which probe lights a surface:
//!
//! - **Nearest box**: the probe whose box is closest to the surface position
//!   (squared distance, zero inside). Ties go to the earlier registered probe.
//! - **Wall routing** (floors, when a wall layout exists): the horizontal
//!   projection of the reflection ray is tested against every assigned wall;
//!   the nearest hit within the blend distance picks the wall's probe. With no
//!   hit the nearest-box probe is used as is, without blending.
//!
//! [`ProbeAssignment`] caches one [`SurfaceProbeBinding`] per surface and
//! drops the cache whenever the registry reports a mutation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use glam::{Vec2, Vec3};
use reflex_core::{horizontal, ray_segment_hit};

use crate::config::{ProbeSettings, MAX_BOUND_WALLS};
use crate::pipeline::ShaderVariantKey;
use crate::probes::{ProbeId, ProbeRegistry, ProbeVolume, SubscriptionId, WallLayout};

/// Horizontal reflection components shorter than this cannot be routed.
const PLANAR_EPSILON: f32 = 1e-4;

/// Caller-assigned surface identity (one per draw).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SurfaceKind {
    /// Walls, furniture and anything not horizontal
    #[default]
    General,
    /// Horizontal floor surfaces, eligible for wall routing
    Floor,
}

/// A shaded surface as seen by assignment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Surface {
    pub id: SurfaceId,
    /// Representative world position (usually the bounds center)
    pub position: Vec3,
    pub kind: SurfaceKind,
    pub has_lightmap: bool,
}

impl Surface {
    pub fn new(id: u64, position: Vec3) -> Self {
        Self {
            id: SurfaceId(id),
            position,
            kind: SurfaceKind::General,
            has_lightmap: false,
        }
    }

    pub fn floor(id: u64, position: Vec3) -> Self {
        Self {
            kind: SurfaceKind::Floor,
            ..Self::new(id, position)
        }
    }

    pub fn with_lightmap(mut self, has_lightmap: bool) -> Self {
        self.has_lightmap = has_lightmap;
        self
    }
}

// ── Policies ────────────────────────────────────────────────────────────────

/// Index and squared distance of the nearest probe box. Strict comparison
/// keeps the earliest probe on ties.
pub fn nearest_probe(probes: &[ProbeVolume], point: Vec3) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (index, probe) in probes.iter().enumerate() {
        let distance = probe.squared_distance(point);
        if best.map_or(true, |(_, best_distance)| distance < best_distance) {
            best = Some((index, distance));
        }
    }
    best
}

/// Every probe ordered by box distance; the sort is stable so ties keep
/// insertion order.
pub fn rank_probes(probes: &[ProbeVolume], point: Vec3) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = probes
        .iter()
        .enumerate()
        .map(|(index, probe)| (index, probe.squared_distance(point)))
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
    ranked
}

/// Wall hit that decided a floor reflection.
#[derive(Debug, Clone, PartialEq)]
pub struct WallRoute {
    pub wall_index: usize,
    pub probe: ProbeId,
    /// Distance along the horizontal reflection ray
    pub distance: f32,
    pub point: Vec2,
}

/// Nearest assigned wall crossed by the horizontal reflection ray within
/// `max_distance`. Unassigned walls are ignored.
pub fn route_reflection(
    walls: &WallLayout,
    origin: Vec3,
    reflection: Vec3,
    max_distance: f32,
) -> Option<WallRoute> {
    let planar = horizontal(reflection);
    let length = planar.length();
    if length < PLANAR_EPSILON {
        return None;
    }
    let direction = planar / length;
    let origin = horizontal(origin);

    let mut best: Option<WallRoute> = None;
    for (wall_index, segment) in walls.segments().iter().enumerate() {
        let Some(probe) = &segment.probe else {
            continue;
        };
        let Some(hit) = ray_segment_hit(segment.start, segment.end, origin, direction) else {
            continue;
        };
        if hit.t > max_distance {
            continue;
        }
        if best.as_ref().map_or(true, |b| hit.t < b.distance) {
            best = Some(WallRoute {
                wall_index,
                probe: probe.clone(),
                distance: hit.t,
                point: hit.point,
            });
        }
    }
    best
}

/// Outcome of choosing a single probe for a shading point.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeSelection {
    Nearest { id: ProbeId, distance_squared: f32 },
    WallRouted(WallRoute),
}

impl ProbeSelection {
    pub fn id(&self) -> &ProbeId {
        match self {
            ProbeSelection::Nearest { id, .. } => id,
            ProbeSelection::WallRouted(route) => &route.probe,
        }
    }
}

/// Pick the probe for one shading point, using wall routing on floors when
/// the registry has walls. Mirrors what the fragment program computes.
pub fn select_probe(
    registry: &ProbeRegistry,
    position: Vec3,
    kind: SurfaceKind,
    reflection: Vec3,
    wall_blend_distance: f32,
) -> Option<ProbeSelection> {
    if kind == SurfaceKind::Floor && !registry.walls().is_empty() {
        if let Some(route) = route_reflection(registry.walls(), position, reflection, wall_blend_distance) {
            return Some(ProbeSelection::WallRouted(route));
        }
    }

    nearest_probe(registry.all(), position).map(|(index, distance_squared)| ProbeSelection::Nearest {
        id: registry.all()[index].id().clone(),
        distance_squared,
    })
}

// ── Bindings ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct BoundProbe {
    pub id: ProbeId,
    pub registry_index: usize,
    pub distance_squared: f32,
    /// `1 / (1 + distance_squared)`, normalized over the bound set
    pub weight: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundWall {
    pub start: Vec2,
    pub end: Vec2,
    /// Slot of the wall's probe in the bound set; `None` when unassigned or
    /// when its probe was not bound
    pub probe_slot: Option<u32>,
}

/// Probes and walls handed to the shading layer for one surface.
///
/// The bound set is chosen by distance to the surface and capped, then laid
/// out in registry order so the fragment program's first-wins loop breaks
/// ties the same way [`nearest_probe`] does.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SurfaceProbeBinding {
    pub probes: Vec<BoundProbe>,
    pub walls: Vec<BoundWall>,
    pub wall_blend_distance: f32,
    /// Probes left out because of the bound-set maximum
    pub dropped: usize,
}

impl SurfaceProbeBinding {
    /// Bound probe closest to the surface, the earliest slot on ties.
    pub fn nearest(&self) -> Option<&BoundProbe> {
        self.probes.iter().fold(None, |best: Option<&BoundProbe>, probe| match best {
            Some(best) if best.distance_squared <= probe.distance_squared => Some(best),
            _ => Some(probe),
        })
    }

    pub fn probe_count(&self) -> u32 {
        self.probes.len() as u32
    }

    pub fn wall_count(&self) -> u32 {
        self.walls.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub fn slot_of(&self, id: &ProbeId) -> Option<u32> {
        self.probes.iter().position(|p| &p.id == id).map(|slot| slot as u32)
    }

    pub fn variant_key(&self, lightmap_transition: bool) -> ShaderVariantKey {
        ShaderVariantKey::new(self.probe_count(), self.wall_count(), lightmap_transition)
    }

    /// Slot the fragment program picks at `position` for a `reflection`
    /// ray, evaluated over the bound slots only.
    pub fn select_slot(&self, registry: &ProbeRegistry, position: Vec3, reflection: Vec3) -> Option<u32> {
        let mut best: Option<(u32, f32)> = None;
        for (slot, bound) in self.probes.iter().enumerate() {
            let Some(volume) = registry.get(&bound.id) else {
                continue;
            };
            let distance = volume.squared_distance(position);
            if best.map_or(true, |(_, best_distance)| distance < best_distance) {
                best = Some((slot as u32, distance));
            }
        }
        let (nearest, _) = best?;
        Some(self.route_slot(position, reflection).unwrap_or(nearest))
    }

    /// Slot of the nearest bound wall crossed by the horizontal reflection
    /// ray within the blend distance.
    fn route_slot(&self, position: Vec3, reflection: Vec3) -> Option<u32> {
        let planar = horizontal(reflection);
        let length = planar.length();
        if length < PLANAR_EPSILON {
            return None;
        }
        let direction = planar / length;
        let origin = horizontal(position);

        let mut best: Option<(u32, f32)> = None;
        for wall in &self.walls {
            let Some(slot) = wall.probe_slot else {
                continue;
            };
            let Some(hit) = ray_segment_hit(wall.start, wall.end, origin, direction) else {
                continue;
            };
            if hit.t <= self.wall_blend_distance && best.map_or(true, |(_, t)| hit.t < t) {
                best = Some((slot, hit.t));
            }
        }
        best.map(|(slot, _)| slot)
    }

    /// Build the binding for `surface` from the current registry state.
    ///
    /// Every probe is ranked by distance to the surface and the registry cap
    /// drops the farthest. Floors with walls bind the same set and map each
    /// wall to the slot of its probe, so rays that hit no wall still fall
    /// back to any room's probe.
    pub fn compute(
        registry: &ProbeRegistry,
        surface: &Surface,
        wall_blend_distance: f32,
        max_bound_walls: u32,
    ) -> Self {
        let probes = registry.all();
        let routed = surface.kind == SurfaceKind::Floor && !registry.walls().is_empty();

        let mut ranked = rank_probes(probes, surface.position);
        let dropped = registry.cap_bound_set(&mut ranked);
        if dropped > 0 {
            log::warn!(
                "Surface {:?}: {} probes exceed the bound maximum of {}, dropped {} farthest",
                surface.id,
                ranked.len() + dropped,
                registry.max_bound_probes(),
                dropped
            );
        }
        ranked.sort_by_key(|&(index, _)| index);

        let total_weight: f32 = ranked.iter().map(|(_, d)| 1.0 / (1.0 + d)).sum();
        let bound: Vec<BoundProbe> = ranked
            .iter()
            .map(|&(index, distance_squared)| BoundProbe {
                id: probes[index].id().clone(),
                registry_index: index,
                distance_squared,
                weight: (1.0 / (1.0 + distance_squared)) / total_weight,
            })
            .collect();

        let walls = if routed && !bound.is_empty() {
            let segments = registry.walls().segments();
            if segments.len() > max_bound_walls as usize {
                log::warn!(
                    "Surface {:?}: {} walls exceed the maximum of {}, extra walls ignored",
                    surface.id,
                    segments.len(),
                    max_bound_walls
                );
            }
            segments
                .iter()
                .take(max_bound_walls as usize)
                .map(|segment| BoundWall {
                    start: segment.start,
                    end: segment.end,
                    probe_slot: segment.probe.as_ref().and_then(|id| {
                        bound.iter().position(|p| &p.id == id).map(|slot| slot as u32)
                    }),
                })
                .collect()
        } else {
            Vec::new()
        };

        Self {
            probes: bound,
            walls,
            wall_blend_distance,
            dropped,
        }
    }
}

// ── Invalidation & cache ────────────────────────────────────────────────────

/// Shared dirty bit raised by registry observers.
#[derive(Debug, Clone, Default)]
pub struct InvalidationFlag(Arc<AtomicBool>);

impl InvalidationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clear the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Cached surface bindings, invalidated by registry events.
#[derive(Debug)]
pub struct ProbeAssignment {
    bindings: HashMap<SurfaceId, (Surface, SurfaceProbeBinding)>,
    invalidation: InvalidationFlag,
    subscription: Option<SubscriptionId>,
    wall_blend_distance: f32,
    max_bound_walls: u32,
}

impl ProbeAssignment {
    pub fn new(settings: &ProbeSettings) -> Self {
        Self {
            bindings: HashMap::new(),
            invalidation: InvalidationFlag::new(),
            subscription: None,
            wall_blend_distance: settings.wall_blend_distance,
            max_bound_walls: MAX_BOUND_WALLS,
        }
    }

    pub fn with_max_bound_walls(mut self, max: u32) -> Self {
        self.max_bound_walls = max;
        self
    }

    pub fn set_max_bound_walls(&mut self, max: u32) {
        self.max_bound_walls = max;
        self.invalidate();
    }

    /// Subscribe to `registry` so edits that can change a binding drop the
    /// cached ones. Radiance map replacements do not.
    pub fn attach(&mut self, registry: &mut ProbeRegistry) {
        self.detach(registry);
        let flag = self.invalidation.clone();
        self.subscription = Some(registry.subscribe(Box::new(move |event| {
            if event.affects_assignment() {
                flag.raise();
            }
        })));
        self.invalidation.raise();
    }

    pub fn detach(&mut self, registry: &mut ProbeRegistry) {
        if let Some(subscription) = self.subscription.take() {
            registry.unsubscribe(subscription);
        }
    }

    pub fn invalidation_flag(&self) -> InvalidationFlag {
        self.invalidation.clone()
    }

    pub fn invalidate(&self) {
        self.invalidation.raise();
    }

    pub fn wall_blend_distance(&self) -> f32 {
        self.wall_blend_distance
    }

    pub fn set_wall_blend_distance(&mut self, distance: f32) {
        self.wall_blend_distance = distance;
        self.invalidate();
    }

    pub fn cached_len(&self) -> usize {
        self.bindings.len()
    }

    /// Binding for `surface`, recomputed when the registry changed or the
    /// surface moved since the cached result.
    pub fn binding_for(&mut self, registry: &ProbeRegistry, surface: &Surface) -> &SurfaceProbeBinding {
        if self.invalidation.take() {
            log::debug!("Probe assignment invalidated ({} cached surfaces)", self.bindings.len());
            self.bindings.clear();
        }

        let wall_blend_distance = self.wall_blend_distance;
        let max_bound_walls = self.max_bound_walls;
        let entry = self
            .bindings
            .entry(surface.id)
            .or_insert_with(|| {
                let binding = SurfaceProbeBinding::compute(registry, surface, wall_blend_distance, max_bound_walls);
                (*surface, binding)
            });
        if entry.0 != *surface {
            *entry = (
                *surface,
                SurfaceProbeBinding::compute(registry, surface, wall_blend_distance, max_bound_walls),
            );
        }
        &entry.1
    }
}
