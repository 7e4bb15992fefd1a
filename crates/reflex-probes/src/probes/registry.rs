//! Probe registry - owns volumes, walls and observers

use glam::Vec3;
use reflex_core::Aabb;

use super::events::{ProbeEvent, ProbeObserver, ProbeObservers, SubscriptionId};
use super::interchange::ProbeSet;
use super::volume::{ProbeId, ProbeResolution, ProbeVolume};
use super::walls::{WallLayout, WallsDocument};
use crate::capture::RadianceMap;
use crate::config::ProbeSettings;
use crate::{Error, Result};

/// Active probes in insertion order, plus the wall layout that routes floor
/// reflections between them.
///
/// Every mutation fires a [`ProbeEvent`] before returning, so observers (and
/// assignment invalidation) are consistent within the same frame.
#[derive(Debug)]
pub struct ProbeRegistry {
    probes: Vec<ProbeVolume>,
    walls: WallLayout,
    observers: ProbeObservers,
    min_extent: f32,
    max_bound_probes: u32,
    default_resolution: ProbeResolution,
}

impl ProbeRegistry {
    pub fn new(settings: &ProbeSettings) -> Self {
        Self {
            probes: Vec::new(),
            walls: WallLayout::default(),
            observers: ProbeObservers::new(),
            min_extent: settings.min_extent,
            max_bound_probes: settings.max_bound_probes.max(1),
            default_resolution: settings.default_resolution,
        }
    }

    // ── Observers ───────────────────────────────────────────────────────────

    pub fn subscribe(&mut self, observer: ProbeObserver) -> SubscriptionId {
        self.observers.subscribe(observer)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    fn emit_set_changed(&mut self) {
        let ids = self.ids();
        self.observers.emit(&ProbeEvent::SetChanged { ids });
    }

    fn emit_walls_changed(&mut self) {
        let wall_count = self.walls.len();
        self.observers.emit(&ProbeEvent::WallsChanged { wall_count });
    }

    pub(crate) fn emit_radiance_changed(&mut self, id: ProbeId) {
        self.observers.emit(&ProbeEvent::RadianceChanged { id });
    }

    fn emit_volume_changed(&mut self, index: usize) {
        let volume = &self.probes[index];
        let event = ProbeEvent::VolumeChanged {
            id: volume.id().clone(),
            center: volume.center(),
            size: volume.size(),
        };
        self.observers.emit(&event);
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    pub fn get(&self, id: &ProbeId) -> Option<&ProbeVolume> {
        self.probes.iter().find(|p| p.id() == id)
    }

    pub(crate) fn get_mut(&mut self, id: &ProbeId) -> Option<&mut ProbeVolume> {
        self.probes.iter_mut().find(|p| p.id() == id)
    }

    pub fn index_of(&self, id: &ProbeId) -> Option<usize> {
        self.probes.iter().position(|p| p.id() == id)
    }

    pub fn contains(&self, id: &ProbeId) -> bool {
        self.index_of(id).is_some()
    }

    /// Probes in insertion order.
    pub fn all(&self) -> &[ProbeVolume] {
        &self.probes
    }

    pub fn ids(&self) -> Vec<ProbeId> {
        self.probes.iter().map(|p| p.id().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub fn walls(&self) -> &WallLayout {
        &self.walls
    }

    pub fn default_resolution(&self) -> ProbeResolution {
        self.default_resolution
    }

    /// Ids flagged for capture, in insertion order.
    pub fn pending_captures(&self) -> Vec<ProbeId> {
        self.probes
            .iter()
            .filter(|p| p.needs_capture())
            .map(|p| p.id().clone())
            .collect()
    }

    // ── Bound-set limit ─────────────────────────────────────────────────────

    /// Compiled maximum of probes bound to one surface.
    pub fn max_bound_probes(&self) -> u32 {
        self.max_bound_probes
    }

    pub fn set_max_bound_probes(&mut self, max: u32) {
        self.max_bound_probes = max.max(1);
    }

    /// Truncate a priority-ordered candidate list to the bound maximum.
    /// Returns how many trailing (lowest priority) entries were dropped.
    pub fn cap_bound_set<T>(&self, ordered: &mut Vec<T>) -> usize {
        let max = self.max_bound_probes as usize;
        let dropped = ordered.len().saturating_sub(max);
        ordered.truncate(max);
        dropped
    }

    // ── Set mutations ───────────────────────────────────────────────────────

    pub fn add(&mut self, mut volume: ProbeVolume) -> Result<()> {
        if self.contains(volume.id()) {
            return Err(Error::DuplicateProbe(volume.id().to_string()));
        }
        volume.clamp_extent(self.min_extent)?;
        log::debug!(
            "Added probe '{}' at {:?} size {:?}",
            volume.id(),
            volume.center(),
            volume.size()
        );
        self.probes.push(volume);
        self.emit_set_changed();
        Ok(())
    }

    /// Create and add a probe with the default resolution.
    pub fn create(&mut self, id: impl Into<ProbeId>, center: Vec3, size: Vec3) -> Result<&ProbeVolume> {
        let volume =
            ProbeVolume::new_clamped(id, center, size, self.min_extent)?.with_resolution(self.default_resolution);
        let index = self.probes.len();
        self.add(volume)?;
        Ok(&self.probes[index])
    }

    /// Remove a probe, releasing its radiance map and unassigning its walls.
    pub fn remove(&mut self, id: &ProbeId) -> Result<ProbeVolume> {
        let index = self
            .index_of(id)
            .ok_or_else(|| Error::UnknownProbe(id.to_string()))?;
        let mut volume = self.probes.remove(index);
        volume.release_gpu_resources();
        log::debug!("Removed probe '{}'", id);

        let walls_changed = self.walls.unassign_probe(id);
        self.emit_set_changed();
        if walls_changed {
            self.emit_walls_changed();
        }
        Ok(volume)
    }

    /// Replace every probe at once. Duplicate ids are rejected before
    /// anything changes.
    pub fn replace_all(&mut self, volumes: Vec<ProbeVolume>) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for volume in &volumes {
            if !seen.insert(volume.id().clone()) {
                return Err(Error::DuplicateProbe(volume.id().to_string()));
            }
        }

        let mut volumes = volumes;
        for volume in volumes.iter_mut() {
            volume.clamp_extent(self.min_extent)?;
        }

        for old in self.probes.iter_mut() {
            old.release_gpu_resources();
        }
        self.probes = volumes;

        let stale: Vec<ProbeId> = self
            .walls
            .probes()
            .iter()
            .filter(|id| !self.probes.iter().any(|p| p.id() == *id))
            .cloned()
            .collect();
        let mut walls_changed = false;
        for id in &stale {
            walls_changed |= self.walls.unassign_probe(id);
        }

        log::info!("Probe set replaced ({} probes)", self.probes.len());
        self.emit_set_changed();
        if walls_changed {
            self.emit_walls_changed();
        }
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.replace_all(Vec::new())
    }

    // ── Volume edits ────────────────────────────────────────────────────────

    fn edit<F>(&mut self, id: &ProbeId, f: F) -> Result<()>
    where
        F: FnOnce(&mut ProbeVolume, f32) -> Result<()>,
    {
        let index = self
            .index_of(id)
            .ok_or_else(|| Error::UnknownProbe(id.to_string()))?;
        let min_extent = self.min_extent;
        f(&mut self.probes[index], min_extent)?;
        self.emit_volume_changed(index);
        Ok(())
    }

    pub fn set_box(&mut self, id: &ProbeId, center: Vec3, size: Vec3) -> Result<()> {
        self.edit(id, |volume, min_extent| volume.set_box(center, size, min_extent))
    }

    pub fn set_center(&mut self, id: &ProbeId, center: Vec3) -> Result<()> {
        self.edit(id, |volume, min_extent| {
            let size = volume.size();
            volume.set_box(center, size, min_extent)
        })
    }

    pub fn set_size(&mut self, id: &ProbeId, size: Vec3) -> Result<()> {
        self.edit(id, |volume, min_extent| {
            let center = volume.center();
            volume.set_box(center, size, min_extent)
        })
    }

    /// Derive the vertical extent of a probe from scene bounds.
    pub fn fit_vertical(&mut self, id: &ProbeId, scene_bounds: &Aabb) -> Result<()> {
        if !scene_bounds.is_finite() {
            return Err(Error::InvalidVolume(format!(
                "cannot fit probe '{}' to non-finite scene bounds",
                id
            )));
        }
        self.edit(id, |volume, min_extent| {
            let mut center = volume.center();
            let mut size = volume.size();
            center.y = scene_bounds.center().y;
            size.y = scene_bounds.extents().y;
            volume.set_box(center, size, min_extent)
        })
    }

    pub fn set_resolution(&mut self, id: &ProbeId, resolution: ProbeResolution) -> Result<()> {
        self.edit(id, |volume, _| {
            volume.set_resolution(resolution);
            Ok(())
        })
    }

    pub fn set_auto_update(&mut self, id: &ProbeId, auto_update: bool) -> Result<()> {
        self.edit(id, |volume, _| {
            volume.set_auto_update(auto_update);
            Ok(())
        })
    }

    pub fn set_visible(&mut self, id: &ProbeId, visible: bool) -> Result<()> {
        self.edit(id, |volume, _| {
            volume.set_visible(visible);
            Ok(())
        })
    }

    pub fn set_controls_visible(&mut self, id: &ProbeId, visible: bool) -> Result<()> {
        self.edit(id, |volume, _| {
            volume.set_controls_visible(visible);
            Ok(())
        })
    }

    pub fn request_capture(&mut self, id: &ProbeId) -> Result<()> {
        let volume = self
            .get_mut(id)
            .ok_or_else(|| Error::UnknownProbe(id.to_string()))?;
        volume.request_capture();
        Ok(())
    }

    pub fn request_capture_all(&mut self) {
        for volume in self.probes.iter_mut() {
            volume.request_capture();
        }
    }

    /// Store a fresh capture for `id`, destroying the previous map.
    pub fn install_radiance_map(&mut self, id: &ProbeId, map: RadianceMap) -> Result<()> {
        let volume = self
            .get_mut(id)
            .ok_or_else(|| Error::UnknownProbe(id.to_string()))?;
        volume.set_radiance_map(map);
        self.emit_radiance_changed(id.clone());
        Ok(())
    }

    /// Destroy every radiance map and flag all probes for capture, for when
    /// the device the maps live on goes away.
    pub fn release_radiance_maps(&mut self) {
        let mut released = Vec::new();
        for volume in self.probes.iter_mut() {
            if volume.radiance_map().is_some() {
                released.push(volume.id().clone());
            }
            volume.release_gpu_resources();
            volume.request_capture();
        }
        for id in released {
            self.emit_radiance_changed(id);
        }
    }

    // ── Walls ───────────────────────────────────────────────────────────────

    /// Install a wall layout. Every probe it lists must be registered.
    pub fn set_walls(&mut self, layout: WallLayout) -> Result<()> {
        if let Some(unknown) = layout.probes().iter().find(|id| !self.contains(id)) {
            return Err(Error::UnknownProbe(unknown.to_string()));
        }
        log::debug!("Installed wall layout ({} walls)", layout.len());
        self.walls = layout;
        self.emit_walls_changed();
        Ok(())
    }

    /// Validate and install a Walls JSON document.
    pub fn load_walls_json(&mut self, json: &str) -> Result<()> {
        let layout = WallLayout::from_json(json)?;
        self.set_walls(layout)
    }

    pub fn walls_document(&self) -> WallsDocument {
        self.walls.to_document()
    }

    pub fn clear_walls(&mut self) {
        self.walls = WallLayout::default();
        self.emit_walls_changed();
    }

    // ── Interchange ─────────────────────────────────────────────────────────

    pub fn to_probe_set(&self) -> ProbeSet {
        ProbeSet::from_volumes(&self.probes)
    }

    pub fn serialize(&self) -> Result<String> {
        self.to_probe_set().to_json()
    }

    /// Parse a ProbeSet into volumes without touching any registry.
    pub fn deserialize(json: &str, min_extent: f32) -> Result<Vec<ProbeVolume>> {
        ProbeSet::from_json(json)?.into_volumes(min_extent)
    }

    /// Replace the registry contents with a ProbeSet document.
    /// Validation happens before any mutation.
    pub fn load_json(&mut self, json: &str) -> Result<()> {
        let volumes = Self::deserialize(json, self.min_extent)?;
        self.replace_all(volumes)
    }
}

impl Default for ProbeRegistry {
    fn default() -> Self {
        Self::new(&ProbeSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder(registry: &mut ProbeRegistry) -> Arc<Mutex<Vec<ProbeEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        registry.subscribe(Box::new(move |event| sink.lock().unwrap().push(event.clone())));
        events
    }

    fn two_probes() -> ProbeRegistry {
        let mut registry = ProbeRegistry::default();
        registry.create("a", Vec3::ZERO, Vec3::splat(4.0)).unwrap();
        registry.create("b", Vec3::new(10.0, 0.0, 0.0), Vec3::splat(4.0)).unwrap();
        registry
    }

    #[test]
    fn test_add_rejects_duplicates() {
        let mut registry = two_probes();
        let dup = ProbeVolume::new("a", Vec3::ONE, Vec3::ONE).unwrap();
        assert!(matches!(registry.add(dup), Err(Error::DuplicateProbe(_))));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_events_fire_on_mutation() {
        let mut registry = ProbeRegistry::default();
        let events = recorder(&mut registry);

        registry.create("a", Vec3::ZERO, Vec3::ONE).unwrap();
        registry.set_center(&"a".into(), Vec3::X).unwrap();
        registry.remove(&"a".into()).unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], ProbeEvent::SetChanged { ids: vec!["a".into()] });
        assert_eq!(
            events[1],
            ProbeEvent::VolumeChanged {
                id: "a".into(),
                center: Vec3::X,
                size: Vec3::ONE
            }
        );
        assert_eq!(events[2], ProbeEvent::SetChanged { ids: vec![] });
    }

    #[test]
    fn test_unknown_probe_edits_fail() {
        let mut registry = two_probes();
        assert!(matches!(
            registry.set_size(&"missing".into(), Vec3::ONE),
            Err(Error::UnknownProbe(_))
        ));
        assert!(registry.remove(&"missing".into()).is_err());
    }

    #[test]
    fn test_edit_clamps_degenerate_size() {
        let mut registry = two_probes();
        registry.set_size(&"a".into(), Vec3::new(2.0, 0.0, 2.0)).unwrap();
        assert_eq!(registry.get(&"a".into()).unwrap().size().y, 0.01);
    }

    #[test]
    fn test_min_extent_below_default_is_honored() {
        let settings = ProbeSettings::default().with_min_extent(0.001);
        let mut registry = ProbeRegistry::new(&settings);
        let size = Vec3::new(0.005, 2.0, 2.0);
        assert_eq!(registry.create("thin", Vec3::ZERO, size).unwrap().size(), size);

        registry.set_size(&"thin".into(), Vec3::new(0.0005, 2.0, 2.0)).unwrap();
        assert_eq!(registry.get(&"thin".into()).unwrap().size().x, 0.001);

        let json = r#"[{"id":"sliver","center":[0,0,0],"size":[0.002,1,1],"resolution":256,"schemaTag":"probe.toJSON()"}]"#;
        registry.load_json(json).unwrap();
        assert_eq!(registry.get(&"sliver".into()).unwrap().size().x, 0.002);
    }

    #[test]
    fn test_fit_vertical_uses_scene_bounds() {
        let mut registry = two_probes();
        let bounds = Aabb::new(Vec3::new(-20.0, -1.0, -20.0), Vec3::new(20.0, 3.0, 20.0));
        registry.fit_vertical(&"b".into(), &bounds).unwrap();
        let b = registry.get(&"b".into()).unwrap();
        assert_eq!(b.center(), Vec3::new(10.0, 1.0, 0.0));
        assert_eq!(b.size(), Vec3::new(4.0, 4.0, 4.0));
    }

    #[test]
    fn test_serialize_round_trip() {
        let mut registry = two_probes();
        registry.set_resolution(&"b".into(), ProbeResolution::R2048).unwrap();
        let json = registry.serialize().unwrap();

        let mut restored = ProbeRegistry::default();
        restored.load_json(&json).unwrap();
        assert_eq!(restored.to_probe_set(), registry.to_probe_set());
        assert_eq!(restored.pending_captures().len(), 2);
    }

    #[test]
    fn test_bad_json_leaves_registry_untouched() {
        let mut registry = two_probes();
        let events = recorder(&mut registry);
        assert!(registry.load_json(r#"[{"id":"x","schemaTag":"nope"}]"#).is_err());
        assert_eq!(registry.ids(), vec![ProbeId::from("a"), ProbeId::from("b")]);
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_walls_must_reference_registered_probes() {
        let mut registry = two_probes();
        let json = r#"{"points":[[0,0],[1,0]],"walls":[[0,1,0]],"probes":["ghost"]}"#;
        assert!(matches!(registry.load_walls_json(json), Err(Error::UnknownProbe(_))));
        assert!(registry.walls().is_empty());

        let bad_index = r#"{"points":[[0,0]],"walls":[[0,1,-1]],"probes":[]}"#;
        assert!(matches!(registry.load_walls_json(bad_index), Err(Error::InvalidWalls(_))));
    }

    #[test]
    fn test_remove_unassigns_walls() {
        let mut registry = two_probes();
        let events = recorder(&mut registry);
        let json = r#"{"points":[[0,0],[1,0],[1,1]],"walls":[[0,1,0],[1,2,1]],"probes":["a","b"]}"#;
        registry.load_walls_json(json).unwrap();
        registry.remove(&"a".into()).unwrap();

        let doc = registry.walls_document();
        assert_eq!(doc.probes, vec![ProbeId::from("b")]);
        assert_eq!(doc.walls, vec![[0, 1, -1], [1, 2, 0]]);
        assert_eq!(
            events.lock().unwrap().last(),
            Some(&ProbeEvent::WallsChanged { wall_count: 2 })
        );
    }

    #[test]
    fn test_cap_bound_set_drops_tail() {
        let mut registry = ProbeRegistry::default();
        registry.set_max_bound_probes(2);
        let mut ordered = vec!["near", "mid", "far"];
        assert_eq!(registry.cap_bound_set(&mut ordered), 1);
        assert_eq!(ordered, vec!["near", "mid"]);
    }

    #[test]
    fn test_pending_captures_follow_requests() {
        let mut registry = two_probes();
        assert_eq!(registry.pending_captures().len(), 2);
        registry.request_capture(&"a".into()).unwrap();
        registry.request_capture_all();
        assert!(registry.request_capture(&"zzz".into()).is_err());
    }
}
