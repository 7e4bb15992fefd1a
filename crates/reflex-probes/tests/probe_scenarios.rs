// tests/probe_scenarios.rs
// End-to-end probe behavior through the public API: registry edits,
// interchange, wall routing and bound-set overflow.

use glam::Vec3;
use reflex_probes::assignment::select_probe;
use reflex_probes::{
    verify_walls, ProbeAssignment, ProbeEvent, ProbeRegistry, ProbeResolution, ProbeSelection,
    ProbeSet, ProbeSettings, Surface, SurfaceKind, WallLayout, WallsDocument,
};
use std::sync::{Arc, Mutex};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Three rooms: east (around the origin of the L), west and north.
fn l_shaped_house() -> ProbeRegistry {
    let mut registry = ProbeRegistry::default();
    registry
        .create("east", Vec3::new(5.0, 0.0, 0.0), Vec3::new(10.0, 3.0, 10.0))
        .unwrap();
    registry
        .create("west", Vec3::new(-5.0, 0.0, 0.0), Vec3::new(10.0, 3.0, 10.0))
        .unwrap();
    registry
        .create("north", Vec3::new(5.0, 0.0, 10.0), Vec3::new(10.0, 3.0, 10.0))
        .unwrap();

    // Wall along x = 0 leads west, wall along z = 5 leads north
    let document = WallsDocument {
        points: vec![[0.0, -5.0], [0.0, 5.0], [10.0, 5.0]],
        walls: vec![[0, 1, 0], [1, 2, 1]],
        probes: vec!["west".into(), "north".into()],
    };
    registry
        .set_walls(WallLayout::from_document(document).unwrap())
        .unwrap();
    registry
}

#[test]
fn test_second_probe_does_not_steal_inside_surface() {
    init_logging();
    let mut registry = ProbeRegistry::default();
    registry.create("first", Vec3::ZERO, Vec3::splat(4.0)).unwrap();

    let surface = Surface::new(1, Vec3::new(1.0, 0.0, 0.0));
    let mut assignment = ProbeAssignment::new(&ProbeSettings::default());
    assignment.attach(&mut registry);

    let nearest = assignment.binding_for(&registry, &surface).nearest().cloned().unwrap();
    assert_eq!(nearest.id.as_str(), "first");
    assert_eq!(nearest.distance_squared, 0.0);

    registry
        .create("second", Vec3::new(10.0, 0.0, 0.0), Vec3::splat(4.0))
        .unwrap();
    let binding = assignment.binding_for(&registry, &surface);
    assert_eq!(binding.probe_count(), 2);
    assert_eq!(binding.probes[0].id.as_str(), "first");
    assert_eq!(binding.probes[0].distance_squared, 0.0);
    // Nearest face of the second box is at x = 8
    assert_eq!(binding.probes[1].distance_squared, 49.0);
}

#[test]
fn test_nearest_selection_is_deterministic() {
    let registry = l_shaped_house();
    let position = Vec3::new(3.0, 0.0, 4.0);
    let first = select_probe(&registry, position, SurfaceKind::General, Vec3::Y, 8.0).unwrap();
    for _ in 0..16 {
        let again = select_probe(&registry, position, SurfaceKind::General, Vec3::Y, 8.0).unwrap();
        assert_eq!(again, first);
    }
}

#[test]
fn test_floor_reflection_routes_through_first_wall() {
    init_logging();
    let registry = l_shaped_house();
    let floor = Vec3::new(5.0, -1.5, 0.0);

    // Toward -x: crosses the x = 0 wall 5 units away, never the z = 5 wall
    let reflection = Vec3::new(-1.0, 1.0, 0.0).normalize();
    match select_probe(&registry, floor, SurfaceKind::Floor, reflection, 8.0).unwrap() {
        ProbeSelection::WallRouted(route) => {
            assert_eq!(route.probe.as_str(), "west");
            assert_eq!(route.wall_index, 0);
            assert!((route.distance - 5.0).abs() < 1e-4);
        }
        other => panic!("expected a wall route, got {other:?}"),
    }

    // Toward +z: crosses the z = 5 wall instead
    let reflection = Vec3::new(0.0, 1.0, 1.0).normalize();
    let selection = select_probe(&registry, floor, SurfaceKind::Floor, reflection, 8.0).unwrap();
    assert_eq!(selection.id().as_str(), "north");
}

#[test]
fn test_floor_reflection_falls_back_to_nearest() {
    let registry = l_shaped_house();
    let floor = Vec3::new(5.0, -1.5, 0.0);

    // Toward +x crosses neither wall
    let away = Vec3::new(1.0, 1.0, 0.0).normalize();
    let selection = select_probe(&registry, floor, SurfaceKind::Floor, away, 8.0).unwrap();
    assert!(matches!(selection, ProbeSelection::Nearest { .. }));
    assert_eq!(selection.id().as_str(), "east");

    // The west wall is beyond a short blend distance
    let west = Vec3::new(-1.0, 1.0, 0.0).normalize();
    let selection = select_probe(&registry, floor, SurfaceKind::Floor, west, 3.0).unwrap();
    assert_eq!(selection.id().as_str(), "east");

    // Walls never apply to general surfaces
    let selection = select_probe(&registry, floor, SurfaceKind::General, west, 8.0).unwrap();
    assert_eq!(selection.id().as_str(), "east");
}

#[test]
fn test_overflow_drops_farthest_probe() {
    init_logging();
    let settings = ProbeSettings::default().with_max_bound_probes(3);
    let mut registry = ProbeRegistry::new(&settings);
    for (i, x) in [0.0, 10.0, 20.0].into_iter().enumerate() {
        registry
            .create(format!("probe_{i}"), Vec3::new(x, 0.0, 0.0), Vec3::splat(2.0))
            .unwrap();
    }
    let mut assignment = ProbeAssignment::new(&settings);
    assignment.attach(&mut registry);

    let surface = Surface::new(7, Vec3::new(1.0, 0.0, 0.0));
    assert_eq!(assignment.binding_for(&registry, &surface).probe_count(), 3);

    // One more probe than the maximum, farther than all others
    registry
        .create("far", Vec3::new(40.0, 0.0, 0.0), Vec3::splat(2.0))
        .unwrap();
    let binding = assignment.binding_for(&registry, &surface);
    assert_eq!(binding.probe_count(), 3);
    assert_eq!(binding.dropped, 1);
    assert!(binding.probes.iter().all(|p| p.id.as_str() != "far"));
}

#[test]
fn test_probe_set_round_trip() {
    let mut registry = l_shaped_house();
    registry
        .set_resolution(&"north".into(), ProbeResolution::R1024)
        .unwrap();
    let json = registry.serialize().unwrap();

    let restored = ProbeSet::from_json(&json).unwrap();
    assert_eq!(restored, registry.to_probe_set());

    let mut copy = ProbeRegistry::default();
    copy.load_json(&json).unwrap();
    assert_eq!(copy.to_probe_set(), registry.to_probe_set());
    assert_eq!(
        copy.get(&"north".into()).unwrap().resolution(),
        ProbeResolution::R1024
    );
}

#[test]
fn test_walls_verification() {
    let empty = WallsDocument::from_json(r#"{"points":[],"walls":[],"probes":[]}"#).unwrap();
    assert!(verify_walls(&empty).is_ok());

    let broken =
        WallsDocument::from_json(r#"{"points":[[0,0],[1,0]],"walls":[[0,2,-1]],"probes":[]}"#)
            .unwrap();
    assert!(verify_walls(&broken).is_err());
    assert!(WallLayout::from_document(broken).is_err());
}

#[test]
fn test_removing_a_probe_unassigns_its_walls() {
    let mut registry = l_shaped_house();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    registry.subscribe(Box::new(move |event| sink.lock().unwrap().push(event.clone())));

    registry.remove(&"west".into()).unwrap();

    let walls = registry.walls();
    assert_eq!(walls.len(), 2);
    assert!(walls.segments()[0].probe.is_none());
    assert_eq!(walls.segments()[1].probe.as_ref().unwrap().as_str(), "north");

    let events = events.lock().unwrap();
    assert!(matches!(events.first(), Some(ProbeEvent::SetChanged { .. })));
    assert!(matches!(events.last(), Some(ProbeEvent::WallsChanged { wall_count: 2 })));
}

#[test]
fn test_box_edit_invalidates_binding() {
    let mut registry = l_shaped_house();
    let mut assignment = ProbeAssignment::new(&ProbeSettings::default());
    assignment.attach(&mut registry);

    let surface = Surface::new(1, Vec3::new(-12.0, 0.0, 0.0));
    let before = assignment.binding_for(&registry, &surface).nearest().unwrap().clone();
    assert_eq!(before.id.as_str(), "west");
    assert!(before.distance_squared > 0.0);

    registry
        .set_box(&"west".into(), Vec3::new(-8.0, 0.0, 0.0), Vec3::new(12.0, 3.0, 10.0))
        .unwrap();
    let nearest = assignment.binding_for(&registry, &surface).nearest().unwrap();
    assert_eq!(nearest.id.as_str(), "west");
    assert_eq!(nearest.distance_squared, 0.0);
}

#[test]
fn test_bound_slots_agree_with_selection_across_the_floor() {
    init_logging();
    let mut registry = l_shaped_house();
    let mut assignment = ProbeAssignment::new(&ProbeSettings::default());
    assignment.attach(&mut registry);

    let floor = Surface::floor(11, Vec3::new(5.0, -1.5, 0.0));
    let binding = assignment.binding_for(&registry, &floor).clone();
    let slots: Vec<&str> = binding.probes.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(slots, vec!["east", "west", "north"]);

    let directions = [
        Vec3::new(-1.0, 1.0, 0.0),
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(0.0, 1.0, 1.0),
        Vec3::new(0.0, 1.0, -1.0),
        Vec3::new(-1.0, 1.0, 1.0),
        Vec3::Y,
    ];
    for x in [-9.0, -5.0, -0.5, 0.0, 2.5, 5.0, 9.5] {
        for z in [-4.0, 0.0, 4.9, 5.0, 8.0, 14.0] {
            let fragment = Vec3::new(x, -1.5, z);
            for direction in directions {
                let reflection = direction.normalize();
                let expected = select_probe(
                    &registry,
                    fragment,
                    SurfaceKind::Floor,
                    reflection,
                    binding.wall_blend_distance,
                )
                .unwrap();
                let slot = binding.select_slot(&registry, fragment, reflection).unwrap();
                assert_eq!(
                    &binding.probes[slot as usize].id,
                    expected.id(),
                    "fragment {fragment:?} reflection {reflection:?}"
                );
            }
        }
    }
}
