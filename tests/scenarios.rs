//! End-to-end runs of the spinning cubes workload.

use std::f32::consts::{FRAC_PI_2, TAU};

use cubecs::cubes::{
    FixedRateRotationSystem, GridSpawner, RingSpawner, RotateJob, Rotation, RotationSpeed,
    RotationSystem, SpawnerSystem, Translation,
};
use cubecs::{EcsError, Query, Read, Scheduler, SchedulerBuilder, Systems, World};
use glam::{Quat, Vec3};

fn scheduler(world: World) -> Scheduler {
    SchedulerBuilder::new()
        .with_threads(3)
        .build(world)
        .expect("workers start")
}

fn translations(world: &World) -> Vec<Vec3> {
    let mut found = Vec::new();
    Query::<(Read<Translation>,)>::new()
        .for_each(world, |_, (translation,)| found.push(translation.0))
        .expect("no conflicting borrows");
    found
}

#[test]
fn ring_spawner_places_cubes_and_disappears() {
    let mut world = World::new();
    let spawner = world.create_with((RingSpawner {
        count: 4,
        radius: 2.0,
        rotation_speed: 1.0,
    },));

    let scheduler = scheduler(world);
    let mut systems = Systems::new().with_system(SpawnerSystem);
    systems.tick(&scheduler, 0.016).expect("tick");

    let world = scheduler.world();
    assert!(!world.is_alive(spawner));
    assert_eq!(world.entity_count(), 4);

    let mut positions = translations(&world);
    positions.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.z.total_cmp(&b.z)));

    for position in &positions {
        assert!((position.x.hypot(position.z) - 2.0).abs() < 1e-5);
        assert_eq!(position.y, 0.0);
    }

    let mut expected: Vec<_> = (0..4)
        .map(|i| {
            let theta = i as f32 / 4.0 * TAU;
            Vec3::new(2.0 * theta.sin(), 0.0, 2.0 * theta.cos())
        })
        .collect();
    expected.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.z.total_cmp(&b.z)));

    for (found, expected) in positions.iter().zip(&expected) {
        assert!(found.abs_diff_eq(*expected, 1e-5), "{} != {}", found, expected);
    }
}

#[test]
fn spawner_is_one_shot_across_ticks() {
    let mut world = World::new();
    world.create_with((GridSpawner {
        columns: 4,
        rows: 3,
        rotation_speed: 0.5,
    },));

    let scheduler = scheduler(world);
    let mut systems = Systems::new()
        .with_system(SpawnerSystem)
        .with_system(RotationSystem);

    for _ in 0..5 {
        systems.tick(&scheduler, 0.1).expect("tick");
        assert_eq!(scheduler.world().entity_count(), 12);
    }
}

#[test]
fn quarter_turn_after_one_second() {
    let mut world = World::new();
    let cube = world.create_with((Rotation::default(), RotationSpeed(FRAC_PI_2)));

    let scheduler = scheduler(world);
    let mut systems = Systems::new().with_system(RotationSystem);
    systems.tick(&scheduler, 1.0).expect("tick");

    let world = scheduler.world();
    let rotation = world.get::<Rotation>(cube).expect("live").map(|r| r.0);
    let expected = Quat::from_axis_angle(Vec3::Y, FRAC_PI_2);
    assert!(rotation.map_or(false, |r| r.abs_diff_eq(expected, 1e-6)));
}

#[test]
fn fixed_rate_rotation_turns_everything() {
    let mut world = World::new();
    let bare = world.create_with((Rotation::default(),));
    let spinning = world.create_with((Rotation::default(), RotationSpeed(10.0)));

    let scheduler = scheduler(world);
    let mut systems = Systems::new().with_system(FixedRateRotationSystem);
    for _ in 0..4 {
        systems.tick(&scheduler, 0.5).expect("tick");
    }

    let world = scheduler.world();
    let expected = Quat::from_rotation_y(FRAC_PI_2 * 2.0);
    for cube in [bare, spinning] {
        let rotation = world.get::<Rotation>(cube).expect("live").map(|r| r.0);
        assert!(rotation.map_or(false, |r| r.abs_diff_eq(expected, 1e-5)));
    }
}

#[test]
fn zero_delta_leaves_rotations_bit_identical() {
    let mut world = World::new();
    let cubes = world.create_iter((0..100).map(|i| {
        let angle = i as f32 * 0.37;
        (
            Rotation(Quat::from_rotation_x(angle) * Quat::from_rotation_z(angle * 0.5)),
            RotationSpeed(i as f32),
        )
    }));

    let before: Vec<_> = cubes
        .iter()
        .map(|&cube| {
            world
                .get::<Rotation>(cube)
                .expect("live")
                .map(|r| r.0.to_array().map(f32::to_bits))
        })
        .collect();

    let scheduler = scheduler(world);
    let handle = scheduler
        .schedule(RotateJob { delta_time: 0.0 }, &[])
        .expect("admitted");
    scheduler.complete(handle).expect("own handle");

    let world = scheduler.shutdown();
    let after: Vec<_> = cubes
        .iter()
        .map(|&cube| {
            world
                .get::<Rotation>(cube)
                .expect("live")
                .map(|r| r.0.to_array().map(f32::to_bits))
        })
        .collect();

    assert_eq!(before, after);
}

#[test]
fn double_destroy_reports_stale() {
    let mut world = World::new();
    let cube = world.create_with((Rotation::default(),));

    assert_eq!(world.destroy(cube), Ok(()));
    assert_eq!(world.destroy(cube), Err(EcsError::StaleEntity { entity: cube }));
}
