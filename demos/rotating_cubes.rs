//! Spawns a ring and a grid of cubes, spins them for a few simulated frames
//! and prints where they ended up.
//!
//! Run with `RUST_LOG=cubecs=debug` to see the scheduler at work.

use cubecs::cubes::{GridSpawner, RingSpawner, Rotation, RotationSystem, SpawnerSystem, Translation};
use cubecs::{Query, Read, Scheduler, Systems, World};

const FRAME_TIME: f32 = 1.0 / 60.0;
const FRAMES: usize = 120;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut world = World::new();
    world.create_with((RingSpawner {
        count: 8,
        radius: 4.0,
        rotation_speed: 1.5,
    },));
    world.create_with((GridSpawner {
        columns: 3,
        rows: 3,
        rotation_speed: -0.75,
    },));

    let scheduler = Scheduler::builder().with_thread_name("cubes").build(world)?;
    let mut systems = Systems::new()
        .with_system(SpawnerSystem)
        .with_system(RotationSystem);

    for _ in 0..FRAMES {
        systems.tick(&scheduler, FRAME_TIME)?;
    }

    let world = scheduler.shutdown();
    Query::<(Read<Translation>, Read<Rotation>)>::new().for_each(
        &world,
        |entity, (translation, rotation)| {
            let (axis, angle) = rotation.0.to_axis_angle();
            println!(
                "{:>6} at {:>6.2} {:>6.2}  turned {:>6.3} rad about {:.1}",
                entity.to_string(),
                translation.0.x,
                translation.0.z,
                angle,
                axis
            );
        },
    )?;

    Ok(())
}
