//! Spinning cubes: the components, jobs and systems of the demo workload.

use std::f32::consts::{FRAC_PI_2, TAU};

use glam::{Quat, Vec3};
use tracing::debug;

use crate::{
    entity::Entity,
    error::{EcsError, ScheduleError},
    job::{dispatch::Scheduler, ForEachJob, JobHandle, StructuralJob},
    system::System,
    world::{
        query::{Query, QueryItem, Read, Write},
        World,
    },
};

#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct Translation(pub Vec3);

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Rotation(pub Quat);

impl Default for Rotation {
    fn default() -> Self {
        Self(Quat::IDENTITY)
    }
}

/// Radians per second about the up axis.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct RotationSpeed(pub f32);

/// Spawns `count` cubes evenly spaced on a circle of `radius` around the
/// origin, then disappears.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct RingSpawner {
    pub count: u32,
    pub radius: f32,
    pub rotation_speed: f32,
}

/// Spawns a `columns` by `rows` grid of cubes one unit apart, centred on the
/// origin, then disappears.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct GridSpawner {
    pub columns: u32,
    pub rows: u32,
    pub rotation_speed: f32,
}

impl RingSpawner {
    pub fn positions(&self) -> impl Iterator<Item = Vec3> + '_ {
        (0..self.count).map(move |i| {
            let theta = i as f32 / self.count as f32 * TAU;
            Vec3::new(self.radius * theta.sin(), 0.0, self.radius * theta.cos())
        })
    }
}

impl GridSpawner {
    pub fn positions(&self) -> impl Iterator<Item = Vec3> + '_ {
        let half_columns = (self.columns / 2) as i64;
        let half_rows = (self.rows / 2) as i64;

        (0..self.columns).flat_map(move |x| {
            (0..self.rows).map(move |z| {
                Vec3::new(
                    (x as i64 - half_columns) as f32,
                    0.0,
                    (z as i64 - half_rows) as f32,
                )
            })
        })
    }
}

fn rotate(rotation: &mut Rotation, angle: f32) {
    if angle != 0.0 {
        rotation.0 = Quat::from_rotation_y(angle) * rotation.0;
    }
}

/// Turns every cube by its own [`RotationSpeed`].
#[derive(Clone, Copy, Debug)]
pub struct RotateJob {
    pub delta_time: f32,
}

impl ForEachJob for RotateJob {
    type Data = (Write<Rotation>, Read<RotationSpeed>);

    fn execute(&self, _: Entity, (rotation, speed): QueryItem<'_, Self::Data>) {
        rotate(rotation, self.delta_time * speed.0);
    }
}

/// Turns everything with a [`Rotation`] a quarter turn per second.
#[derive(Clone, Copy, Debug)]
pub struct FixedRateRotateJob {
    pub delta_time: f32,
}

impl FixedRateRotateJob {
    pub const SPEED: f32 = FRAC_PI_2;
}

impl ForEachJob for FixedRateRotateJob {
    type Data = (Write<Rotation>,);

    fn execute(&self, _: Entity, (rotation,): QueryItem<'_, Self::Data>) {
        rotate(rotation, self.delta_time * Self::SPEED);
    }
}

/// Consumes every spawner entity, replacing it with the cubes it describes.
#[derive(Clone, Copy, Debug, Default)]
pub struct SpawnJob;

impl SpawnJob {
    fn spawn(world: &mut World, positions: impl Iterator<Item = Vec3>, speed: f32) -> usize {
        positions
            .map(|position| {
                world.create_with((
                    Translation(position),
                    Rotation::default(),
                    RotationSpeed(speed),
                ))
            })
            .count()
    }
}

impl StructuralJob for SpawnJob {
    fn run(&mut self, world: &mut World) -> Result<(), EcsError> {
        let mut rings = Vec::new();
        Query::<(Read<RingSpawner>,)>::new()
            .for_each(world, |entity, (spawner,)| rings.push((entity, *spawner)))?;

        let mut grids = Vec::new();
        Query::<(Read<GridSpawner>,)>::new()
            .for_each(world, |entity, (spawner,)| grids.push((entity, *spawner)))?;

        if rings.is_empty() && grids.is_empty() {
            return Ok(());
        }

        let mut spawned = 0;
        for (entity, spawner) in &rings {
            spawned += Self::spawn(world, spawner.positions(), spawner.rotation_speed);
            world.destroy(*entity)?;
        }
        for (entity, spawner) in &grids {
            spawned += Self::spawn(world, spawner.positions(), spawner.rotation_speed);
            world.destroy(*entity)?;
        }

        debug!(
            spawners = rings.len() + grids.len(),
            spawned, "spawners consumed"
        );

        Ok(())
    }
}

/// Schedules a [`RotateJob`] every tick.
#[derive(Debug, Default)]
pub struct RotationSystem;

impl System for RotationSystem {
    fn update(
        &mut self,
        scheduler: &Scheduler,
        delta_time: f32,
    ) -> Result<Option<JobHandle>, ScheduleError> {
        scheduler.schedule(RotateJob { delta_time }, &[]).map(Some)
    }
}

/// Schedules a [`FixedRateRotateJob`] every tick.
#[derive(Debug, Default)]
pub struct FixedRateRotationSystem;

impl System for FixedRateRotationSystem {
    fn update(
        &mut self,
        scheduler: &Scheduler,
        delta_time: f32,
    ) -> Result<Option<JobHandle>, ScheduleError> {
        scheduler
            .schedule(FixedRateRotateJob { delta_time }, &[])
            .map(Some)
    }
}

/// Schedules a [`SpawnJob`] every tick. Once the spawners are gone the job
/// finds nothing to do.
#[derive(Debug, Default)]
pub struct SpawnerSystem;

impl System for SpawnerSystem {
    fn update(&mut self, scheduler: &Scheduler, _: f32) -> Result<Option<JobHandle>, ScheduleError> {
        scheduler.schedule_structural(SpawnJob, &[]).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: Vec3, b: Vec3) {
        assert!(a.abs_diff_eq(b, 1e-5), "{} != {}", a, b);
    }

    #[test]
    fn ring_positions_lie_on_circle() {
        let spawner = RingSpawner {
            count: 4,
            radius: 2.0,
            rotation_speed: 1.0,
        };
        let positions: Vec<_> = spawner.positions().collect();

        assert_eq!(positions.len(), 4);
        assert_close(positions[0], Vec3::new(0.0, 0.0, 2.0));
        assert_close(positions[1], Vec3::new(2.0, 0.0, 0.0));
        assert_close(positions[2], Vec3::new(0.0, 0.0, -2.0));
        assert_close(positions[3], Vec3::new(-2.0, 0.0, 0.0));
    }

    #[test]
    fn grid_positions_are_centred() {
        let spawner = GridSpawner {
            columns: 3,
            rows: 2,
            rotation_speed: 0.0,
        };
        let positions: Vec<_> = spawner.positions().collect();

        assert_eq!(
            positions,
            vec![
                Vec3::new(-1.0, 0.0, -1.0),
                Vec3::new(-1.0, 0.0, 0.0),
                Vec3::new(0.0, 0.0, -1.0),
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, -1.0),
                Vec3::new(1.0, 0.0, 0.0),
            ]
        );
    }

    #[test]
    fn rotate_job_turns_by_speed() {
        let mut rotation = Rotation::default();
        let speed = RotationSpeed(FRAC_PI_2);

        RotateJob { delta_time: 1.0 }.execute(Entity::new(0, 0), (&mut rotation, &speed));

        assert!(rotation
            .0
            .abs_diff_eq(Quat::from_rotation_y(FRAC_PI_2), 1e-6));
    }

    #[test]
    fn zero_angle_is_bit_identical() {
        let start = Quat::from_rotation_x(0.3) * Quat::from_rotation_z(1.1);
        let mut rotation = Rotation(start);

        RotateJob { delta_time: 0.0 }.execute(Entity::new(0, 0), (&mut rotation, &RotationSpeed(5.0)));
        FixedRateRotateJob { delta_time: 0.0 }.execute(Entity::new(0, 0), (&mut rotation,));

        assert_eq!(rotation.0.to_array().map(f32::to_bits), start.to_array().map(f32::to_bits));
    }

    #[test]
    fn spawn_job_consumes_spawners() {
        let mut world = World::new();
        let ring = world.create_with((RingSpawner {
            count: 5,
            radius: 1.0,
            rotation_speed: 2.0,
        },));
        let grid = world.create_with((GridSpawner {
            columns: 2,
            rows: 2,
            rotation_speed: 3.0,
        },));

        SpawnJob.run(&mut world).expect("spawners are live");

        assert!(!world.is_alive(ring));
        assert!(!world.is_alive(grid));
        assert_eq!(world.entity_count(), 9);

        let cubes = Query::<(Read<Translation>, Read<Rotation>, Read<RotationSpeed>)>::new();
        assert_eq!(cubes.matching(&world).count(), 9);

        // Nothing left to spawn from.
        SpawnJob.run(&mut world).expect("no spawners");
        assert_eq!(world.entity_count(), 9);
    }
}
